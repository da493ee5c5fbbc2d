//! Source tree scanning, caching, and the reread barrier.

use kodama_testutil::TempDir;
use kodama_tree::{Facade, SourceTree, Tree, TreeError};

#[test]
fn scans_nested_fixture_in_sorted_order() {
    let dir = TempDir::with_fixture(&[
        ("zeta.txt", "z"),
        ("alpha/one.js", "1"),
        ("alpha/two.js", "2"),
        ("beta/", ""),
    ]);
    let tree = SourceTree::new(&dir.root()).unwrap();
    assert_eq!(
        tree.paths().unwrap(),
        vec!["alpha", "alpha/one.js", "alpha/two.js", "beta", "zeta.txt"]
    );
}

#[test]
fn stat_answers_metadata_and_root_sentinel() {
    let dir = TempDir::with_fixture(&[("file.txt", "abcdef")]);
    let tree = SourceTree::new(&dir.root()).unwrap();

    let entry = tree.stat("file.txt").unwrap();
    assert!(entry.is_file());
    assert_eq!(entry.size, Some(6));
    assert!(entry.mtime.unwrap() > 0);

    let root = tree.stat("").unwrap();
    assert!(root.is_dir());
    assert_eq!(root.relative_path, "");
}

#[test]
fn exists_on_unscanned_parent_stats_the_disk_directly() {
    let dir = TempDir::with_fixture(&[("deep/nested/file.txt", "x")]);
    let tree = SourceTree::new(&dir.root()).unwrap();
    // No entries() or readdir() yet, so nothing is scanned.
    assert!(tree.exists("deep/nested/file.txt").unwrap());
    assert!(!tree.exists("deep/nested/ghost.txt").unwrap());
}

#[test]
fn readdir_lists_one_level() {
    let dir = TempDir::with_fixture(&[("a/x.js", "x"), ("a/y.js", "y"), ("a/sub/z.js", "z")]);
    let tree = SourceTree::new(&dir.root()).unwrap();
    assert_eq!(tree.readdir("a").unwrap(), vec!["sub", "x.js", "y.js"]);
    assert!(matches!(
        tree.readdir("a/x.js").unwrap_err(),
        TreeError::NotDir(_)
    ));
}

#[test]
fn cache_holds_until_reread() {
    let dir = TempDir::with_fixture(&[("one.txt", "1")]);
    let tree = SourceTree::new(&dir.root()).unwrap();
    assert_eq!(tree.paths().unwrap(), vec!["one.txt"]);

    // Disk changes are invisible until the barrier.
    kodama_testutil::write_tree(dir.path(), &[("two.txt", "2")]);
    assert_eq!(tree.paths().unwrap(), vec!["one.txt"]);

    tree.reread(None).unwrap();
    assert_eq!(tree.paths().unwrap(), vec!["one.txt", "two.txt"]);
}

#[test]
fn changes_reports_the_cross_barrier_diff() {
    let dir = TempDir::with_fixture(&[("keep.txt", "k"), ("drop.txt", "d")]);
    let tree = SourceTree::new(&dir.root()).unwrap();
    let _ = tree.entries().unwrap();
    tree.reread(None).unwrap();

    std::fs::remove_file(dir.path().join("drop.txt")).unwrap();
    kodama_testutil::write_tree(dir.path(), &[("fresh/new.js", "n")]);

    let ops: Vec<String> = tree
        .changes()
        .unwrap()
        .iter()
        .map(|c| format!("{} {}", c.op, c.path))
        .collect();
    assert_eq!(ops, vec!["unlink drop.txt", "mkdir fresh", "create fresh/new.js"]);
}

#[test]
fn reread_can_move_the_root() {
    let first = TempDir::with_fixture(&[("a.txt", "a")]);
    let second = TempDir::with_fixture(&[("b.txt", "b")]);
    let tree = SourceTree::new(&first.root()).unwrap();
    assert_eq!(tree.paths().unwrap(), vec!["a.txt"]);

    tree.reread(Some(&second.root())).unwrap();
    assert_eq!(tree.paths().unwrap(), vec!["b.txt"]);
    assert_eq!(tree.root(), second.path());
}

#[test]
fn missing_subdirectory_scans_to_empty_not_error() {
    let dir = TempDir::new();
    let tree = SourceTree::new(&dir.root()).unwrap();
    assert!(tree.entries().unwrap().is_empty());
    assert!(!tree.exists("never/made").unwrap());
}

#[test]
fn broken_symlinks_are_discarded_during_scan() {
    let dir = TempDir::with_fixture(&[("real.txt", "r")]);
    #[cfg(unix)]
    std::os::unix::fs::symlink(
        dir.path().join("does-not-exist"),
        dir.path().join("dangling"),
    )
    .unwrap();
    let tree = SourceTree::new(&dir.root()).unwrap();
    assert_eq!(tree.paths().unwrap(), vec!["real.txt"]);
}

#[test]
fn read_file_errors_match_posix_text() {
    let dir = TempDir::with_fixture(&[("dir/", "")]);
    let tree = SourceTree::new(&dir.root()).unwrap();
    let err = tree.read_file("missing.txt").unwrap_err();
    assert!(err.to_string().starts_with("ENOENT:"));
    let err = tree.read_file("dir").unwrap_err();
    assert!(err.to_string().starts_with("EISDIR:"));
}
