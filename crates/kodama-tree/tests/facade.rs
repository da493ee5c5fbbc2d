//! Symlink composition: grafting one tree into another, and the delegator
//! mode a writable tree enters when its root is symlinked away.

use kodama_testutil::TempDir;
use kodama_tree::{Facade, SourceTree, Tree, TreeError, WritableTree};

fn vendor_fixture() -> (TempDir, SourceTree) {
    let dir = TempDir::with_fixture(&[
        ("lib/index.js", "module.exports = 1;"),
        ("lib/util/helper.js", "help"),
        ("README.md", "vendor docs"),
    ]);
    let tree = SourceTree::new(&dir.root()).unwrap();
    (dir, tree)
}

#[test]
fn directory_graft_expands_into_entries() {
    let (_vendor_dir, vendor) = vendor_fixture();
    let out = TempDir::new();
    let tree = WritableTree::new(&out.root()).unwrap();

    tree.symlink_to_facade(&vendor, "lib", "vendor").unwrap();

    assert_eq!(
        tree.paths().unwrap(),
        vec![
            "vendor",
            "vendor/index.js",
            "vendor/util",
            "vendor/util/helper.js"
        ]
    );
    let ops: Vec<String> = tree
        .changes()
        .unwrap()
        .iter()
        .map(|c| format!("{} {}", c.op, c.path))
        .collect();
    assert_eq!(ops, vec!["mkdir vendor"]);
}

#[test]
fn reads_traverse_the_graft_transparently() {
    let (_vendor_dir, vendor) = vendor_fixture();
    let out = TempDir::new();
    let tree = WritableTree::new(&out.root()).unwrap();
    tree.symlink_to_facade(&vendor, "lib", "vendor").unwrap();

    assert_eq!(
        tree.read_file("vendor/index.js").unwrap(),
        b"module.exports = 1;"
    );
    assert_eq!(
        tree.read_file("vendor/util/helper.js").unwrap(),
        b"help"
    );
    let stat = tree.stat("vendor/util/helper.js").unwrap();
    assert_eq!(stat.relative_path, "vendor/util/helper.js");
    assert!(stat.is_file());
    assert!(tree.exists("vendor/util").unwrap());
    assert_eq!(tree.readdir("vendor").unwrap(), vec!["index.js", "util"]);
}

#[test]
fn graft_creates_a_real_symlink_on_disk() {
    let (vendor_dir, vendor) = vendor_fixture();
    let out = TempDir::new();
    let tree = WritableTree::new(&out.root()).unwrap();
    tree.symlink_to_facade(&vendor, "lib", "vendor").unwrap();

    let link = out.path().join("vendor");
    let target = std::fs::read_link(&link).unwrap();
    assert_eq!(target, vendor_dir.path().join("lib"));
}

#[test]
fn file_graft_links_a_single_file() {
    let (_vendor_dir, vendor) = vendor_fixture();
    let out = TempDir::new();
    let tree = WritableTree::new(&out.root()).unwrap();
    tree.symlink_to_facade(&vendor, "README.md", "docs.md").unwrap();

    assert_eq!(tree.paths().unwrap(), vec!["docs.md"]);
    assert_eq!(tree.read_file("docs.md").unwrap(), b"vendor docs");
    let ops: Vec<String> = tree
        .changes()
        .unwrap()
        .iter()
        .map(|c| format!("{} {}", c.op, c.path))
        .collect();
    assert_eq!(ops, vec!["create docs.md"]);
}

#[test]
fn graft_target_must_exist_and_local_must_not() {
    let (_vendor_dir, vendor) = vendor_fixture();
    let out = TempDir::with_fixture(&[("taken/", "")]);
    let tree = WritableTree::new(&out.root()).unwrap();

    assert!(matches!(
        tree.symlink_to_facade(&vendor, "missing", "x").unwrap_err(),
        TreeError::NoEntry(_)
    ));
    assert!(matches!(
        tree.symlink_to_facade(&vendor, "lib", "taken").unwrap_err(),
        TreeError::Exists(_)
    ));
}

#[test]
fn writes_may_not_cross_a_graft_boundary() {
    let (_vendor_dir, vendor) = vendor_fixture();
    let out = TempDir::new();
    let tree = WritableTree::new(&out.root()).unwrap();
    tree.symlink_to_facade(&vendor, "lib", "vendor").unwrap();

    assert!(matches!(
        tree.write_file("vendor/injected.js", b"nope").unwrap_err(),
        TreeError::SymlinkCross(_)
    ));
    assert!(matches!(
        tree.mkdir("vendor/util/deeper").unwrap_err(),
        TreeError::SymlinkCross(_)
    ));
}

#[test]
fn unlinking_a_graft_detaches_without_touching_the_target() {
    let (vendor_dir, vendor) = vendor_fixture();
    let out = TempDir::new();
    let tree = WritableTree::new(&out.root()).unwrap();
    tree.symlink_to_facade(&vendor, "lib", "vendor").unwrap();
    tree.start();

    tree.unlink("vendor").unwrap();
    assert!(tree.entries().unwrap().is_empty());
    // The vendor tree is untouched.
    assert!(vendor_dir.path().join("lib/index.js").is_file());
    assert_eq!(ops_of(&tree), vec!["unlink vendor"]);
}

fn ops_of(tree: &WritableTree) -> Vec<String> {
    tree.changes()
        .unwrap()
        .iter()
        .map(|c| format!("{} {}", c.op, c.path))
        .collect()
}

#[test]
fn root_symlink_enters_delegator_mode() {
    let (_vendor_dir, vendor) = vendor_fixture();
    let out = TempDir::new();
    let tree = WritableTree::new(&out.root()).unwrap();

    tree.symlink_to_facade(&vendor, "lib", "").unwrap();

    // Reads forward to the delegate.
    assert_eq!(
        tree.paths().unwrap(),
        vec!["index.js", "util", "util/helper.js"]
    );
    assert_eq!(tree.read_file("index.js").unwrap(), b"module.exports = 1;");
    assert!(tree.exists("util/helper.js").unwrap());

    // The root itself became an OS symlink.
    let target = std::fs::read_link(out.path()).unwrap();
    assert_eq!(target, _vendor_dir.path().join("lib"));
}

#[test]
fn root_symlink_requires_an_empty_tree() {
    let (_vendor_dir, vendor) = vendor_fixture();
    let out = TempDir::with_fixture(&[("already-here.txt", "x")]);
    let tree = WritableTree::new(&out.root()).unwrap();
    let err = tree.symlink_to_facade(&vendor, "lib", "").unwrap_err();
    assert!(matches!(err, TreeError::NotEmpty(_)));
    assert!(err.to_string().starts_with("ENOTEMPTY:"));
}

#[test]
fn undo_root_symlink_restores_an_empty_writable_tree() {
    let (_vendor_dir, vendor) = vendor_fixture();
    let out = TempDir::new();
    let tree = WritableTree::new(&out.root()).unwrap();

    tree.symlink_to_facade(&vendor, "lib", "").unwrap();
    tree.undo_root_symlink().unwrap();

    assert!(tree.entries().unwrap().is_empty());
    assert!(out.path().is_dir());
    assert!(std::fs::read_link(out.path()).is_err());

    // Writable again.
    tree.write_file("fresh.txt", b"back").unwrap();
    assert_eq!(tree.read_file("fresh.txt").unwrap(), b"back");
}

#[test]
fn undo_without_a_root_symlink_is_a_no_op() {
    let out = TempDir::with_fixture(&[("keep.txt", "k")]);
    let tree = WritableTree::new(&out.root()).unwrap();
    tree.undo_root_symlink().unwrap();
    assert_eq!(tree.paths().unwrap(), vec!["keep.txt"]);
}

#[test]
fn delegator_reread_is_a_public_no_op() {
    let (vendor_dir, vendor) = vendor_fixture();
    let out = TempDir::new();
    let tree = WritableTree::new(&out.root()).unwrap();
    tree.symlink_to_facade(&vendor, "lib", "").unwrap();

    // The delegate is reread by its own owner; rereading the delegator
    // neither fails nor disturbs the forwarded view.
    tree.reread(None).unwrap();
    kodama_testutil::write_tree(vendor_dir.path(), &[("lib/late.js", "late")]);
    vendor.reread(None).unwrap();
    assert!(tree.exists("late.js").unwrap());
}

#[test]
fn grafts_compose_through_projections_and_merges() {
    let (_vendor_dir, vendor) = vendor_fixture();
    let out = TempDir::new();
    let tree = WritableTree::new(&out.root()).unwrap();
    tree.write_file("app.js", b"app").unwrap();
    tree.symlink_to_facade(&vendor, "lib", "vendor").unwrap();

    // A projection over a tree with grafts sees the grafted paths.
    let js = tree
        .filtered(
            kodama_tree::FilterOptions::default()
                .with_include(vec![kodama_tree::Matcher::glob("*.js").unwrap()]),
        )
        .unwrap();
    assert_eq!(
        js.paths().unwrap(),
        vec![
            "app.js",
            "vendor",
            "vendor/index.js",
            "vendor/util",
            "vendor/util/helper.js"
        ]
    );
}
