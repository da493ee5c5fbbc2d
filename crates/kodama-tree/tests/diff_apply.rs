//! End-to-end diff and apply scenarios.

use kodama_testutil::{list_tree, TempDir};
use kodama_tree::{
    default_equals, ApplyDelegate, Facade, ManualTree, SourceTree, Tree, TreeError,
};

fn ops(changes: &[kodama_tree::Change]) -> Vec<String> {
    changes
        .iter()
        .map(|c| format!("{} {}", c.op, c.path))
        .collect()
}

#[test]
fn empty_to_populated_is_parents_first() {
    let empty = ManualTree::new();
    let full = ManualTree::from_paths(&["bar/baz.js", "foo.js"]).unwrap();
    assert_eq!(
        ops(&empty.diff(&full, default_equals).unwrap()),
        vec!["mkdir bar", "create bar/baz.js", "create foo.js"]
    );
}

#[test]
fn populated_to_empty_is_children_first() {
    let full = ManualTree::from_paths(&["bar/baz.js", "foo.js"]).unwrap();
    let empty = ManualTree::new();
    assert_eq!(
        ops(&full.diff(&empty, default_equals).unwrap()),
        vec!["unlink foo.js", "unlink bar/baz.js", "rmdir bar"]
    );
}

#[test]
fn file_to_directory_switch() {
    let before = ManualTree::from_paths(&["subdir1"]).unwrap();
    let after = ManualTree::from_paths(&["subdir1/foo"]).unwrap();
    assert_eq!(
        ops(&before.diff(&after, default_equals).unwrap()),
        vec!["unlink subdir1", "mkdir subdir1", "create subdir1/foo"]
    );
}

#[test]
fn self_diff_is_empty() {
    let tree = ManualTree::from_paths(&["a/b/c.js", "a/d.js", "e.txt"]).unwrap();
    assert!(tree.diff(&tree, default_equals).unwrap().is_empty());
}

#[test]
fn removes_precede_adds_and_respect_nesting() {
    let before = ManualTree::from_paths(&["old/deep/x.js", "keep.txt"]).unwrap();
    let after = ManualTree::from_paths(&["new/deep/y.js", "keep.txt"]).unwrap();
    let patch = before.diff(&after, default_equals).unwrap();
    let names = ops(&patch);
    assert_eq!(
        names,
        vec![
            "unlink old/deep/x.js",
            "rmdir old/deep",
            "rmdir old",
            "mkdir new",
            "mkdir new/deep",
            "create new/deep/y.js",
        ]
    );

    // No child before its directory is created; no directory before its
    // children are removed.
    let boundary = patch.iter().position(|c| !c.op.is_removal()).unwrap();
    assert!(patch[..boundary].iter().all(|c| c.op.is_removal()));
    assert!(patch[boundary..].iter().all(|c| !c.op.is_removal()));
}

#[test]
fn applying_a_diff_replicates_the_target_tree() {
    let before = TempDir::with_fixture(&[
        ("common.txt", "same"),
        ("gone/old.js", "remove me"),
        ("changed.js", "short"),
    ]);
    let after = TempDir::with_fixture(&[
        ("common.txt", "same"),
        ("added/new.js", "fresh"),
        ("changed.js", "substantially longer contents"),
    ]);

    let tree_a = SourceTree::new(&before.root()).unwrap();
    let tree_b = SourceTree::new(&after.root()).unwrap();
    let patch = kodama_tree::diff_entries(
        &tree_a.entries().unwrap(),
        &tree_b.entries().unwrap(),
        default_equals,
    );

    ManualTree::apply(
        &patch,
        after.path(),
        before.path(),
        &ApplyDelegate::filesystem(),
    )
    .unwrap();

    assert_eq!(list_tree(before.path()), list_tree(after.path()));
    assert_eq!(
        std::fs::read(before.path().join("changed.js")).unwrap(),
        b"substantially longer contents"
    );
    assert_eq!(
        std::fs::read(before.path().join("added/new.js")).unwrap(),
        b"fresh"
    );
}

#[test]
fn apply_with_missing_callback_reports_op_and_field() {
    let empty = ManualTree::new();
    let full = ManualTree::from_paths(&["a.js"]).unwrap();
    let patch = empty.diff(&full, default_equals).unwrap();

    let delegate = ApplyDelegate {
        mkdir: Some(Box::new(|_, _, _| Ok(()))),
        ..ApplyDelegate::default()
    };
    let err = ManualTree::apply(
        &patch,
        std::path::Path::new("/in"),
        std::path::Path::new("/out"),
        &delegate,
    )
    .unwrap_err();
    match err {
        TreeError::UnknownOperation { op, field } => {
            assert_eq!(op, "create");
            assert_eq!(field, "create");
        }
        other => panic!("expected UnknownOperation, got {other}"),
    }
}

#[test]
fn entries_stay_sorted_and_unique_everywhere() {
    let dir = TempDir::with_fixture(&[
        ("z/last.js", "z"),
        ("a/first.js", "a"),
        ("m/mid/inner.js", "m"),
    ]);
    let source = SourceTree::new(&dir.root()).unwrap();
    let entries = source.entries().unwrap();
    assert!(entries
        .windows(2)
        .all(|w| w[0].relative_path < w[1].relative_path));

    let manual = ManualTree::from_entries(entries).unwrap();
    let entries = manual.entries().unwrap();
    assert!(entries
        .windows(2)
        .all(|w| w[0].relative_path < w[1].relative_path));
}

#[test]
fn serialized_change_format_is_the_op_path_entry_triple() {
    let empty = ManualTree::new();
    let full = ManualTree::from_paths(&["lib/app.js"]).unwrap();
    let patch = empty.diff(&full, default_equals).unwrap();
    let json = serde_json::to_value(&patch).unwrap();
    assert_eq!(json[0][0], "mkdir");
    assert_eq!(json[0][1], "lib");
    assert_eq!(json[1][0], "create");
    assert_eq!(json[1][1], "lib/app.js");
    assert_eq!(json[1][2]["relativePath"], "lib/app.js");
}
