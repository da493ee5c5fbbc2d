//! Whole-pipeline scenarios: source trees feeding projections feeding a
//! merge, with patches applied incrementally to an output directory across
//! build cycles.

use std::fs;
use std::path::Path;

use kodama_testutil::{list_tree, TempDir};
use kodama_tree::{
    ApplyDelegate, Facade, FilterOptions, ManualTree, MergeTree, Matcher, SourceTree, Tree,
};

/// An apply delegate that materializes content by reading it back out of
/// the tree that produced the patch, instead of copying from an input
/// directory. This is how a consumer applies a merge, whose entries come
/// from several roots at once.
fn delegate_for(tree: &MergeTree) -> ApplyDelegate {
    let reader = {
        let tree = tree.clone();
        move |output: &Path, path: &str| -> kodama_tree::TreeResult<()> {
            fs::write(output, tree.read_file(path)?)?;
            Ok(())
        }
    };
    let create_reader = reader.clone();
    ApplyDelegate {
        mkdir: Some(Box::new(|_input, output, _p| {
            fs::create_dir(output)?;
            Ok(())
        })),
        create: Some(Box::new(move |_input, output, p| create_reader(output, p))),
        change: Some(Box::new(move |_input, output, p| reader(output, p))),
        rmdir: Some(Box::new(|_input, output, _p| {
            fs::remove_dir(output)?;
            Ok(())
        })),
        unlink: Some(Box::new(|_input, output, _p| {
            fs::remove_file(output)?;
            Ok(())
        })),
    }
}

#[test]
fn two_build_cycles_apply_minimal_patches() {
    let src = TempDir::with_fixture(&[
        ("app.js", "console.log(1);"),
        ("style.css", "body {}"),
        ("notes.txt", "not shipped"),
    ]);
    let vendor = TempDir::with_fixture(&[("vendor.js", "window.v = 1;")]);
    let out = TempDir::new();

    let source = SourceTree::new(&src.root()).unwrap();
    let vendor_tree = SourceTree::new(&vendor.root()).unwrap();
    let shipped = source
        .filtered(FilterOptions::default().with_include(vec![
            Matcher::glob("*.js").unwrap(),
            Matcher::glob("*.css").unwrap(),
        ]))
        .unwrap();
    let merged = MergeTree::new(
        vec![shipped.clone_ref(), vendor_tree.clone_ref()],
        false,
    );
    let delegate = delegate_for(&merged);

    // Build 1: the first changes() call reports the whole view.
    let patch = merged.changes().unwrap();
    ManualTree::apply(&patch, src.path(), out.path(), &delegate).unwrap();
    assert_eq!(list_tree(out.path()), vec!["app.js", "style.css", "vendor.js"]);
    assert_eq!(
        fs::read(out.path().join("vendor.js")).unwrap(),
        b"window.v = 1;"
    );

    // Between builds: one file edited, one added, one removed.
    fs::write(src.path().join("app.js"), "console.log(1); console.log(2);").unwrap();
    kodama_testutil::write_tree(src.path(), &[("util.js", "export {};")]);
    fs::remove_file(src.path().join("style.css")).unwrap();
    source.reread(None).unwrap();
    vendor_tree.reread(None).unwrap();

    // Build 2: only the delta flows.
    let patch = merged.changes().unwrap();
    let ops: Vec<String> = patch
        .iter()
        .map(|c| format!("{} {}", c.op, c.path))
        .collect();
    assert_eq!(
        ops,
        vec!["unlink style.css", "change app.js", "create util.js"]
    );

    ManualTree::apply(&patch, src.path(), out.path(), &delegate).unwrap();
    assert_eq!(list_tree(out.path()), vec!["app.js", "util.js", "vendor.js"]);
    assert_eq!(
        fs::read(out.path().join("app.js")).unwrap(),
        b"console.log(1); console.log(2);"
    );
}

#[test]
fn quiet_rebuild_applies_nothing() {
    let src = TempDir::with_fixture(&[("lib/mod.js", "x"), ("lib/deep/core.js", "y")]);
    let source = SourceTree::new(&src.root()).unwrap();
    let merged = MergeTree::new(vec![source.clone_ref()], false);

    let first = merged.changes().unwrap();
    assert!(!first.is_empty());

    source.reread(None).unwrap();
    assert!(merged.changes().unwrap().is_empty());
}

#[test]
fn writable_stage_brackets_each_build() {
    let stage = TempDir::new();
    let out = kodama_tree::WritableTree::new(&stage.root()).unwrap();

    out.start();
    out.mkdir("assets").unwrap();
    out.write_file("assets/bundle.js", b"bundle-v1").unwrap();
    assert_eq!(out.changes().unwrap().len(), 2);
    out.stop();

    // Next build: the bracket resets the tracker, and an identical write
    // stays invisible to consumers.
    out.start();
    out.write_file("assets/bundle.js", b"bundle-v1").unwrap();
    assert!(out.changes().unwrap().is_empty());
    out.write_file("assets/bundle.js", b"bundle-v2").unwrap();
    let ops: Vec<String> = out
        .changes()
        .unwrap()
        .iter()
        .map(|c| format!("{} {}", c.op, c.path))
        .collect();
    assert_eq!(ops, vec!["change assets/bundle.js"]);
    out.stop();
}

#[test]
fn projection_of_a_merge_composes() {
    let a = TempDir::with_fixture(&[("shared/one.js", "1"), ("shared/readme.md", "m")]);
    let b = TempDir::with_fixture(&[("shared/two.js", "2")]);
    let ra = a.root();
    let rb = b.root();
    let merged = MergeTree::from_roots(&[&ra, &rb], false).unwrap();

    let js = merged
        .filtered(FilterOptions::cwd("shared").with_include(vec![
            Matcher::glob("*.js").unwrap(),
        ]))
        .unwrap();
    assert_eq!(js.paths().unwrap(), vec!["one.js", "two.js"]);
    assert_eq!(js.read_file("two.js").unwrap(), b"2");
}
