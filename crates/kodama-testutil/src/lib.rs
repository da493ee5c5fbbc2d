//! Shared test fixtures: unique temp directories and declarative on-disk
//! trees.
//!
//! Tests get one [`TempDir`] each (pid + counter keeps parallel test
//! processes apart) and describe fixture content as a flat list of paths:
//! a trailing `/` makes a directory, anything else a file with the given
//! contents.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A unique scratch directory, removed on drop.
pub struct TempDir {
    path: PathBuf,
}

impl TempDir {
    pub fn new() -> Self {
        let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "kodama-test-{}-{}",
            std::process::id(),
            id
        ));
        let _ = fs::remove_dir_all(&path);
        fs::create_dir_all(&path).expect("create temp dir");
        Self { path }
    }

    /// A temp dir pre-populated from a fixture layout.
    pub fn with_fixture(layout: &[(&str, &str)]) -> Self {
        let dir = Self::new();
        write_tree(dir.path(), layout);
        dir
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The path as a string, for APIs that take tree roots.
    pub fn root(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    /// A subdirectory path as a string (not created).
    pub fn join(&self, rel: &str) -> String {
        self.path.join(rel).to_string_lossy().into_owned()
    }

    /// Create a subdirectory and return its path as a string.
    pub fn mkdir(&self, rel: &str) -> String {
        let sub = self.path.join(rel);
        fs::create_dir_all(&sub).expect("create subdirectory");
        sub.to_string_lossy().into_owned()
    }
}

impl Default for TempDir {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

/// Materialize a fixture layout under `root`. Paths ending in `/` become
/// directories; everything else becomes a file with the paired contents.
/// Parent directories are created as needed.
pub fn write_tree(root: &Path, layout: &[(&str, &str)]) {
    for (rel, contents) in layout {
        let target = root.join(rel.trim_end_matches('/'));
        if rel.ends_with('/') {
            fs::create_dir_all(&target).expect("fixture directory");
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).expect("fixture parent");
            }
            fs::write(&target, contents).expect("fixture file");
        }
    }
}

/// Sorted relative listing of everything under `root`, directories without
/// a marker. Handy for whole-tree assertions.
pub fn list_tree(root: &Path) -> Vec<String> {
    let mut out = Vec::new();
    let mut stack = vec![PathBuf::new()];
    while let Some(rel) = stack.pop() {
        let dir = root.join(&rel);
        let Ok(iter) = fs::read_dir(&dir) else {
            continue;
        };
        for dirent in iter.flatten() {
            let child = rel.join(dirent.file_name());
            let is_dir = dirent.file_type().map(|t| t.is_dir()).unwrap_or(false);
            out.push(child.to_string_lossy().into_owned());
            if is_dir {
                stack.push(child);
            }
        }
    }
    out.sort();
    out
}
