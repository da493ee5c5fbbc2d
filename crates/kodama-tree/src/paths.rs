//! Path utilities for normalized relative paths.
//!
//! Tree paths are `/`-separated strings with no leading or trailing
//! separator and no `.` / `..` segments; directories carry no trailing
//! slash. Everything here operates on that normal form or produces it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use kodama_types::{Entry, TreeError, TreeResult};

/// Fold a caller-supplied relative path into normal form.
///
/// `.` and empty segments disappear; `..` collapses into the preceding
/// segment. A `..` that would climb past the tree root is an error, not a
/// clamp. Results are memoized process-wide (the cache is append-only).
///
/// # Examples
/// ```
/// use kodama_tree::normalize;
///
/// assert_eq!(normalize("a/./b//c/").unwrap(), "a/b/c");
/// assert_eq!(normalize("a/b/../c").unwrap(), "a/c");
/// assert!(normalize("../escape").is_err());
/// ```
pub fn normalize(path: &str) -> TreeResult<String> {
    static CACHE: Mutex<Option<HashMap<String, String>>> = Mutex::new(None);

    if let Ok(guard) = CACHE.lock() {
        if let Some(hit) = guard.as_ref().and_then(|m| m.get(path)) {
            return Ok(hit.clone());
        }
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(TreeError::InvalidPath(format!(
                        "{path:?} escapes the tree root"
                    )));
                }
            }
            s => segments.push(s),
        }
    }
    let normal = segments.join("/");

    if let Ok(mut guard) = CACHE.lock() {
        guard
            .get_or_insert_with(HashMap::new)
            .insert(path.to_string(), normal.clone());
    }
    Ok(normal)
}

/// Validate a tree root: absolute, non-empty, existing directory. Returns
/// the root with any trailing separator stripped.
pub fn validate_root(root: &str) -> TreeResult<PathBuf> {
    if root.is_empty() {
        return Err(TreeError::InvalidPath("tree root must not be empty".into()));
    }
    let trimmed = root.trim_end_matches('/');
    let trimmed = if trimmed.is_empty() { "/" } else { trimmed };
    let path = Path::new(trimmed);
    if !path.is_absolute() {
        return Err(TreeError::InvalidPath(format!(
            "tree root {root:?} must be absolute"
        )));
    }
    if !path.is_dir() {
        return Err(TreeError::NoEntry(format!("tree root {root:?}")));
    }
    Ok(path.to_path_buf())
}

/// True when `ancestor` is a proper prefix directory of `path`. The empty
/// path (the root) is an ancestor of every non-empty path.
pub fn is_ancestor(ancestor: &str, path: &str) -> bool {
    if ancestor.is_empty() {
        return !path.is_empty();
    }
    path.len() > ancestor.len()
        && path.as_bytes()[ancestor.len()] == b'/'
        && path.starts_with(ancestor)
}

/// The directory holding `path` (`""` for a top-level path).
pub fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// The shared leading directory of two paths, segment-wise (`""` when they
/// diverge at the top level).
pub fn common_prefix<'a>(a: &'a str, b: &str) -> &'a str {
    let mut end = 0;
    for (seg_a, seg_b) in a.split('/').zip(b.split('/')) {
        if seg_a != seg_b || seg_a.is_empty() {
            break;
        }
        end += seg_a.len() + usize::from(end > 0);
    }
    &a[..end]
}

/// Binary search a sorted entry slice. `Ok` carries the position of the
/// exact match, `Err` the insertion point.
pub fn find_index(entries: &[Entry], path: &str) -> Result<usize, usize> {
    entries.binary_search_by(|e| e.relative_path.as_str().cmp(path))
}

/// Insert an entry, keeping the slice sorted and unique. An entry already
/// at the path is replaced.
pub fn insert_sorted(entries: &mut Vec<Entry>, entry: Entry) {
    match find_index(entries, &entry.relative_path) {
        Ok(idx) => entries[idx] = entry,
        Err(idx) => entries.insert(idx, entry),
    }
}

/// Synthesize the directory entries a bare path list implies and return the
/// whole set sorted and unique. A trailing `/` marks an explicit directory.
///
/// Build plugins hand over flat file lists; the tree model requires every
/// parent directory to be present as its own entry.
pub fn with_implied_directories(paths: &[&str]) -> TreeResult<Vec<Entry>> {
    let mut out: Vec<Entry> = Vec::new();
    for raw in paths {
        let is_dir = raw.ends_with('/');
        let normal = normalize(raw)?;
        if normal.is_empty() {
            continue;
        }
        let mut ancestor = String::new();
        for segment in normal.split('/') {
            if !ancestor.is_empty() {
                ancestor.push('/');
            }
            ancestor.push_str(segment);
            if ancestor.len() < normal.len() || is_dir {
                insert_sorted(&mut out, Entry::directory(ancestor.clone()));
            } else {
                insert_sorted(&mut out, Entry::file(ancestor.clone(), kodama_types::FILE_MODE, 0, 0));
            }
        }
    }
    Ok(out)
}

/// Debug-time check of the sorted-unique invariant.
pub fn assert_sorted_unique(entries: &[Entry]) {
    debug_assert!(
        entries
            .windows(2)
            .all(|w| w[0].relative_path < w[1].relative_path),
        "entries array must be strictly sorted by relative path"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_folds_dots_and_empties() {
        assert_eq!(normalize("a/b/c").unwrap(), "a/b/c");
        assert_eq!(normalize("./a/./b/").unwrap(), "a/b");
        assert_eq!(normalize("a//b").unwrap(), "a/b");
        assert_eq!(normalize("").unwrap(), "");
        assert_eq!(normalize("a/b/..").unwrap(), "a");
    }

    #[test]
    fn normalize_is_idempotent() {
        for p in ["a/b/c", "x/./y/../z", "top", ""] {
            let once = normalize(p).unwrap();
            assert_eq!(normalize(&once).unwrap(), once);
        }
    }

    #[test]
    fn normalize_rejects_escape() {
        assert!(matches!(normalize(".."), Err(TreeError::InvalidPath(_))));
        assert!(matches!(normalize("a/../.."), Err(TreeError::InvalidPath(_))));
        assert!(matches!(normalize("../x"), Err(TreeError::InvalidPath(_))));
    }

    #[test]
    fn ancestor_relation() {
        assert!(is_ancestor("", "a"));
        assert!(is_ancestor("a", "a/b"));
        assert!(is_ancestor("a/b", "a/b/c"));
        assert!(!is_ancestor("a", "a"));
        assert!(!is_ancestor("a", "ab"));
        assert!(!is_ancestor("a/b", "a"));
        assert!(!is_ancestor("", ""));
    }

    #[test]
    fn parents() {
        assert_eq!(parent_of("a/b/c"), "a/b");
        assert_eq!(parent_of("top"), "");
    }

    #[test]
    fn common_prefixes() {
        assert_eq!(common_prefix("a/b/c", "a/b/d"), "a/b");
        assert_eq!(common_prefix("a/b", "a/b"), "a/b");
        assert_eq!(common_prefix("ax/y", "az/y"), "");
        assert_eq!(common_prefix("a", "b"), "");
    }

    #[test]
    fn implied_directories() {
        let entries = with_implied_directories(&["bar/baz.js", "foo.js"]).unwrap();
        let paths: Vec<_> = entries.iter().map(|e| e.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["bar", "bar/baz.js", "foo.js"]);
        assert!(entries[0].is_dir());
        assert!(entries[1].is_file());
    }

    #[test]
    fn implied_directories_trailing_slash_marks_dir() {
        let entries = with_implied_directories(&["my-directory/"]).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_dir());
    }

    #[test]
    fn sorted_insert_replaces_duplicates() {
        let mut entries = Vec::new();
        insert_sorted(&mut entries, Entry::directory("b"));
        insert_sorted(&mut entries, Entry::directory("a"));
        insert_sorted(&mut entries, Entry::file("b", 0o100644, 1, 1));
        let paths: Vec<_> = entries.iter().map(|e| e.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["a", "b"]);
        assert!(entries[1].is_file());
    }
}
