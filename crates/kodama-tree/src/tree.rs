//! The tree read interface and the traversal plumbing shared by its
//! implementors.
//!
//! All four tree variants (and the delegator mode) expose one capability
//! set. There is no inheritance chain: [`Tree`] extends the minimal
//! [`Facade`] read surface from `kodama-types`, and composition does the
//! rest. A projection holds a parent reference; a delegator holds a
//! delegate reference.

use std::rc::Weak;

use kodama_types::{Change, Entry, Link, TreeError, TreeRef, TreeResult};

use crate::paths;
use crate::projection::{FilterOptions, Projection};

/// Notification target for the reread barrier.
///
/// Parents keep a weak set of these so invalidating a source cache also
/// snapshots every projection layered on top of it. Children hold strong
/// parent references; the DAG is strict, so no cycles can form.
pub trait RereadObserver {
    /// The parent is about to invalidate its view; snapshot now.
    fn parent_reread(&self) -> TreeResult<()>;
}

/// The full capability set every tree exposes.
///
/// The read half lives in [`kodama_types::Facade`] so link descriptors can
/// reference a tree without seeing these composition methods.
pub trait Tree: kodama_types::Facade {
    /// All relative paths in the tree, sorted ascending.
    fn paths(&self) -> TreeResult<Vec<String>> {
        Ok(self
            .entries()?
            .into_iter()
            .map(|e| e.relative_path)
            .collect())
    }

    /// UTF-8 view over [`kodama_types::Facade::read_file`].
    fn read_to_string(&self, path: &str) -> TreeResult<String> {
        let bytes = self.read_file(path)?;
        String::from_utf8(bytes)
            .map_err(|_| TreeError::Io(format!("{path}: file is not valid UTF-8")))
    }

    /// A projection of this tree scoped to a subdirectory.
    fn chdir(&self, path: &str) -> TreeResult<Projection> {
        self.filtered(FilterOptions::cwd(path))
    }

    /// A filtered projection of this tree.
    fn filtered(&self, opts: FilterOptions) -> TreeResult<Projection> {
        let projection = Projection::new(self.clone_ref(), opts)?;
        self.add_observer(projection.observer());
        Ok(projection)
    }

    /// The patch between the previous reread barrier and now, in canonical
    /// order: removes lexicographically descending, then additions and
    /// updates ascending.
    fn changes(&self) -> TreeResult<Vec<Change>>;

    /// The reread barrier: invalidate caches, snapshot projections, and
    /// (for source trees only) optionally move the root.
    fn reread(&self, new_root: Option<&str>) -> TreeResult<()>;

    /// A shareable read handle to this tree, stable across calls (handle
    /// identity backs link-target comparisons).
    fn clone_ref(&self) -> TreeRef;

    /// Register a child to be notified at this tree's reread barrier.
    fn add_observer(&self, observer: Weak<dyn RereadObserver>);
}

/// Drop dead children, notify the live ones. Callers must not hold a borrow
/// of their own state across this call: children read back through the
/// parent while snapshotting.
pub(crate) fn notify_observers(observers: &mut Vec<Weak<dyn RereadObserver>>) -> TreeResult<()> {
    observers.retain(|w| w.upgrade().is_some());
    let live: Vec<_> = observers.iter().filter_map(|w| w.upgrade()).collect();
    for child in live {
        child.parent_reread()?;
    }
    Ok(())
}

/// Resolution of a path against a sorted entry array, following internal
/// directory links.
pub(crate) enum Found {
    /// The entry lives in this tree's own array.
    Own(Entry),
    /// The path crosses an internal directory link; the entry (re-pathed to
    /// the queried path) came from the linked tree.
    Linked(Entry),
}

impl Found {
    pub(crate) fn into_entry(self) -> Entry {
        match self {
            Found::Own(e) | Found::Linked(e) => e,
        }
    }
}

/// Binary-search `path`; on a miss, walk back to the nearest prefix
/// ancestor and, if that ancestor grafts another tree, continue the lookup
/// inside it.
pub(crate) fn find_entry(entries: &[Entry], path: &str) -> TreeResult<Option<Found>> {
    if path.is_empty() {
        return Ok(Some(Found::Own(Entry::root())));
    }
    let miss = match paths::find_index(entries, path) {
        Ok(idx) => return Ok(Some(Found::Own(entries[idx].clone()))),
        Err(idx) => idx,
    };
    for entry in entries[..miss].iter().rev() {
        if !paths::is_ancestor(&entry.relative_path, path) {
            continue;
        }
        // Nearest present ancestor. Only a grafting directory can still
        // produce the path; a plain directory ancestor means a genuine miss.
        if let Some(Link::Tree { tree, target }) = &entry.link {
            if entry.is_dir() {
                let remainder = &path[entry.relative_path.len() + 1..];
                let inner = join_target(target, remainder);
                return match tree.stat(&inner) {
                    Ok(found) => Ok(Some(Found::Linked(found.with_path(path)))),
                    Err(TreeError::NoEntry(_)) => Ok(None),
                    Err(e) => Err(e),
                };
            }
        }
        return Ok(None);
    }
    Ok(None)
}

/// Names of the immediate children of `dir` in a sorted entry array,
/// following a graft when `dir` lies at or under one.
pub(crate) fn readdir_of(entries: &[Entry], dir: &str) -> TreeResult<Vec<String>> {
    if !dir.is_empty() {
        match find_entry(entries, dir)? {
            None => return Err(TreeError::NoEntry(dir.to_string())),
            Some(Found::Linked(_)) => {
                // Resolve again from the grafting ancestor to delegate the
                // whole listing.
                return readdir_via_link(entries, dir);
            }
            Some(Found::Own(entry)) => {
                if !entry.is_dir() {
                    return Err(TreeError::NotDir(dir.to_string()));
                }
                if let Some(Link::Tree { tree, target }) = &entry.link {
                    return tree.readdir(target);
                }
            }
        }
    }
    let mut names = Vec::new();
    for entry in entries {
        if paths::parent_of(&entry.relative_path) == dir && !entry.relative_path.is_empty() {
            names.push(entry.basename().to_string());
        }
    }
    Ok(names)
}

/// Delegate a file read to the tree grafted above `path`.
pub(crate) fn graft_read(entries: &[Entry], path: &str) -> TreeResult<Vec<u8>> {
    for entry in entries.iter().rev() {
        if paths::is_ancestor(&entry.relative_path, path) {
            if let Some(Link::Tree { tree, target }) = &entry.link {
                let remainder = &path[entry.relative_path.len() + 1..];
                return tree.read_file(&join_target(target, remainder));
            }
        }
    }
    Err(TreeError::NoEntry(path.to_string()))
}

fn readdir_via_link(entries: &[Entry], dir: &str) -> TreeResult<Vec<String>> {
    for entry in entries.iter().rev() {
        if paths::is_ancestor(&entry.relative_path, dir) {
            if let Some(Link::Tree { tree, target }) = &entry.link {
                let remainder = &dir[entry.relative_path.len() + 1..];
                return tree.readdir(&join_target(target, remainder));
            }
        }
    }
    Err(TreeError::NoEntry(dir.to_string()))
}

/// A tree's own entries plus, for every directory graft, the cloned entries
/// of the linked subtree prefixed with the graft's path; resorted.
pub(crate) fn expand_entries(entries: &[Entry]) -> TreeResult<Vec<Entry>> {
    let mut out: Vec<Entry> = entries.to_vec();
    for entry in entries {
        if !entry.is_dir_link() {
            continue;
        }
        if let Some(Link::Tree { tree, target }) = &entry.link {
            let base = &entry.relative_path;
            for linked in tree.entries()? {
                let sub = match strip_target(target, &linked.relative_path) {
                    Some(sub) => sub,
                    None => continue,
                };
                let grafted = linked.with_path(format!("{base}/{sub}"));
                paths::insert_sorted(&mut out, grafted);
            }
        }
    }
    paths::assert_sorted_unique(&out);
    Ok(out)
}

/// Join a link target with a remainder path; either side may be empty.
pub(crate) fn join_target(target: &str, remainder: &str) -> String {
    match (target.is_empty(), remainder.is_empty()) {
        (true, _) => remainder.to_string(),
        (_, true) => target.to_string(),
        _ => format!("{target}/{remainder}"),
    }
}

/// Path of a linked entry relative to the link target, or None when the
/// entry sits outside the target subtree.
fn strip_target<'a>(target: &str, path: &'a str) -> Option<&'a str> {
    if target.is_empty() {
        return Some(path);
    }
    if paths::is_ancestor(target, path) {
        Some(&path[target.len() + 1..])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> Vec<Entry> {
        vec![
            Entry::directory("bar"),
            Entry::file("bar/baz.js", 0o100644, 4, 10),
            Entry::file("foo.js", 0o100644, 2, 10),
        ]
    }

    #[test]
    fn exact_lookup() {
        let entries = fixture();
        let found = find_entry(&entries, "bar/baz.js").unwrap().unwrap();
        assert_eq!(found.into_entry().relative_path, "bar/baz.js");
    }

    #[test]
    fn empty_path_is_root() {
        let entries = fixture();
        let found = find_entry(&entries, "").unwrap().unwrap();
        assert_eq!(found.into_entry().relative_path, "");
    }

    #[test]
    fn miss_under_plain_directory() {
        let entries = fixture();
        assert!(find_entry(&entries, "bar/missing.js").unwrap().is_none());
        assert!(find_entry(&entries, "nope/deep/path").unwrap().is_none());
    }

    #[test]
    fn readdir_of_root_and_subdir() {
        let entries = fixture();
        assert_eq!(readdir_of(&entries, "").unwrap(), vec!["bar", "foo.js"]);
        assert_eq!(readdir_of(&entries, "bar").unwrap(), vec!["baz.js"]);
    }

    #[test]
    fn readdir_of_file_is_notdir() {
        let entries = fixture();
        assert!(matches!(
            readdir_of(&entries, "foo.js"),
            Err(TreeError::NotDir(_))
        ));
    }

    #[test]
    fn join_target_edges() {
        assert_eq!(join_target("", "a/b"), "a/b");
        assert_eq!(join_target("sub", ""), "sub");
        assert_eq!(join_target("sub", "a"), "sub/a");
    }

    #[test]
    fn expand_without_links_is_identity() {
        let entries = fixture();
        let expanded = expand_entries(&entries).unwrap();
        assert_eq!(expanded.len(), entries.len());
    }
}
