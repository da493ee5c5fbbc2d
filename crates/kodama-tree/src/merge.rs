//! N-way tree overlay with deterministic conflict rules.
//!
//! Later inputs win file conflicts (when overwriting is allowed at all);
//! kind disagreements and case-fold collisions are always errors. A
//! directory whose content comes from exactly one input is not recursed
//! into: it is emitted as a graft of that input (symlink-through), which is
//! what keeps wide merges cheap.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::rc::{Rc, Weak};

use kodama_types::{
    Change, Entry, EntryKind, Facade, TreeError, TreeRef, TreeResult,
};

use crate::fsio;
use crate::manual::{default_equals, diff_entries};
use crate::paths;
use crate::source::SourceTree;
use crate::tree::{self, Found, RereadObserver, Tree};

struct MergeInner {
    inputs: Vec<TreeRef>,
    /// Inputs this tree constructed itself (from root strings) and
    /// therefore rereads itself.
    owned: Vec<SourceTree>,
    overwrite: bool,
    previous: Vec<Entry>,
    observers: Vec<Weak<dyn RereadObserver>>,
}

pub(crate) struct MergeShared {
    inner: RefCell<MergeInner>,
}

/// An ordered overlay of several input trees presented as one tree.
#[derive(Clone)]
pub struct MergeTree {
    shared: Rc<MergeShared>,
}

impl MergeTree {
    /// Overlay externally supplied trees, in order. The merge references
    /// them; it does not own them.
    pub fn new(inputs: Vec<TreeRef>, overwrite: bool) -> Self {
        Self {
            shared: Rc::new(MergeShared {
                inner: RefCell::new(MergeInner {
                    inputs,
                    owned: Vec::new(),
                    overwrite,
                    previous: Vec::new(),
                    observers: Vec::new(),
                }),
            }),
        }
    }

    /// Overlay disk directories: each root becomes an owned source tree.
    pub fn from_roots(roots: &[&str], overwrite: bool) -> TreeResult<Self> {
        let mut owned = Vec::with_capacity(roots.len());
        let mut inputs = Vec::with_capacity(roots.len());
        for root in roots {
            let source = SourceTree::new(root)?;
            inputs.push(source.clone_ref());
            owned.push(source);
        }
        let merged = Self::new(inputs, overwrite);
        merged.shared.inner.borrow_mut().owned = owned;
        Ok(merged)
    }
}

impl MergeInner {
    fn merged_entries(&self) -> TreeResult<Vec<Entry>> {
        let all: Vec<usize> = (0..self.inputs.len()).collect();
        let mut out = self.merge_relative_path("", &all)?;
        out.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        paths::assert_sorted_unique(&out);
        Ok(out)
    }

    /// Merge one directory level across the participating inputs.
    fn merge_relative_path(&self, base: &str, participants: &[usize]) -> TreeResult<Vec<Entry>> {
        // Gather each input's sorted listing, grouped by child name with
        // input order preserved.
        let mut by_name: BTreeMap<String, Vec<(usize, Entry)>> = BTreeMap::new();
        for &i in participants {
            for entry in self.inputs[i].readdir_entries(base)? {
                by_name
                    .entry(entry.basename().to_string())
                    .or_default()
                    .push((i, entry));
            }
        }

        // Names that differ only in capitalization collide on case-folding
        // filesystems, whatever the overwrite setting says.
        let mut folded: HashMap<String, &str> = HashMap::new();
        for name in by_name.keys() {
            let lower = name.to_lowercase();
            if let Some(&prior) = folded.get(&lower) {
                if prior != name.as_str() {
                    return Err(TreeError::ConflictingCapitalization(
                        tree::join_target(base, prior),
                        tree::join_target(base, name),
                    ));
                }
            }
            folded.insert(lower, name.as_str());
        }

        let mut out = Vec::new();
        for (name, owners) in &by_name {
            let path = tree::join_target(base, name);
            let dir_count = owners.iter().filter(|(_, e)| e.is_dir()).count();
            if dir_count != 0 && dir_count != owners.len() {
                return Err(TreeError::ConflictingFileType(path));
            }

            if dir_count == 0 {
                if owners.len() > 1 && !self.overwrite {
                    return Err(TreeError::OverwriteRefused(path));
                }
                // Later inputs win.
                let (_, entry) = owners.last().expect("non-empty owner set");
                out.push(entry.clone());
            } else if owners.len() == 1 && fsio::can_symlink() {
                // Sole owner: graft instead of recursing.
                let (i, entry) = &owners[0];
                out.push(Entry::tree_link(
                    entry.relative_path.clone(),
                    EntryKind::Directory,
                    self.inputs[*i].clone(),
                    entry.relative_path.clone(),
                ));
            } else {
                // Emit the directory once, from its first-occurrence input,
                // then merge the level below across the inputs holding it.
                let (_, first) = &owners[0];
                out.push(first.clone());
                let holders: Vec<usize> = owners.iter().map(|(i, _)| *i).collect();
                out.extend(self.merge_relative_path(&path, &holders)?);
            }
        }
        Ok(out)
    }
}

/// Merge diff equality: metadata equality plus agreement on whether the
/// directory is a graft (a directory flipping between symlink-through and
/// recursive merging must surface as a change).
fn merge_equals(a: &Entry, b: &Entry) -> bool {
    if a.is_dir() && b.is_dir() {
        return match (&a.link, &b.link) {
            (None, None) => true,
            (Some(la), Some(lb)) => la.same_target(lb),
            _ => false,
        };
    }
    default_equals(a, b)
}

impl Facade for MergeShared {
    /// The consumer view: graft entries are expanded to their children, so
    /// the listing is complete whether or not symlink-through kicked in.
    fn entries(&self) -> TreeResult<Vec<Entry>> {
        let merged = self.inner.borrow().merged_entries()?;
        tree::expand_entries(&merged)
    }

    fn stat(&self, path: &str) -> TreeResult<Entry> {
        let normal = paths::normalize(path)?;
        let entries = self.entries()?;
        match tree::find_entry(&entries, &normal)? {
            Some(found) => Ok(found.into_entry()),
            None => Err(TreeError::NoEntry(normal)),
        }
    }

    fn exists(&self, path: &str) -> TreeResult<bool> {
        let normal = paths::normalize(path)?;
        let entries = self.entries()?;
        Ok(tree::find_entry(&entries, &normal)?.is_some())
    }

    fn read_file(&self, path: &str) -> TreeResult<Vec<u8>> {
        let normal = paths::normalize(path)?;
        let entries = self.entries()?;
        match tree::find_entry(&entries, &normal)? {
            None => Err(TreeError::NoEntry(normal)),
            Some(Found::Linked(_)) => tree::graft_read(&entries, &normal),
            Some(Found::Own(entry)) => {
                if entry.is_dir() {
                    return Err(TreeError::IsDir(normal));
                }
                // Route to the winning (last) input holding the file.
                let inputs = self.inner.borrow().inputs.clone();
                for input in inputs.iter().rev() {
                    if input.exists(&normal)? {
                        return input.read_file(&normal);
                    }
                }
                Err(TreeError::NoEntry(normal))
            }
        }
    }

    fn readdir(&self, path: &str) -> TreeResult<Vec<String>> {
        let normal = paths::normalize(path)?;
        let entries = self.entries()?;
        tree::readdir_of(&entries, &normal)
    }

    fn real_path(&self, path: &str) -> Option<PathBuf> {
        let normal = paths::normalize(path).ok()?;
        let inputs = self.inner.borrow().inputs.clone();
        for input in inputs.iter().rev() {
            if input.exists(&normal).unwrap_or(false) {
                return input.real_path(&normal);
            }
        }
        None
    }
}

impl Facade for MergeTree {
    fn entries(&self) -> TreeResult<Vec<Entry>> {
        self.shared.entries()
    }
    fn stat(&self, path: &str) -> TreeResult<Entry> {
        self.shared.stat(path)
    }
    fn exists(&self, path: &str) -> TreeResult<bool> {
        self.shared.exists(path)
    }
    fn read_file(&self, path: &str) -> TreeResult<Vec<u8>> {
        self.shared.read_file(path)
    }
    fn readdir(&self, path: &str) -> TreeResult<Vec<String>> {
        self.shared.readdir(path)
    }
    fn real_path(&self, path: &str) -> Option<PathBuf> {
        self.shared.real_path(path)
    }
}

impl Tree for MergeTree {
    /// Diff of the freshly merged view against the previous call's view.
    fn changes(&self) -> TreeResult<Vec<Change>> {
        let current = self.shared.inner.borrow().merged_entries()?;
        let mut inner = self.shared.inner.borrow_mut();
        let patch = diff_entries(&inner.previous, &current, merge_equals);
        inner.previous = current;
        Ok(patch)
    }

    fn reread(&self, new_root: Option<&str>) -> TreeResult<()> {
        if new_root.is_some() {
            return Err(TreeError::InvalidPath(
                "merge trees do not own a single root".into(),
            ));
        }
        let mut observers = std::mem::take(&mut self.shared.inner.borrow_mut().observers);
        let notify = tree::notify_observers(&mut observers);
        self.shared.inner.borrow_mut().observers = observers;
        notify?;
        let owned = self.shared.inner.borrow().owned.clone();
        for source in &owned {
            source.reread(None)?;
        }
        Ok(())
    }

    fn clone_ref(&self) -> TreeRef {
        self.shared.clone()
    }

    fn add_observer(&self, observer: Weak<dyn RereadObserver>) {
        self.shared.inner.borrow_mut().observers.push(observer);
    }
}
