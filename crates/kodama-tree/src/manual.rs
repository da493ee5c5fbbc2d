//! Flat in-memory trees, the diff engine, and patch application.
//!
//! A [`ManualTree`] is just a sorted entry array with no disk binding. It is
//! the reference point for everything else: the change tracker in the
//! writable tree approximates what `diff` would produce between snapshots,
//! and every tree's `changes()` is expressed as a diff of entry arrays.

use std::cell::RefCell;
use std::path::Path;
use std::rc::{Rc, Weak};

use kodama_types::{
    Change, ChangeOp, Entry, Facade, Link, TreeError, TreeRef, TreeResult,
};

use crate::fsio;
use crate::paths;
use crate::tree::{self, RereadObserver, Tree};

/// Entry equality for diffing. Caller-replaceable.
pub type EqualsFn = fn(&Entry, &Entry) -> bool;

/// The stock equality: directories are never diffed by metadata; files
/// require size, mtime (whole epoch seconds), and mode to all agree.
pub fn default_equals(a: &Entry, b: &Entry) -> bool {
    if a.is_dir() && b.is_dir() {
        return true;
    }
    a.size == b.size && a.mtime == b.mtime && a.mode == b.mode
}

fn addition_of(entry: &Entry) -> Change {
    let op = if entry.is_dir() {
        ChangeOp::Mkdir
    } else {
        ChangeOp::Create
    };
    Change::new(op, entry.clone())
}

fn removal_of(entry: &Entry) -> Change {
    let op = if entry.is_dir() {
        ChangeOp::Rmdir
    } else {
        ChangeOp::Unlink
    };
    Change::new(op, entry.clone())
}

/// Ordered minimal patch between two sorted entry arrays.
///
/// All removes come first, deepest-first (reverse encounter order), then all
/// additions and updates shallowest-first. That ordering is what makes the
/// patch valid to apply in sequence: a directory is never removed before its
/// contents nor created after its children, and a kind switch at one path
/// decomposes into a remove followed by an add.
pub fn diff_entries(ours: &[Entry], theirs: &[Entry], equals: EqualsFn) -> Vec<Change> {
    let mut removals: Vec<Change> = Vec::new();
    let mut additions: Vec<Change> = Vec::new();

    let (mut i, mut j) = (0usize, 0usize);
    while i < ours.len() && j < theirs.len() {
        let a = &ours[i];
        let b = &theirs[j];
        match a.relative_path.cmp(&b.relative_path) {
            std::cmp::Ordering::Less => {
                removals.push(removal_of(a));
                i += 1;
            }
            std::cmp::Ordering::Greater => {
                additions.push(addition_of(b));
                j += 1;
            }
            std::cmp::Ordering::Equal => {
                if !equals(a, b) {
                    if a.kind == b.kind {
                        additions.push(Change::new(ChangeOp::Update, b.clone()));
                    } else {
                        // Kind switch: tear down, then rebuild.
                        removals.push(removal_of(a));
                        additions.push(addition_of(b));
                    }
                }
                i += 1;
                j += 1;
            }
        }
    }
    for a in &ours[i..] {
        removals.push(removal_of(a));
    }
    for b in &theirs[j..] {
        additions.push(addition_of(b));
    }

    removals.reverse();
    removals.extend(additions);
    removals
}

/// Per-op callbacks for [`ManualTree::apply`].
///
/// Each callback receives `(input_dir/path, output_dir/path, path)`. An op
/// appearing in the patch without its callback fails with
/// [`TreeError::UnknownOperation`] naming both.
#[derive(Default)]
pub struct ApplyDelegate {
    pub mkdir: Option<OpFn>,
    pub create: Option<OpFn>,
    pub change: Option<OpFn>,
    pub rmdir: Option<OpFn>,
    pub unlink: Option<OpFn>,
}

pub type OpFn = Box<dyn Fn(&Path, &Path, &str) -> TreeResult<()>>;

impl ApplyDelegate {
    /// The stock delegate: replicate the patch on the host filesystem,
    /// symlinking file content in from the input directory where the
    /// platform allows it.
    pub fn filesystem() -> Self {
        Self {
            mkdir: Some(Box::new(|_input, output, _p| fsio::mkdir(output))),
            create: Some(Box::new(|input, output, _p| {
                fsio::symlink_or_copy(input, output)
            })),
            change: Some(Box::new(|input, output, _p| {
                fsio::unlink(output)?;
                fsio::symlink_or_copy(input, output)
            })),
            rmdir: Some(Box::new(|_input, output, _p| fsio::rmdir(output))),
            unlink: Some(Box::new(|_input, output, _p| fsio::unlink(output))),
        }
    }

    fn callback_for(&self, op: ChangeOp) -> TreeResult<&OpFn> {
        let slot = match op {
            ChangeOp::Mkdir => &self.mkdir,
            ChangeOp::Create => &self.create,
            ChangeOp::Update => &self.change,
            ChangeOp::Rmdir => &self.rmdir,
            ChangeOp::Unlink => &self.unlink,
        };
        slot.as_ref().ok_or_else(|| TreeError::UnknownOperation {
            op: op.as_str().to_string(),
            field: op.as_str().to_string(),
        })
    }
}

struct ManualInner {
    entries: Vec<Entry>,
    previous: Vec<Entry>,
    observers: Vec<Weak<dyn RereadObserver>>,
}

pub(crate) struct ManualShared {
    inner: RefCell<ManualInner>,
}

/// A tree that is nothing but its sorted entry array. No root, no disk.
#[derive(Clone)]
pub struct ManualTree {
    shared: Rc<ManualShared>,
}

impl ManualTree {
    /// An empty tree.
    pub fn new() -> Self {
        Self {
            shared: Rc::new(ManualShared {
                inner: RefCell::new(ManualInner {
                    entries: Vec::new(),
                    previous: Vec::new(),
                    observers: Vec::new(),
                }),
            }),
        }
    }

    /// Build from entries; they are sorted and checked for duplicates.
    pub fn from_entries(mut entries: Vec<Entry>) -> TreeResult<Self> {
        entries.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        for pair in entries.windows(2) {
            if pair[0].relative_path == pair[1].relative_path {
                return Err(TreeError::InvalidPath(format!(
                    "duplicate entry {:?}",
                    pair[0].relative_path
                )));
            }
        }
        Ok(Self {
            shared: Rc::new(ManualShared {
                inner: RefCell::new(ManualInner {
                    entries,
                    previous: Vec::new(),
                    observers: Vec::new(),
                }),
            }),
        })
    }

    /// Build from bare paths, synthesizing the parent directories the list
    /// implies. A trailing `/` marks an explicit directory.
    pub fn from_paths(paths: &[&str]) -> TreeResult<Self> {
        Self::from_entries(paths::with_implied_directories(paths)?)
    }

    /// Replace the entry array wholesale (sorted and deduplicated again).
    pub fn set_entries(&self, mut entries: Vec<Entry>) -> TreeResult<()> {
        entries.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        paths::assert_sorted_unique(&entries);
        self.shared.inner.borrow_mut().entries = entries;
        Ok(())
    }

    /// Ordered minimal patch from this tree to `other`.
    pub fn diff(&self, other: &ManualTree, equals: EqualsFn) -> TreeResult<Vec<Change>> {
        let ours = self.entries()?;
        let theirs = other.entries()?;
        Ok(diff_entries(&ours, &theirs, equals))
    }

    /// Apply a patch by invoking the delegate callback for each change, in
    /// the order supplied.
    pub fn apply(
        patch: &[Change],
        input_dir: &Path,
        output_dir: &Path,
        delegate: &ApplyDelegate,
    ) -> TreeResult<()> {
        for change in patch {
            let callback = delegate.callback_for(change.op)?;
            callback(
                &input_dir.join(&change.path),
                &output_dir.join(&change.path),
                &change.path,
            )?;
        }
        Ok(())
    }
}

impl Default for ManualTree {
    fn default() -> Self {
        Self::new()
    }
}

impl Facade for ManualShared {
    fn entries(&self) -> TreeResult<Vec<Entry>> {
        Ok(self.inner.borrow().entries.clone())
    }

    fn stat(&self, path: &str) -> TreeResult<Entry> {
        let normal = paths::normalize(path)?;
        let inner = self.inner.borrow();
        match tree::find_entry(&inner.entries, &normal)? {
            Some(found) => Ok(found.into_entry()),
            None => Err(TreeError::NoEntry(normal)),
        }
    }

    fn exists(&self, path: &str) -> TreeResult<bool> {
        let normal = paths::normalize(path)?;
        let inner = self.inner.borrow();
        Ok(tree::find_entry(&inner.entries, &normal)?.is_some())
    }

    fn read_file(&self, path: &str) -> TreeResult<Vec<u8>> {
        let normal = paths::normalize(path)?;
        let found = {
            let inner = self.inner.borrow();
            tree::find_entry(&inner.entries, &normal)?
        };
        match found {
            None => Err(TreeError::NoEntry(normal)),
            Some(found) => {
                let entry = found.into_entry();
                if entry.is_dir() {
                    return Err(TreeError::IsDir(normal));
                }
                match &entry.link {
                    Some(Link::External(target)) => fsio::read(target),
                    Some(Link::Tree { tree, target }) => tree.read_file(target),
                    None => Err(TreeError::Io(format!(
                        "{normal}: manual tree holds no file contents"
                    ))),
                }
            }
        }
    }

    fn readdir(&self, path: &str) -> TreeResult<Vec<String>> {
        let normal = paths::normalize(path)?;
        let inner = self.inner.borrow();
        tree::readdir_of(&inner.entries, &normal)
    }
}

impl Facade for ManualTree {
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
}

impl Tree for ManualTree {
    fn changes(&self) -> TreeResult<Vec<Change>> {
        let inner = self.shared.inner.borrow();
        Ok(diff_entries(&inner.previous, &inner.entries, default_equals))
    }

    fn reread(&self, new_root: Option<&str>) -> TreeResult<()> {
        if new_root.is_some() {
            return Err(TreeError::InvalidPath(
                "manual tree has no root to change".into(),
            ));
        }
        let mut observers = std::mem::take(&mut self.shared.inner.borrow_mut().observers);
        let result = tree::notify_observers(&mut observers);
        let mut inner = self.shared.inner.borrow_mut();
        inner.observers = observers;
        result?;
        inner.previous = inner.entries.clone();
        Ok(())
    }

    fn clone_ref(&self) -> TreeRef {
        self.shared.clone()
    }

    fn add_observer(&self, observer: Weak<dyn RereadObserver>) {
        self.shared.inner.borrow_mut().observers.push(observer);
    }
}
