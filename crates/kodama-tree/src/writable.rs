//! Writable trees: disk-owning, mutation-tracked, symlink-composable.
//!
//! A writable tree owns the directory at its root. Every mutation lands on
//! disk and in the sorted entry array in the same call, and is recorded in
//! the change tracker with the collapsing rules applied live, so `changes()`
//! stays equivalent to a snapshot diff without ever taking snapshots.
//!
//! Symlinking the root atop another tree flips the tree into delegator
//! mode: reads forward to a projection of the target, writes and the public
//! interface otherwise stay those of a writable tree, and
//! `undo_root_symlink` flips back.

use std::cell::RefCell;
use std::mem;
use std::path::{Path, PathBuf};
use std::rc::{Rc, Weak};

use sha2::{Digest, Sha256};

use kodama_types::{
    Change, ChangeOp, Entry, EntryKind, Facade, Link, TreeError, TreeRef, TreeResult, FILE_MODE,
};

use crate::fsio;
use crate::manual::{default_equals, diff_entries};
use crate::paths;
use crate::projection::Projection;
use crate::tracker::ChangeTracker;
use crate::tree::{self, Found, RereadObserver, Tree};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Started,
    Stopped,
}

enum Mode {
    Writable,
    /// Root is an OS symlink onto another tree; reads forward here.
    Delegating(Projection),
}

struct WritableInner {
    root: PathBuf,
    entries: Vec<Entry>,
    tracker: ChangeTracker,
    state: State,
    mode: Mode,
    observers: Vec<Weak<dyn RereadObserver>>,
}

pub(crate) struct WritableShared {
    inner: RefCell<WritableInner>,
}

/// A tree that owns an on-disk directory and tracks its own mutations.
#[derive(Clone)]
pub struct WritableTree {
    shared: Rc<WritableShared>,
}

impl WritableTree {
    /// Open a writable tree over an existing absolute directory. Any
    /// content already present is scanned into the entry array; the tree
    /// starts in the started state with an empty tracker.
    pub fn new(root: &str) -> TreeResult<Self> {
        let root = paths::validate_root(root)?;
        let entries = scan_subtree(&root)?;
        Ok(Self {
            shared: Rc::new(WritableShared {
                inner: RefCell::new(WritableInner {
                    root,
                    entries,
                    tracker: ChangeTracker::new(),
                    state: State::Started,
                    mode: Mode::Writable,
                    observers: Vec::new(),
                }),
            }),
        })
    }

    /// The directory this tree owns.
    pub fn root(&self) -> PathBuf {
        self.shared.inner.borrow().root.clone()
    }

    /// Clear the tracker and allow writes.
    pub fn start(&self) {
        let mut inner = self.shared.inner.borrow_mut();
        inner.tracker.clear();
        inner.state = State::Started;
    }

    /// Refuse further writes; reads keep working.
    pub fn stop(&self) {
        self.shared.inner.borrow_mut().state = State::Stopped;
    }

    /// Create one directory. The parent must already exist.
    pub fn mkdir(&self, path: &str) -> TreeResult<()> {
        let normal = paths::normalize(path)?;
        let mut inner = self.shared.inner.borrow_mut();
        inner.pre_write(&normal, false)?;
        if paths::find_index(&inner.entries, &normal).is_ok() {
            return Err(TreeError::Exists(normal));
        }
        fsio::mkdir(&inner.root.join(&normal))?;
        let mut entry = Entry::directory(normal);
        entry.mtime = Some(fsio::now_epoch());
        paths::insert_sorted(&mut inner.entries, entry.clone());
        inner.tracker.track(ChangeOp::Mkdir, entry);
        Ok(())
    }

    /// Create a directory and any missing ancestors. Idempotent on an
    /// existing directory; fails if a file occupies any segment.
    pub fn mkdirp(&self, path: &str) -> TreeResult<()> {
        let normal = paths::normalize(path)?;
        if self.shared.inner.borrow().state != State::Started {
            return Err(TreeError::Stopped);
        }
        if normal.is_empty() {
            return Ok(());
        }
        let mut prefix = String::new();
        for segment in normal.split('/') {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(segment);
            let existing = {
                let inner = self.shared.inner.borrow();
                paths::find_index(&inner.entries, &prefix)
                    .ok()
                    .map(|idx| inner.entries[idx].clone())
            };
            match existing {
                Some(e) if e.is_dir() => continue,
                Some(_) => return Err(TreeError::NotDir(prefix)),
                None => self.mkdir(&prefix)?,
            }
        }
        Ok(())
    }

    /// Remove one empty directory.
    pub fn rmdir(&self, path: &str) -> TreeResult<()> {
        let normal = paths::normalize(path)?;
        let mut inner = self.shared.inner.borrow_mut();
        inner.pre_write(&normal, false)?;
        let idx = match paths::find_index(&inner.entries, &normal) {
            Ok(idx) => idx,
            Err(_) => return Err(TreeError::NoEntry(normal)),
        };
        let entry = inner.entries[idx].clone();
        if !entry.is_dir() || entry.link.is_some() {
            // POSIX rmdir answers ENOTDIR for symlinks too.
            return Err(TreeError::NotDir(normal));
        }
        if inner
            .entries
            .iter()
            .any(|e| paths::is_ancestor(&normal, &e.relative_path))
        {
            return Err(TreeError::NotEmpty(normal));
        }
        fsio::rmdir(&inner.root.join(&normal))?;
        inner.entries.remove(idx);
        inner.tracker.track(ChangeOp::Rmdir, entry);
        Ok(())
    }

    /// Remove a file or symlink. Unlinking a real directory is refused the
    /// way POSIX refuses it; unlinking a directory graft detaches the
    /// grafted projection.
    pub fn unlink(&self, path: &str) -> TreeResult<()> {
        let normal = paths::normalize(path)?;
        let mut inner = self.shared.inner.borrow_mut();
        inner.pre_write(&normal, false)?;
        let idx = match paths::find_index(&inner.entries, &normal) {
            Ok(idx) => idx,
            Err(_) => return Err(TreeError::NoEntry(normal)),
        };
        let entry = inner.entries[idx].clone();
        if entry.is_dir() && entry.link.is_none() {
            return Err(TreeError::Eperm(format!("unlink directory {normal}")));
        }
        inner.remove_from_disk(&entry)?;
        inner.entries.remove(idx);
        inner.tracker.track(ChangeOp::Unlink, entry);
        Ok(())
    }

    /// Remove whatever sits at `path`: directories via [`Self::rmdir`],
    /// files and symlinks via [`Self::unlink`].
    pub fn remove(&self, path: &str) -> TreeResult<()> {
        let normal = paths::normalize(path)?;
        let is_plain_dir = {
            let inner = self.shared.inner.borrow();
            match paths::find_index(&inner.entries, &normal) {
                Ok(idx) => {
                    let e = &inner.entries[idx];
                    e.is_dir() && e.link.is_none()
                }
                Err(_) => return Err(TreeError::NoEntry(normal)),
            }
        };
        if is_plain_dir {
            self.rmdir(&normal)
        } else {
            self.unlink(&normal)
        }
    }

    /// Recursively remove the contents of a directory, leaving the
    /// directory itself. Allowed on the root. One change per removed entry.
    pub fn empty(&self, path: &str) -> TreeResult<()> {
        let normal = paths::normalize(path)?;
        let mut inner = self.shared.inner.borrow_mut();
        inner.pre_write(&normal, true)?;
        if !normal.is_empty() {
            match paths::find_index(&inner.entries, &normal) {
                Ok(idx) => {
                    let e = &inner.entries[idx];
                    if !e.is_dir() {
                        return Err(TreeError::NotDir(normal));
                    }
                    if e.link.is_some() {
                        return Err(TreeError::SymlinkCross(normal));
                    }
                }
                Err(_) => return Err(TreeError::NoEntry(normal)),
            }
        }
        let victims: Vec<Entry> = inner
            .entries
            .iter()
            .filter(|e| normal.is_empty() || paths::is_ancestor(&normal, &e.relative_path))
            .cloned()
            .collect();
        // Deepest first, so directories are empty by the time they go.
        for victim in victims.iter().rev() {
            if victim.is_dir() && victim.link.is_none() {
                fsio::rmdir(&inner.root.join(&victim.relative_path))?;
                inner.tracker.track(ChangeOp::Rmdir, victim.clone());
            } else {
                inner.remove_from_disk(victim)?;
                inner.tracker.track(ChangeOp::Unlink, victim.clone());
            }
        }
        inner.entries.retain(|e| {
            !(normal.is_empty() || paths::is_ancestor(&normal, &e.relative_path))
        });
        Ok(())
    }

    /// Write file contents, short-circuiting when the checksum already
    /// matches: no disk write, no tracked change, no metadata churn.
    pub fn write_file(&self, path: &str, contents: &[u8]) -> TreeResult<()> {
        let normal = paths::normalize(path)?;
        let mut inner = self.shared.inner.borrow_mut();
        inner.pre_write(&normal, false)?;
        let existing = paths::find_index(&inner.entries, &normal)
            .ok()
            .map(|idx| inner.entries[idx].clone());
        if let Some(e) = &existing {
            if e.is_dir() {
                return Err(TreeError::IsDir(normal));
            }
            if matches!(e.link, Some(Link::Tree { .. })) {
                return Err(TreeError::SymlinkCross(normal));
            }
        }

        let checksum = hex_digest(contents);
        if let Some(e) = &existing {
            if e.checksum.as_deref() == Some(checksum.as_str()) {
                return Ok(());
            }
        }

        // Through an external symlink the write lands on the link target;
        // the tracked entry's metadata is refreshed either way.
        let disk_target = match existing.as_ref().and_then(|e| e.link.as_ref()) {
            Some(Link::External(target)) => target.clone(),
            _ => inner.root.join(&normal),
        };
        fsio::write(&disk_target, contents)?;

        let entry = Entry {
            relative_path: normal,
            kind: EntryKind::File,
            mode: existing.as_ref().map(|e| e.mode).unwrap_or(FILE_MODE),
            size: Some(contents.len() as u64),
            mtime: Some(fsio::now_epoch()),
            checksum: Some(checksum),
            link: existing.as_ref().and_then(|e| e.link.clone()),
        };
        paths::insert_sorted(&mut inner.entries, entry.clone());
        let op = if existing.is_some() {
            ChangeOp::Update
        } else {
            ChangeOp::Create
        };
        inner.tracker.track(op, entry);
        Ok(())
    }

    /// Plant a symlink to an absolute path outside any tree.
    pub fn symlink(&self, target: impl AsRef<Path>, path: &str) -> TreeResult<()> {
        let normal = paths::normalize(path)?;
        let mut inner = self.shared.inner.borrow_mut();
        inner.pre_write(&normal, false)?;
        if paths::find_index(&inner.entries, &normal).is_ok() {
            return Err(TreeError::Exists(normal));
        }
        // A dangling external target is legitimate on platforms with real
        // symlinks; the copy fallback necessarily needs it present.
        if fsio::can_symlink() {
            fsio::symlink(target.as_ref(), &inner.root.join(&normal))?;
        } else {
            fsio::symlink_or_copy(target.as_ref(), &inner.root.join(&normal))?;
        }
        let mut entry = Entry::external_link(normal, target.as_ref());
        entry.mtime = Some(fsio::now_epoch());
        paths::insert_sorted(&mut inner.entries, entry.clone());
        inner.tracker.track(ChangeOp::Create, entry);
        Ok(())
    }

    /// Graft `target_path` of another tree at `local`. With `local` empty
    /// the whole tree is symlinked at the root and this tree enters
    /// delegator mode.
    pub fn symlink_to_facade(
        &self,
        target: &dyn Tree,
        target_path: &str,
        local: &str,
    ) -> TreeResult<()> {
        let sub = paths::normalize(target_path)?;
        let normal = paths::normalize(local)?;
        if normal.is_empty() {
            return self.symlink_root(target, &sub);
        }

        let target_entry = target.stat(&sub)?;
        {
            let inner = self.shared.inner.borrow();
            inner.pre_write(&normal, false)?;
            if paths::find_index(&inner.entries, &normal).is_ok() {
                return Err(TreeError::Exists(normal));
            }
        }
        if let Some(real) = target.real_path(&sub) {
            let root = self.shared.inner.borrow().root.clone();
            fsio::symlink_or_copy(&real, &root.join(&normal))?;
        }

        let (entry, op) = if target_entry.is_dir() {
            let grafted = target.chdir(&sub)?;
            let mut entry =
                Entry::tree_link(normal, EntryKind::Directory, grafted.clone_ref(), "");
            entry.mtime = Some(fsio::now_epoch());
            (entry, ChangeOp::Mkdir)
        } else {
            let mut entry =
                Entry::tree_link(normal, EntryKind::File, target.clone_ref(), sub);
            entry.mtime = Some(fsio::now_epoch());
            (entry, ChangeOp::Create)
        };
        let mut inner = self.shared.inner.borrow_mut();
        paths::insert_sorted(&mut inner.entries, entry.clone());
        inner.tracker.track(op, entry);
        Ok(())
    }

    fn symlink_root(&self, target: &dyn Tree, sub: &str) -> TreeResult<()> {
        {
            let inner = self.shared.inner.borrow();
            if inner.state != State::Started {
                return Err(TreeError::Stopped);
            }
            if !inner.entries.is_empty() {
                return Err(TreeError::NotEmpty(format!(
                    "{} must be empty to symlink its root",
                    inner.root.display()
                )));
            }
        }
        let delegate = target.chdir(sub)?;
        let root = self.shared.inner.borrow().root.clone();
        fsio::rmdir(&root)?;
        if let Some(real) = target.real_path(sub) {
            fsio::symlink_or_copy(&real, &root)?;
        }
        tracing::debug!(root = %root.display(), "writable tree entering delegator mode");
        self.shared.inner.borrow_mut().mode = Mode::Delegating(delegate);
        Ok(())
    }

    /// Leave delegator mode: fold the delegate's accumulated changes plus
    /// the removal of its whole view into the tracker, put an empty real
    /// directory back at the root, and behave as a writable tree again.
    /// No-op when the root was never symlinked.
    pub fn undo_root_symlink(&self) -> TreeResult<()> {
        let delegate = {
            let mut inner = self.shared.inner.borrow_mut();
            match mem::replace(&mut inner.mode, Mode::Writable) {
                Mode::Writable => return Ok(()),
                Mode::Delegating(delegate) => delegate,
            }
        };
        let mut folded = delegate.changes()?;
        folded.extend(diff_entries(&delegate.entries()?, &[], default_equals));

        let root = self.shared.inner.borrow().root.clone();
        if fsio::readlink(&root)?.is_some() {
            fsio::unlink(&root)?;
        } else if root.is_dir() {
            // Copy fallback left a real directory behind.
            std::fs::remove_dir_all(&root).map_err(TreeError::from)?;
        }
        fsio::mkdir(&root)?;

        let mut inner = self.shared.inner.borrow_mut();
        for change in folded {
            inner.tracker.track(change.op, change.entry);
        }
        tracing::debug!(root = %root.display(), "writable tree left delegator mode");
        Ok(())
    }
}

impl WritableInner {
    fn pre_write(&self, path: &str, allow_root: bool) -> TreeResult<()> {
        if self.state != State::Started {
            return Err(TreeError::Stopped);
        }
        if path.is_empty() {
            if allow_root {
                return Ok(());
            }
            return Err(TreeError::Eperm("cannot write to the tree root".into()));
        }
        let parent = paths::parent_of(path);
        if parent.is_empty() {
            return Ok(());
        }
        match paths::find_index(&self.entries, parent) {
            Ok(idx) => {
                let p = &self.entries[idx];
                if p.link.is_some() {
                    return Err(TreeError::SymlinkCross(parent.to_string()));
                }
                if !p.is_dir() {
                    return Err(TreeError::NotDir(parent.to_string()));
                }
                Ok(())
            }
            Err(_) => {
                // The parent may only exist behind a graft; writing there
                // would cross the link boundary.
                if tree::find_entry(&self.entries, parent)?.is_some() {
                    Err(TreeError::SymlinkCross(parent.to_string()))
                } else {
                    Err(TreeError::NoEntry(parent.to_string()))
                }
            }
        }
    }

    /// Remove an entry's disk artifact. Virtual grafts may have none.
    fn remove_from_disk(&self, entry: &Entry) -> TreeResult<()> {
        match fsio::unlink(&self.root.join(&entry.relative_path)) {
            Ok(()) => Ok(()),
            Err(TreeError::NoEntry(_)) if entry.link.is_some() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

fn hex_digest(contents: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(contents);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn scan_subtree(root: &Path) -> TreeResult<Vec<Entry>> {
    let mut entries = Vec::new();
    let mut stack: Vec<String> = vec![String::new()];
    while let Some(dir) = stack.pop() {
        let disk_dir = if dir.is_empty() {
            root.to_path_buf()
        } else {
            root.join(&dir)
        };
        for name in fsio::readdir_names(&disk_dir)? {
            let rel = tree::join_target(&dir, &name);
            let meta = match fsio::try_stat(&disk_dir.join(&name))? {
                Some(meta) => meta,
                None => continue,
            };
            let entry = Entry::from_stat(
                rel.clone(),
                fsio::mode_of(&meta),
                meta.len(),
                fsio::mtime_of(&meta).unwrap_or(0),
            );
            if entry.is_dir() {
                stack.push(rel);
            }
            entries.push(entry);
        }
    }
    entries.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(entries)
}

impl Facade for WritableShared {
    fn entries(&self) -> TreeResult<Vec<Entry>> {
        let inner = self.inner.borrow();
        match &inner.mode {
            Mode::Delegating(d) => d.entries(),
            Mode::Writable => tree::expand_entries(&inner.entries),
        }
    }

    fn stat(&self, path: &str) -> TreeResult<Entry> {
        let normal = paths::normalize(path)?;
        let inner = self.inner.borrow();
        match &inner.mode {
            Mode::Delegating(d) => d.stat(&normal),
            Mode::Writable => match tree::find_entry(&inner.entries, &normal)? {
                Some(found) => Ok(found.into_entry()),
                None => Err(TreeError::NoEntry(normal)),
            },
        }
    }

    fn exists(&self, path: &str) -> TreeResult<bool> {
        let normal = paths::normalize(path)?;
        let inner = self.inner.borrow();
        match &inner.mode {
            Mode::Delegating(d) => d.exists(&normal),
            Mode::Writable => Ok(tree::find_entry(&inner.entries, &normal)?.is_some()),
        }
    }

    fn read_file(&self, path: &str) -> TreeResult<Vec<u8>> {
        let normal = paths::normalize(path)?;
        let inner = self.inner.borrow();
        match &inner.mode {
            Mode::Delegating(d) => d.read_file(&normal),
            Mode::Writable => match tree::find_entry(&inner.entries, &normal)? {
                None => Err(TreeError::NoEntry(normal)),
                Some(Found::Linked(_)) => tree::graft_read(&inner.entries, &normal),
                Some(Found::Own(entry)) => {
                    if entry.is_dir() {
                        return Err(TreeError::IsDir(normal));
                    }
                    match &entry.link {
                        Some(Link::External(target)) => fsio::read(target),
                        Some(Link::Tree { tree, target }) => tree.read_file(target),
                        None => fsio::read(&inner.root.join(&normal)),
                    }
                }
            },
        }
    }

    fn readdir(&self, path: &str) -> TreeResult<Vec<String>> {
        let normal = paths::normalize(path)?;
        let inner = self.inner.borrow();
        match &inner.mode {
            Mode::Delegating(d) => d.readdir(&normal),
            Mode::Writable => tree::readdir_of(&inner.entries, &normal),
        }
    }

    fn real_path(&self, path: &str) -> Option<PathBuf> {
        let normal = paths::normalize(path).ok()?;
        let inner = self.inner.borrow();
        match &inner.mode {
            Mode::Delegating(d) => d.real_path(&normal),
            Mode::Writable => {
                if normal.is_empty() {
                    Some(inner.root.clone())
                } else {
                    Some(inner.root.join(normal))
                }
            }
        }
    }
}

impl Facade for WritableTree {
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

impl Tree for WritableTree {
    fn changes(&self) -> TreeResult<Vec<Change>> {
        let inner = self.shared.inner.borrow();
        match &inner.mode {
            Mode::Writable => Ok(inner.tracker.changes()),
            Mode::Delegating(d) => {
                // The tracker rarely holds anything here (the root had to be
                // empty), but emptying the tree beforehand leaves removals
                // that still belong in the patch.
                let mut all = inner.tracker.changes();
                all.extend(d.changes()?);
                let (mut removals, additions): (Vec<Change>, Vec<Change>) =
                    all.into_iter().partition(|c| c.op.is_removal());
                removals.sort_by(|a, b| b.path.cmp(&a.path));
                let mut additions = additions;
                additions.sort_by(|a, b| a.path.cmp(&b.path));
                removals.extend(additions);
                Ok(removals)
            }
        }
    }

    fn reread(&self, new_root: Option<&str>) -> TreeResult<()> {
        if new_root.is_some() {
            return Err(TreeError::Eperm(
                "root changes are not allowed on writable trees".into(),
            ));
        }
        // In delegator mode the delegate is reread by its own owner; either
        // way our own projections still get their snapshot barrier.
        let mut observers = std::mem::take(&mut self.shared.inner.borrow_mut().observers);
        let notify = tree::notify_observers(&mut observers);
        self.shared.inner.borrow_mut().observers = observers;
        notify
    }

    fn clone_ref(&self) -> TreeRef {
        self.shared.clone()
    }

    fn add_observer(&self, observer: Weak<dyn RereadObserver>) {
        self.shared.inner.borrow_mut().observers.push(observer);
    }
}
