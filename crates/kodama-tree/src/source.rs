//! Read-only disk trees with lazy per-directory scanning.
//!
//! A source tree never lists more of the disk than its consumers ask for: a
//! directory is scanned the first time something needs its contents and the
//! result is cached until the next reread barrier.

use std::cell::RefCell;
use std::collections::HashSet;
use std::path::PathBuf;
use std::rc::{Rc, Weak};

use kodama_types::{Change, Entry, Facade, TreeError, TreeRef, TreeResult};

use crate::fsio;
use crate::manual::{default_equals, diff_entries};
use crate::paths;
use crate::tree::{self, RereadObserver, Tree};

struct SourceInner {
    root: PathBuf,
    scanned: HashSet<String>,
    entries: Vec<Entry>,
    previous: Vec<Entry>,
    observers: Vec<Weak<dyn RereadObserver>>,
}

pub(crate) struct SourceShared {
    inner: RefCell<SourceInner>,
}

/// A read-only view of a disk directory.
#[derive(Clone)]
pub struct SourceTree {
    shared: Rc<SourceShared>,
}

impl SourceTree {
    /// Open a source tree over an existing absolute directory.
    pub fn new(root: &str) -> TreeResult<Self> {
        let root = paths::validate_root(root)?;
        Ok(Self {
            shared: Rc::new(SourceShared {
                inner: RefCell::new(SourceInner {
                    root,
                    scanned: HashSet::new(),
                    entries: Vec::new(),
                    previous: Vec::new(),
                    observers: Vec::new(),
                }),
            }),
        })
    }

    /// The directory this tree reads from.
    pub fn root(&self) -> PathBuf {
        self.shared.inner.borrow().root.clone()
    }
}

impl SourceInner {
    /// Scan one directory level if it has not been scanned yet. A directory
    /// missing on disk scans to nothing; broken symlinks are discarded.
    fn ensure_dir(&mut self, dir: &str) -> TreeResult<()> {
        if self.scanned.contains(dir) {
            return Ok(());
        }
        let disk_dir = if dir.is_empty() {
            self.root.clone()
        } else {
            self.root.join(dir)
        };
        for name in fsio::readdir_names(&disk_dir)? {
            let rel = tree::join_target(dir, &name);
            let meta = match fsio::try_stat(&disk_dir.join(&name))? {
                Some(meta) => meta,
                None => {
                    tracing::debug!(path = %rel, "discarding broken symlink during scan");
                    continue;
                }
            };
            let entry = Entry::from_stat(
                rel,
                fsio::mode_of(&meta),
                meta.len(),
                fsio::mtime_of(&meta).unwrap_or(0),
            );
            paths::insert_sorted(&mut self.entries, entry);
        }
        self.scanned.insert(dir.to_string());
        Ok(())
    }

    /// Scan a directory and everything below it. Each pass can surface new
    /// subdirectories, so iterate until none are left unscanned.
    fn ensure_subtree(&mut self, dir: &str) -> TreeResult<()> {
        self.ensure_dir(dir)?;
        loop {
            let pending: Vec<String> = self
                .entries
                .iter()
                .filter(|e| {
                    e.is_dir()
                        && (dir.is_empty() || paths::is_ancestor(dir, &e.relative_path))
                        && !self.scanned.contains(&e.relative_path)
                })
                .map(|e| e.relative_path.clone())
                .collect();
            if pending.is_empty() {
                return Ok(());
            }
            for sub in pending {
                self.ensure_dir(&sub)?;
            }
        }
    }
}

impl Facade for SourceShared {
    fn entries(&self) -> TreeResult<Vec<Entry>> {
        let mut inner = self.inner.borrow_mut();
        inner.ensure_subtree("")?;
        Ok(inner.entries.clone())
    }

    fn stat(&self, path: &str) -> TreeResult<Entry> {
        let normal = paths::normalize(path)?;
        if normal.is_empty() {
            return Ok(Entry::root());
        }
        let mut inner = self.inner.borrow_mut();
        inner.ensure_dir(paths::parent_of(&normal))?;
        match paths::find_index(&inner.entries, &normal) {
            Ok(idx) => Ok(inner.entries[idx].clone()),
            Err(_) => Err(TreeError::NoEntry(normal)),
        }
    }

    fn exists(&self, path: &str) -> TreeResult<bool> {
        let normal = paths::normalize(path)?;
        if normal.is_empty() {
            return Ok(true);
        }
        let mut inner = self.inner.borrow_mut();
        let parent = paths::parent_of(&normal).to_string();
        if inner.scanned.contains(&parent) {
            return Ok(paths::find_index(&inner.entries, &normal).is_ok());
        }
        // Unscanned parent: answer with a direct stat rather than forcing a
        // scan just for an existence probe.
        let root = inner.root.clone();
        drop(inner);
        Ok(fsio::try_stat(&root.join(&normal))?.is_some())
    }

    fn read_file(&self, path: &str) -> TreeResult<Vec<u8>> {
        let entry = self.stat(path)?;
        if entry.is_dir() {
            return Err(TreeError::IsDir(entry.relative_path));
        }
        let root = self.inner.borrow().root.clone();
        fsio::read(&root.join(&entry.relative_path))
    }

    fn readdir(&self, path: &str) -> TreeResult<Vec<String>> {
        let normal = paths::normalize(path)?;
        let stat = self.stat(&normal)?;
        if !stat.is_dir() {
            return Err(TreeError::NotDir(normal));
        }
        let mut inner = self.inner.borrow_mut();
        inner.ensure_dir(&normal)?;
        Ok(inner
            .entries
            .iter()
            .filter(|e| paths::parent_of(&e.relative_path) == normal && !e.relative_path.is_empty())
            .map(|e| e.basename().to_string())
            .collect())
    }

    fn readdir_entries(&self, path: &str) -> TreeResult<Vec<Entry>> {
        let normal = paths::normalize(path)?;
        let mut inner = self.inner.borrow_mut();
        inner.ensure_dir(&normal)?;
        Ok(inner
            .entries
            .iter()
            .filter(|e| paths::parent_of(&e.relative_path) == normal && !e.relative_path.is_empty())
            .cloned()
            .collect())
    }

    fn real_path(&self, path: &str) -> Option<PathBuf> {
        let normal = paths::normalize(path).ok()?;
        let root = self.inner.borrow().root.clone();
        if normal.is_empty() {
            Some(root)
        } else {
            Some(root.join(normal))
        }
    }
}

impl Facade for SourceTree {
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
    fn readdir_entries(&self, path: &str) -> TreeResult<Vec<Entry>> {
        self.shared.readdir_entries(path)
    }
    fn real_path(&self, path: &str) -> Option<PathBuf> {
        self.shared.real_path(path)
    }
}

impl Tree for SourceTree {
    fn changes(&self) -> TreeResult<Vec<Change>> {
        let current = self.entries()?;
        let inner = self.shared.inner.borrow();
        Ok(diff_entries(&inner.previous, &current, default_equals))
    }

    fn reread(&self, new_root: Option<&str>) -> TreeResult<()> {
        // Children snapshot first, while the cache still answers with the
        // old view.
        let mut observers = std::mem::take(&mut self.shared.inner.borrow_mut().observers);
        let notify = tree::notify_observers(&mut observers);
        {
            let mut inner = self.shared.inner.borrow_mut();
            inner.observers = observers;
            notify?;
            inner.previous = std::mem::take(&mut inner.entries);
            inner.scanned.clear();
            if let Some(root) = new_root {
                inner.root = paths::validate_root(root)?;
                tracing::debug!(root = %inner.root.display(), "source tree moved");
            }
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
