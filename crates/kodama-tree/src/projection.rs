//! Filtered, non-owning views over a parent tree.
//!
//! A projection composes a working directory with exactly one of two filter
//! families: an explicit `files` whitelist, or `include`/`exclude` matcher
//! lists. Entries are gathered by a recursive descent over the parent that
//! prunes directories no descendant could match, and non-matching ancestor
//! directories are only surfaced once a matching descendant forces them.

use std::cell::RefCell;
use std::fmt;
use std::path::PathBuf;
use std::rc::{Rc, Weak};

use kodama_glob::GlobPath;
use kodama_types::{Change, Entry, Facade, TreeError, TreeRef, TreeResult};

use crate::manual::{default_equals, diff_entries};
use crate::paths;
use crate::tree::{self, RereadObserver, Tree};

/// One include/exclude rule.
#[derive(Clone)]
pub enum Matcher {
    /// A glob pattern (compiled). Bare patterns match basenames at any
    /// depth; patterns with `/` anchor to the projection root.
    Glob(GlobPath),
    /// A regular expression tested against the relative path.
    Regex(regex::Regex),
    /// An arbitrary predicate over the relative path.
    Predicate(Rc<dyn Fn(&str) -> bool>),
}

impl Matcher {
    /// Compile a glob pattern.
    pub fn glob(pattern: &str) -> TreeResult<Self> {
        GlobPath::new(pattern)
            .map(Matcher::Glob)
            .map_err(|e| TreeError::InvalidPath(format!("bad glob {pattern:?}: {e}")))
    }

    /// Compile a regular expression.
    pub fn regex(pattern: &str) -> TreeResult<Self> {
        regex::Regex::new(pattern)
            .map(Matcher::Regex)
            .map_err(|e| TreeError::InvalidPath(format!("bad regex {pattern:?}: {e}")))
    }

    /// Wrap a predicate function.
    pub fn predicate(f: impl Fn(&str) -> bool + 'static) -> Self {
        Matcher::Predicate(Rc::new(f))
    }

    fn matches(&self, path: &str) -> bool {
        match self {
            Matcher::Glob(g) => g.matches(path),
            Matcher::Regex(r) => r.is_match(path),
            Matcher::Predicate(f) => f(path),
        }
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Glob(g) => write!(f, "Glob({g:?})"),
            Matcher::Regex(r) => write!(f, "Regex({})", r.as_str()),
            Matcher::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Construction options for a projection.
///
/// `files` and `include`/`exclude` are mutually exclusive; `cwd` composes
/// with either.
#[derive(Debug, Clone, Default)]
pub struct FilterOptions {
    pub cwd: Option<String>,
    pub files: Option<Vec<String>>,
    pub include: Vec<Matcher>,
    pub exclude: Vec<Matcher>,
}

impl FilterOptions {
    /// Scope to a subdirectory with no other filtering.
    pub fn cwd(path: &str) -> Self {
        Self {
            cwd: Some(path.to_string()),
            ..Self::default()
        }
    }

    /// An explicit file whitelist.
    pub fn files(files: Vec<String>) -> Self {
        Self {
            files: Some(files),
            ..Self::default()
        }
    }

    pub fn with_include(mut self, matchers: Vec<Matcher>) -> Self {
        self.include = matchers;
        self
    }

    pub fn with_exclude(mut self, matchers: Vec<Matcher>) -> Self {
        self.exclude = matchers;
        self
    }
}

struct ProjectionInner {
    parent: TreeRef,
    cwd: String,
    files: Option<Vec<String>>,
    include: Vec<Matcher>,
    exclude: Vec<Matcher>,
    previous: Vec<Entry>,
    observers: Vec<Weak<dyn RereadObserver>>,
}

pub(crate) struct ProjectionShared {
    inner: RefCell<ProjectionInner>,
}

/// A filtered view of another tree. Does not own its parent's storage.
#[derive(Clone)]
pub struct Projection {
    shared: Rc<ProjectionShared>,
}

impl fmt::Debug for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Projection").finish_non_exhaustive()
    }
}

impl Projection {
    pub(crate) fn new(parent: TreeRef, opts: FilterOptions) -> TreeResult<Self> {
        if opts.files.is_some() && (!opts.include.is_empty() || !opts.exclude.is_empty()) {
            return Err(TreeError::IncompatibleFilters);
        }
        let cwd = paths::normalize(opts.cwd.as_deref().unwrap_or(""))?;
        if !cwd.is_empty() {
            let anchor = parent.stat(&cwd)?;
            if !anchor.is_dir() {
                return Err(TreeError::NotDir(cwd));
            }
        }
        let files = match opts.files {
            Some(list) => Some(normalize_files(list)?),
            None => None,
        };
        Ok(Self {
            shared: Rc::new(ProjectionShared {
                inner: RefCell::new(ProjectionInner {
                    parent,
                    cwd,
                    files,
                    include: opts.include,
                    exclude: opts.exclude,
                    previous: Vec::new(),
                    observers: Vec::new(),
                }),
            }),
        })
    }

    pub(crate) fn observer(&self) -> Weak<dyn RereadObserver> {
        let weak: Weak<ProjectionShared> = Rc::downgrade(&self.shared);
        weak
    }

    /// Replace the file whitelist. Rejected while include/exclude matchers
    /// are set. The previous view is snapshotted so `changes()` reports the
    /// filter change.
    pub fn set_files(&self, files: Option<Vec<String>>) -> TreeResult<()> {
        {
            let inner = self.shared.inner.borrow();
            if files.is_some() && (!inner.include.is_empty() || !inner.exclude.is_empty()) {
                return Err(TreeError::IncompatibleFilters);
            }
        }
        let files = match files {
            Some(list) => Some(normalize_files(list)?),
            None => None,
        };
        self.snapshot()?;
        self.shared.inner.borrow_mut().files = files;
        Ok(())
    }

    /// Replace the include matchers. Rejected while a files list is set.
    pub fn set_include(&self, matchers: Vec<Matcher>) -> TreeResult<()> {
        if self.shared.inner.borrow().files.is_some() {
            return Err(TreeError::IncompatibleFilters);
        }
        self.snapshot()?;
        self.shared.inner.borrow_mut().include = matchers;
        Ok(())
    }

    /// Replace the exclude matchers. Rejected while a files list is set.
    pub fn set_exclude(&self, matchers: Vec<Matcher>) -> TreeResult<()> {
        if self.shared.inner.borrow().files.is_some() {
            return Err(TreeError::IncompatibleFilters);
        }
        self.snapshot()?;
        self.shared.inner.borrow_mut().exclude = matchers;
        Ok(())
    }

    /// The projection's working directory relative to its parent.
    pub fn cwd(&self) -> String {
        self.shared.inner.borrow().cwd.clone()
    }

    fn snapshot(&self) -> TreeResult<()> {
        let current = self.shared.entries()?;
        self.shared.inner.borrow_mut().previous = current;
        Ok(())
    }
}

fn normalize_files(list: Vec<String>) -> TreeResult<Vec<String>> {
    let mut out = Vec::with_capacity(list.len());
    for f in list {
        out.push(paths::normalize(&f)?);
    }
    out.sort();
    out.dedup();
    Ok(out)
}

impl ProjectionInner {
    /// Whether `rel` (relative to cwd, non-empty) is one of the projection's
    /// entries.
    fn accepts(&self, rel: &str) -> bool {
        if let Some(files) = &self.files {
            return files.binary_search_by(|f| f.as_str().cmp(rel)).is_ok();
        }
        if self.exclude.iter().any(|m| m.matches(rel)) {
            return false;
        }
        if !self.include.is_empty() && !self.include.iter().any(|m| m.matches(rel)) {
            return false;
        }
        true
    }

    /// Whether descending into a non-matching directory could still surface
    /// matching descendants.
    fn could_descend(&self, rel: &str) -> bool {
        if let Some(files) = &self.files {
            return files.iter().any(|f| paths::is_ancestor(rel, f));
        }
        if self.include.is_empty() {
            return true;
        }
        let all_globs = self.include.iter().all(|m| matches!(m, Matcher::Glob(_)));
        if !all_globs {
            // A regex or predicate can match anywhere; traverse.
            return true;
        }
        self.include.iter().any(|m| match m {
            Matcher::Glob(g) => g.matches_partial(rel),
            _ => false,
        })
    }

    /// Directory pruned outright: excluded directories hide their whole
    /// subtree (the ancestor-exclude rule).
    fn prunes(&self, rel: &str) -> bool {
        self.files.is_none() && self.exclude.iter().any(|m| m.matches(rel))
    }

    fn compute_entries(&self) -> TreeResult<Vec<Entry>> {
        let mut out = Vec::new();
        let mut pending = Vec::new();
        self.descend(&self.cwd.clone(), &mut pending, &mut out)?;
        out.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        paths::assert_sorted_unique(&out);
        Ok(out)
    }

    fn descend(
        &self,
        dir: &str,
        pending: &mut Vec<Entry>,
        out: &mut Vec<Entry>,
    ) -> TreeResult<()> {
        let mut children = self.parent.readdir_entries(dir)?;
        children.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        for child in children {
            let rel = self.relative_to_cwd(&child.relative_path);
            if child.is_dir() {
                if self.prunes(&rel) {
                    continue;
                }
                if self.accepts(&rel) {
                    flush(pending, out);
                    out.push(child.with_path(rel.clone()));
                    self.descend(&child.relative_path, pending, out)?;
                } else if self.could_descend(&rel) {
                    pending.push(child.with_path(rel.clone()));
                    let depth = pending.len();
                    self.descend(&child.relative_path, pending, out)?;
                    // Still pending after the walk: nothing underneath
                    // matched, so the ancestor stays hidden.
                    if pending.len() >= depth {
                        pending.truncate(depth - 1);
                    }
                }
            } else if self.accepts(&rel) {
                flush(pending, out);
                out.push(child.with_path(rel));
            }
        }
        Ok(())
    }

    fn relative_to_cwd(&self, path: &str) -> String {
        if self.cwd.is_empty() {
            path.to_string()
        } else {
            path[self.cwd.len() + 1..].to_string()
        }
    }
}

fn flush(pending: &mut Vec<Entry>, out: &mut Vec<Entry>) {
    out.append(pending);
}

impl Facade for ProjectionShared {
    fn entries(&self) -> TreeResult<Vec<Entry>> {
        self.inner.borrow().compute_entries()
    }

    fn stat(&self, path: &str) -> TreeResult<Entry> {
        let normal = paths::normalize(path)?;
        if normal.is_empty() {
            return Ok(Entry::root());
        }
        let entries = self.entries()?;
        match paths::find_index(&entries, &normal) {
            Ok(idx) => Ok(entries[idx].clone()),
            Err(_) => Err(TreeError::NoEntry(normal)),
        }
    }

    fn exists(&self, path: &str) -> TreeResult<bool> {
        match self.stat(path) {
            Ok(_) => Ok(true),
            Err(TreeError::NoEntry(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn read_file(&self, path: &str) -> TreeResult<Vec<u8>> {
        let entry = self.stat(path)?;
        if entry.is_dir() {
            return Err(TreeError::IsDir(entry.relative_path));
        }
        let (parent, cwd) = {
            let inner = self.inner.borrow();
            (inner.parent.clone(), inner.cwd.clone())
        };
        parent.read_file(&tree::join_target(&cwd, &entry.relative_path))
    }

    fn readdir(&self, path: &str) -> TreeResult<Vec<String>> {
        let normal = paths::normalize(path)?;
        let entries = self.entries()?;
        tree::readdir_of(&entries, &normal)
    }

    fn readdir_entries(&self, path: &str) -> TreeResult<Vec<Entry>> {
        let normal = paths::normalize(path)?;
        let entries = self.entries()?;
        if !normal.is_empty() {
            match paths::find_index(&entries, &normal) {
                Ok(idx) if entries[idx].is_dir() => {}
                Ok(_) => return Err(TreeError::NotDir(normal)),
                Err(_) => return Err(TreeError::NoEntry(normal)),
            }
        }
        Ok(entries
            .into_iter()
            .filter(|e| paths::parent_of(&e.relative_path) == normal && !e.relative_path.is_empty())
            .collect())
    }

    fn real_path(&self, path: &str) -> Option<PathBuf> {
        let inner = self.inner.borrow();
        let normal = paths::normalize(path).ok()?;
        inner
            .parent
            .real_path(&tree::join_target(&inner.cwd, &normal))
    }
}

impl RereadObserver for ProjectionShared {
    fn parent_reread(&self) -> TreeResult<()> {
        // Grandchildren snapshot first; the whole chain still reads the
        // parent's pre-reread view.
        let mut observers = std::mem::take(&mut self.inner.borrow_mut().observers);
        let notify = tree::notify_observers(&mut observers);
        self.inner.borrow_mut().observers = observers;
        notify?;
        let current = self.entries()?;
        self.inner.borrow_mut().previous = current;
        Ok(())
    }
}

impl Facade for Projection {
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

impl Tree for Projection {
    fn changes(&self) -> TreeResult<Vec<Change>> {
        let current = self.shared.entries()?;
        let inner = self.shared.inner.borrow();
        Ok(diff_entries(&inner.previous, &current, default_equals))
    }

    fn reread(&self, new_root: Option<&str>) -> TreeResult<()> {
        if new_root.is_some() {
            return Err(TreeError::InvalidPath(
                "projections do not own a root".into(),
            ));
        }
        self.shared.parent_reread()
    }

    fn clone_ref(&self) -> TreeRef {
        self.shared.clone()
    }

    fn add_observer(&self, observer: Weak<dyn RereadObserver>) {
        self.shared.inner.borrow_mut().observers.push(observer);
    }
}
