//! The entry record: the unified description of one path in a tree.

use std::fmt;
use std::path::PathBuf;
use std::rc::Rc;

use serde::ser::{Serialize, SerializeStruct, Serializer};

use crate::error::TreeResult;

/// Mode bits for a directory entry synthesized without a disk stat.
pub const DIR_MODE: u32 = 0o040755;

/// Mode bits for a file entry synthesized without a disk stat.
pub const FILE_MODE: u32 = 0o100644;

/// Mask selecting the file-type bits of a mode word.
const TYPE_MASK: u32 = 0o170000;
const TYPE_DIR: u32 = 0o040000;

/// Kind of entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// The read surface a link target must expose.
///
/// Internal symlink entries carry a handle to another tree; traversal through
/// the link only ever needs the read half of that tree's capability set. The
/// full `Tree` trait in `kodama-tree` extends this.
pub trait Facade {
    /// All entries of the tree, sorted ascending by relative path.
    fn entries(&self) -> TreeResult<Vec<Entry>>;

    /// Entry metadata for one path. The empty path answers the ROOT sentinel.
    fn stat(&self, path: &str) -> TreeResult<Entry>;

    /// Whether a path exists in the tree.
    fn exists(&self, path: &str) -> TreeResult<bool>;

    /// Contents of a file in the tree.
    fn read_file(&self, path: &str) -> TreeResult<Vec<u8>>;

    /// Names of the immediate children of a directory.
    fn readdir(&self, path: &str) -> TreeResult<Vec<String>>;

    /// Entries of the immediate children of a directory, paths relative to
    /// the tree root. Implementors with a backing entry array answer this
    /// without the per-child stat round trips of the default.
    fn readdir_entries(&self, path: &str) -> TreeResult<Vec<Entry>> {
        let mut out = Vec::new();
        for name in self.readdir(path)? {
            let child = if path.is_empty() {
                name
            } else {
                format!("{path}/{name}")
            };
            out.push(self.stat(&child)?);
        }
        Ok(out)
    }

    /// Where a tree path lives on the host filesystem. `None` for trees
    /// with no disk binding.
    fn real_path(&self, path: &str) -> Option<PathBuf> {
        let _ = path;
        None
    }
}

/// Shared handle to a link target.
pub type TreeRef = Rc<dyn Facade>;

/// Where a symlink entry points.
#[derive(Clone)]
pub enum Link {
    /// An absolute path outside any tree. Reads fall through to the host OS.
    External(PathBuf),
    /// A subtree of another tree. Reads recurse through the referenced tree,
    /// resolving against `target` (empty string means that tree's root).
    Tree { tree: TreeRef, target: String },
}

impl Link {
    /// True if both links name the same place.
    ///
    /// Tree links compare by handle identity plus target path; two distinct
    /// trees rooted at the same directory are different link targets.
    pub fn same_target(&self, other: &Link) -> bool {
        match (self, other) {
            (Link::External(a), Link::External(b)) => a == b,
            (Link::Tree { tree: ta, target: pa }, Link::Tree { tree: tb, target: pb }) => {
                Rc::ptr_eq(ta, tb) && pa == pb
            }
            _ => false,
        }
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Link::External(p) => write!(f, "External({})", p.display()),
            Link::Tree { target, .. } => write!(f, "Tree(<tree>, {:?})", target),
        }
    }
}

/// One path in a tree: kind, mode bits, optional metadata, optional link.
///
/// Entries are immutable once published to a tree; mutation replaces them by
/// position in the owning tree's sorted array. `relative_path` never carries
/// `.`, `..`, repeated separators, or a trailing separator.
#[derive(Debug, Clone)]
pub struct Entry {
    pub relative_path: String,
    pub kind: EntryKind,
    pub mode: u32,
    pub size: Option<u64>,
    pub mtime: Option<i64>,
    pub checksum: Option<String>,
    pub link: Option<Link>,
}

impl Entry {
    /// A file entry with explicit stat metadata.
    pub fn file(path: impl Into<String>, mode: u32, size: u64, mtime: i64) -> Self {
        Self {
            relative_path: path.into(),
            kind: EntryKind::File,
            mode,
            size: Some(size),
            mtime: Some(mtime),
            checksum: None,
            link: None,
        }
    }

    /// A directory entry synthesized without a disk stat.
    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            relative_path: path.into(),
            kind: EntryKind::Directory,
            mode: DIR_MODE,
            size: None,
            mtime: None,
            checksum: None,
            link: None,
        }
    }

    /// An entry built from stat output; kind is derived from the type bits.
    pub fn from_stat(path: impl Into<String>, mode: u32, size: u64, mtime: i64) -> Self {
        let kind = if mode & TYPE_MASK == TYPE_DIR {
            EntryKind::Directory
        } else {
            EntryKind::File
        };
        Self {
            relative_path: path.into(),
            kind,
            mode,
            size: Some(size),
            mtime: Some(mtime),
            checksum: None,
            link: None,
        }
    }

    /// A file-kind entry pointing at an absolute path outside any tree.
    pub fn external_link(path: impl Into<String>, target: impl Into<PathBuf>) -> Self {
        Self {
            relative_path: path.into(),
            kind: EntryKind::File,
            mode: FILE_MODE,
            size: None,
            mtime: None,
            checksum: None,
            link: Some(Link::External(target.into())),
        }
    }

    /// An entry grafting a subtree (or single file) of another tree.
    pub fn tree_link(
        path: impl Into<String>,
        kind: EntryKind,
        tree: TreeRef,
        target: impl Into<String>,
    ) -> Self {
        let mode = match kind {
            EntryKind::Directory => DIR_MODE,
            EntryKind::File => FILE_MODE,
        };
        Self {
            relative_path: path.into(),
            kind,
            mode,
            size: None,
            mtime: None,
            checksum: None,
            link: Some(Link::Tree {
                tree,
                target: target.into(),
            }),
        }
    }

    /// The ROOT sentinel: a tree's own root. Empty path, never stored in an
    /// entries array.
    pub fn root() -> Self {
        Self::directory("")
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    /// True for a directory entry that grafts another tree.
    pub fn is_dir_link(&self) -> bool {
        self.is_dir() && matches!(self.link, Some(Link::Tree { .. }))
    }

    /// Clone this entry under a new relative path, preserving the link
    /// descriptor and all metadata.
    pub fn with_path(&self, path: impl Into<String>) -> Self {
        let mut clone = self.clone();
        clone.relative_path = path.into();
        clone
    }

    /// The final path segment.
    pub fn basename(&self) -> &str {
        match self.relative_path.rfind('/') {
            Some(idx) => &self.relative_path[idx + 1..],
            None => &self.relative_path,
        }
    }
}

// The tree handle inside a link is not serializable; the wire form carries
// the link target summary only.
impl Serialize for Entry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Entry", 7)?;
        s.serialize_field("relativePath", &self.relative_path)?;
        s.serialize_field("kind", &self.kind)?;
        s.serialize_field("mode", &self.mode)?;
        s.serialize_field("size", &self.size)?;
        s.serialize_field("mtime", &self.mtime)?;
        s.serialize_field("checksum", &self.checksum)?;
        let link = self.link.as_ref().map(|l| match l {
            Link::External(p) => format!("external:{}", p.display()),
            Link::Tree { target, .. } => format!("tree:{}", target),
        });
        s.serialize_field("link", &link)?;
        s.end()
    }
}
