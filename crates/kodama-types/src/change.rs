//! The change wire format, the only structured data this layer emits.
//!
//! A patch is an ordered sequence of changes. Consumers may ignore the entry
//! field; it carries enough metadata (mode, mtime, size, checksum, link
//! summary) for apply delegates to replicate side effects.

use std::fmt;

use serde::ser::{Serialize, SerializeTuple, Serializer};

use crate::entry::Entry;

/// Operation kind of one change.
///
/// `Update` serializes as `"change"`; the wire name predates this crate and
/// downstream consumers regex-match it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeOp {
    Mkdir,
    Create,
    Update,
    Rmdir,
    Unlink,
}

impl ChangeOp {
    /// The wire name of this op.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOp::Mkdir => "mkdir",
            ChangeOp::Create => "create",
            ChangeOp::Update => "change",
            ChangeOp::Rmdir => "rmdir",
            ChangeOp::Unlink => "unlink",
        }
    }

    /// True for ops that remove something (applied before all additions).
    pub fn is_removal(&self) -> bool {
        matches!(self, ChangeOp::Rmdir | ChangeOp::Unlink)
    }
}

impl fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One element of a patch: `(op, path, post-state entry)`.
///
/// `path` always equals `entry.relative_path`.
#[derive(Debug, Clone)]
pub struct Change {
    pub op: ChangeOp,
    pub path: String,
    pub entry: Entry,
}

impl Change {
    pub fn new(op: ChangeOp, entry: Entry) -> Self {
        Self {
            op,
            path: entry.relative_path.clone(),
            entry,
        }
    }
}

// Wire form is the triple `[op, relative_path, entry]`.
impl Serialize for Change {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut t = serializer.serialize_tuple(3)?;
        t.serialize_element(self.op.as_str())?;
        t.serialize_element(&self.path)?;
        t.serialize_element(&self.entry)?;
        t.end()
    }
}
