//! Virtual filesystem trees for incremental builds.
//!
//! Build plugins consume and produce file hierarchies. This crate gives them
//! uniform, efficiently-diffable, symlink-composable views over those
//! hierarchies so downstream stages apply minimal patches instead of
//! recopying directories.
//!
//! # Architecture
//!
//! ```text
//! SourceTree   WritableTree          (leaves: disk-backed)
//!     \           /      \
//!   Projection  Projection \         (filtered views: cwd, include/exclude, files)
//!        \       /           \
//!        MergeTree         Delegator (overlay; root-symlink mode)
//!            |
//!       build plugin                 (sees one more Tree)
//! ```
//!
//! Every node implements the same read interface ([`Tree`]); diffs come out
//! as ordered [`Change`] patches whose removes run deepest-first and whose
//! additions run shallowest-first, so applying them in sequence is always
//! valid.

mod fsio;
mod manual;
mod merge;
mod paths;
mod projection;
mod source;
mod tracker;
mod tree;
mod writable;

pub use kodama_types::{
    Change, ChangeOp, Entry, EntryKind, Facade, Link, TreeError, TreeRef, TreeResult,
};

pub use fsio::{can_symlink, force_can_symlink, symlink_or_copy};
pub use manual::{default_equals, diff_entries, ApplyDelegate, EqualsFn, ManualTree, OpFn};
pub use merge::MergeTree;
pub use paths::{common_prefix, normalize};
pub use projection::{FilterOptions, Matcher, Projection};
pub use source::SourceTree;
pub use tree::{RereadObserver, Tree};
pub use writable::WritableTree;
