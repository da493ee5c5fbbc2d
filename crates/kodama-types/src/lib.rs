//! Shared value types for the kodama tree layer.
//!
//! Everything that crosses a crate boundary lives here: the [`Entry`] record
//! describing one path in a tree, the [`Change`] wire format emitted by diffs
//! and change trackers, and the [`TreeError`] taxonomy. The tree
//! implementations themselves live in `kodama-tree`.

mod change;
mod entry;
mod error;

pub use change::{Change, ChangeOp};
pub use entry::{Entry, EntryKind, Facade, Link, TreeRef, DIR_MODE, FILE_MODE};
pub use error::{TreeError, TreeResult};
