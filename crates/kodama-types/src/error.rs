//! Error taxonomy for tree operations.
//!
//! Messages carry POSIX prefixes (`ENOENT:`, `EEXIST:`, ...) because
//! downstream build plugins regex-match error text.

use thiserror::Error;

/// Result type for tree operations.
pub type TreeResult<T> = Result<T, TreeError>;

/// Everything a tree operation can fail with.
#[derive(Debug, Clone, Error)]
pub enum TreeError {
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("ENOENT: no such file or directory, {0}")]
    NoEntry(String),
    #[error("EEXIST: file already exists, {0}")]
    Exists(String),
    #[error("ENOTDIR: not a directory, {0}")]
    NotDir(String),
    #[error("EISDIR: illegal operation on a directory, {0}")]
    IsDir(String),
    #[error("ENOTEMPTY: directory not empty, {0}")]
    NotEmpty(String),
    #[error("EPERM: operation not permitted, {0}")]
    Eperm(String),
    #[error("tree is stopped; writes are not allowed")]
    Stopped,
    #[error("cannot write through symlinked directory: {0}")]
    SymlinkCross(String),
    #[error("cannot combine a files list with include/exclude filters")]
    IncompatibleFilters,
    #[error("merge conflict: {0:?} and {1:?} differ only in capitalization")]
    ConflictingCapitalization(String, String),
    #[error("merge conflict: {0} is a file in one input and a directory in another")]
    ConflictingFileType(String),
    #[error("merge refused to overwrite {0}; pass overwrite to allow it")]
    OverwriteRefused(String),
    #[error("unknown operation {op}; the apply delegate has no {field} callback")]
    UnknownOperation { op: String, field: String },
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TreeError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => TreeError::NoEntry(err.to_string()),
            ErrorKind::AlreadyExists => TreeError::Exists(err.to_string()),
            ErrorKind::IsADirectory => TreeError::IsDir(err.to_string()),
            ErrorKind::NotADirectory => TreeError::NotDir(err.to_string()),
            ErrorKind::DirectoryNotEmpty => TreeError::NotEmpty(err.to_string()),
            ErrorKind::PermissionDenied => TreeError::Eperm(err.to_string()),
            _ => TreeError::Io(err.to_string()),
        }
    }
}
