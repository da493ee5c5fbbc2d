//! The host filesystem contract.
//!
//! Every disk access the trees make goes through here: absolute paths only,
//! synchronous `std::fs` calls, and the two deliberate swallows the layer
//! allows itself (ENOENT while scanning a directory, EINVAL on readlink).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::UNIX_EPOCH;

use kodama_types::{TreeError, TreeResult};

static CAN_SYMLINK: OnceLock<bool> = OnceLock::new();

/// Whether this process can create symlinks.
///
/// Probed once by creating a scratch symlink under the system temp
/// directory. When false, [`symlink_or_copy`] copies and the merge engine
/// skips its symlink-through optimization.
pub fn can_symlink() -> bool {
    *CAN_SYMLINK.get_or_init(probe_symlink)
}

/// Pin the capability flag before first use. Test hook.
#[doc(hidden)]
pub fn force_can_symlink(value: bool) {
    let _ = CAN_SYMLINK.set(value);
}

fn probe_symlink() -> bool {
    static PROBE_ID: AtomicU64 = AtomicU64::new(0);
    let id = PROBE_ID.fetch_add(1, Ordering::SeqCst);
    let link = std::env::temp_dir().join(format!(
        "kodama-symlink-probe-{}-{}",
        std::process::id(),
        id
    ));
    let ok = symlink_raw(Path::new("kodama-probe-target"), &link).is_ok();
    let _ = fs::remove_file(&link);
    ok
}

#[cfg(unix)]
fn symlink_raw(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink_raw(target: &Path, link: &Path) -> io::Result<()> {
    if target.is_dir() {
        std::os::windows::fs::symlink_dir(target, link)
    } else {
        std::os::windows::fs::symlink_file(target, link)
    }
}

/// Stat following symlinks. `Ok(None)` for a missing or broken target.
pub fn try_stat(path: &Path) -> TreeResult<Option<fs::Metadata>> {
    match fs::metadata(path) {
        Ok(meta) => Ok(Some(meta)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Mode bits of a stat result.
#[cfg(unix)]
pub fn mode_of(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::MetadataExt;
    meta.mode()
}

#[cfg(not(unix))]
pub fn mode_of(meta: &fs::Metadata) -> u32 {
    if meta.is_dir() {
        kodama_types::DIR_MODE
    } else {
        kodama_types::FILE_MODE
    }
}

/// Modification time as whole seconds past the epoch, or None when the
/// platform cannot answer.
pub fn mtime_of(meta: &fs::Metadata) -> Option<i64> {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
}

/// Current time as whole seconds past the epoch.
pub fn now_epoch() -> i64 {
    UNIX_EPOCH
        .elapsed()
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// List a directory's child names, sorted. A missing directory lists empty;
/// scanning tolerates directories that have not been created yet.
pub fn readdir_names(path: &Path) -> TreeResult<Vec<String>> {
    let iter = match fs::read_dir(path) {
        Ok(iter) => iter,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut names = Vec::new();
    for dirent in iter {
        let dirent = dirent.map_err(TreeError::from)?;
        names.push(dirent.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

/// Read the target of a symlink. `Ok(None)` when the path is not a link
/// (EINVAL is the "not a link" answer, not an error).
pub fn readlink(path: &Path) -> TreeResult<Option<PathBuf>> {
    match fs::read_link(path) {
        Ok(target) => Ok(Some(target)),
        Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn read(path: &Path) -> TreeResult<Vec<u8>> {
    fs::read(path).map_err(|e| annotate(e, path))
}

pub fn write(path: &Path, data: &[u8]) -> TreeResult<()> {
    fs::write(path, data).map_err(|e| annotate(e, path))
}

pub fn mkdir(path: &Path) -> TreeResult<()> {
    fs::create_dir(path).map_err(|e| annotate(e, path))
}

pub fn rmdir(path: &Path) -> TreeResult<()> {
    fs::remove_dir(path).map_err(|e| annotate(e, path))
}

pub fn unlink(path: &Path) -> TreeResult<()> {
    fs::remove_file(path).map_err(|e| annotate(e, path))
}

/// Symlink `target` at `link` on capable platforms; deep-copy otherwise.
pub fn symlink_or_copy(target: &Path, link: &Path) -> TreeResult<()> {
    if can_symlink() {
        symlink_raw(target, link).map_err(|e| annotate(e, link))
    } else {
        copy_recursive(target, link)
    }
}

/// Create a (possibly dangling) symlink without the copy fallback.
pub fn symlink(target: &Path, link: &Path) -> TreeResult<()> {
    symlink_raw(target, link).map_err(|e| annotate(e, link))
}

fn copy_recursive(from: &Path, to: &Path) -> TreeResult<()> {
    let meta = fs::metadata(from).map_err(|e| annotate(e, from))?;
    if meta.is_dir() {
        fs::create_dir(to).map_err(|e| annotate(e, to))?;
        for name in readdir_names(from)? {
            copy_recursive(&from.join(&name), &to.join(&name))?;
        }
    } else {
        fs::copy(from, to).map_err(|e| annotate(e, to))?;
    }
    Ok(())
}

/// Keep the path visible in the error text; the raw io::Error often only
/// carries the kind.
fn annotate(err: io::Error, path: &Path) -> TreeError {
    TreeError::from(io::Error::new(err.kind(), format!("{}", path.display())))
}
