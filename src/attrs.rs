//! Path & attribute layer: classify filesystem entries with a single
//! non-following stat (plus, for symlinks, one following stat to resolve the
//! target kind) and expose the hidden/DOS-system/ACL-capability predicates
//! the rest of the crate needs.

use std::fs;
use std::io;
use std::path::Path;

use filetime::FileTime;

use crate::error::CopycatError;

/// A timestamp as recorded by the filesystem, second-and-nanosecond precision.
pub type Timestamp = FileTime;

/// The kind of a filesystem entry, resolved from at most two `stat` calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Directory,
    FileSymlink,
    DirSymlink,
    BrokenSymlink,
    Other,
    OtherSymlink,
}

impl EntryKind {
    pub fn is_symlink(self) -> bool {
        matches!(
            self,
            EntryKind::FileSymlink
                | EntryKind::DirSymlink
                | EntryKind::BrokenSymlink
                | EntryKind::OtherSymlink
        )
    }

    pub fn is_dir_like(self) -> bool {
        matches!(self, EntryKind::Directory | EntryKind::DirSymlink)
    }

    pub fn is_file_like(self) -> bool {
        matches!(self, EntryKind::File | EntryKind::FileSymlink)
    }
}

/// Cached attributes for one visit of one path. Never re-read unless the
/// reconciliation action requires a fresh value.
#[derive(Debug, Clone)]
pub struct EntryAttrs {
    pub kind: EntryKind,
    pub size: u64,
    pub mtime: Timestamp,
    pub ctime: Timestamp,
}

/// One non-following `stat`; if that reports a symlink, one additional
/// following `stat` is attempted to resolve the target kind. Maps errors per
/// the classifier's conservative rules: an unreadable follow target becomes
/// `FileSymlink` (never `BrokenSymlink`) unless the follow specifically
/// reports `NotFound`.
pub fn classify(path: &Path) -> Result<EntryAttrs, CopycatError> {
    let lstat = fs::symlink_metadata(path).map_err(|source| CopycatError::Entry {
        path: path.to_path_buf(),
        source,
    })?;

    let mtime = FileTime::from_last_modification_time(&lstat);
    let ctime = FileTime::from_creation_time(&lstat).unwrap_or(mtime);

    if !lstat.file_type().is_symlink() {
        let kind = if lstat.is_dir() {
            EntryKind::Directory
        } else if lstat.is_file() {
            EntryKind::File
        } else {
            EntryKind::Other
        };
        return Ok(EntryAttrs {
            kind,
            size: lstat.len(),
            mtime,
            ctime,
        });
    }

    let kind = match fs::metadata(path) {
        Ok(target) => {
            if target.is_dir() {
                EntryKind::DirSymlink
            } else if target.is_file() {
                EntryKind::FileSymlink
            } else {
                EntryKind::OtherSymlink
            }
        }
        Err(ref e) if e.kind() == io::ErrorKind::NotFound => EntryKind::BrokenSymlink,
        Err(_) => EntryKind::FileSymlink,
    };

    Ok(EntryAttrs {
        kind,
        size: lstat.len(),
        mtime,
        ctime,
    })
}

/// Truncate a timestamp to one-second precision, for cross-filesystem
/// mtime comparisons per the equality criterion.
pub fn truncate_to_secs(ts: Timestamp) -> Timestamp {
    FileTime::from_unix_time(ts.seconds(), 0)
}

/// Remove a target entry ahead of a replace/delete decision. Directories
/// (and directory-symlinks resolved as such by the caller) are removed
/// recursively; everything else is a single `remove_file`/`remove_dir`.
pub fn remove_entry(path: &Path, kind: EntryKind) -> io::Result<()> {
    match kind {
        EntryKind::Directory => fs::remove_dir_all(path),
        _ => fs::remove_file(path),
    }
}

#[cfg(unix)]
pub fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

#[cfg(windows)]
pub fn is_hidden(path: &Path) -> bool {
    dos_attributes(path)
        .map(|attrs| attrs & windows_sys::Win32::Storage::FileSystem::FILE_ATTRIBUTE_HIDDEN != 0)
        .unwrap_or(false)
}

#[cfg(unix)]
pub fn is_dos_system(_path: &Path) -> bool {
    false
}

#[cfg(windows)]
pub fn is_dos_system(path: &Path) -> bool {
    dos_attributes(path)
        .map(|attrs| attrs & windows_sys::Win32::Storage::FileSystem::FILE_ATTRIBUTE_SYSTEM != 0)
        .unwrap_or(false)
}

#[cfg(windows)]
fn dos_attributes(path: &Path) -> Option<u32> {
    use std::os::windows::ffi::OsStrExt;
    use windows_sys::Win32::Storage::FileSystem::GetFileAttributesW;
    let wide: Vec<u16> = path
        .as_os_str()
        .encode_wide()
        .chain(std::iter::once(0))
        .collect();
    let attrs = unsafe { GetFileAttributesW(wide.as_ptr()) };
    if attrs == u32::MAX {
        None
    } else {
        Some(attrs)
    }
}

/// Whether `path`'s filesystem exposes POSIX permission/ACL semantics. On
/// this platform family, always true for local paths; the copy primitive
/// uses this only to decide which metadata set to apply, not to probe the
/// actual mount (detecting e.g. FAT-on-Linux is left to the copy attempt
/// itself, which degrades gracefully on `EPERM`).
#[cfg(unix)]
pub fn supports_posix(_path: &Path) -> bool {
    true
}

#[cfg(windows)]
pub fn supports_posix(_path: &Path) -> bool {
    false
}

#[cfg(unix)]
pub fn supports_dos(_path: &Path) -> bool {
    false
}

#[cfg(windows)]
pub fn supports_dos(_path: &Path) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn classifies_regular_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, b"hi").unwrap();
        let attrs = classify(&file).unwrap();
        assert_eq!(attrs.kind, EntryKind::File);
        assert_eq!(attrs.size, 2);
    }

    #[test]
    fn classifies_directory() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        assert_eq!(classify(&sub).unwrap().kind, EntryKind::Directory);
    }

    #[cfg(unix)]
    #[test]
    fn classifies_broken_symlink() {
        let dir = tempdir().unwrap();
        let link = dir.path().join("dangling");
        std::os::unix::fs::symlink(dir.path().join("nowhere"), &link).unwrap();
        assert_eq!(classify(&link).unwrap().kind, EntryKind::BrokenSymlink);
    }

    #[cfg(unix)]
    #[test]
    fn classifies_file_symlink() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("target.txt");
        std::fs::write(&target, b"x").unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&target, &link).unwrap();
        assert_eq!(classify(&link).unwrap().kind, EntryKind::FileSymlink);
    }

    #[cfg(unix)]
    #[test]
    fn hidden_uses_dot_prefix_on_posix() {
        let dir = tempdir().unwrap();
        let hidden = dir.path().join(".secret");
        std::fs::write(&hidden, b"x").unwrap();
        assert!(is_hidden(&hidden));
        assert!(!is_dos_system(&hidden));
    }

    #[test]
    fn truncate_drops_nanoseconds() {
        let ts = FileTime::from_unix_time(100, 500_000_000);
        assert_eq!(truncate_to_secs(ts), FileTime::from_unix_time(100, 0));
    }
}
