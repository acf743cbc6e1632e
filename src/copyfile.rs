//! File copy primitive (C5): regular-file copy via write-temp-then-rename,
//! symlink recreation, shallow directory metadata copy, the equality
//! criterion, and metadata/ACL preservation. Grounded on the teacher's
//! `core/metadata.rs` `preserve_metadata` (permissions + `filetime`), with
//! the temp-then-rename transfer pattern and ACL support added fresh.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;

use filetime::{set_file_times, FileTime};
use tracing::warn;

use crate::attrs::{truncate_to_secs, EntryAttrs};
use crate::cancel::CancelToken;
use crate::error::CopycatError;
use crate::plan::Plan;

/// Cancel-check granularity while streaming bytes, per spec.md §5.
const CANCEL_CHECK_BYTES: u64 = 1024 * 1024;
const COPY_BUF_SIZE: usize = 256 * 1024;

/// Two entries are considered equal for sync purposes when both their size
/// and their mtime truncated to one-second precision match. Content is
/// never hashed.
pub fn entries_equal(a: &EntryAttrs, b: &EntryAttrs) -> bool {
    a.size == b.size && truncate_to_secs(a.mtime) == truncate_to_secs(b.mtime)
}

/// Copy a regular file from `source` to `target`: stream into a sibling
/// temp file, then atomically rename over the destination. Falls back to a
/// direct overwrite if the rename fails (e.g. target filesystem doesn't
/// support atomic rename across the temp file's location).
pub fn copy_file(
    plan: &Plan,
    source: &Path,
    target: &Path,
    source_attrs: &EntryAttrs,
) -> Result<(), CopycatError> {
    if plan.config.dry_run {
        plan.stats.record_file_copied(source_attrs.size);
        plan.progress_tracker.mark_progress();
        return Ok(());
    }

    let tmp_path = temp_path_for(target);
    stream_copy(plan, source, &tmp_path)?;

    match fs::rename(&tmp_path, target) {
        Ok(()) => {}
        Err(_) => {
            let result = fs::copy(&tmp_path, target).and_then(|_| fs::remove_file(&tmp_path));
            if let Err(source_err) = result {
                let _ = fs::remove_file(&tmp_path);
                return Err(CopycatError::Entry {
                    path: target.to_path_buf(),
                    source: source_err,
                });
            }
        }
    }

    preserve_metadata(plan, source, target)?;
    plan.stats.record_file_copied(source_attrs.size);
    plan.progress_tracker.mark_progress();
    Ok(())
}

fn temp_path_for(target: &Path) -> std::path::PathBuf {
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_name = format!(".{file_name}.copycat-tmp-{}", std::process::id());
    target.with_file_name(tmp_name)
}

fn stream_copy(plan: &Plan, source: &Path, tmp_path: &Path) -> Result<(), CopycatError> {
    let mut src = File::open(source).map_err(|source_err| CopycatError::Entry {
        path: source.to_path_buf(),
        source: source_err,
    })?;
    let mut dst = File::create(tmp_path).map_err(|source_err| CopycatError::Entry {
        path: tmp_path.to_path_buf(),
        source: source_err,
    })?;

    let mut buf = vec![0u8; COPY_BUF_SIZE];
    let mut since_last_check: u64 = 0;

    loop {
        let n = src.read(&mut buf).map_err(|source_err| CopycatError::Entry {
            path: source.to_path_buf(),
            source: source_err,
        })?;
        if n == 0 {
            break;
        }
        dst.write_all(&buf[..n]).map_err(|source_err| CopycatError::Entry {
            path: tmp_path.to_path_buf(),
            source: source_err,
        })?;

        since_last_check += n as u64;
        if since_last_check >= CANCEL_CHECK_BYTES {
            since_last_check = 0;
            if plan.cancel_token.is_set() {
                let _ = fs::remove_file(tmp_path);
                return Err(CopycatError::Cancelled);
            }
        }
        plan.progress_tracker.mark_progress();
    }

    dst.flush().map_err(|source_err| CopycatError::Entry {
        path: tmp_path.to_path_buf(),
        source: source_err,
    })
}

/// Recreate `source`'s symlink at `target`, never following it. Errors are
/// demoted to a warning and counted as skipped when
/// `ignore_symlink_errors` is set.
pub fn copy_symlink(plan: &Plan, source: &Path, target: &Path) -> Result<(), CopycatError> {
    let link_target = fs::read_link(source).map_err(|source_err| CopycatError::Symlink {
        path: source.to_path_buf(),
        source: source_err,
    })?;

    if plan.config.dry_run {
        plan.stats.record_file_copied(0);
        plan.progress_tracker.mark_progress();
        return Ok(());
    }

    if target.symlink_metadata().is_ok() {
        let _ = fs::remove_file(target);
    }

    match do_symlink(&link_target, target) {
        Ok(()) => {
            plan.stats.record_file_copied(0);
            plan.progress_tracker.mark_progress();
            Ok(())
        }
        Err(source_err) if plan.config.ignore_symlink_errors => {
            warn!(target = %target.display(), source = %source_err, "ignoring symlink copy error");
            plan.stats.record_skipped();
            plan.progress_tracker.mark_progress();
            Ok(())
        }
        Err(source_err) => Err(CopycatError::Symlink {
            path: target.to_path_buf(),
            source: source_err,
        }),
    }
}

#[cfg(unix)]
fn do_symlink(link_target: &Path, target: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(link_target, target)
}

#[cfg(windows)]
fn do_symlink(link_target: &Path, target: &Path) -> io::Result<()> {
    if link_target.is_dir() {
        std::os::windows::fs::symlink_dir(link_target, target)
    } else {
        std::os::windows::fs::symlink_file(link_target, target)
    }
}

/// Applies mtime + permissions (and, when `copy_acl` is set, ACLs) from
/// `source` to `target`. Called after a directory or file is created or
/// replaced.
pub fn preserve_metadata(plan: &Plan, source: &Path, target: &Path) -> Result<(), CopycatError> {
    let meta = fs::metadata(source).map_err(|source_err| CopycatError::Entry {
        path: source.to_path_buf(),
        source: source_err,
    })?;

    fs::set_permissions(target, meta.permissions()).map_err(|source_err| CopycatError::Entry {
        path: target.to_path_buf(),
        source: source_err,
    })?;

    let accessed = FileTime::from_last_access_time(&meta);
    let modified = FileTime::from_last_modification_time(&meta);
    set_file_times(target, accessed, modified).map_err(|source_err| CopycatError::Entry {
        path: target.to_path_buf(),
        source: source_err,
    })?;

    if plan.config.copy_acl {
        copy_acl(source, target);
    }

    Ok(())
}

/// Shallow (non-recursive) directory metadata copy: mtime + permissions
/// only, used by `mirror::ensure_dir` after creating a directory.
pub fn copy_shallow_dir_metadata(
    plan: &Plan,
    source: &Path,
    target: &Path,
) -> Result<(), CopycatError> {
    preserve_metadata(plan, source, target)
}

/// Best-effort ACL preservation. Permission-denied failures are demoted to
/// a warning-level log rather than propagated, since ACL support varies
/// widely across target filesystems.
#[cfg(all(unix, feature = "acl"))]
fn copy_acl(source: &Path, target: &Path) {
    match exacl::getfacl(source, None) {
        Ok(entries) => {
            if let Err(e) = exacl::setfacl(&[target], &entries, None) {
                warn!(target = %target.display(), error = %e, "failed to preserve ACL");
            }
        }
        Err(e) => warn!(source = %source.display(), error = %e, "failed to read ACL"),
    }
}

#[cfg(all(windows, feature = "acl"))]
fn copy_acl(source: &Path, target: &Path) {
    let _ = (source, target);
    warn!("ACL preservation on Windows is not yet wired up in this build");
}

#[cfg(not(feature = "acl"))]
fn copy_acl(_source: &Path, _target: &Path) {}
