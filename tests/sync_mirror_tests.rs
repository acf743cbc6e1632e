/*!
 * End-to-end sync/mirror tests against the public `copycat` API.
 *
 * Covers the seed scenarios from the reconciliation decision tables:
 * first run, idempotent re-run, overwrite on mtime change, type change,
 * and delete-excluded.
 */

use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

use copycat::config::{PartialConfig, SyncConfig};
use copycat::plan::Plan;
use tempfile::tempdir;

fn sync_once(source: &Path, target: &Path, overrides: PartialConfig) -> std::sync::Arc<Plan> {
    let cli = PartialConfig {
        source_root: Some(source.to_path_buf()),
        target_root: Some(target.to_path_buf()),
        ..overrides
    };
    let config = SyncConfig::compute(None, cli).unwrap();
    let plan = Plan::new(config);
    copycat::sync(plan.clone()).unwrap();
    plan
}

#[test]
fn first_run_copies_tree_with_expected_stats() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("src");
    let tgt = dir.path().join("tgt");
    fs::create_dir_all(src.join("sub")).unwrap();
    fs::write(src.join("a.txt"), vec![0u8; 100]).unwrap();
    fs::write(src.join("sub/b.txt"), vec![0u8; 200]).unwrap();

    let plan = sync_once(&src, &tgt, PartialConfig::default());

    assert!(tgt.join("a.txt").exists());
    assert!(tgt.join("sub/b.txt").exists());
    let snap = plan.stats.snapshot();
    assert_eq!(snap.files_copied, 2);
    assert_eq!(snap.bytes_copied, 300);
}

#[test]
fn idempotent_rerun_copies_nothing() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("src");
    let tgt = dir.path().join("tgt");
    fs::create_dir_all(&src).unwrap();
    fs::write(src.join("a.txt"), vec![0u8; 100]).unwrap();
    fs::write(src.join("b.txt"), vec![0u8; 50]).unwrap();

    sync_once(&src, &tgt, PartialConfig::default());
    let second = sync_once(&src, &tgt, PartialConfig::default());

    let snap = second.stats.snapshot();
    assert_eq!(snap.files_copied, 0);
    assert_eq!(snap.skipped, 2);
}

#[test]
fn overwrite_on_mtime_change() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("src");
    let tgt = dir.path().join("tgt");
    fs::create_dir_all(&src).unwrap();
    fs::write(src.join("a.txt"), vec![0u8; 100]).unwrap();

    sync_once(&src, &tgt, PartialConfig::default());

    let future = SystemTime::now() + Duration::from_secs(2);
    filetime::set_file_mtime(src.join("a.txt"), filetime::FileTime::from_system_time(future))
        .unwrap();

    let plan = sync_once(&src, &tgt, PartialConfig::default());
    let snap = plan.stats.snapshot();
    assert_eq!(snap.files_copied, 1);
    assert_eq!(snap.bytes_copied, 100);
}

#[test]
fn type_change_from_file_to_directory_deletes_then_creates() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("src");
    let tgt = dir.path().join("tgt");
    fs::create_dir_all(src.join("x")).unwrap();
    fs::write(src.join("x/inner.txt"), b"payload").unwrap();
    fs::create_dir_all(&tgt).unwrap();
    fs::write(tgt.join("x"), b"was a plain file").unwrap();

    let plan = sync_once(&src, &tgt, PartialConfig::default());

    assert!(tgt.join("x").is_dir());
    assert!(tgt.join("x/inner.txt").exists());
    let snap = plan.stats.snapshot();
    assert_eq!(snap.files_deleted, 1);
    assert!(snap.dirs_created >= 1);
}

#[test]
fn delete_excluded_removes_orphan_and_keeps_included() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("src");
    let tgt = dir.path().join("tgt");
    fs::create_dir_all(&src).unwrap();
    fs::write(src.join("a.txt"), b"keep me").unwrap();
    fs::create_dir_all(&tgt).unwrap();
    fs::write(tgt.join("orphan.txt"), b"stale").unwrap();

    let plan = sync_once(
        &src,
        &tgt,
        PartialConfig {
            delete_excluded: Some(true),
            ..Default::default()
        },
    );

    assert!(tgt.join("a.txt").exists());
    assert!(!tgt.join("orphan.txt").exists());
    assert_eq!(plan.stats.snapshot().files_deleted, 1);
}

#[test]
fn dry_run_leaves_target_untouched() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("src");
    let tgt = dir.path().join("tgt");
    fs::create_dir_all(&src).unwrap();
    fs::write(src.join("a.txt"), b"data").unwrap();

    let plan = sync_once(
        &src,
        &tgt,
        PartialConfig {
            dry_run: Some(true),
            ..Default::default()
        },
    );

    assert!(!tgt.exists());
    assert_eq!(plan.stats.snapshot().files_copied, 1);
}
