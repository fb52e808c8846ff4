//! Snapshot round trips and corruption detection through the public API

mod common;

use common::ProjectFixture;
use safeprune::backup::{BackupManager, BackupMethod};
use safeprune::config::SafetyConfig;
use std::fs;
use std::path::Path;

fn manager(fixture: &ProjectFixture) -> BackupManager {
    BackupManager::from_config(fixture.root(), &SafetyConfig::default()).unwrap()
}

fn make_writable(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o644)).unwrap();
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
}

#[test]
fn test_copy_backup_restores_exact_bytes() {
    let fx = ProjectFixture::new();
    let contents: [&[u8]; 3] = [b"alpha\n", b"\x00\x01\x02binary\xff", b""];
    let files: Vec<_> = contents
        .iter()
        .enumerate()
        .map(|(i, bytes)| fx.file(&format!("data/f{}.bin", i), bytes))
        .collect();

    let manager = manager(&fx);
    let backup = manager
        .create_backup(&files, "cleanup", BackupMethod::Copy)
        .unwrap();
    assert_eq!(backup.total_files, 3);
    assert!(backup.integrity_verified);

    for file in &files {
        fs::remove_file(file).unwrap();
    }

    let summary = manager
        .restore_backup(&backup.backup_id, None, true, false)
        .unwrap();
    assert_eq!(summary.restored.len(), 3);
    assert!(summary.failed.is_empty());
    for (file, expected) in files.iter().zip(contents) {
        assert_eq!(fs::read(file).unwrap(), expected);
    }
}

#[test]
fn test_archive_backup_round_trip() {
    let fx = ProjectFixture::new();
    let files = fx.files("cache", 5);

    let manager = manager(&fx);
    let backup = manager
        .create_backup(&files, "cleanup", BackupMethod::Archive)
        .unwrap();
    for file in &files {
        fs::remove_file(file).unwrap();
    }

    let summary = manager
        .restore_backup(&backup.backup_id, None, true, false)
        .unwrap();
    assert_eq!(summary.restored.len(), 5);
    assert_eq!(fs::read_to_string(&files[3]).unwrap(), "payload 3");
}

#[test]
fn test_corrupted_snapshot_fails_verification() {
    let fx = ProjectFixture::new();
    let files = vec![
        fx.file("notes/a.txt", "first file"),
        fx.file("notes/b.txt", "second file"),
    ];

    let manager = manager(&fx);
    let corrupted = manager
        .create_backup(&files, "cleanup", BackupMethod::Copy)
        .unwrap();
    assert!(manager.verify_backup_integrity(&corrupted.backup_id));

    let payload = corrupted.files[1].backup_path.clone();
    make_writable(&payload);
    let mut bytes = fs::read(&payload).unwrap();
    bytes[0] ^= 0xff;
    fs::write(&payload, bytes).unwrap();

    assert!(!manager.verify_backup_integrity(&corrupted.backup_id));

    let fresh = manager
        .create_backup(&files, "cleanup", BackupMethod::Copy)
        .unwrap();
    assert_ne!(fresh.backup_id, corrupted.backup_id);
    assert!(manager.verify_backup_integrity(&fresh.backup_id));
}

#[test]
fn test_listing_and_pruning() {
    let fx = ProjectFixture::new();
    let files = fx.files("tmp", 2);

    let manager = manager(&fx);
    let first = manager
        .create_backup(&files, "cleanup", BackupMethod::Copy)
        .unwrap();
    let second = manager
        .create_backup(&files, "cleanup", BackupMethod::Copy)
        .unwrap();

    let listed: Vec<String> = manager
        .list_backups()
        .into_iter()
        .map(|b| b.backup_id)
        .collect();
    assert_eq!(listed.len(), 2);
    assert!(listed.contains(&first.backup_id));
    assert!(listed.contains(&second.backup_id));

    let stats = manager.cleanup_old_backups(Some(std::time::Duration::ZERO));
    assert_eq!(stats.removed_count, 2);
    assert!(manager.list_backups().is_empty());
}

#[test]
fn test_unchanged_tree_gives_identical_checksums() {
    let fx = ProjectFixture::new();
    let mut files = fx.files("data", 4);
    files.push(fx.file("data/nested/deep.bin", b"\x00\xffdeep"));

    let manager = manager(&fx);
    let first = manager
        .create_backup(&files, "cleanup", BackupMethod::Copy)
        .unwrap();
    let second = manager
        .create_backup(&files, "cleanup", BackupMethod::Copy)
        .unwrap();

    assert_ne!(first.backup_id, second.backup_id);
    assert_eq!(first.checksum, second.checksum);
    let digests = |b: &safeprune::backup::BackupMetadata| -> Vec<String> {
        b.files.iter().map(|f| f.checksum.clone()).collect()
    };
    assert_eq!(digests(&first), digests(&second));

    fx.file("data/file_000.tmp", "changed");
    let third = manager
        .create_backup(&files, "cleanup", BackupMethod::Copy)
        .unwrap();
    assert_ne!(third.checksum, first.checksum);
}

#[cfg(unix)]
#[test]
fn test_restore_preserves_permission_bits() {
    use std::os::unix::fs::PermissionsExt;

    let fx = ProjectFixture::new();
    let private = fx.file("bin/private.cfg", "secret");
    let script = fx.file("bin/run.sh", "#!/bin/sh\necho hi\n");
    fs::set_permissions(&private, fs::Permissions::from_mode(0o640)).unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

    let manager = manager(&fx);
    let backup = manager
        .create_backup(&[private.clone(), script.clone()], "cleanup", BackupMethod::Copy)
        .unwrap();
    fs::remove_file(&private).unwrap();
    fs::remove_file(&script).unwrap();

    let summary = manager
        .restore_backup(&backup.backup_id, None, true, false)
        .unwrap();
    assert_eq!(summary.restored.len(), 2);

    let mode = |path: &Path| fs::metadata(path).unwrap().permissions().mode() & 0o7777;
    assert_eq!(mode(&private), 0o640);
    assert_eq!(mode(&script), 0o755);
}

#[cfg(unix)]
#[test]
fn test_directory_snapshot_recreates_symlinks_and_empty_dirs() {
    let fx = ProjectFixture::new();
    let build = fx.root().join("build");
    fx.file("build/a.o", "object");
    std::os::unix::fs::symlink("a.o", build.join("link.o")).unwrap();
    fs::create_dir_all(build.join("empty")).unwrap();

    let manager = manager(&fx);
    let backup = manager
        .create_backup(&[build.clone()], "cleanup", BackupMethod::Copy)
        .unwrap();
    let records: Vec<&str> = backup.files.iter().map(|f| f.relative_path.as_str()).collect();
    assert_eq!(records, vec!["build/a.o"]);
    assert!(backup.entry("build/link.o").is_some());
    assert!(backup.entry("build/empty").is_some());

    fs::remove_dir_all(&build).unwrap();

    let summary = manager
        .restore_backup(&backup.backup_id, None, true, false)
        .unwrap();
    assert!(summary.failed.is_empty(), "{:?}", summary.failed);
    assert_eq!(summary.restored, vec!["build/a.o".to_string()]);
    assert!(summary.recreated.contains(&"build/link.o".to_string()));
    assert!(summary.recreated.contains(&"build/empty".to_string()));

    let link = build.join("link.o");
    assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
    assert_eq!(fs::read_link(&link).unwrap(), Path::new("a.o"));
    assert_eq!(fs::read_to_string(&link).unwrap(), "object");
    assert!(build.join("empty").is_dir());
}
