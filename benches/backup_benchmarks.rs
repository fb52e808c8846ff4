//! Performance benchmarks for snapshot creation and audit logging

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use safeprune::audit::{AuditLogger, FileOperation};
use safeprune::backup::{checksum, BackupManager, BackupMethod};
use safeprune::config::{AuditSettings, SafetyConfig};
use std::fs;
use std::hint::black_box;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

/// Project with `count` files of `size` bytes each
fn create_project(count: usize, size: usize) -> (TempDir, Vec<PathBuf>) {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("Cargo.toml"), "[package]\nname = \"bench\"\n").unwrap();
    let data = "x".repeat(size);
    let files = (0..count)
        .map(|i| {
            let path = dir.path().join("data").join(format!("file_{:04}.bin", i));
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, &data).unwrap();
            path
        })
        .collect();
    (dir, files)
}

fn bench_create_backup(c: &mut Criterion) {
    let mut group = c.benchmark_group("create_backup");
    group.warm_up_time(Duration::from_secs(1));
    group.measurement_time(Duration::from_secs(5));
    group.sample_size(20);

    for count in [10, 100, 500] {
        let (dir, files) = create_project(count, 4096);
        let manager = BackupManager::from_config(dir.path(), &SafetyConfig::default()).unwrap();

        for method in [BackupMethod::Copy, BackupMethod::Archive] {
            group.bench_with_input(BenchmarkId::new(method.as_str(), count), &files, |b, files| {
                b.iter(|| {
                    let metadata = manager.create_backup(files, "bench", method).unwrap();
                    black_box(&metadata);
                    fs::remove_dir_all(manager.backup_root().join(&metadata.backup_id)).unwrap();
                });
            });
        }
    }
    group.finish();
}

fn bench_verify_backup(c: &mut Criterion) {
    let (dir, files) = create_project(200, 4096);
    let manager = BackupManager::from_config(dir.path(), &SafetyConfig::default()).unwrap();
    let metadata = manager
        .create_backup(&files, "bench", BackupMethod::Copy)
        .unwrap();

    c.bench_function("verify_backup_integrity", |b| {
        b.iter(|| black_box(manager.verify_backup_integrity(&metadata.backup_id)));
    });
}

fn bench_sha256_file(c: &mut Criterion) {
    let mut group = c.benchmark_group("sha256_file");
    for size in [1024, 1024 * 1024] {
        let (_dir, files) = create_project(1, size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &files[0], |b, path| {
            b.iter(|| black_box(checksum::sha256_file(path).unwrap()));
        });
    }
    group.finish();
}

fn bench_audit_logging(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let logger = AuditLogger::new(dir.path().join("audit"), &AuditSettings::default()).unwrap();

    c.bench_function("log_file_operation", |b| {
        b.iter(|| {
            logger.log_file_operation(
                "bench_op",
                FileOperation {
                    path: "data/file_0001.bin".to_string(),
                    action: "remove".to_string(),
                    success: true,
                    size_before: Some(4096),
                    ..Default::default()
                },
            )
        });
    });
}

criterion_group!(
    benches,
    bench_create_backup,
    bench_verify_backup,
    bench_sha256_file,
    bench_audit_logging
);
criterion_main!(benches);
