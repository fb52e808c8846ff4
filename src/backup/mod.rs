//! Snapshot backups taken before files are removed.
//!
//! A snapshot lives in `<backup_root>/<operation>_<YYYYMMDD_HHMMSS_micros>/`:
//!
//! ```text
//! backup_metadata.json   descriptor, written last and never modified
//! files/<relative path>  mirrored payload (copy, incremental)
//! <backup_id>.zip        single container payload (archive)
//! git_info.json          optional version-control context
//! ```
//!
//! Directories and symlinks met while expanding a directory target are recorded
//! in the descriptor and recreated on restore. Creation is all-or-nothing: any
//! failure removes the partial directory.

mod archive;
pub mod checksum;
mod error;
pub mod git_context;
mod types;

pub use error::{BackupError, BackupResult};
pub use types::{
    BackupMetadata, BackupMethod, FileBackupRecord, GitContext, PruneStats, RestoreFailure,
    RestoreSummary, TreeEntry,
};

use crate::config::{BackupSettings, SafetyConfig};
use crate::lock_unpoisoned;
use chrono::{DateTime, Utc};
use checksum::HashingReader;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, SystemTime};
use tempfile::NamedTempFile;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

const METADATA_FILE: &str = "backup_metadata.json";
const GIT_INFO_FILE: &str = "git_info.json";
const FILES_DIR: &str = "files";

/// A file selected for capture
#[derive(Debug, Clone)]
pub(crate) struct SourceFile {
    pub path: PathBuf,
    pub relative: String,
    pub modified: DateTime<Utc>,
    pub permissions: u32,
}

/// Creates, verifies, restores and prunes snapshots for one project
pub struct BackupManager {
    project_root: PathBuf,
    canonical_root: PathBuf,
    backup_root: PathBuf,
    settings: BackupSettings,
}

impl BackupManager {
    pub fn new(
        project_root: impl AsRef<Path>,
        backup_root: impl Into<PathBuf>,
        settings: BackupSettings,
    ) -> BackupResult<Self> {
        let project_root = absolute(project_root.as_ref());
        let canonical_root = project_root
            .canonicalize()
            .map_err(|e| BackupError::io(&project_root, e))?;
        let backup_root = backup_root.into();
        fs::create_dir_all(&backup_root).map_err(|e| BackupError::io(&backup_root, e))?;

        debug!(
            project_root = %project_root.display(),
            backup_root = %backup_root.display(),
            "Backup manager initialized"
        );

        Ok(Self {
            project_root,
            canonical_root,
            backup_root,
            settings,
        })
    }

    /// Build a manager using the snapshot root and settings from `config`.
    pub fn from_config(project_root: impl AsRef<Path>, config: &SafetyConfig) -> BackupResult<Self> {
        let root = project_root.as_ref();
        Self::new(root, config.backup_root(root), config.backup.clone())
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn backup_root(&self) -> &Path {
        &self.backup_root
    }

    pub fn settings(&self) -> &BackupSettings {
        &self.settings
    }

    /// Capture `files` into a new snapshot.
    pub fn create_backup(
        &self,
        files: &[PathBuf],
        operation_type: &str,
        method: BackupMethod,
    ) -> BackupResult<BackupMetadata> {
        if files.is_empty() {
            return Err(BackupError::NoFiles);
        }
        if method == BackupMethod::DryRun {
            return Ok(self.dry_run_descriptor(files, operation_type));
        }

        let (sources, entries) = self.collect_sources(files)?;
        let (backup_id, backup_dir) = self.allocate_snapshot_dir(operation_type)?;
        info!(
            "Creating {} backup {} with {} files and {} tree entries",
            method,
            backup_id,
            sources.len(),
            entries.len()
        );

        match self.write_snapshot(&backup_id, &backup_dir, operation_type, method, &sources, entries) {
            Ok(metadata) => {
                info!(
                    "Backup {} created: {} files, {} bytes",
                    backup_id, metadata.total_files, metadata.total_size_bytes
                );
                Ok(metadata)
            }
            Err(e) => {
                error!("Backup {} failed: {}", backup_id, e);
                if let Err(cleanup) = fs::remove_dir_all(&backup_dir) {
                    warn!(
                        "Failed to remove partial backup {}: {}",
                        backup_dir.display(),
                        cleanup
                    );
                }
                Err(e)
            }
        }
    }

    /// Descriptor for a snapshot that would have been taken. Nothing is written.
    pub fn dry_run_descriptor(&self, files: &[PathBuf], operation_type: &str) -> BackupMetadata {
        let now = Utc::now();
        let records: Vec<FileBackupRecord> = files
            .iter()
            .map(|file| {
                let path = self.resolve(file);
                let meta = fs::metadata(&path).ok();
                let relative = self
                    .relative_to_root(&path)
                    .map(|rel| checksum::relative_key(&rel))
                    .unwrap_or_else(|_| path.display().to_string());
                FileBackupRecord {
                    original_path: path,
                    relative_path: relative,
                    backup_path: PathBuf::new(),
                    file_size: meta.as_ref().map(|m| m.len()).unwrap_or(0),
                    modified_time: meta
                        .as_ref()
                        .and_then(|m| m.modified().ok())
                        .map(DateTime::<Utc>::from)
                        .unwrap_or(now),
                    permissions: meta.as_ref().map(mode_of).unwrap_or(0),
                    checksum: String::new(),
                    backup_timestamp: now,
                }
            })
            .collect();
        let total_size = records.iter().map(|r| r.file_size).sum();

        BackupMetadata {
            backup_id: format!(
                "dry_run_{}_{}",
                sanitize(operation_type),
                now.format("%Y%m%d_%H%M%S")
            ),
            timestamp: now,
            operation_type: operation_type.to_string(),
            total_files: records.len(),
            total_size_bytes: total_size,
            compressed_size_bytes: total_size,
            checksum: String::new(),
            backup_method: BackupMethod::DryRun,
            compression_ratio: 1.0,
            integrity_verified: false,
            project_root: self.project_root.clone(),
            files: records,
            entries: Vec::new(),
        }
    }

    /// Restore files from a snapshot into the project root.
    ///
    /// `files` selects relative paths; `None` restores everything. Existing targets
    /// are skipped unless `overwrite` is set. Per-file failures are reported in the
    /// summary rather than aborting the restore.
    pub fn restore_backup(
        &self,
        backup_id: &str,
        files: Option<&[String]>,
        verify: bool,
        overwrite: bool,
    ) -> BackupResult<RestoreSummary> {
        let backup_dir = self.snapshot_dir(backup_id)?;
        let metadata = self.load_metadata(backup_id)?;

        if verify {
            if let Err(reason) = self.verify_payload(&backup_dir, &metadata) {
                error!("Backup {} failed verification: {}", backup_id, reason);
                return Err(BackupError::IntegrityFailed(backup_id.to_string()));
            }
        }

        let mut summary = RestoreSummary {
            backup_id: backup_id.to_string(),
            ..Default::default()
        };

        let selected: Vec<&FileBackupRecord> = match files {
            Some(wanted) => {
                for name in wanted {
                    if metadata.record(name).is_none() && metadata.entry(name).is_none() {
                        summary.failed.push(RestoreFailure {
                            path: name.clone(),
                            error: "not present in backup".to_string(),
                        });
                    }
                }
                metadata
                    .files
                    .iter()
                    .filter(|r| wanted.contains(&r.relative_path))
                    .collect()
            }
            None => metadata.files.iter().collect(),
        };
        let (directories, symlinks): (Vec<&TreeEntry>, Vec<&TreeEntry>) = metadata
            .entries
            .iter()
            .filter(|e| files.map_or(true, |wanted| wanted.iter().any(|w| w == e.relative_path())))
            .partition(|e| e.is_directory());

        let mut zip = match metadata.backup_method {
            BackupMethod::Archive => Some(archive::open_archive(
                &backup_dir.join(format!("{}.zip", backup_id)),
            )?),
            _ => None,
        };

        for entry in directories {
            self.restore_entry(entry, overwrite, &mut summary);
        }

        for record in selected {
            let target = self.project_root.join(&record.relative_path);
            if target.exists() && !overwrite {
                debug!("Skipping existing file {}", target.display());
                summary.skipped.push(record.relative_path.clone());
                continue;
            }

            let result = match zip.as_mut() {
                Some(zip) => restore_from_archive(zip, record, &target),
                None => restore_from_copy(&backup_dir.join(FILES_DIR), record, &target),
            };
            match result {
                Ok(()) => summary.restored.push(record.relative_path.clone()),
                Err(e) => {
                    warn!("Failed to restore {}: {}", record.relative_path, e);
                    summary.failed.push(RestoreFailure {
                        path: record.relative_path.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        for entry in symlinks {
            self.restore_entry(entry, overwrite, &mut summary);
        }

        info!(
            "Restored {} files from {} ({} failed, {} skipped, {} recreated)",
            summary.restored.len(),
            backup_id,
            summary.failed.len(),
            summary.skipped.len(),
            summary.recreated.len()
        );
        Ok(summary)
    }

    /// Recreate a directory or symlink. Existing directories are left as they are.
    fn restore_entry(&self, entry: &TreeEntry, overwrite: bool, summary: &mut RestoreSummary) {
        let relative = entry.relative_path().to_string();
        let target = self.project_root.join(&relative);

        let result = match entry {
            TreeEntry::Directory { .. } => {
                if target.is_dir() {
                    return;
                }
                fs::create_dir_all(&target)
            }
            TreeEntry::Symlink { target: link, .. } => {
                if fs::symlink_metadata(&target).is_ok() {
                    if !overwrite {
                        debug!("Skipping existing entry {}", target.display());
                        summary.skipped.push(relative);
                        return;
                    }
                    if let Err(e) = fs::remove_file(&target) {
                        summary.failed.push(RestoreFailure {
                            path: relative,
                            error: e.to_string(),
                        });
                        return;
                    }
                }
                let parent = target.parent().unwrap_or(&self.project_root);
                fs::create_dir_all(parent).and_then(|_| make_symlink(link, &target))
            }
        };

        match result {
            Ok(()) => summary.recreated.push(relative),
            Err(e) => {
                warn!("Failed to recreate {}: {}", relative, e);
                summary.failed.push(RestoreFailure {
                    path: relative,
                    error: e.to_string(),
                });
            }
        }
    }

    /// Recompute checksums for a stored snapshot.
    pub fn verify_backup_integrity(&self, backup_id: &str) -> bool {
        let outcome = self.snapshot_dir(backup_id).and_then(|dir| {
            let metadata = self.load_metadata(backup_id)?;
            self.verify_payload(&dir, &metadata)
                .map_err(BackupError::IntegrityFailed)
        });
        match outcome {
            Ok(()) => {
                debug!("Backup {} passed integrity verification", backup_id);
                true
            }
            Err(e) => {
                warn!("Backup {} failed integrity verification: {}", backup_id, e);
                false
            }
        }
    }

    /// All readable snapshots, newest first.
    pub fn list_backups(&self) -> Vec<BackupMetadata> {
        let entries = match fs::read_dir(&self.backup_root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(
                    "Cannot read backup root {}: {}",
                    self.backup_root.display(),
                    e
                );
                return Vec::new();
            }
        };

        let mut backups: Vec<BackupMetadata> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.path().join(METADATA_FILE).is_file())
            .filter_map(|entry| {
                let id = entry.file_name().to_string_lossy().into_owned();
                match self.load_metadata(&id) {
                    Ok(metadata) => Some(metadata),
                    Err(e) => {
                        warn!("Skipping unreadable backup {}: {}", id, e);
                        None
                    }
                }
            })
            .collect();
        backups.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        backups
    }

    pub fn get_backup_info(&self, backup_id: &str) -> Option<BackupMetadata> {
        self.load_metadata(backup_id).ok()
    }

    /// Read the version-control context stored with a snapshot, if any.
    pub fn git_info(&self, backup_id: &str) -> Option<GitContext> {
        let path = self.snapshot_dir(backup_id).ok()?.join(GIT_INFO_FILE);
        let content = fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Remove snapshots older than `max_age`, defaulting to the configured age.
    pub fn cleanup_old_backups(&self, max_age: Option<Duration>) -> PruneStats {
        let max_age = max_age.unwrap_or_else(|| {
            Duration::from_secs(u64::from(self.settings.max_backup_age_days) * 24 * 60 * 60)
        });
        let Some(cutoff) = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return PruneStats::default();
        };

        let mut stats = PruneStats::default();
        for metadata in self.list_backups() {
            if metadata.timestamp >= cutoff {
                continue;
            }
            let dir = self.backup_root.join(&metadata.backup_id);
            let size = dir_size(&dir);
            match fs::remove_dir_all(&dir) {
                Ok(()) => {
                    debug!("Removed old backup {}", metadata.backup_id);
                    stats.removed_count += 1;
                    stats.removed_bytes += size;
                }
                Err(e) => {
                    warn!("Failed to remove backup {}: {}", metadata.backup_id, e);
                    stats.failed_count += 1;
                }
            }
        }

        if stats.removed_count > 0 {
            info!(
                "Pruned {} backups ({} bytes)",
                stats.removed_count, stats.removed_bytes
            );
        }
        stats
    }

    fn write_snapshot(
        &self,
        backup_id: &str,
        backup_dir: &Path,
        operation_type: &str,
        method: BackupMethod,
        sources: &[SourceFile],
        entries: Vec<TreeEntry>,
    ) -> BackupResult<BackupMetadata> {
        let (records, checksum, compressed_size) = match method {
            BackupMethod::Archive => {
                let archive_path = backup_dir.join(format!("{}.zip", backup_id));
                let records =
                    archive::write_archive(sources, &archive_path, self.settings.compression_level)?;
                let checksum = checksum::aggregate_archive(&archive_path)?;
                let compressed = fs::metadata(&archive_path)
                    .map_err(|e| BackupError::io(&archive_path, e))?
                    .len();
                (records, checksum, Some(compressed))
            }
            BackupMethod::Copy | BackupMethod::Incremental | BackupMethod::DryRun => {
                let files_dir = backup_dir.join(FILES_DIR);
                fs::create_dir_all(&files_dir).map_err(|e| BackupError::io(&files_dir, e))?;
                let records = self.copy_files(sources, &files_dir)?;
                (records, checksum::aggregate_directory(&files_dir)?, None)
            }
        };

        let total_size: u64 = records.iter().map(|r| r.file_size).sum();
        let compressed_size = compressed_size.unwrap_or(total_size);
        let compression_ratio = if total_size == 0 {
            1.0
        } else {
            compressed_size as f64 / total_size as f64
        };

        if self.settings.include_git_info {
            match git_context::capture(&self.project_root) {
                Ok(context) => write_json_atomic(&backup_dir.join(GIT_INFO_FILE), &context)?,
                Err(e) => warn!("Could not capture git context: {}", e.message()),
            }
        }

        let mut metadata = BackupMetadata {
            backup_id: backup_id.to_string(),
            timestamp: Utc::now(),
            operation_type: operation_type.to_string(),
            total_files: records.len(),
            total_size_bytes: total_size,
            compressed_size_bytes: compressed_size,
            checksum,
            backup_method: method,
            compression_ratio,
            integrity_verified: false,
            project_root: self.project_root.clone(),
            files: records,
            entries,
        };

        if let Err(reason) = self.verify_payload(backup_dir, &metadata) {
            error!("Fresh backup {} failed verification: {}", backup_id, reason);
            return Err(BackupError::IntegrityFailed(backup_id.to_string()));
        }
        metadata.integrity_verified = true;

        write_json_atomic(&backup_dir.join(METADATA_FILE), &metadata)?;
        Ok(metadata)
    }

    fn copy_files(
        &self,
        sources: &[SourceFile],
        files_dir: &Path,
    ) -> BackupResult<Vec<FileBackupRecord>> {
        let workers = self
            .settings
            .max_parallel_workers
            .min(sources.len())
            .max(1);
        if sources.len() <= self.settings.parallel_threshold || workers == 1 {
            return sources
                .iter()
                .map(|source| copy_one(source, files_dir))
                .collect();
        }

        debug!("Copying {} files with {} workers", sources.len(), workers);
        let next = AtomicUsize::new(0);
        let failed = AtomicBool::new(false);
        let results: Mutex<Vec<(usize, FileBackupRecord)>> =
            Mutex::new(Vec::with_capacity(sources.len()));
        let first_error: Mutex<Option<BackupError>> = Mutex::new(None);

        thread::scope(|scope| -> BackupResult<()> {
            let mut handles = Vec::with_capacity(workers);
            for worker in 0..workers {
                let handle = thread::Builder::new()
                    .name(format!("backup-copy-{}", worker))
                    .spawn_scoped(scope, || {
                        while !failed.load(Ordering::Acquire) {
                            let index = next.fetch_add(1, Ordering::AcqRel);
                            let Some(source) = sources.get(index) else {
                                break;
                            };
                            match copy_one(source, files_dir) {
                                Ok(record) => lock_unpoisoned(&results).push((index, record)),
                                Err(e) => {
                                    failed.store(true, Ordering::Release);
                                    lock_unpoisoned(&first_error).get_or_insert(e);
                                }
                            }
                        }
                    });
                match handle {
                    Ok(handle) => handles.push(handle),
                    Err(e) => {
                        failed.store(true, Ordering::Release);
                        return Err(BackupError::Worker(e.to_string()));
                    }
                }
            }

            let mut panicked = false;
            for handle in handles {
                panicked |= handle.join().is_err();
            }
            if panicked {
                return Err(BackupError::Worker("copy worker panicked".to_string()));
            }
            Ok(())
        })?;

        if let Some(e) = first_error
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
        {
            return Err(e);
        }

        let mut records = results
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        records.sort_by_key(|(index, _)| *index);
        Ok(records.into_iter().map(|(_, record)| record).collect())
    }

    fn verify_payload(&self, backup_dir: &Path, metadata: &BackupMetadata) -> Result<(), String> {
        match metadata.backup_method {
            BackupMethod::DryRun => Ok(()),
            BackupMethod::Archive => {
                let archive_path = backup_dir.join(format!("{}.zip", metadata.backup_id));
                if !archive_path.is_file() {
                    return Err(format!("archive {} is missing", archive_path.display()));
                }
                let actual = checksum::aggregate_archive(&archive_path).map_err(|e| e.to_string())?;
                if actual != metadata.checksum {
                    return Err("aggregate checksum mismatch".to_string());
                }
                Ok(())
            }
            BackupMethod::Copy | BackupMethod::Incremental => {
                let files_dir = backup_dir.join(FILES_DIR);
                for record in &metadata.files {
                    let path = files_dir.join(&record.relative_path);
                    if !path.is_file() {
                        return Err(format!("payload file {} is missing", record.relative_path));
                    }
                    let actual = checksum::sha256_file(&path).map_err(|e| e.to_string())?;
                    if actual != record.checksum {
                        return Err(format!("checksum mismatch for {}", record.relative_path));
                    }
                }
                let actual = checksum::aggregate_directory(&files_dir).map_err(|e| e.to_string())?;
                if actual != metadata.checksum {
                    return Err("aggregate checksum mismatch".to_string());
                }
                Ok(())
            }
        }
    }

    fn load_metadata(&self, backup_id: &str) -> BackupResult<BackupMetadata> {
        let path = self.snapshot_dir(backup_id)?.join(METADATA_FILE);
        let content = fs::read_to_string(&path).map_err(|e| BackupError::MetadataMissing {
            backup_id: backup_id.to_string(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&content).map_err(|e| BackupError::MetadataMissing {
            backup_id: backup_id.to_string(),
            reason: e.to_string(),
        })
    }

    fn snapshot_dir(&self, backup_id: &str) -> BackupResult<PathBuf> {
        let mut components = Path::new(backup_id).components();
        let is_plain_name = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        let dir = self.backup_root.join(backup_id);
        if !is_plain_name || !dir.is_dir() {
            return Err(BackupError::NotFound(backup_id.to_string()));
        }
        Ok(dir)
    }

    fn allocate_snapshot_dir(&self, operation_type: &str) -> BackupResult<(String, PathBuf)> {
        let base = format!(
            "{}_{}",
            sanitize(operation_type),
            Utc::now().format("%Y%m%d_%H%M%S_%6f")
        );
        let mut attempt = 0u32;
        loop {
            let id = if attempt == 0 {
                base.clone()
            } else {
                format!("{}_{}", base, attempt)
            };
            let dir = self.backup_root.join(&id);
            match fs::create_dir(&dir) {
                Ok(()) => return Ok((id, dir)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(BackupError::io(&dir, e)),
            }
        }
    }

    /// Regular files to copy, plus the directories and symlinks around them.
    fn collect_sources(&self, files: &[PathBuf]) -> BackupResult<(Vec<SourceFile>, Vec<TreeEntry>)> {
        let mut sources: BTreeMap<String, SourceFile> = BTreeMap::new();
        let mut entries: BTreeMap<String, TreeEntry> = BTreeMap::new();

        for file in files {
            let path = self.resolve(file);
            let meta = match fs::symlink_metadata(&path) {
                Ok(meta) => meta,
                Err(_) => {
                    warn!("Skipping missing file {}", path.display());
                    continue;
                }
            };
            if path.starts_with(&self.backup_root) {
                continue;
            }

            if !meta.is_dir() {
                self.capture(&path, meta.file_type(), &mut sources, &mut entries)?;
                continue;
            }
            for entry in WalkDir::new(&path).into_iter().filter_map(Result::ok) {
                let file_type = entry.file_type();
                let at_root = file_type.is_dir() && entry.path() == self.project_root;
                if at_root || entry.path().starts_with(&self.backup_root) {
                    continue;
                }
                self.capture(entry.path(), file_type, &mut sources, &mut entries)?;
            }
        }

        Ok((sources.into_values().collect(), entries.into_values().collect()))
    }

    fn capture(
        &self,
        path: &Path,
        file_type: fs::FileType,
        sources: &mut BTreeMap<String, SourceFile>,
        entries: &mut BTreeMap<String, TreeEntry>,
    ) -> BackupResult<()> {
        if file_type.is_file() {
            let source = self.source_file(path)?;
            sources.insert(source.relative.clone(), source);
            return Ok(());
        }

        let relative_path = checksum::relative_key(&self.relative_to_root(path)?);
        let entry = if file_type.is_dir() {
            TreeEntry::Directory { relative_path }
        } else if file_type.is_symlink() {
            let target = fs::read_link(path).map_err(|e| BackupError::io(path, e))?;
            TreeEntry::Symlink {
                relative_path,
                target,
            }
        } else {
            warn!("Skipping special file {}", path.display());
            return Ok(());
        };
        entries.insert(entry.relative_path().to_string(), entry);
        Ok(())
    }

    fn source_file(&self, path: &Path) -> BackupResult<SourceFile> {
        let relative = self.relative_to_root(path)?;
        let meta = fs::metadata(path).map_err(|e| BackupError::io(path, e))?;
        Ok(SourceFile {
            path: path.to_path_buf(),
            relative: checksum::relative_key(&relative),
            modified: meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now()),
            permissions: mode_of(&meta),
        })
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            normalize(path)
        } else {
            normalize(&self.project_root.join(path))
        }
    }

    fn relative_to_root(&self, path: &Path) -> BackupResult<PathBuf> {
        let path = normalize(path);
        let outside = || BackupError::OutsideProject {
            path: path.clone(),
            root: self.project_root.clone(),
        };

        let relative = match path.strip_prefix(&self.project_root) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => {
                // The root may have been given through a symlink (e.g. /tmp on macOS).
                let parent = path.parent().ok_or_else(outside)?;
                let name = path.file_name().ok_or_else(outside)?;
                let canonical = parent.canonicalize().map_err(|_| outside())?.join(name);
                canonical
                    .strip_prefix(&self.canonical_root)
                    .map_err(|_| outside())?
                    .to_path_buf()
            }
        };

        if relative.as_os_str().is_empty() {
            return Err(outside());
        }
        Ok(relative)
    }
}

fn copy_one(source: &SourceFile, files_dir: &Path) -> BackupResult<FileBackupRecord> {
    let dest = files_dir.join(&source.relative);
    let parent = dest.parent().unwrap_or(files_dir);
    fs::create_dir_all(parent).map_err(|e| BackupError::io(parent, e))?;

    let input = File::open(&source.path).map_err(|e| BackupError::io(&source.path, e))?;
    let mut reader = HashingReader::new(input);
    let mut temp = NamedTempFile::new_in(parent).map_err(|e| BackupError::io(parent, e))?;
    io::copy(&mut reader, temp.as_file_mut()).map_err(|e| BackupError::io(&source.path, e))?;
    let (checksum, file_size) = reader.finish();

    temp.as_file()
        .set_modified(SystemTime::from(source.modified))
        .map_err(|e| BackupError::io(&dest, e))?;
    apply_mode(temp.path(), source.permissions).map_err(|e| BackupError::io(&dest, e))?;
    temp.persist(&dest)
        .map_err(|e| BackupError::io(&dest, e.error))?;

    Ok(FileBackupRecord {
        original_path: source.path.clone(),
        relative_path: source.relative.clone(),
        backup_path: dest,
        file_size,
        modified_time: source.modified,
        permissions: source.permissions,
        checksum,
        backup_timestamp: Utc::now(),
    })
}

fn restore_from_copy(files_dir: &Path, record: &FileBackupRecord, target: &Path) -> BackupResult<()> {
    let payload = files_dir.join(&record.relative_path);
    let mut input = File::open(&payload).map_err(|e| BackupError::io(&payload, e))?;
    write_restored(target, record, record.permissions, |out| {
        io::copy(&mut input, out).map(|_| ()).map_err(|e| BackupError::io(&payload, e))
    })
}

fn restore_from_archive(
    zip: &mut zip::ZipArchive<File>,
    record: &FileBackupRecord,
    target: &Path,
) -> BackupResult<()> {
    let mut mode = record.permissions;
    write_restored(target, record, record.permissions, |out| {
        if let Some(entry_mode) = archive::extract_entry(zip, &record.relative_path, out)? {
            mode = entry_mode & 0o7777;
        }
        Ok(())
    })?;
    apply_mode(target, mode).map_err(|e| BackupError::io(target, e))
}

/// Write restored content to a temp sibling of `target` and rename it into place.
fn write_restored<F>(target: &Path, record: &FileBackupRecord, mode: u32, fill: F) -> BackupResult<()>
where
    F: FnOnce(&mut File) -> BackupResult<()>,
{
    let parent = target
        .parent()
        .ok_or_else(|| BackupError::io(target, io::Error::new(io::ErrorKind::InvalidInput, "no parent directory")))?;
    fs::create_dir_all(parent).map_err(|e| BackupError::io(parent, e))?;

    let mut temp = NamedTempFile::new_in(parent).map_err(|e| BackupError::io(parent, e))?;
    fill(temp.as_file_mut())?;
    temp.as_file()
        .set_modified(SystemTime::from(record.modified_time))
        .map_err(|e| BackupError::io(target, e))?;
    apply_mode(temp.path(), mode).map_err(|e| BackupError::io(target, e))?;
    temp.persist(target)
        .map_err(|e| BackupError::io(target, e.error))?;
    Ok(())
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> BackupResult<()> {
    let data = serde_json::to_vec_pretty(value)?;
    let temp_path = path.with_extension("json.tmp");
    fs::write(&temp_path, &data).map_err(|e| BackupError::io(&temp_path, e))?;
    fs::rename(&temp_path, path).map_err(|e| BackupError::io(path, e))?;
    Ok(())
}

fn dir_size(dir: &Path) -> u64 {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter_map(|entry| entry.metadata().ok())
        .filter(|meta| meta.is_file())
        .map(|meta| meta.len())
        .sum()
}

fn sanitize(operation_type: &str) -> String {
    let cleaned: String = operation_type
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "cleanup".to_string()
    } else {
        cleaned
    }
}

pub(crate) fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize(path)
    } else {
        std::env::current_dir()
            .map(|cwd| normalize(&cwd.join(path)))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

/// Lexically resolve `.` and `..` without touching the filesystem.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(unix)]
fn mode_of(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_of(meta: &fs::Metadata) -> u32 {
    if meta.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

#[cfg(unix)]
fn make_symlink(link_target: &Path, path: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(link_target, path)
}

#[cfg(not(unix))]
fn make_symlink(_link_target: &Path, _path: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symlinks are only recreated on unix",
    ))
}

#[cfg(unix)]
fn apply_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
}

#[cfg(not(unix))]
fn apply_mode(path: &Path, mode: u32) -> io::Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_readonly(mode & 0o200 == 0);
    fs::set_permissions(path, permissions)
}
