use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// How a snapshot stores its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackupMethod {
    /// Mirror every file under `files/`.
    #[default]
    Copy,
    /// Single deflate-compressed ZIP container.
    Archive,
    /// Same on-disk layout as `Copy`.
    Incremental,
    /// Synthetic descriptor produced in dry-run mode. Nothing is written.
    DryRun,
}

impl BackupMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Copy => "copy",
            Self::Archive => "archive",
            Self::Incremental => "incremental",
            Self::DryRun => "dry_run",
        }
    }

    /// Whether snapshots of this kind keep one file per captured entry.
    pub fn is_mirrored(&self) -> bool {
        matches!(self, Self::Copy | Self::Incremental)
    }
}

impl fmt::Display for BackupMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "copy" => Ok(Self::Copy),
            "archive" | "zip" => Ok(Self::Archive),
            "incremental" => Ok(Self::Incremental),
            "dry_run" | "dry-run" => Ok(Self::DryRun),
            other => Err(format!("unknown backup method '{other}'")),
        }
    }
}

/// One captured file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileBackupRecord {
    pub original_path: PathBuf,
    /// Path below the project root with `/` separators.
    pub relative_path: String,
    pub backup_path: PathBuf,
    pub file_size: u64,
    pub modified_time: DateTime<Utc>,
    /// Unix mode bits, synthesized from the read-only flag elsewhere.
    pub permissions: u32,
    /// SHA-256 of the content, lowercase hex.
    pub checksum: String,
    pub backup_timestamp: DateTime<Utc>,
}

/// A captured directory or symlink. Neither carries a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TreeEntry {
    Directory { relative_path: String },
    Symlink { relative_path: String, target: PathBuf },
}

impl TreeEntry {
    pub fn relative_path(&self) -> &str {
        match self {
            Self::Directory { relative_path } | Self::Symlink { relative_path, .. } => relative_path,
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, Self::Directory { .. })
    }
}

/// Snapshot descriptor persisted as `backup_metadata.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub backup_id: String,
    pub timestamp: DateTime<Utc>,
    pub operation_type: String,
    pub total_files: usize,
    pub total_size_bytes: u64,
    pub compressed_size_bytes: u64,
    /// Aggregate SHA-256 over the captured payload.
    pub checksum: String,
    pub backup_method: BackupMethod,
    pub compression_ratio: f64,
    pub integrity_verified: bool,
    pub project_root: PathBuf,
    pub files: Vec<FileBackupRecord>,
    /// Directories and symlinks found while expanding directory targets.
    #[serde(default)]
    pub entries: Vec<TreeEntry>,
}

impl BackupMetadata {
    pub fn is_dry_run(&self) -> bool {
        self.backup_method == BackupMethod::DryRun
    }

    pub fn record(&self, relative_path: &str) -> Option<&FileBackupRecord> {
        self.files.iter().find(|r| r.relative_path == relative_path)
    }

    pub fn entry(&self, relative_path: &str) -> Option<&TreeEntry> {
        self.entries.iter().find(|e| e.relative_path() == relative_path)
    }
}

/// A file that could not be restored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreFailure {
    pub path: String,
    pub error: String,
}

/// Outcome of a restore, per file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreSummary {
    pub backup_id: String,
    pub restored: Vec<String>,
    pub failed: Vec<RestoreFailure>,
    /// Targets that already existed and were left alone.
    pub skipped: Vec<String>,
    /// Directories and symlinks created again.
    #[serde(default)]
    pub recreated: Vec<String>,
}

impl RestoreSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Result of pruning old snapshots
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneStats {
    pub removed_count: usize,
    pub removed_bytes: u64,
    pub failed_count: usize,
}

/// Version-control state at snapshot time, stored as `git_info.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitContext {
    pub branch: Option<String>,
    pub head_commit: Option<String>,
    pub dirty_files: usize,
    pub captured_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_parsing() {
        assert_eq!("copy".parse::<BackupMethod>(), Ok(BackupMethod::Copy));
        assert_eq!("ZIP".parse::<BackupMethod>(), Ok(BackupMethod::Archive));
        assert_eq!("dry-run".parse::<BackupMethod>(), Ok(BackupMethod::DryRun));
        assert!("tarball".parse::<BackupMethod>().is_err());
    }

    #[test]
    fn test_method_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&BackupMethod::DryRun).unwrap(),
            "\"dry_run\""
        );
        assert!(BackupMethod::Incremental.is_mirrored());
        assert!(!BackupMethod::Archive.is_mirrored());
    }

    #[test]
    fn test_tree_entry_is_tagged() {
        let entry = TreeEntry::Symlink {
            relative_path: "build/link.o".to_string(),
            target: PathBuf::from("a.o"),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["kind"], "symlink");
        assert_eq!(json["target"], "a.o");
        assert_eq!(entry.relative_path(), "build/link.o");
        assert!(!entry.is_directory());
    }
}
