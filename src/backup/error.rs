//! Error types for snapshot creation and restore

use crate::error::{ErrorCode, SafetyError};
use std::path::PathBuf;
use thiserror::Error;

/// Result type for backup operations
pub type BackupResult<T> = Result<T, BackupError>;

/// Backup error types
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("No files provided for backup")]
    NoFiles,

    #[error("Backup not found: {0}")]
    NotFound(String),

    #[error("Backup metadata unavailable for {backup_id}: {reason}")]
    MetadataMissing { backup_id: String, reason: String },

    #[error("Backup integrity verification failed: {0}")]
    IntegrityFailed(String),

    #[error("Path {} is outside the project root {}", path.display(), root.display())]
    OutsideProject { path: PathBuf, root: PathBuf },

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Copy worker failed: {0}")]
    Worker(String),
}

impl BackupError {
    /// Create an I/O error tagged with the path involved
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Convert BackupError to SafetyError
impl From<BackupError> for SafetyError {
    fn from(err: BackupError) -> Self {
        let (code, backup_id) = match &err {
            BackupError::NoFiles => (ErrorCode::BACKUP_NO_FILES, None),
            BackupError::NotFound(id) => (ErrorCode::BACKUP_NOT_FOUND, Some(id.clone())),
            BackupError::MetadataMissing { backup_id, .. } => {
                (ErrorCode::BACKUP_METADATA_MISSING, Some(backup_id.clone()))
            }
            BackupError::IntegrityFailed(id) => {
                (ErrorCode::BACKUP_INTEGRITY_FAILED, Some(id.clone()))
            }
            BackupError::OutsideProject { .. } => (ErrorCode::BACKUP_OUTSIDE_PROJECT, None),
            BackupError::Io { .. } => (ErrorCode::BACKUP_IO_ERROR, None),
            BackupError::Archive(_) => (ErrorCode::BACKUP_ARCHIVE_ERROR, None),
            BackupError::Serialization(_) => (ErrorCode::BACKUP_SERIALIZATION_ERROR, None),
            BackupError::Worker(_) => (ErrorCode::BACKUP_GENERIC, None),
        };

        SafetyError::backup_with_code(code, err.to_string(), backup_id).with_source(err)
    }
}
