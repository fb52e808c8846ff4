//! Error types for the audit trail

use crate::error::{ErrorCode, SafetyError};
use std::path::PathBuf;
use thiserror::Error;

/// Result type for audit operations
pub type AuditResult<T> = Result<T, AuditError>;

/// Audit error types
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV sink error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AuditError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Convert AuditError to SafetyError
impl From<AuditError> for SafetyError {
    fn from(err: AuditError) -> Self {
        let (code, path) = match &err {
            AuditError::Io { path, .. } => (ErrorCode::AUDIT_IO_ERROR, Some(path.clone())),
            AuditError::Csv(_) => (ErrorCode::AUDIT_SINK_ERROR, None),
            AuditError::Serialization(_) => (ErrorCode::AUDIT_SERIALIZATION_ERROR, None),
        };
        SafetyError::audit_with_code(code, err.to_string(), path).with_source(err)
    }
}
