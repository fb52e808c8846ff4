use std::fmt::Display;
use std::path::PathBuf;
use thiserror::Error;

pub mod codes;

pub use codes::{describe_error_code, ErrorCode};

/// The unified error type for safeprune
#[derive(Error, Debug)]
pub enum SafetyError {
    #[error("[E{code:04}] Configuration error: {message}")]
    Config {
        code: u16,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Backup error: {message}")]
    Backup {
        code: u16,
        message: String,
        backup_id: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Audit error: {message}")]
    Audit {
        code: u16,
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Emergency stop error: {message}")]
    Emergency {
        code: u16,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Cleanup error: {message}")]
    Cleanup {
        code: u16,
        message: String,
        operation_id: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Git operation failed: {message}")]
    Git {
        code: u16,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] {message}")]
    Other {
        code: u16,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl SafetyError {
    /// Create a configuration error with default code
    pub fn config(message: impl Into<String>) -> Self {
        Self::config_with_code(ErrorCode::CONFIG_GENERIC, message)
    }

    /// Create a configuration error with specific code
    pub fn config_with_code(code: u16, message: impl Into<String>) -> Self {
        Self::Config {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Create a backup error with specific code and backup ID
    pub fn backup_with_code(
        code: u16,
        message: impl Into<String>,
        backup_id: Option<String>,
    ) -> Self {
        Self::Backup {
            code,
            message: message.into(),
            backup_id,
            source: None,
        }
    }

    /// Create an audit error with specific code and path
    pub fn audit_with_code(code: u16, message: impl Into<String>, path: Option<PathBuf>) -> Self {
        Self::Audit {
            code,
            message: message.into(),
            path,
            source: None,
        }
    }

    /// Create an emergency stop error with specific code
    pub fn emergency_with_code(code: u16, message: impl Into<String>) -> Self {
        Self::Emergency {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Create a cleanup error with default code
    pub fn cleanup(message: impl Into<String>) -> Self {
        Self::cleanup_with_code(ErrorCode::CLEANUP_GENERIC, message, None)
    }

    /// Create a cleanup error with specific code and operation ID
    pub fn cleanup_with_code(
        code: u16,
        message: impl Into<String>,
        operation_id: Option<String>,
    ) -> Self {
        Self::Cleanup {
            code,
            message: message.into(),
            operation_id,
            source: None,
        }
    }

    /// Create an interruption error, raised when an operator interrupts a removal
    pub fn interrupted(message: impl Into<String>) -> Self {
        Self::cleanup_with_code(ErrorCode::CLEANUP_INTERRUPTED, message, None)
    }

    /// Create a git error with specific code
    pub fn git(code: u16, message: impl Into<String>) -> Self {
        Self::Git {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Create a generic other error
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            code: ErrorCode::OTHER_GENERIC,
            message: message.into(),
            source: None,
        }
    }

    /// Add a source error to this error
    pub fn with_source(
        mut self,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        match &mut self {
            Self::Config { source: src, .. }
            | Self::Backup { source: src, .. }
            | Self::Audit { source: src, .. }
            | Self::Emergency { source: src, .. }
            | Self::Cleanup { source: src, .. }
            | Self::Git { source: src, .. }
            | Self::Other { source: src, .. } => {
                *src = Some(source.into());
            }
        }
        self
    }

    /// Add context to the error message
    pub fn with_context(mut self, context: impl Display) -> Self {
        match &mut self {
            Self::Config { message, .. }
            | Self::Backup { message, .. }
            | Self::Audit { message, .. }
            | Self::Emergency { message, .. }
            | Self::Cleanup { message, .. }
            | Self::Git { message, .. }
            | Self::Other { message, .. } => {
                *message = format!("{}: {}", message, context);
            }
        }
        self
    }

    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } => 2,
            Self::Backup { .. } => 3,
            Self::Audit { .. } => 4,
            Self::Emergency { .. } => 5,
            Self::Cleanup { .. } => 6,
            Self::Git { .. } => 7,
            Self::Other { .. } => 1,
        }
    }

    /// Get the error code
    pub fn code(&self) -> u16 {
        match self {
            Self::Config { code, .. }
            | Self::Backup { code, .. }
            | Self::Audit { code, .. }
            | Self::Emergency { code, .. }
            | Self::Cleanup { code, .. }
            | Self::Git { code, .. }
            | Self::Other { code, .. } => *code,
        }
    }

    /// Whether this error represents an operator interruption
    pub fn is_interruption(&self) -> bool {
        self.code() == ErrorCode::CLEANUP_INTERRUPTED
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::Config { message, .. } => format!("Configuration problem: {}", message),
            Self::Backup {
                message, backup_id, ..
            } => match backup_id {
                Some(id) => format!("Backup {} error: {}", id, message),
                None => format!("Backup error: {}", message),
            },
            Self::Audit { message, path, .. } => match path {
                Some(p) => format!("Audit trail error at {}: {}", p.display(), message),
                None => format!("Audit trail error: {}", message),
            },
            Self::Emergency { message, .. } => format!("Emergency stop: {}", message),
            Self::Cleanup {
                message,
                operation_id,
                ..
            } => match operation_id {
                Some(id) => format!("Cleanup {} failed: {}", id, message),
                None => format!("Cleanup failed: {}", message),
            },
            Self::Git { message, .. } => format!("Git error: {}", message),
            Self::Other { message, .. } => message.clone(),
        }
    }

    /// Get a developer-friendly error message with full chain
    pub fn developer_message(&self) -> String {
        format!("{:#}", self)
    }
}

impl From<std::io::Error> for SafetyError {
    fn from(err: std::io::Error) -> Self {
        SafetyError::other(err.to_string()).with_source(err)
    }
}

impl From<git2::Error> for SafetyError {
    fn from(err: git2::Error) -> Self {
        let code = if err.code() == git2::ErrorCode::NotFound {
            ErrorCode::GIT_NOT_REPOSITORY
        } else {
            ErrorCode::GIT_GENERIC
        };
        SafetyError::git(code, err.message().to_string()).with_source(err)
    }
}

impl From<anyhow::Error> for SafetyError {
    fn from(err: anyhow::Error) -> Self {
        SafetyError::other(format!("{:#}", err))
    }
}

/// Result alias for operations returning [`SafetyError`]
pub type SafetyResult<T> = Result<T, SafetyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_code() {
        let err = SafetyError::config_with_code(ErrorCode::CONFIG_PARSE_ERROR, "bad yaml");
        assert_eq!(err.to_string(), "[E1002] Configuration error: bad yaml");
        assert_eq!(err.code(), ErrorCode::CONFIG_PARSE_ERROR);
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_with_context_appends() {
        let err = SafetyError::cleanup("removal failed").with_context("disk full");
        assert_eq!(err.to_string(), "[E5000] Cleanup error: removal failed: disk full");
    }

    #[test]
    fn test_interruption_detection() {
        assert!(SafetyError::interrupted("ctrl-c").is_interruption());
        assert!(!SafetyError::cleanup("boom").is_interruption());
    }

    #[test]
    fn test_user_message_mentions_backup_id() {
        let err = SafetyError::backup_with_code(
            ErrorCode::BACKUP_NOT_FOUND,
            "missing",
            Some("cleanup_1".to_string()),
        );
        assert_eq!(err.user_message(), "Backup cleanup_1 error: missing");
    }

    #[test]
    fn test_source_chain_preserved() {
        use std::error::Error;
        let io = std::io::Error::new(std::io::ErrorKind::Other, "inner");
        let err = SafetyError::from(io);
        assert!(err.source().is_some());
    }
}
