use crate::backup::BackupMetadata;
use crate::emergency::EmergencyContext;
use crate::validation::{CheckResult, RollbackOutcome, SafetyLevel, ValidationReport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupPhase {
    Init,
    PreValidation,
    Backup,
    EmergencySetup,
    CleanupExecution,
    PostValidation,
    Rollback,
    Done,
}

impl CleanupPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::PreValidation => "pre_validation",
            Self::Backup => "backup",
            Self::EmergencySetup => "emergency_setup",
            Self::CleanupExecution => "cleanup_execution",
            Self::PostValidation => "post_validation",
            Self::Rollback => "rollback",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for CleanupPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Book-keeping for one in-flight cleanup
#[derive(Debug, Clone, Serialize)]
pub struct OperationState {
    pub operation_id: String,
    pub operation_type: String,
    pub files: Vec<PathBuf>,
    pub phase: CleanupPhase,
    pub started_at: DateTime<Utc>,
    pub backup: Option<BackupMetadata>,
    pub pre_validation: Option<ValidationReport>,
    pub post_validation: Option<ValidationReport>,
    pub rollback_executed: bool,
    pub rollback: Option<RollbackOutcome>,
    pub operation_successful: bool,
}

impl OperationState {
    pub(crate) fn new(operation_id: &str, operation_type: &str, files: Vec<PathBuf>) -> Self {
        Self {
            operation_id: operation_id.to_string(),
            operation_type: operation_type.to_string(),
            files,
            phase: CleanupPhase::Init,
            started_at: Utc::now(),
            backup: None,
            pre_validation: None,
            post_validation: None,
            rollback_executed: false,
            rollback: None,
            operation_successful: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupOutcome {
    Completed,
    RolledBack,
    Aborted,
    Emergency,
    Failed,
}

/// Result and severity of a validation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub result: CheckResult,
    pub level: SafetyLevel,
}

impl From<&ValidationReport> for ValidationSummary {
    fn from(report: &ValidationReport) -> Self {
        Self {
            result: report.overall_result,
            level: report.overall_safety_level,
        }
    }
}

/// Everything the caller learns about a cleanup run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupResult {
    pub success: bool,
    pub outcome: CleanupOutcome,
    pub operation_id: String,
    pub operation_type: String,
    pub dry_run: bool,
    pub files_requested: usize,
    pub files_processed: usize,
    pub files_removed: usize,
    pub files_failed: usize,
    pub bytes_freed: u64,
    pub backup_id: Option<String>,
    pub pre_validation: Option<ValidationSummary>,
    pub post_validation: Option<ValidationSummary>,
    pub rollback: Option<RollbackOutcome>,
    pub abort_reason: Option<String>,
    pub emergency: Option<EmergencyContext>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    pub error: Option<String>,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
}

impl CleanupResult {
    pub(crate) fn new(operation_id: &str, operation_type: &str, dry_run: bool, files: usize) -> Self {
        Self {
            success: false,
            outcome: CleanupOutcome::Failed,
            operation_id: operation_id.to_string(),
            operation_type: operation_type.to_string(),
            dry_run,
            files_requested: files,
            files_processed: 0,
            files_removed: 0,
            files_failed: 0,
            bytes_freed: 0,
            backup_id: None,
            pre_validation: None,
            post_validation: None,
            rollback: None,
            abort_reason: None,
            emergency: None,
            recommendations: Vec::new(),
            error: None,
            duration: Duration::ZERO,
        }
    }

    /// One-line description used in the audit trail and the CLI.
    pub fn headline(&self) -> String {
        match self.outcome {
            CleanupOutcome::Completed => format!(
                "{} completed: {} removed, {} failed, {} bytes freed",
                self.operation_id, self.files_removed, self.files_failed, self.bytes_freed
            ),
            CleanupOutcome::RolledBack => format!(
                "{} rolled back from backup {}",
                self.operation_id,
                self.backup_id.as_deref().unwrap_or("-")
            ),
            CleanupOutcome::Aborted => format!(
                "{} aborted: {}",
                self.operation_id,
                self.abort_reason.as_deref().unwrap_or("unknown reason")
            ),
            CleanupOutcome::Emergency => format!(
                "{} stopped by emergency: {}",
                self.operation_id,
                self.emergency
                    .as_ref()
                    .map(|c| c.reason.as_str())
                    .unwrap_or("unknown")
            ),
            CleanupOutcome::Failed => format!(
                "{} failed: {}",
                self.operation_id,
                self.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
}

/// Counters from the removal loop
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct RemovalStats {
    pub processed: usize,
    pub removed: usize,
    pub failed: usize,
    pub bytes_freed: u64,
    pub halted: bool,
}
