use crate::error::{ErrorCode, SafetyError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Why an emergency stop fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    UserAbort,
    KeyboardInterrupt,
    SignalTermination,
    ResourceThreshold,
    OperationTimeout,
    CriticalError,
    SafetyViolation,
    SystemShutdown,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserAbort => "user_abort",
            Self::KeyboardInterrupt => "keyboard_interrupt",
            Self::SignalTermination => "signal_termination",
            Self::ResourceThreshold => "resource_threshold",
            Self::OperationTimeout => "operation_timeout",
            Self::CriticalError => "critical_error",
            Self::SafetyViolation => "safety_violation",
            Self::SystemShutdown => "system_shutdown",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of the stop manager. `Stopped` holds until `reset()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopPhase {
    #[default]
    Idle,
    Armed,
    Stopping,
    Stopped,
}

/// Snapshot of the situation when a stop fired. Built once, never modified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyContext {
    pub reason: StopReason,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub operation_id: Option<String>,
    pub current_phase: Option<String>,
    pub cleanup_required: bool,
    pub rollback_required: bool,
    pub files_in_progress: Vec<PathBuf>,
}

/// Serializable status of the stop manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyReport {
    pub state: StopPhase,
    pub stop_requested: bool,
    pub operation_id: Option<String>,
    pub current_phase: Option<String>,
    #[serde(with = "humantime_serde")]
    pub elapsed: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,
    pub signal_handlers_installed: bool,
    pub resource_monitoring: bool,
    pub context: Option<EmergencyContext>,
}

/// Maps an operation error to the stop reason it should fire.
pub trait StopCause {
    fn stop_reason(&self) -> StopReason {
        StopReason::CriticalError
    }
}

impl StopCause for SafetyError {
    fn stop_reason(&self) -> StopReason {
        match self.code() {
            ErrorCode::CLEANUP_INTERRUPTED => StopReason::KeyboardInterrupt,
            ErrorCode::CLEANUP_SAFETY_VIOLATION => StopReason::SafetyViolation,
            _ => StopReason::CriticalError,
        }
    }
}

impl StopCause for anyhow::Error {
    fn stop_reason(&self) -> StopReason {
        self.downcast_ref::<SafetyError>()
            .map(StopCause::stop_reason)
            .unwrap_or(StopReason::CriticalError)
    }
}

impl StopCause for String {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_names() {
        assert_eq!(StopReason::OperationTimeout.to_string(), "operation_timeout");
        assert_eq!(
            serde_json::to_string(&StopReason::KeyboardInterrupt).unwrap(),
            "\"keyboard_interrupt\""
        );
    }

    #[test]
    fn test_stop_cause_mapping() {
        assert_eq!(
            SafetyError::interrupted("ctrl-c").stop_reason(),
            StopReason::KeyboardInterrupt
        );
        assert_eq!(
            SafetyError::cleanup("disk error").stop_reason(),
            StopReason::CriticalError
        );
        let wrapped = anyhow::Error::new(SafetyError::interrupted("ctrl-c"));
        assert_eq!(wrapped.stop_reason(), StopReason::KeyboardInterrupt);
        assert_eq!("boom".to_string().stop_reason(), StopReason::CriticalError);
    }
}
