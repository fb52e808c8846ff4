use crate::error::{ErrorCode, SafetyError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmergencyError {
    #[error("Failed to install signal handlers: {0}")]
    SignalInstall(#[source] std::io::Error),

    #[error("Failed to spawn resource monitor: {0}")]
    MonitorSpawn(#[source] std::io::Error),
}

pub type EmergencyResult<T> = Result<T, EmergencyError>;

impl From<EmergencyError> for SafetyError {
    fn from(err: EmergencyError) -> Self {
        let code = match &err {
            EmergencyError::SignalInstall(_) => ErrorCode::EMERGENCY_SIGNAL_INSTALL,
            EmergencyError::MonitorSpawn(_) => ErrorCode::EMERGENCY_MONITOR_SPAWN,
        };
        SafetyError::emergency_with_code(code, err.to_string()).with_source(err)
    }
}
