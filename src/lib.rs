//! # safeprune
//!
//! Safety assurance around irreversible bulk file removal. A detector hands over
//! an ordered list of candidate paths; safeprune validates the environment, takes
//! a snapshot when the risk warrants one, removes the files with cooperative
//! cancellation, re-validates the project and rolls back when it broke. Every
//! step lands in a tamper-evident audit trail.
//!
//! ## Modules
//!
//! - `audit` - Append-only event trail with a hash-chained integrity ledger
//! - `backup` - Snapshot creation, verification, restore and pruning
//! - `config` - Layered safety configuration
//! - `emergency` - Signal, resource and timeout driven emergency stops
//! - `error` - Unified error type with numeric codes
//! - `orchestrator` - Phase sequencing for a safe cleanup run
//! - `system` - Host resource probing
//! - `validation` - Pre/post operation checks and rollback planning
pub mod audit;
pub mod backup;
pub mod config;
pub mod emergency;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod system;
pub mod validation;

pub use audit::AuditLogger;
pub use backup::BackupManager;
pub use config::SafetyConfig;
pub use emergency::EmergencyStopManager;
pub use error::{SafetyError, SafetyResult};
pub use orchestrator::{CleanupResult, SafeCleanup};
pub use validation::SafetyValidator;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
