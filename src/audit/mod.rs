//! Append-only audit trail.
//!
//! Every event is written to the enabled sinks (JSON lines, CSV, human-readable
//! log) and its hash is chained into an integrity ledger:
//!
//! ```text
//! event_hash = SHA-256(canonical JSON of the identifying fields)
//! chain_i    = SHA-256(chain_{i-1} + ":" + event_hash_i), chain_0 predecessor = "genesis"
//! ```
//!
//! The ledger is never rotated or rewritten, and a new logger continues the most
//! recent ledger it finds, so the chain spans restarts.

mod error;
pub mod event;
pub mod rotation;
mod sinks;

pub use error::{AuditError, AuditResult};
pub use event::{chain_link, AuditCategory, AuditEvent, AuditLevel, GENESIS};
pub use sinks::SinkPaths;

use crate::config::{AuditSettings, SafetyConfig};
use crate::lock_unpoisoned;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sinks::{SinkSet, CSV_DIR, HUMAN_DIR, INTEGRITY_DIR, JSON_DIR};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt::Display;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// One break found while checking the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainBreak {
    /// 1-based ledger line, 0 when the break is about the ledger as a whole.
    pub line: usize,
    pub reason: String,
}

/// Outcome of [`AuditLogger::verify_integrity`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub integrity_verified: bool,
    pub entries_checked: usize,
    pub chain_length: usize,
    pub chain_breaks: Vec<ChainBreak>,
    pub ledger_path: PathBuf,
    pub verified_at: DateTime<Utc>,
}

/// Status snapshot of the audit trail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSummary {
    pub audit_root: PathBuf,
    pub session_id: String,
    pub user_id: String,
    pub chain_length: usize,
    pub active_operations: Vec<String>,
    pub enabled_formats: Vec<String>,
    pub json_file: PathBuf,
    pub csv_file: PathBuf,
    pub human_file: PathBuf,
    pub ledger_file: PathBuf,
}

/// A file-level action to record
#[derive(Debug, Clone, Default)]
pub struct FileOperation {
    pub path: String,
    pub action: String,
    pub success: bool,
    pub hash_before: Option<String>,
    pub hash_after: Option<String>,
    pub size_before: Option<u64>,
    pub size_after: Option<u64>,
    pub error: Option<String>,
}

struct ActiveOperation {
    operation_type: String,
    started: Instant,
    events_logged: usize,
    files_affected: Vec<String>,
}

struct Ledger {
    path: PathBuf,
    file: File,
    chain: Vec<String>,
}

struct TrailState {
    sinks: SinkSet,
    ledger: Ledger,
}

/// Tamper-evident audit logger
pub struct AuditLogger {
    audit_root: PathBuf,
    retention: Duration,
    user_id: String,
    session_id: String,
    state: Mutex<TrailState>,
    operations: Mutex<HashMap<String, ActiveOperation>>,
}

impl AuditLogger {
    pub fn new(audit_root: impl Into<PathBuf>, settings: &AuditSettings) -> AuditResult<Self> {
        let audit_root = audit_root.into();
        let sinks = SinkSet::open(&audit_root, settings)?;
        let ledger = open_ledger(&audit_root.join(INTEGRITY_DIR))?;
        let session_id = format!("session_{}", Utc::now().timestamp());

        info!(
            "Audit logger initialized at {} (chain length {})",
            audit_root.display(),
            ledger.chain.len()
        );

        Ok(Self {
            audit_root,
            retention: Duration::from_secs(u64::from(settings.retention_days) * 24 * 60 * 60),
            user_id: whoami::username(),
            session_id,
            state: Mutex::new(TrailState { sinks, ledger }),
            operations: Mutex::new(HashMap::new()),
        })
    }

    /// Build a logger using the audit root and settings from `config`.
    pub fn from_config(project_root: &Path, config: &SafetyConfig) -> AuditResult<Self> {
        Self::new(config.audit_root(project_root), &config.audit)
    }

    pub fn audit_root(&self) -> &Path {
        &self.audit_root
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Record an event. Failures are reported through `tracing` only.
    pub fn log_event(&self, event: AuditEvent) {
        if let Err(e) = self.try_log_event(event) {
            error!("Failed to write audit event: {}", e);
        }
    }

    /// Record an event, returning the new ledger entry.
    pub fn try_log_event(&self, mut event: AuditEvent) -> AuditResult<String> {
        if event.user_id.is_none() {
            event.user_id = Some(self.user_id.clone());
        }
        if event.session_id.is_none() {
            event.session_id = Some(self.session_id.clone());
        }

        if let Some(op_id) = &event.operation_id {
            if let Some(op) = lock_unpoisoned(&self.operations).get_mut(op_id) {
                op.events_logged += 1;
            }
        }

        let event_hash = event.integrity_hash();
        let mut state = lock_unpoisoned(&self.state);

        let previous = state
            .ledger
            .chain
            .last()
            .map(String::as_str)
            .unwrap_or(GENESIS);
        let link = chain_link(previous, &event_hash);
        let ledger_path = state.ledger.path.clone();
        writeln!(state.ledger.file, "{}", link)
            .and_then(|_| state.ledger.file.flush())
            .map_err(|e| AuditError::io(&ledger_path, e))?;
        state.ledger.chain.push(link.clone());

        state.sinks.write(&event)?;
        if state.sinks.needs_rotation() {
            state.sinks.rotate()?;
        }
        Ok(link)
    }

    /// Register an operation and record its start.
    pub fn log_operation_start(
        &self,
        operation_id: &str,
        operation_type: &str,
        details: serde_json::Value,
    ) {
        lock_unpoisoned(&self.operations).insert(
            operation_id.to_string(),
            ActiveOperation {
                operation_type: operation_type.to_string(),
                started: Instant::now(),
                events_logged: 0,
                files_affected: Vec::new(),
            },
        );

        self.log_event(
            AuditEvent::new(
                AuditLevel::Audit,
                AuditCategory::Operation,
                format!("Operation started: {}", operation_type),
            )
            .with_operation(operation_id)
            .with_detail("operation_type", operation_type)
            .with_details(details),
        );
    }

    /// Record an operation's end and forget it.
    pub fn log_operation_end(
        &self,
        operation_id: &str,
        success: bool,
        details: serde_json::Value,
    ) {
        let finished = lock_unpoisoned(&self.operations).remove(operation_id);
        let mut event = AuditEvent::new(
            AuditLevel::Audit,
            AuditCategory::Operation,
            format!(
                "Operation {}: {}",
                if success { "completed" } else { "failed" },
                finished
                    .as_ref()
                    .map(|op| op.operation_type.as_str())
                    .unwrap_or(operation_id)
            ),
        )
        .with_operation(operation_id)
        .with_success(success)
        .with_details(details);

        if let Some(op) = finished {
            event = event
                .with_duration(op.started.elapsed())
                .with_detail("operation_type", op.operation_type)
                .with_detail("events_logged", op.events_logged)
                .with_detail("files_affected", op.files_affected.len());
        }
        self.log_event(event);
    }

    /// Record a file-level action and attach it to the active operation.
    pub fn log_file_operation(&self, operation_id: &str, record: FileOperation) {
        if let Some(op) = lock_unpoisoned(&self.operations).get_mut(operation_id) {
            op.files_affected.push(record.path.clone());
        }

        let mut event = AuditEvent::new(
            AuditLevel::Audit,
            AuditCategory::File,
            format!("File {}: {}", record.action, record.path),
        )
        .with_operation(operation_id)
        .with_file(record.path)
        .with_detail("action", record.action);
        event.file_hash_before = record.hash_before;
        event.file_hash_after = record.hash_after;
        event.file_size_before = record.size_before;
        event.file_size_after = record.size_after;
        event = match record.error {
            Some(err) => event.failed(err),
            None => event.with_success(record.success),
        };
        self.log_event(event);
    }

    pub fn log_backup_event(
        &self,
        operation_id: &str,
        backup_id: &str,
        action: &str,
        success: bool,
        details: serde_json::Value,
    ) {
        let level = if success {
            AuditLevel::Audit
        } else {
            AuditLevel::Warning
        };
        self.log_event(
            AuditEvent::new(
                level,
                AuditCategory::Backup,
                format!("Backup {}: {}", action, backup_id),
            )
            .with_operation(operation_id)
            .with_detail("backup_id", backup_id)
            .with_detail("action", action)
            .with_success(success)
            .with_details(details),
        );
    }

    pub fn log_validation_event(
        &self,
        operation_id: &str,
        message: impl Into<String>,
        passed: bool,
        details: serde_json::Value,
    ) {
        let level = if passed {
            AuditLevel::Info
        } else {
            AuditLevel::Warning
        };
        self.log_event(
            AuditEvent::new(level, AuditCategory::Validation, message)
                .with_operation(operation_id)
                .with_success(passed)
                .with_details(details),
        );
    }

    pub fn log_emergency_event(
        &self,
        operation_id: &str,
        message: impl Into<String>,
        details: serde_json::Value,
    ) {
        self.log_event(
            AuditEvent::new(AuditLevel::Critical, AuditCategory::Emergency, message)
                .with_operation(operation_id)
                .with_success(false)
                .with_details(details),
        );
    }

    pub fn log_system_event(&self, message: impl Into<String>, details: serde_json::Value) {
        self.log_event(
            AuditEvent::new(AuditLevel::Info, AuditCategory::System, message).with_details(details),
        );
    }

    /// Run `f` between start and end events.
    ///
    /// An `Err` from `f` additionally records a critical failure event. The end
    /// event is emitted when the scope drops, so it is written during unwinding too.
    pub fn operation_context<T, E, F>(
        &self,
        operation_id: &str,
        operation_type: &str,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce(&OperationScope<'_>) -> Result<T, E>,
        E: Display,
    {
        let scope = OperationScope::begin(self, operation_id, operation_type);
        let result = f(&scope);
        if let Err(e) = &result {
            scope.record_error(&e.to_string());
        }
        result
    }

    /// Check that the on-disk ledger and the in-memory chain agree.
    ///
    /// This is a continuity check only. Event payloads are not re-hashed, so a
    /// consistent rewrite of both sinks and ledger goes unnoticed.
    pub fn verify_integrity(&self) -> IntegrityReport {
        let state = lock_unpoisoned(&self.state);
        let ledger = &state.ledger;
        let mut breaks = Vec::new();

        let lines: Vec<String> = match fs::read_to_string(&ledger.path) {
            Ok(content) => content.lines().map(str::to_string).collect(),
            Err(e) => {
                breaks.push(ChainBreak {
                    line: 0,
                    reason: format!("ledger unreadable: {}", e),
                });
                Vec::new()
            }
        };

        for (index, line) in lines.iter().enumerate() {
            if !event::is_digest(line) {
                breaks.push(ChainBreak {
                    line: index + 1,
                    reason: "not a SHA-256 digest".to_string(),
                });
            } else if ledger.chain.get(index) != Some(line) {
                breaks.push(ChainBreak {
                    line: index + 1,
                    reason: "does not match recorded chain".to_string(),
                });
            }
        }
        if lines.len() != ledger.chain.len() {
            breaks.push(ChainBreak {
                line: 0,
                reason: format!(
                    "ledger has {} entries, chain has {}",
                    lines.len(),
                    ledger.chain.len()
                ),
            });
        }

        let verified = breaks.is_empty();
        if verified {
            debug!("Audit ledger verified: {} entries", lines.len());
        } else {
            warn!("Audit ledger verification found {} breaks", breaks.len());
        }

        IntegrityReport {
            integrity_verified: verified,
            entries_checked: lines.len(),
            chain_length: ledger.chain.len(),
            chain_breaks: breaks,
            ledger_path: ledger.path.clone(),
            verified_at: Utc::now(),
        }
    }

    /// Remove sink files older than the retention period. Returns how many were removed.
    pub fn cleanup_old_logs(&self) -> usize {
        let state = lock_unpoisoned(&self.state);
        let paths = state.sinks.paths();
        let dirs: Vec<PathBuf> = [JSON_DIR, CSV_DIR, HUMAN_DIR]
            .iter()
            .map(|d| self.audit_root.join(d))
            .collect();
        let removed = rotation::purge_older_than(
            &dirs,
            self.retention,
            &[&paths.json, &paths.csv, &paths.human],
        );
        if removed > 0 {
            info!("Purged {} expired audit files", removed);
        }
        removed
    }

    pub fn audit_summary(&self) -> AuditSummary {
        let active_operations = lock_unpoisoned(&self.operations)
            .keys()
            .cloned()
            .collect();
        let state = lock_unpoisoned(&self.state);
        let paths = state.sinks.paths();
        AuditSummary {
            audit_root: self.audit_root.clone(),
            session_id: self.session_id.clone(),
            user_id: self.user_id.clone(),
            chain_length: state.ledger.chain.len(),
            active_operations,
            enabled_formats: state
                .sinks
                .enabled_formats()
                .into_iter()
                .map(str::to_string)
                .collect(),
            json_file: paths.json.clone(),
            csv_file: paths.csv.clone(),
            human_file: paths.human.clone(),
            ledger_file: state.ledger.path.clone(),
        }
    }

    /// Current ledger entries in order.
    pub fn chain(&self) -> Vec<String> {
        lock_unpoisoned(&self.state).ledger.chain.clone()
    }
}

/// Handle passed to the closure of [`AuditLogger::operation_context`]
pub struct OperationScope<'a> {
    logger: &'a AuditLogger,
    operation_id: String,
    failure: RefCell<Option<String>>,
    error_logged: Cell<bool>,
}

impl<'a> OperationScope<'a> {
    fn begin(logger: &'a AuditLogger, operation_id: &str, operation_type: &str) -> Self {
        logger.log_operation_start(operation_id, operation_type, json!({}));
        Self {
            logger,
            operation_id: operation_id.to_string(),
            failure: RefCell::new(None),
            error_logged: Cell::new(false),
        }
    }

    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    pub fn logger(&self) -> &AuditLogger {
        self.logger
    }

    /// Make the end event report failure without recording an error event.
    pub fn mark_failed(&self, reason: impl Into<String>) {
        *self.failure.borrow_mut() = Some(reason.into());
    }

    fn record_error(&self, message: &str) {
        self.mark_failed(message);
        if !self.error_logged.replace(true) {
            self.logger.log_event(
                AuditEvent::new(
                    AuditLevel::Critical,
                    AuditCategory::Operation,
                    "Operation failed with error",
                )
                .with_operation(&self.operation_id)
                .failed(message),
            );
        }
    }
}

impl Drop for OperationScope<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.record_error("operation panicked");
        }
        let failure = self.failure.borrow_mut().take();
        let details = match &failure {
            Some(reason) => json!({ "failure_reason": reason }),
            None => json!({}),
        };
        self.logger
            .log_operation_end(&self.operation_id, failure.is_none(), details);
    }
}

fn open_ledger(integrity_dir: &Path) -> AuditResult<Ledger> {
    fs::create_dir_all(integrity_dir).map_err(|e| AuditError::io(integrity_dir, e))?;

    let latest = fs::read_dir(integrity_dir)
        .map_err(|e| AuditError::io(integrity_dir, e))?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension().and_then(|e| e.to_str()) == Some("hash")
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("integrity_"))
        })
        .max();

    let (path, chain) = match latest {
        Some(path) => {
            let content = fs::read_to_string(&path).map_err(|e| AuditError::io(&path, e))?;
            let chain: Vec<String> = content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect();
            debug!(
                "Continuing audit ledger {} with {} entries",
                path.display(),
                chain.len()
            );
            (path, chain)
        }
        None => (
            integrity_dir.join(format!(
                "integrity_{}.hash",
                Utc::now().format("%Y%m%d_%H%M%S")
            )),
            Vec::new(),
        ),
    };

    let file = sinks::open_append(&path)?;
    Ok(Ledger { path, file, chain })
}
