//! Audit event model and hashing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Predecessor of the first ledger entry.
pub const GENESIS: &str = "genesis";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    Critical,
    Warning,
    Info,
    Debug,
    Audit,
}

impl AuditLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Warning => "warning",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Audit => "audit",
        }
    }
}

impl fmt::Display for AuditLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditCategory {
    System,
    Operation,
    File,
    Backup,
    Validation,
    Emergency,
    Security,
    Performance,
}

impl AuditCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Operation => "operation",
            Self::File => "file",
            Self::Backup => "backup",
            Self::Validation => "validation",
            Self::Emergency => "emergency",
            Self::Security => "security",
            Self::Performance => "performance",
        }
    }
}

impl fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry in the audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub level: AuditLevel,
    pub category: AuditCategory,
    pub operation_id: Option<String>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub message: String,
    #[serde(default)]
    pub details: Map<String, Value>,
    pub file_path: Option<String>,
    pub file_hash_before: Option<String>,
    pub file_hash_after: Option<String>,
    pub file_size_before: Option<u64>,
    pub file_size_after: Option<u64>,
    pub duration_ms: Option<f64>,
    pub success: bool,
    pub error_message: Option<String>,
}

impl AuditEvent {
    pub fn new(level: AuditLevel, category: AuditCategory, message: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            level,
            category,
            operation_id: None,
            user_id: None,
            session_id: None,
            message: message.into(),
            details: Map::new(),
            file_path: None,
            file_hash_before: None,
            file_hash_after: None,
            file_size_before: None,
            file_size_after: None,
            duration_ms: None,
            success: true,
            error_message: None,
        }
    }

    pub fn with_operation(mut self, operation_id: impl Into<String>) -> Self {
        self.operation_id = Some(operation_id.into());
        self
    }

    /// Merge a JSON object into the details. Non-object values land under `value`.
    pub fn with_details(mut self, details: Value) -> Self {
        match details {
            Value::Object(map) => self.details.extend(map),
            Value::Null => {}
            other => {
                self.details.insert("value".to_string(), other);
            }
        }
        self
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn with_file(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn with_duration(mut self, duration: std::time::Duration) -> Self {
        self.duration_ms = Some(duration.as_secs_f64() * 1000.0);
        self
    }

    pub fn with_success(mut self, success: bool) -> Self {
        self.success = success;
        self
    }

    /// Mark the event as failed with an error message.
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error_message = Some(error.into());
        self
    }

    /// SHA-256 over the identifying fields, serialized with sorted keys.
    pub fn integrity_hash(&self) -> String {
        let mut canonical: BTreeMap<&str, Value> = BTreeMap::new();
        canonical.insert("category", Value::from(self.category.as_str()));
        canonical.insert("event_id", Value::from(self.event_id.clone()));
        canonical.insert("file_path", option_value(&self.file_path));
        canonical.insert("level", Value::from(self.level.as_str()));
        canonical.insert("message", Value::from(self.message.clone()));
        canonical.insert("operation_id", option_value(&self.operation_id));
        canonical.insert("success", Value::from(self.success));
        canonical.insert(
            "timestamp",
            serde_json::to_value(self.timestamp).unwrap_or(Value::Null),
        );
        canonical.insert("user_id", option_value(&self.user_id));

        let encoded = serde_json::to_string(&canonical).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(encoded.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Row for the CSV sink, in [`CSV_HEADERS`] order.
    pub fn csv_record(&self) -> Vec<String> {
        vec![
            self.timestamp.to_rfc3339(),
            self.event_id.clone(),
            self.level.to_string(),
            self.category.to_string(),
            self.operation_id.clone().unwrap_or_default(),
            self.user_id.clone().unwrap_or_default(),
            self.session_id.clone().unwrap_or_default(),
            self.message.clone(),
            self.file_path.clone().unwrap_or_default(),
            self.success.to_string(),
            self.duration_ms
                .map(|ms| format!("{:.3}", ms))
                .unwrap_or_default(),
            self.error_message.clone().unwrap_or_default(),
        ]
    }

    /// Single line for the human-readable sink.
    pub fn human_line(&self) -> String {
        let mut line = format!(
            "{} [{}] {}: {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f UTC"),
            self.level.as_str().to_uppercase(),
            self.category,
            self.message
        );
        if let Some(op) = &self.operation_id {
            line.push_str(&format!(" op={}", op));
        }
        if let Some(path) = &self.file_path {
            line.push_str(&format!(" file={}", path));
        }
        if let Some(ms) = self.duration_ms {
            line.push_str(&format!(" duration={:.1}ms", ms));
        }
        if !self.success {
            line.push_str(" FAILED");
        }
        if let Some(err) = &self.error_message {
            line.push_str(&format!(" error={}", err));
        }
        // Keep one event per line whatever the message contains.
        line.replace(['\n', '\r'], " ")
    }
}

pub const CSV_HEADERS: [&str; 12] = [
    "timestamp",
    "event_id",
    "level",
    "category",
    "operation_id",
    "user_id",
    "session_id",
    "message",
    "file_path",
    "success",
    "duration_ms",
    "error_message",
];

fn option_value(value: &Option<String>) -> Value {
    value.clone().map(Value::from).unwrap_or(Value::Null)
}

/// Next ledger entry: SHA-256 of `previous:event_hash`.
pub fn chain_link(previous: &str, event_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(previous.as_bytes());
    hasher.update(b":");
    hasher.update(event_hash.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Whether `line` looks like a ledger entry.
pub fn is_digest(line: &str) -> bool {
    line.len() == 64 && line.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AuditEvent {
        AuditEvent::new(AuditLevel::Audit, AuditCategory::File, "removed file")
            .with_operation("cleanup_1")
            .with_file("build/a.o")
            .with_detail("action", "remove")
    }

    #[test]
    fn test_hash_is_deterministic_and_sensitive() {
        let event = sample();
        assert_eq!(event.integrity_hash(), event.clone().integrity_hash());
        assert!(is_digest(&event.integrity_hash()));

        let mut changed = event.clone();
        changed.message = "removed other file".to_string();
        assert_ne!(event.integrity_hash(), changed.integrity_hash());
    }

    #[test]
    fn test_hash_ignores_details_and_session() {
        let event = sample();
        let mut other = event.clone();
        other.details.insert("extra".to_string(), Value::from(1));
        other.session_id = Some("session_2".to_string());
        assert_eq!(event.integrity_hash(), other.integrity_hash());
    }

    #[test]
    fn test_hash_survives_json_round_trip() {
        let event = sample();
        let line = serde_json::to_string(&event).unwrap();
        let parsed: AuditEvent = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed.integrity_hash(), event.integrity_hash());
    }

    #[test]
    fn test_chain_link_depends_on_predecessor() {
        let hash = sample().integrity_hash();
        let first = chain_link(GENESIS, &hash);
        let second = chain_link(&first, &hash);
        assert_ne!(first, second);
        assert!(is_digest(&first));
    }

    #[test]
    fn test_human_line_single_line() {
        let event = AuditEvent::new(AuditLevel::Warning, AuditCategory::System, "two\nlines")
            .failed("boom");
        let line = event.human_line();
        assert!(!line.contains('\n'));
        assert!(line.contains("[WARNING] system: two lines"));
        assert!(line.contains("FAILED error=boom"));
    }

    #[test]
    fn test_csv_record_matches_headers() {
        assert_eq!(sample().csv_record().len(), CSV_HEADERS.len());
    }

    #[test]
    fn test_is_digest() {
        assert!(!is_digest("genesis"));
        assert!(!is_digest(&"A".repeat(64)));
        assert!(is_digest(&"a".repeat(64)));
    }
}
