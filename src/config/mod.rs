//! Safety configuration for cleanup operations.
//!
//! `SafetyConfig` is read-only once loaded. It is assembled from layered sources
//! with increasing precedence:
//!
//! 1. Hardcoded defaults
//! 2. Global config file (`~/.safeprune/config.yml`)
//! 3. Project config file (`.cleanup.{yaml,yml,json,toml}` or `.config/cleanup.*`)
//! 4. Environment variables (`SAFEPRUNE_*` prefix)
//!
//! Validation accumulates every problem so a broken file reports all issues at once.

mod loader;

pub use loader::{global_config_path, load_config, load_config_with, project_config_candidates};

use crate::backup::BackupMethod;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Valid log levels for configuration validation.
pub const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

/// A single invalid configuration value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration: {}", join_issues(.0))]
    Invalid(Vec<ConfigIssue>),
}

fn join_issues(issues: &[ConfigIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<ConfigError> for crate::error::SafetyError {
    fn from(err: ConfigError) -> Self {
        use crate::error::{ErrorCode, SafetyError};
        let code = match &err {
            ConfigError::Io { .. } => ErrorCode::CONFIG_NOT_FOUND,
            ConfigError::Parse { .. } => ErrorCode::CONFIG_PARSE_ERROR,
            ConfigError::Invalid(_) => ErrorCode::CONFIG_VALIDATION_FAILED,
        };
        SafetyError::config_with_code(code, err.to_string()).with_source(err)
    }
}

/// Complete safety configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SafetyConfig {
    /// Logging level used by the command-line front end.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub safety: SafetySettings,

    #[serde(default)]
    pub backup: BackupSettings,

    #[serde(default)]
    pub emergency: EmergencySettings,

    #[serde(default)]
    pub audit: AuditSettings,

    #[serde(default)]
    pub validation: ValidationSettings,
}

/// Top-level safety toggles
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SafetySettings {
    /// Dangerous operations need an explicit caller confirmation.
    #[serde(default = "default_true")]
    pub require_confirmation: bool,

    /// Create snapshots before removal when the validation outcome warrants one.
    #[serde(default = "default_true")]
    pub create_backup: bool,

    /// Snapshot root, relative paths resolve against the project root.
    #[serde(default = "default_backup_directory")]
    pub backup_directory: PathBuf,

    /// Files above this size are removed without a content hash in the audit trail.
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: f64,

    #[serde(default = "default_true")]
    pub strict_mode: bool,

    #[serde(default = "default_true")]
    pub dry_run_by_default: bool,

    /// Wall-clock limit for the removal phase.
    #[serde(default = "default_operation_timeout", with = "humantime_serde")]
    pub operation_timeout: Duration,
}

/// Snapshot settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackupSettings {
    #[serde(default)]
    pub method: BackupMethod,

    #[serde(default = "default_max_parallel_workers")]
    pub max_parallel_workers: usize,

    /// Copies run on the worker pool only above this many files.
    #[serde(default = "default_parallel_threshold")]
    pub parallel_threshold: usize,

    #[serde(default = "default_max_backup_age_days")]
    pub max_backup_age_days: u32,

    /// Deflate level for archive snapshots (0-9).
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,

    #[serde(default = "default_true")]
    pub include_git_info: bool,
}

/// Emergency stop settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmergencySettings {
    #[serde(default = "default_true")]
    pub install_signal_handlers: bool,

    #[serde(default = "default_true")]
    pub resource_monitoring: bool,

    #[serde(default = "default_disk_threshold_mb")]
    pub disk_threshold_mb: u64,

    #[serde(default = "default_memory_threshold_mb")]
    pub memory_threshold_mb: u64,

    #[serde(default = "default_check_interval", with = "humantime_serde")]
    pub check_interval: Duration,
}

/// Audit trail settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditSettings {
    /// Audit root, relative paths resolve against the project root.
    #[serde(default = "default_audit_directory")]
    pub directory: PathBuf,

    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// JSON sink size that triggers rotation.
    #[serde(default = "default_audit_max_file_size_mb")]
    pub max_file_size_mb: u64,

    #[serde(default = "default_true")]
    pub enable_json: bool,

    #[serde(default = "default_true")]
    pub enable_csv: bool,

    #[serde(default = "default_true")]
    pub enable_human: bool,

    /// Gzip rotated sink files.
    #[serde(default = "default_true")]
    pub compression: bool,
}

/// Project layout knowledge used by the validator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationSettings {
    /// At least one of these must exist or the project is considered broken.
    #[serde(default = "default_essential_markers")]
    pub essential_markers: Vec<String>,

    /// Missing entries produce a warning.
    #[serde(default)]
    pub expected_markers: Vec<String>,

    #[serde(default = "default_module_dirs")]
    pub module_dirs: Vec<String>,

    /// Glob patterns matched against file names.
    #[serde(default = "default_critical_patterns")]
    pub critical_patterns: Vec<String>,

    /// Files whose presence means the project can still be built.
    #[serde(default = "default_build_manifests")]
    pub build_manifests: Vec<String>,

    /// Files whose presence means the package can still be loaded.
    #[serde(default = "default_entry_points")]
    pub entry_points: Vec<String>,

    #[serde(default = "default_memory_warning_percent")]
    pub memory_warning_percent: f64,

    #[serde(default = "default_cpu_warning_percent")]
    pub cpu_warning_percent: f64,

    /// Share of critical-looking targets above which criticality becomes dangerous.
    #[serde(default = "default_critical_fraction")]
    pub critical_fraction: f64,
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_backup_directory() -> PathBuf {
    PathBuf::from(".cleanup_backup")
}

fn default_max_file_size_mb() -> f64 {
    100.0
}

fn default_operation_timeout() -> Duration {
    Duration::from_secs(3600)
}

fn default_max_parallel_workers() -> usize {
    4
}

fn default_parallel_threshold() -> usize {
    10
}

fn default_max_backup_age_days() -> u32 {
    30
}

fn default_compression_level() -> u32 {
    6
}

fn default_disk_threshold_mb() -> u64 {
    1000
}

fn default_memory_threshold_mb() -> u64 {
    500
}

fn default_check_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_audit_directory() -> PathBuf {
    PathBuf::from(".cleanup_audit")
}

fn default_retention_days() -> u32 {
    365
}

fn default_audit_max_file_size_mb() -> u64 {
    100
}

fn default_essential_markers() -> Vec<String> {
    ["Cargo.toml", "pyproject.toml", "setup.py", "package.json"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_module_dirs() -> Vec<String> {
    ["src", "lib"].iter().map(|s| s.to_string()).collect()
}

fn default_critical_patterns() -> Vec<String> {
    [
        "*.rs", "*.py", "*.toml", "*.yaml", "*.yml", "*.json", "Makefile", "README*", "LICENSE*",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_build_manifests() -> Vec<String> {
    ["Cargo.toml", "pyproject.toml", "setup.py", "setup.cfg", "package.json"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_entry_points() -> Vec<String> {
    ["src/lib.rs", "src/main.rs", "__init__.py", "src/__init__.py", "index.js"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_memory_warning_percent() -> f64 {
    90.0
}

fn default_cpu_warning_percent() -> f64 {
    80.0
}

fn default_critical_fraction() -> f64 {
    0.1
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            safety: SafetySettings::default(),
            backup: BackupSettings::default(),
            emergency: EmergencySettings::default(),
            audit: AuditSettings::default(),
            validation: ValidationSettings::default(),
        }
    }
}

impl Default for SafetySettings {
    fn default() -> Self {
        Self {
            require_confirmation: true,
            create_backup: true,
            backup_directory: default_backup_directory(),
            max_file_size_mb: default_max_file_size_mb(),
            strict_mode: true,
            dry_run_by_default: true,
            operation_timeout: default_operation_timeout(),
        }
    }
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            method: BackupMethod::default(),
            max_parallel_workers: default_max_parallel_workers(),
            parallel_threshold: default_parallel_threshold(),
            max_backup_age_days: default_max_backup_age_days(),
            compression_level: default_compression_level(),
            include_git_info: true,
        }
    }
}

impl Default for EmergencySettings {
    fn default() -> Self {
        Self {
            install_signal_handlers: true,
            resource_monitoring: true,
            disk_threshold_mb: default_disk_threshold_mb(),
            memory_threshold_mb: default_memory_threshold_mb(),
            check_interval: default_check_interval(),
        }
    }
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            directory: default_audit_directory(),
            retention_days: default_retention_days(),
            max_file_size_mb: default_audit_max_file_size_mb(),
            enable_json: true,
            enable_csv: true,
            enable_human: true,
            compression: true,
        }
    }
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            essential_markers: default_essential_markers(),
            expected_markers: Vec::new(),
            module_dirs: default_module_dirs(),
            critical_patterns: default_critical_patterns(),
            build_manifests: default_build_manifests(),
            entry_points: default_entry_points(),
            memory_warning_percent: default_memory_warning_percent(),
            cpu_warning_percent: default_cpu_warning_percent(),
            critical_fraction: default_critical_fraction(),
        }
    }
}

impl SafetyConfig {
    /// Snapshot root for a project.
    pub fn backup_root(&self, project_root: &std::path::Path) -> PathBuf {
        resolve_against(project_root, &self.safety.backup_directory)
    }

    /// Audit root for a project.
    pub fn audit_root(&self, project_root: &std::path::Path) -> PathBuf {
        resolve_against(project_root, &self.audit.directory)
    }

    /// Size above which removed files are not hashed, in bytes.
    pub fn max_file_size_bytes(&self) -> u64 {
        (self.safety.max_file_size_mb * 1024.0 * 1024.0) as u64
    }

    /// Validate every field, reporting all problems together.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut issues = Vec::new();
        let mut push = |path: &str, message: String| {
            issues.push(ConfigIssue {
                path: path.to_string(),
                message,
            })
        };

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            push(
                "log_level",
                format!("must be one of: {}", VALID_LOG_LEVELS.join(", ")),
            );
        }

        if self.safety.max_file_size_mb.is_nan() || self.safety.max_file_size_mb <= 0.0 {
            push("safety.max_file_size_mb", "must be positive".to_string());
        }
        if self.safety.operation_timeout.is_zero() {
            push("safety.operation_timeout", "must be non-zero".to_string());
        }
        if self.safety.backup_directory.as_os_str().is_empty() {
            push("safety.backup_directory", "cannot be empty".to_string());
        }

        if self.backup.max_parallel_workers == 0 || self.backup.max_parallel_workers > 64 {
            push(
                "backup.max_parallel_workers",
                "must be between 1 and 64".to_string(),
            );
        }
        if self.backup.compression_level > 9 {
            push(
                "backup.compression_level",
                "must be between 0 and 9".to_string(),
            );
        }

        if self.emergency.check_interval.is_zero() {
            push("emergency.check_interval", "must be non-zero".to_string());
        }

        if self.audit.directory.as_os_str().is_empty() {
            push("audit.directory", "cannot be empty".to_string());
        }
        if self.audit.max_file_size_mb == 0 {
            push("audit.max_file_size_mb", "must be at least 1".to_string());
        }
        if !(self.audit.enable_json || self.audit.enable_csv || self.audit.enable_human) {
            push(
                "audit",
                "at least one of enable_json, enable_csv, enable_human must be set".to_string(),
            );
        }

        let v = &self.validation;
        if v.essential_markers.is_empty() {
            push(
                "validation.essential_markers",
                "must list at least one marker".to_string(),
            );
        }
        for pattern in &v.critical_patterns {
            if let Err(e) = glob::Pattern::new(pattern) {
                push(
                    "validation.critical_patterns",
                    format!("invalid glob '{}': {}", pattern, e),
                );
            }
        }
        for (path, value) in [
            ("validation.memory_warning_percent", v.memory_warning_percent),
            ("validation.cpu_warning_percent", v.cpu_warning_percent),
        ] {
            if !(0.0..=100.0).contains(&value) {
                push(path, "must be between 0 and 100".to_string());
            }
        }
        if !(0.0..=1.0).contains(&v.critical_fraction) {
            push(
                "validation.critical_fraction",
                "must be between 0 and 1".to_string(),
            );
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(issues))
        }
    }
}

fn resolve_against(root: &std::path::Path, path: &std::path::Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}
