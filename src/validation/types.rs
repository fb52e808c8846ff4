use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Outcome of a single check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckResult {
    Pass,
    Warning,
    Fail,
    Error,
}

impl CheckResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Warning => "warning",
            Self::Fail => "fail",
            Self::Error => "error",
        }
    }
}

impl CheckResult {
    /// Severity a report with this overall result carries.
    pub fn severity(&self) -> SafetyLevel {
        match self {
            Self::Pass => SafetyLevel::Safe,
            Self::Warning => SafetyLevel::Caution,
            Self::Fail => SafetyLevel::Dangerous,
            Self::Error => SafetyLevel::Critical,
        }
    }
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity, ordered from harmless to blocking
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyLevel {
    Safe,
    Caution,
    Dangerous,
    Critical,
}

impl SafetyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::Caution => "caution",
            Self::Dangerous => "dangerous",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for SafetyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every check the validator knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    MemoryCheck,
    CpuCheck,
    FsPermissions,
    DiskSpace,
    ProjectIntegrity,
    GitRepository,
    BuildDependencies,
    FileCriticality,
    FileDependencies,
    BackupCapability,
    ImportVerification,
    BuildVerification,
    BrokenReferences,
}

/// Name, description and default severities of a check kind
#[derive(Debug)]
pub struct CheckProfile {
    pub kind: CheckKind,
    pub name: &'static str,
    pub description: &'static str,
    pub warning: SafetyLevel,
    pub fail: SafetyLevel,
    pub error: SafetyLevel,
}

impl CheckProfile {
    pub fn level_for(&self, result: CheckResult) -> SafetyLevel {
        match result {
            CheckResult::Pass => SafetyLevel::Safe,
            CheckResult::Warning => self.warning,
            CheckResult::Fail => self.fail,
            CheckResult::Error => self.error,
        }
    }
}

use CheckKind as K;
use SafetyLevel::{Caution, Critical, Dangerous};

const fn profile(
    kind: CheckKind,
    name: &'static str,
    description: &'static str,
    warning: SafetyLevel,
    fail: SafetyLevel,
    error: SafetyLevel,
) -> CheckProfile {
    CheckProfile {
        kind,
        name,
        description,
        warning,
        fail,
        error,
    }
}

/// Indexed by `CheckKind as usize`.
static PROFILES: [CheckProfile; CheckKind::COUNT] = [
    profile(K::MemoryCheck, "memory_check", "System memory availability", Caution, Dangerous, Dangerous),
    profile(K::CpuCheck, "cpu_check", "System CPU load", Caution, Dangerous, Dangerous),
    profile(K::FsPermissions, "fs_permissions", "Write access to the project root", Caution, Critical, Dangerous),
    profile(K::DiskSpace, "disk_space", "Free space for backup and cleanup", Caution, Critical, Dangerous),
    profile(K::ProjectIntegrity, "project_integrity", "Project structure markers", Caution, Critical, Dangerous),
    profile(K::GitRepository, "git_repository", "Version control state", Caution, Dangerous, Caution),
    profile(K::BuildDependencies, "build_dependencies", "Source module directories", Caution, Dangerous, Caution),
    profile(K::FileCriticality, "file_criticality", "Critical-looking removal targets", Caution, Critical, Dangerous),
    profile(K::FileDependencies, "file_dependencies", "Dependencies on removal targets", Caution, Dangerous, Dangerous),
    profile(K::BackupCapability, "backup_capability", "Ability to create backups", Caution, Critical, Dangerous),
    profile(K::ImportVerification, "import_verification", "Package entry points still present", Caution, Dangerous, Dangerous),
    profile(K::BuildVerification, "build_verification", "Build manifests still present", Caution, Dangerous, Dangerous),
    profile(K::BrokenReferences, "broken_references", "References to removed files", Caution, Dangerous, Dangerous),
];

impl CheckKind {
    pub const COUNT: usize = 13;

    pub const ALL: [CheckKind; CheckKind::COUNT] = [
        K::MemoryCheck,
        K::CpuCheck,
        K::FsPermissions,
        K::DiskSpace,
        K::ProjectIntegrity,
        K::GitRepository,
        K::BuildDependencies,
        K::FileCriticality,
        K::FileDependencies,
        K::BackupCapability,
        K::ImportVerification,
        K::BuildVerification,
        K::BrokenReferences,
    ];

    pub fn profile(self) -> &'static CheckProfile {
        &PROFILES[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.profile().name
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One executed check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyCheck {
    pub kind: CheckKind,
    pub name: String,
    pub description: String,
    pub result: CheckResult,
    pub level: SafetyLevel,
    pub message: String,
    #[serde(default)]
    pub details: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl SafetyCheck {
    /// Build a check whose level comes from the kind's default table.
    pub fn new(kind: CheckKind, result: CheckResult, message: impl Into<String>) -> Self {
        let profile = kind.profile();
        Self {
            kind,
            name: profile.name.to_string(),
            description: profile.description.to_string(),
            result,
            level: profile.level_for(result),
            message: message.into(),
            details: Map::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn pass(kind: CheckKind, message: impl Into<String>) -> Self {
        Self::new(kind, CheckResult::Pass, message)
    }

    pub fn warning(kind: CheckKind, message: impl Into<String>) -> Self {
        Self::new(kind, CheckResult::Warning, message)
    }

    pub fn fail(kind: CheckKind, message: impl Into<String>) -> Self {
        Self::new(kind, CheckResult::Fail, message)
    }

    pub fn error(kind: CheckKind, message: impl Into<String>) -> Self {
        Self::new(kind, CheckResult::Error, message)
    }

    /// Override the table severity.
    pub fn with_level(mut self, level: SafetyLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        if let Value::Object(map) = details {
            self.details.extend(map);
        }
        self
    }
}

/// Aggregated outcome of a validation pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub operation_type: String,
    pub total_checks: usize,
    pub passed_checks: usize,
    pub warning_checks: usize,
    pub failed_checks: usize,
    pub error_checks: usize,
    pub overall_result: CheckResult,
    pub overall_safety_level: SafetyLevel,
    pub checks: Vec<SafetyCheck>,
    pub recommendations: Vec<String>,
    pub required_actions: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl ValidationReport {
    /// Aggregate checks: result is error > fail > warning > pass and severity follows
    /// the result. Per-check levels are kept for display only.
    pub fn from_checks(operation_type: impl Into<String>, checks: Vec<SafetyCheck>) -> Self {
        let count = |r: CheckResult| checks.iter().filter(|c| c.result == r).count();
        let passed = count(CheckResult::Pass);
        let warnings = count(CheckResult::Warning);
        let failed = count(CheckResult::Fail);
        let errors = count(CheckResult::Error);

        let overall_result = if errors > 0 {
            CheckResult::Error
        } else if failed > 0 {
            CheckResult::Fail
        } else if warnings > 0 {
            CheckResult::Warning
        } else {
            CheckResult::Pass
        };
        let overall_safety_level = overall_result.severity();

        let mut recommendations = Vec::new();
        let mut required_actions = Vec::new();
        for check in &checks {
            match check.result {
                CheckResult::Pass => {}
                CheckResult::Warning => recommendations
                    .push(format!("RECOMMENDED: {} - {}", check.name, check.message)),
                CheckResult::Fail => {
                    required_actions.push(format!("REQUIRED: {} - {}", check.name, check.message))
                }
                CheckResult::Error => {
                    required_actions.push(format!("CRITICAL: {} - {}", check.name, check.message))
                }
            }
        }

        Self {
            operation_type: operation_type.into(),
            total_checks: checks.len(),
            passed_checks: passed,
            warning_checks: warnings,
            failed_checks: failed,
            error_checks: errors,
            overall_result,
            overall_safety_level,
            checks,
            recommendations,
            required_actions,
            timestamp: Utc::now(),
        }
    }

    pub fn can_proceed(&self) -> bool {
        matches!(
            self.overall_result,
            CheckResult::Pass | CheckResult::Warning
        )
    }

    pub fn check(&self, kind: CheckKind) -> Option<&SafetyCheck> {
        self.checks.iter().find(|c| c.kind == kind)
    }

    pub fn has_failures(&self) -> bool {
        self.failed_checks > 0 || self.error_checks > 0
    }
}
