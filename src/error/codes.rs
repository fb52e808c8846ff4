/// Error code registry for safeprune
///
/// Error codes are organized by category:
/// - 1000-1999: Configuration errors
/// - 2000-2999: Backup errors
/// - 3000-3999: Audit errors
/// - 4000-4999: Emergency stop errors
/// - 5000-5999: Cleanup execution errors
/// - 6000-6999: Git errors
/// - 9000-9999: Other errors
pub struct ErrorCode;

impl ErrorCode {
    // Configuration errors (1000-1999)
    pub const CONFIG_GENERIC: u16 = 1000;
    pub const CONFIG_NOT_FOUND: u16 = 1001;
    pub const CONFIG_PARSE_ERROR: u16 = 1002;
    pub const CONFIG_VALIDATION_FAILED: u16 = 1003;

    // Backup errors (2000-2999)
    pub const BACKUP_GENERIC: u16 = 2000;
    pub const BACKUP_NO_FILES: u16 = 2001;
    pub const BACKUP_NOT_FOUND: u16 = 2002;
    pub const BACKUP_METADATA_MISSING: u16 = 2003;
    pub const BACKUP_INTEGRITY_FAILED: u16 = 2004;
    pub const BACKUP_OUTSIDE_PROJECT: u16 = 2005;
    pub const BACKUP_IO_ERROR: u16 = 2006;
    pub const BACKUP_ARCHIVE_ERROR: u16 = 2007;
    pub const BACKUP_SERIALIZATION_ERROR: u16 = 2008;

    // Audit errors (3000-3999)
    pub const AUDIT_GENERIC: u16 = 3000;
    pub const AUDIT_IO_ERROR: u16 = 3001;
    pub const AUDIT_SINK_ERROR: u16 = 3002;
    pub const AUDIT_SERIALIZATION_ERROR: u16 = 3003;

    // Emergency stop errors (4000-4999)
    pub const EMERGENCY_GENERIC: u16 = 4000;
    pub const EMERGENCY_SIGNAL_INSTALL: u16 = 4001;
    pub const EMERGENCY_MONITOR_SPAWN: u16 = 4002;
    pub const EMERGENCY_STOPPED: u16 = 4003;

    // Cleanup execution errors (5000-5999)
    pub const CLEANUP_GENERIC: u16 = 5000;
    pub const CLEANUP_REMOVAL_ABORTED: u16 = 5001;
    pub const CLEANUP_INTERRUPTED: u16 = 5002;
    pub const CLEANUP_SAFETY_VIOLATION: u16 = 5003;

    // Git errors (6000-6999)
    pub const GIT_GENERIC: u16 = 6000;
    pub const GIT_NOT_REPOSITORY: u16 = 6001;

    // Other errors (9000-9999)
    pub const OTHER_GENERIC: u16 = 9000;
}

/// Get a human-readable description for an error code
pub fn describe_error_code(code: u16) -> &'static str {
    match code {
        // Configuration errors
        1000 => "Generic configuration error",
        1001 => "Configuration file not found",
        1002 => "Failed to parse configuration",
        1003 => "Configuration validation failed",

        // Backup errors
        2000 => "Generic backup error",
        2001 => "No files supplied for backup",
        2002 => "Backup not found",
        2003 => "Backup metadata is missing or unreadable",
        2004 => "Backup integrity verification failed",
        2005 => "Path lies outside the project root",
        2006 => "Backup I/O error",
        2007 => "Backup archive error",
        2008 => "Backup metadata serialization error",

        // Audit errors
        3000 => "Generic audit error",
        3001 => "Audit I/O error",
        3002 => "Audit sink write failed",
        3003 => "Audit event serialization error",

        // Emergency errors
        4000 => "Generic emergency stop error",
        4001 => "Failed to install signal handlers",
        4002 => "Failed to start resource monitor",
        4003 => "Emergency stop is active",

        // Cleanup errors
        5000 => "Generic cleanup error",
        5001 => "File removal aborted",
        5002 => "Cleanup interrupted",
        5003 => "Safety violation during cleanup",

        // Git errors
        6000 => "Generic git error",
        6001 => "Not a git repository",

        9000 => "Unknown error",
        _ => "Unrecognized error code",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_registered_code_has_description() {
        let codes = [
            ErrorCode::CONFIG_GENERIC,
            ErrorCode::CONFIG_NOT_FOUND,
            ErrorCode::CONFIG_PARSE_ERROR,
            ErrorCode::CONFIG_VALIDATION_FAILED,
            ErrorCode::BACKUP_GENERIC,
            ErrorCode::BACKUP_NO_FILES,
            ErrorCode::BACKUP_NOT_FOUND,
            ErrorCode::BACKUP_METADATA_MISSING,
            ErrorCode::BACKUP_INTEGRITY_FAILED,
            ErrorCode::BACKUP_OUTSIDE_PROJECT,
            ErrorCode::BACKUP_IO_ERROR,
            ErrorCode::BACKUP_ARCHIVE_ERROR,
            ErrorCode::BACKUP_SERIALIZATION_ERROR,
            ErrorCode::AUDIT_GENERIC,
            ErrorCode::AUDIT_IO_ERROR,
            ErrorCode::AUDIT_SINK_ERROR,
            ErrorCode::AUDIT_SERIALIZATION_ERROR,
            ErrorCode::EMERGENCY_GENERIC,
            ErrorCode::EMERGENCY_SIGNAL_INSTALL,
            ErrorCode::EMERGENCY_MONITOR_SPAWN,
            ErrorCode::EMERGENCY_STOPPED,
            ErrorCode::CLEANUP_GENERIC,
            ErrorCode::CLEANUP_REMOVAL_ABORTED,
            ErrorCode::CLEANUP_INTERRUPTED,
            ErrorCode::CLEANUP_SAFETY_VIOLATION,
            ErrorCode::GIT_GENERIC,
            ErrorCode::GIT_NOT_REPOSITORY,
            ErrorCode::OTHER_GENERIC,
        ];
        for code in codes {
            assert_ne!(describe_error_code(code), "Unrecognized error code", "{code}");
        }
    }

    #[test]
    fn test_unknown_code() {
        assert_eq!(describe_error_code(1234), "Unrecognized error code");
    }
}
