use anyhow::Context;
use clap::{Parser, Subcommand};
use safeprune::audit::AuditLogger;
use safeprune::backup::{BackupError, BackupManager};
use safeprune::config::{global_config_path, load_config_with, SafetyConfig};
use safeprune::error::{describe_error_code, ErrorCode};
use safeprune::logging::init_logging;
use safeprune::{SafeCleanup, SafetyError};
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{debug, error};

/// Snapshot, validate, audit and abort bulk file removal
#[derive(Parser)]
#[command(name = "safeprune")]
#[command(about = "Remove files behind backups, validation and an audit trail", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file used in place of the global one
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    /// Project root (default: current directory)
    #[arg(short = 'p', long, global = true)]
    project_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Remove the given files through the safety pipeline
    Clean {
        /// Files or directories to remove
        paths: Vec<PathBuf>,

        /// Read additional paths from stdin, one per line
        #[arg(long)]
        from_stdin: bool,

        /// Label recorded in backups and the audit trail
        #[arg(long, default_value = "cleanup")]
        operation_type: String,

        /// Take a snapshot even when validation does not ask for one
        #[arg(long)]
        force_backup: bool,

        /// Confirm a dangerous removal
        #[arg(long)]
        confirm: bool,

        /// Actually delete files (overrides dry-run defaults)
        #[arg(long, conflicts_with = "dry_run")]
        execute: bool,

        /// Only simulate the removal
        #[arg(long)]
        dry_run: bool,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect and manage snapshots
    Backup {
        #[command(subcommand)]
        command: BackupCommands,
    },
    /// Inspect and maintain the audit trail
    Audit {
        #[command(subcommand)]
        command: AuditCommands,
    },
    /// Show safety status for the project
    Status,
}

#[derive(Subcommand)]
enum BackupCommands {
    /// List snapshots, newest first
    List {
        #[arg(long)]
        json: bool,
    },
    /// Show one snapshot's metadata
    Info { backup_id: String },
    /// Check a snapshot's stored checksums
    Verify { backup_id: String },
    /// Restore a snapshot into the project
    Restore {
        backup_id: String,
        /// Relative paths to restore (default: all)
        #[arg(long = "file")]
        files: Vec<String>,
        /// Skip checksum verification of restored files
        #[arg(long)]
        no_verify: bool,
        /// Replace files that already exist
        #[arg(long)]
        overwrite: bool,
    },
    /// Delete snapshots past the retention window
    Prune {
        /// Maximum age, e.g. "7days" (default: configured retention)
        #[arg(long, value_parser = humantime_serde::re::humantime::parse_duration)]
        max_age: Option<Duration>,
    },
}

#[derive(Subcommand)]
enum AuditCommands {
    /// Verify the hash chain of the integrity ledger
    Verify,
    /// Delete audit files past the retention window
    Purge,
    /// Summarize the current audit session
    Summary,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let verbose = cli.verbose;
    init_logging(verbose, "warn");

    match run(cli) {
        Ok(code) => code,
        Err(e) => handle_fatal_error(&e, verbose),
    }
}

/// Print a fatal error and pick the exit status.
///
/// Crate errors exit with [`SafetyError::exit_code`] and show their code and
/// context chain with `-v`. Anything else exits with 2.
fn handle_fatal_error(error: &anyhow::Error, verbose: u8) -> ExitCode {
    error!("Fatal error: {:#}", error);

    let code = if let Some(safety_err) = error.downcast_ref::<SafetyError>() {
        eprintln!("Error: {}", safety_err.user_message());
        if verbose >= 1 {
            eprintln!(
                "\nE{:04}: {}",
                safety_err.code(),
                describe_error_code(safety_err.code())
            );
            eprintln!("Context Chain:\n{}", safety_err.developer_message());
        }
        safety_err.exit_code()
    } else {
        eprintln!("Error: {error:#}");
        2
    };
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let project_root = match cli.project_root {
        Some(root) => root,
        None => std::env::current_dir().context("Cannot determine current directory")?,
    };
    let config = load(&project_root, cli.config.as_deref())?;
    debug!("Using project root {}", project_root.display());

    match cli.command {
        Commands::Clean {
            paths,
            from_stdin,
            operation_type,
            force_backup,
            confirm,
            execute,
            dry_run,
            json,
        } => {
            let mut paths = paths;
            if from_stdin {
                for line in io::stdin().lock().lines() {
                    let line = line?;
                    let line = line.trim();
                    if !line.is_empty() {
                        paths.push(PathBuf::from(line));
                    }
                }
            }

            let mut builder = SafeCleanup::builder(&project_root).config(config);
            if execute {
                builder = builder.dry_run(false);
            } else if dry_run {
                builder = builder.dry_run(true);
            }
            let cleanup = builder.build()?;
            let result = cleanup.execute_safe_cleanup(&paths, &operation_type, force_backup, confirm);

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{}", result.headline());
                if result.dry_run {
                    println!("(dry run, nothing was deleted)");
                }
                for line in &result.recommendations {
                    println!("  {}", line);
                }
            }
            Ok(exit_for(result.success))
        }
        Commands::Backup { command } => {
            let manager =
                BackupManager::from_config(&project_root, &config).map_err(SafetyError::from)?;
            run_backup_command(&manager, command)
        }
        Commands::Audit { command } => {
            let logger =
                AuditLogger::from_config(&project_root, &config).map_err(SafetyError::from)?;
            match command {
                AuditCommands::Verify => {
                    let report = logger.verify_integrity();
                    println!("{}", serde_json::to_string_pretty(&report)?);
                    Ok(exit_for(report.integrity_verified))
                }
                AuditCommands::Purge => {
                    let removed = logger.cleanup_old_logs();
                    println!("Removed {} expired audit files", removed);
                    Ok(ExitCode::SUCCESS)
                }
                AuditCommands::Summary => {
                    println!("{}", serde_json::to_string_pretty(&logger.audit_summary())?);
                    Ok(ExitCode::SUCCESS)
                }
            }
        }
        Commands::Status => {
            let mut safety = config;
            safety.emergency.install_signal_handlers = false;
            let cleanup = SafeCleanup::builder(&project_root).config(safety).build()?;
            println!("{}", serde_json::to_string_pretty(&cleanup.safety_status())?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_backup_command(manager: &BackupManager, command: BackupCommands) -> anyhow::Result<ExitCode> {
    match command {
        BackupCommands::List { json } => {
            let backups = manager.list_backups();
            if json {
                println!("{}", serde_json::to_string_pretty(&backups)?);
            } else if backups.is_empty() {
                println!("No backups found.");
            } else {
                for backup in backups {
                    println!(
                        "{}  {}  {} files  {} bytes  {}",
                        backup.backup_id,
                        backup.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        backup.total_files,
                        backup.total_size_bytes,
                        backup.backup_method.as_str()
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        BackupCommands::Info { backup_id } => {
            let Some(info) = manager.get_backup_info(&backup_id) else {
                return Err(SafetyError::from(BackupError::NotFound(backup_id)).into());
            };
            println!("{}", serde_json::to_string_pretty(&info)?);
            if let Some(git) = manager.git_info(&backup_id) {
                println!("{}", serde_json::to_string_pretty(&git)?);
            }
            Ok(ExitCode::SUCCESS)
        }
        BackupCommands::Verify { backup_id } => {
            let ok = manager.verify_backup_integrity(&backup_id);
            println!(
                "Backup {}: {}",
                backup_id,
                if ok { "verified" } else { "FAILED verification" }
            );
            Ok(exit_for(ok))
        }
        BackupCommands::Restore {
            backup_id,
            files,
            no_verify,
            overwrite,
        } => {
            let selection = (!files.is_empty()).then_some(files.as_slice());
            let summary = manager
                .restore_backup(&backup_id, selection, !no_verify, overwrite)
                .map_err(SafetyError::from)?;
            println!(
                "Restored {} files ({} failed, {} skipped, {} directories or links recreated)",
                summary.restored.len(),
                summary.failed.len(),
                summary.skipped.len(),
                summary.recreated.len()
            );
            for failure in &summary.failed {
                eprintln!("  {}: {}", failure.path, failure.error);
            }
            Ok(exit_for(summary.is_success()))
        }
        BackupCommands::Prune { max_age } => {
            let stats = manager.cleanup_old_backups(max_age);
            println!(
                "Pruned {} backups ({} bytes), {} failed",
                stats.removed_count, stats.removed_bytes, stats.failed_count
            );
            Ok(exit_for(stats.failed_count == 0))
        }
    }
}

fn load(project_root: &Path, config: Option<&Path>) -> Result<SafetyConfig, SafetyError> {
    let global = match config {
        Some(path) => {
            if !path.is_file() {
                return Err(SafetyError::config_with_code(
                    ErrorCode::CONFIG_NOT_FOUND,
                    format!("Configuration file not found: {}", path.display()),
                ));
            }
            path.to_path_buf()
        }
        None => global_config_path(),
    };
    let config = load_config_with(project_root, Some(&global), |key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

fn exit_for(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
