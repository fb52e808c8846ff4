//! File sinks for the audit trail.

use super::error::{AuditError, AuditResult};
use super::event::{AuditEvent, CSV_HEADERS};
use super::rotation;
use crate::config::AuditSettings;
use chrono::Utc;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub(crate) const JSON_DIR: &str = "json";
pub(crate) const CSV_DIR: &str = "csv";
pub(crate) const HUMAN_DIR: &str = "human";
pub(crate) const INTEGRITY_DIR: &str = "integrity";

/// Current sink file locations
#[derive(Debug, Clone)]
pub struct SinkPaths {
    pub json: PathBuf,
    pub csv: PathBuf,
    pub human: PathBuf,
}

impl SinkPaths {
    fn fresh(audit_root: &Path) -> Self {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S_%6f");
        Self {
            json: audit_root.join(JSON_DIR).join(format!("audit_{}.jsonl", stamp)),
            csv: audit_root.join(CSV_DIR).join(format!("audit_{}.csv", stamp)),
            human: audit_root.join(HUMAN_DIR).join(format!("audit_{}.log", stamp)),
        }
    }
}

/// Open JSON/CSV/human writers plus the rotation bookkeeping.
pub(crate) struct SinkSet {
    audit_root: PathBuf,
    settings: AuditSettings,
    paths: SinkPaths,
    json: Option<File>,
    csv: Option<csv::Writer<File>>,
    human: Option<File>,
    written_bytes: u64,
}

impl SinkSet {
    pub fn open(audit_root: &Path, settings: &AuditSettings) -> AuditResult<Self> {
        for dir in [JSON_DIR, CSV_DIR, HUMAN_DIR, INTEGRITY_DIR] {
            let path = audit_root.join(dir);
            fs::create_dir_all(&path).map_err(|e| AuditError::io(&path, e))?;
        }

        let mut sinks = Self {
            audit_root: audit_root.to_path_buf(),
            settings: settings.clone(),
            paths: SinkPaths::fresh(audit_root),
            json: None,
            csv: None,
            human: None,
            written_bytes: 0,
        };
        sinks.open_writers()?;
        Ok(sinks)
    }

    pub fn paths(&self) -> &SinkPaths {
        &self.paths
    }

    pub fn enabled_formats(&self) -> Vec<&'static str> {
        let mut formats = Vec::new();
        if self.settings.enable_json {
            formats.push("json");
        }
        if self.settings.enable_csv {
            formats.push("csv");
        }
        if self.settings.enable_human {
            formats.push("human");
        }
        formats
    }

    /// Append one event to every enabled sink.
    pub fn write(&mut self, event: &AuditEvent) -> AuditResult<()> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        if let Some(file) = self.json.as_mut() {
            file.write_all(line.as_bytes())
                .and_then(|_| file.flush())
                .map_err(|e| AuditError::io(&self.paths.json, e))?;
        }
        if let Some(writer) = self.csv.as_mut() {
            writer.write_record(event.csv_record())?;
            writer
                .flush()
                .map_err(|e| AuditError::io(&self.paths.csv, e))?;
        }
        if let Some(file) = self.human.as_mut() {
            writeln!(file, "{}", event.human_line())
                .and_then(|_| file.flush())
                .map_err(|e| AuditError::io(&self.paths.human, e))?;
        }

        self.written_bytes += line.len() as u64;
        Ok(())
    }

    pub fn needs_rotation(&self) -> bool {
        self.written_bytes >= self.settings.max_file_size_mb.saturating_mul(1024 * 1024)
    }

    /// Close the current files, compress them when enabled, and start fresh ones.
    pub fn rotate(&mut self) -> AuditResult<()> {
        self.json = None;
        self.csv = None;
        self.human = None;

        let old = self.paths.clone();
        for path in [&old.json, &old.csv, &old.human] {
            if !path.exists() || !self.settings.compression {
                continue;
            }
            if let Err(e) = rotation::compress_file(path) {
                warn!("Failed to compress rotated audit file: {}", e);
            }
        }

        self.paths = SinkPaths::fresh(&self.audit_root);
        self.written_bytes = 0;
        self.open_writers()?;
        info!("Rotated audit logs to {}", self.paths.json.display());
        Ok(())
    }

    fn open_writers(&mut self) -> AuditResult<()> {
        if self.settings.enable_json {
            self.json = Some(open_append(&self.paths.json)?);
            self.written_bytes = fs::metadata(&self.paths.json)
                .map(|m| m.len())
                .unwrap_or(0);
        }
        if self.settings.enable_csv {
            let file = open_append(&self.paths.csv)?;
            let is_new = file.metadata().map(|m| m.len() == 0).unwrap_or(true);
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(file);
            if is_new {
                writer.write_record(CSV_HEADERS)?;
                writer
                    .flush()
                    .map_err(|e| AuditError::io(&self.paths.csv, e))?;
            }
            self.csv = Some(writer);
        }
        if self.settings.enable_human {
            self.human = Some(open_append(&self.paths.human)?);
        }
        Ok(())
    }
}

pub(crate) fn open_append(path: &Path) -> AuditResult<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| AuditError::io(path, e))
}
