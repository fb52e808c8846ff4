//! Common test utilities and helpers

#![allow(dead_code)]

use safeprune::config::SafetyConfig;
use safeprune::system::StaticProbe;
use safeprune::SafeCleanup;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// A throwaway Rust project on disk
pub struct ProjectFixture {
    pub dir: TempDir,
}

impl ProjectFixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("Cargo.toml"),
            "[package]\nname = \"fixture\"\nversion = \"0.1.0\"\n",
        )
        .unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/lib.rs"), "pub fn fixture() {}\n").unwrap();
        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Write `content` at `relative`, creating parent directories.
    pub fn file(&self, relative: &str, content: impl AsRef<[u8]>) -> PathBuf {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    /// Write `count` small files under `dir`.
    pub fn files(&self, dir: &str, count: usize) -> Vec<PathBuf> {
        (0..count)
            .map(|i| self.file(&format!("{}/file_{:03}.tmp", dir, i), format!("payload {}", i)))
            .collect()
    }

    pub fn cleanup(&self, config: SafetyConfig, dry_run: bool) -> SafeCleanup {
        self.cleanup_with_probe(config, dry_run, StaticProbe::healthy())
    }

    pub fn cleanup_with_probe(
        &self,
        config: SafetyConfig,
        dry_run: bool,
        probe: StaticProbe,
    ) -> SafeCleanup {
        SafeCleanup::builder(self.root())
            .config(config)
            .probe(Arc::new(probe))
            .dry_run(dry_run)
            .build()
            .unwrap()
    }
}

/// Defaults without signal handlers or the resource poller.
pub fn quiet_config() -> SafetyConfig {
    let mut config = SafetyConfig::default();
    config.emergency.install_signal_handlers = false;
    config.emergency.resource_monitoring = false;
    config
}
