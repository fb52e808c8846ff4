//! Host resource probing shared by the validator and the emergency monitor.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use sysinfo::{Disks, System};

/// Memory snapshot in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

impl MemoryStats {
    pub fn usage_percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        let used = self.total_bytes.saturating_sub(self.available_bytes);
        used as f64 / self.total_bytes as f64 * 100.0
    }
}

/// Source of host resource readings.
///
/// Implementations must be cheap to share across threads; the emergency monitor
/// polls one from a background thread while the validator reads it on the caller's.
pub trait ResourceProbe: Send + Sync {
    fn memory(&self) -> Result<MemoryStats>;

    fn cpu_usage_percent(&self) -> Result<f64>;

    /// Free bytes on the filesystem holding `path`, `None` when no mount matches.
    fn disk_free_bytes(&self, path: &Path) -> Result<Option<u64>>;
}

/// Production probe backed by `sysinfo`
pub struct SysinfoProbe {
    system: Mutex<System>,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProbe for SysinfoProbe {
    fn memory(&self) -> Result<MemoryStats> {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_memory();
        Ok(MemoryStats {
            total_bytes: system.total_memory(),
            available_bytes: system.available_memory(),
        })
    }

    fn cpu_usage_percent(&self) -> Result<f64> {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        // Usage is a delta between two refreshes.
        system.refresh_cpu_usage();
        std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        system.refresh_cpu_usage();
        Ok(f64::from(system.global_cpu_usage()))
    }

    fn disk_free_bytes(&self, path: &Path) -> Result<Option<u64>> {
        let target = existing_ancestor(path)
            .canonicalize()
            .with_context(|| format!("Failed to resolve {}", path.display()))?;
        let disks = Disks::new_with_refreshed_list();
        let best = disks
            .list()
            .iter()
            .filter(|disk| target.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().components().count());
        Ok(best.map(|disk| disk.available_space()))
    }
}

fn existing_ancestor(path: &Path) -> PathBuf {
    path.ancestors()
        .find(|p| p.exists())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"))
}

/// Probe returning fixed readings, for tests and for callers that sample elsewhere.
#[derive(Debug, Clone)]
pub struct StaticProbe {
    pub memory: MemoryStats,
    pub cpu_percent: f64,
    pub disk_free: Option<u64>,
}

impl StaticProbe {
    /// A healthy host: 16 GiB total with half free, idle CPU, 100 GiB free disk.
    pub fn healthy() -> Self {
        Self {
            memory: MemoryStats {
                total_bytes: 16 << 30,
                available_bytes: 8 << 30,
            },
            cpu_percent: 5.0,
            disk_free: Some(100 << 30),
        }
    }

    pub fn with_disk_free(mut self, bytes: u64) -> Self {
        self.disk_free = Some(bytes);
        self
    }

    pub fn with_available_memory(mut self, bytes: u64) -> Self {
        self.memory.available_bytes = bytes;
        self
    }

    pub fn with_cpu_percent(mut self, percent: f64) -> Self {
        self.cpu_percent = percent;
        self
    }
}

impl ResourceProbe for StaticProbe {
    fn memory(&self) -> Result<MemoryStats> {
        Ok(self.memory)
    }

    fn cpu_usage_percent(&self) -> Result<f64> {
        Ok(self.cpu_percent)
    }

    fn disk_free_bytes(&self, _path: &Path) -> Result<Option<u64>> {
        Ok(self.disk_free)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_usage_percent() {
        let stats = MemoryStats {
            total_bytes: 1000,
            available_bytes: 250,
        };
        assert!((stats.usage_percent() - 75.0).abs() < f64::EPSILON);

        let empty = MemoryStats {
            total_bytes: 0,
            available_bytes: 0,
        };
        assert_eq!(empty.usage_percent(), 0.0);
    }

    #[test]
    fn test_static_probe_builders() {
        let probe = StaticProbe::healthy()
            .with_disk_free(42)
            .with_available_memory(7)
            .with_cpu_percent(99.0);
        assert_eq!(probe.disk_free_bytes(Path::new("/")).unwrap(), Some(42));
        assert_eq!(probe.memory().unwrap().available_bytes, 7);
        assert_eq!(probe.cpu_usage_percent().unwrap(), 99.0);
    }

    #[test]
    fn test_existing_ancestor_walks_up() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("a/b/c");
        assert_eq!(existing_ancestor(&missing), dir.path());
    }
}
