//! Sink rotation and retention.

use super::error::{AuditError, AuditResult};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// Gzip `path` into `<path>.gz` and remove the original.
pub fn compress_file(path: &Path) -> AuditResult<PathBuf> {
    let mut target = path.as_os_str().to_owned();
    target.push(".gz");
    let target = PathBuf::from(target);

    let mut input = File::open(path).map_err(|e| AuditError::io(path, e))?;
    let output = File::create(&target).map_err(|e| AuditError::io(&target, e))?;
    let mut encoder = GzEncoder::new(output, Compression::default());
    io::copy(&mut input, &mut encoder).map_err(|e| AuditError::io(&target, e))?;
    encoder.finish().map_err(|e| AuditError::io(&target, e))?;

    fs::remove_file(path).map_err(|e| AuditError::io(path, e))?;
    debug!("Compressed rotated audit file to {}", target.display());
    Ok(target)
}

/// Remove files in `dirs` last modified before `max_age` ago, sparing `active`.
pub fn purge_older_than(dirs: &[PathBuf], max_age: Duration, active: &[&Path]) -> usize {
    let Some(cutoff) = SystemTime::now().checked_sub(max_age) else {
        return 0;
    };

    let mut removed = 0;
    for dir in dirs {
        let Ok(entries) = fs::read_dir(dir) else {
            continue;
        };
        for entry in entries.filter_map(Result::ok) {
            let path = entry.path();
            if active.iter().any(|a| *a == path.as_path()) {
                continue;
            }
            let expired = entry
                .metadata()
                .and_then(|m| m.modified())
                .map(|modified| modified < cutoff)
                .unwrap_or(false);
            if !expired || !path.is_file() {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!("Purged old audit file {}", path.display());
                    removed += 1;
                }
                Err(e) => warn!("Failed to purge {}: {}", path.display(), e),
            }
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tempfile::TempDir;

    #[test]
    fn test_compress_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.jsonl");
        fs::write(&path, "{\"a\":1}\n{\"a\":2}\n").unwrap();

        let gz = compress_file(&path).unwrap();
        assert!(!path.exists());
        assert_eq!(gz, dir.path().join("audit.jsonl.gz"));

        let mut decoded = String::new();
        GzDecoder::new(File::open(&gz).unwrap())
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, "{\"a\":1}\n{\"a\":2}\n");
    }

    #[test]
    fn test_purge_spares_active_and_fresh_files() {
        let dir = TempDir::new().unwrap();
        let old = dir.path().join("old.log");
        let active = dir.path().join("active.log");
        fs::write(&old, "x").unwrap();
        fs::write(&active, "y").unwrap();
        let past = SystemTime::now() - Duration::from_secs(3 * 24 * 3600);
        for path in [&old, &active] {
            File::options()
                .write(true)
                .open(path)
                .unwrap()
                .set_modified(past)
                .unwrap();
        }

        let removed = purge_older_than(
            &[dir.path().to_path_buf()],
            Duration::from_secs(24 * 3600),
            &[active.as_path()],
        );
        assert_eq!(removed, 1);
        assert!(!old.exists());
        assert!(active.exists());

        assert_eq!(
            purge_older_than(&[dir.path().to_path_buf()], Duration::from_secs(24 * 3600), &[]),
            1
        );
    }
}
