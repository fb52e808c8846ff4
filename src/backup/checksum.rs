//! SHA-256 helpers for per-file and aggregate snapshot checksums.
//!
//! The aggregate digest feeds, for every captured file in relative-path order,
//! the relative path, a NUL byte, then the file content. It does not depend on
//! walk order or timestamps, so two snapshots of identical trees agree.

use super::error::{BackupError, BackupResult};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Reader adapter that hashes everything passing through it.
pub struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
    bytes: u64,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes: 0,
        }
    }

    /// Hex digest and byte count of everything read so far.
    pub fn finish(self) -> (String, u64) {
        (format!("{:x}", self.hasher.finalize()), self.bytes)
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes += n as u64;
        Ok(n)
    }
}

/// SHA-256 of a file's content.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut reader = HashingReader::new(File::open(path)?);
    io::copy(&mut reader, &mut io::sink())?;
    Ok(reader.finish().0)
}

/// Normalized `/`-separated key for a relative path.
pub fn relative_key(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn feed_entry<R: Read>(hasher: &mut Sha256, key: &str, mut content: R) -> io::Result<()> {
    hasher.update(key.as_bytes());
    hasher.update([0u8]);
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = content.read(&mut buf)?;
        if n == 0 {
            return Ok(());
        }
        hasher.update(&buf[..n]);
    }
}

/// Aggregate checksum of a mirrored payload directory.
pub fn aggregate_directory(files_dir: &Path) -> BackupResult<String> {
    let mut entries: Vec<(String, PathBuf)> = Vec::new();
    if files_dir.exists() {
        for entry in WalkDir::new(files_dir) {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(files_dir).to_path_buf();
                BackupError::io(path, e.into())
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(files_dir)
                .unwrap_or(entry.path());
            entries.push((relative_key(relative), entry.path().to_path_buf()));
        }
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = Sha256::new();
    for (key, path) in &entries {
        let file = File::open(path).map_err(|e| BackupError::io(path, e))?;
        feed_entry(&mut hasher, key, file).map_err(|e| BackupError::io(path, e))?;
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Aggregate checksum of a ZIP payload, computed over decompressed entries.
pub fn aggregate_archive(archive_path: &Path) -> BackupResult<String> {
    let file = File::open(archive_path).map_err(|e| BackupError::io(archive_path, e))?;
    let mut archive = zip::ZipArchive::new(file)?;

    let mut names: Vec<String> = archive
        .file_names()
        .filter(|name| !name.ends_with('/'))
        .map(str::to_string)
        .collect();
    names.sort();

    let mut hasher = Sha256::new();
    for name in &names {
        let entry = archive.by_name(name)?;
        feed_entry(&mut hasher, name, entry).map_err(|e| BackupError::io(archive_path, e))?;
    }
    Ok(format!("{:x}", hasher.finalize()))
}
