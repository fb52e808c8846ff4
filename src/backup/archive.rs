//! ZIP container payloads.

use super::checksum::HashingReader;
use super::error::{BackupError, BackupResult};
use super::types::FileBackupRecord;
use super::SourceFile;
use chrono::Utc;
use std::fs::{self, File};
use std::io;
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Write every source into one archive at `archive_path`.
///
/// The archive is assembled under a temporary name and renamed into place once
/// finished, so a reader never sees a half-written container.
pub(crate) fn write_archive(
    sources: &[SourceFile],
    archive_path: &Path,
    compression_level: u32,
) -> BackupResult<Vec<FileBackupRecord>> {
    let temp_path = archive_path.with_extension("zip.tmp");
    let file = File::create(&temp_path).map_err(|e| BackupError::io(&temp_path, e))?;
    let mut writer = ZipWriter::new(file);

    let (method, level) = if compression_level == 0 {
        (CompressionMethod::Stored, None)
    } else {
        (
            CompressionMethod::Deflated,
            Some(compression_level.min(9) as i32),
        )
    };

    let mut records = Vec::with_capacity(sources.len());
    for source in sources {
        let options = FileOptions::default()
            .compression_method(method)
            .compression_level(level)
            .unix_permissions(source.permissions);

        writer.start_file(source.relative.as_str(), options)?;
        let input = File::open(&source.path).map_err(|e| BackupError::io(&source.path, e))?;
        let mut reader = HashingReader::new(input);
        io::copy(&mut reader, &mut writer).map_err(|e| BackupError::io(&source.path, e))?;
        let (checksum, file_size) = reader.finish();

        records.push(FileBackupRecord {
            original_path: source.path.clone(),
            relative_path: source.relative.clone(),
            backup_path: archive_path.to_path_buf(),
            file_size,
            modified_time: source.modified,
            permissions: source.permissions,
            checksum,
            backup_timestamp: Utc::now(),
        });
    }

    writer.finish()?;
    fs::rename(&temp_path, archive_path).map_err(|e| BackupError::io(archive_path, e))?;
    Ok(records)
}

/// Open an archive for restore.
pub(crate) fn open_archive(archive_path: &Path) -> BackupResult<ZipArchive<File>> {
    let file = File::open(archive_path).map_err(|e| BackupError::io(archive_path, e))?;
    Ok(ZipArchive::new(file)?)
}

/// Stream one entry into `writer`, returning its unix mode when recorded.
pub(crate) fn extract_entry<W: io::Write>(
    archive: &mut ZipArchive<File>,
    name: &str,
    writer: &mut W,
) -> BackupResult<Option<u32>> {
    let mut entry = archive.by_name(name)?;
    let mode = entry.unix_mode();
    io::copy(&mut entry, writer).map_err(|e| BackupError::io(name, e))?;
    Ok(mode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn source(dir: &Path, relative: &str, content: &str) -> SourceFile {
        let path = dir.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        SourceFile {
            path,
            relative: relative.to_string(),
            modified: Utc::now(),
            permissions: 0o640,
        }
    }

    #[test]
    fn test_archive_records_and_extracts() {
        let dir = TempDir::new().unwrap();
        let sources = vec![
            source(dir.path(), "a.txt", "alpha"),
            source(dir.path(), "nested/b.txt", "beta beta beta"),
        ];
        let archive_path = dir.path().join("snap.zip");

        let records = write_archive(&sources, &archive_path, 6).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].file_size, 14);
        assert!(!archive_path.with_extension("zip.tmp").exists());

        let mut archive = open_archive(&archive_path).unwrap();
        let mut out = Vec::new();
        let mode = extract_entry(&mut archive, "nested/b.txt", &mut out).unwrap();
        assert_eq!(out, b"beta beta beta");
        assert_eq!(mode.map(|m| m & 0o777), Some(0o640));
    }

    #[test]
    fn test_stored_level_zero() {
        let dir = TempDir::new().unwrap();
        let sources = vec![source(dir.path(), "plain.txt", "raw")];
        let archive_path = dir.path().join("stored.zip");
        write_archive(&sources, &archive_path, 0).unwrap();

        let mut archive = open_archive(&archive_path).unwrap();
        let entry = archive.by_name("plain.txt").unwrap();
        assert_eq!(entry.compression(), CompressionMethod::Stored);
    }
}
