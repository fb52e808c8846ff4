use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum RemovalError {
    /// The file could not be removed. The loop records it and moves on.
    #[error("Failed to remove {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The remover cannot continue. The whole removal phase fails.
    #[error("Removal aborted: {0}")]
    Aborted(String),
}

/// Performs the destructive step of a cleanup.
pub trait FileRemover: Send + Sync {
    /// Remove `path` and return the number of bytes freed.
    fn remove(&self, path: &Path) -> Result<u64, RemovalError>;
}

/// Removes files and directory trees from the local filesystem
#[derive(Debug, Default, Clone, Copy)]
pub struct FsRemover;

impl FileRemover for FsRemover {
    fn remove(&self, path: &Path) -> Result<u64, RemovalError> {
        let file_error = |source| RemovalError::File {
            path: path.to_path_buf(),
            source,
        };
        let meta = fs::symlink_metadata(path).map_err(file_error)?;
        if meta.is_dir() {
            let size = tree_size(path);
            fs::remove_dir_all(path).map_err(file_error)?;
            Ok(size)
        } else {
            fs::remove_file(path).map_err(file_error)?;
            Ok(meta.len())
        }
    }
}

pub(crate) fn tree_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(Result::ok)
        .filter_map(|entry| entry.metadata().ok())
        .filter(|meta| meta.is_file())
        .map(|meta| meta.len())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_removes_file_and_reports_size() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.log");
        fs::write(&file, "12345").unwrap();
        assert_eq!(FsRemover.remove(&file).unwrap(), 5);
        assert!(!file.exists());
    }

    #[test]
    fn test_removes_directory_tree() {
        let dir = TempDir::new().unwrap();
        let tree = dir.path().join("build");
        fs::create_dir_all(tree.join("nested")).unwrap();
        fs::write(tree.join("a.o"), "abc").unwrap();
        fs::write(tree.join("nested/b.o"), "defg").unwrap();
        assert_eq!(FsRemover.remove(&tree).unwrap(), 7);
        assert!(!tree.exists());
    }

    #[test]
    fn test_missing_file_is_file_error() {
        let dir = TempDir::new().unwrap();
        let err = FsRemover.remove(&dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, RemovalError::File { .. }));
    }
}
