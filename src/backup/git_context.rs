//! Version-control context captured next to a snapshot.

use super::types::GitContext;
use chrono::Utc;
use git2::{Repository, StatusOptions};
use std::path::Path;

/// Capture branch, head commit and dirty-file count for the repository holding `path`.
pub fn capture(path: &Path) -> Result<GitContext, git2::Error> {
    let repo = Repository::discover(path)?;

    let (branch, head_commit) = match repo.head() {
        Ok(head) => (
            head.shorthand().map(str::to_string),
            head.target().map(|oid| oid.to_string()),
        ),
        // Unborn branch: no commits yet.
        Err(_) => (None, None),
    };

    let mut options = StatusOptions::new();
    options.include_untracked(true).recurse_untracked_dirs(false);
    let dirty_files = repo.statuses(Some(&mut options))?.len();

    Ok(GitContext {
        branch,
        head_commit,
        dirty_files,
        captured_at: Utc::now(),
    })
}
