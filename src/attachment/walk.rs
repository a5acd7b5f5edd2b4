//! Breadth-first directory walk with a file budget.
//!
//! Used to turn a dropped directory into individual file attachments. The
//! walk stops once the budget is spent and reports what it left behind as
//! overflow entries, so the caller can tell the user which directories were
//! not fully included.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::attachment::model::PathInfo;
use crate::config::WALK_MAX_FILES;
use crate::error::Error;

/// A directory whose contents were not (fully) included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverflowDir {
    pub dir_path: String,
    /// Entries (files and subdirectories) not included.
    pub file_count: usize,
    /// True for the single directory the walk stopped inside.
    pub partial: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalkResult {
    pub files: Vec<PathInfo>,
    pub overflow_dirs: Vec<OverflowDir>,
    pub has_more: bool,
}

/// A failed walk, carrying whatever was collected before the failure.
#[derive(Debug, thiserror::Error)]
#[error("directory walk failed: {source}")]
pub struct WalkError {
    pub partial: WalkResult,
    #[source]
    pub source: Error,
}

impl WalkError {
    fn new(partial: WalkResult, source: Error) -> Self {
        Self { partial, source }
    }
}

/// Effective file budget: non-positive or oversized requests get the cap.
pub fn effective_max_files(requested: i64) -> usize {
    if requested <= 0 || requested as u64 > WALK_MAX_FILES as u64 {
        WALK_MAX_FILES
    } else {
        requested as usize
    }
}

struct Listing {
    files: Vec<PathBuf>,
    dirs: Vec<PathBuf>,
}

/// Non-hidden entries in directory order. Symlinks to directories are not
/// followed.
fn list_dir(dir: &Path) -> std::io::Result<Listing> {
    let mut files = Vec::new();
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        let ft = entry.file_type()?;
        if ft.is_dir() {
            dirs.push(entry.path());
        } else if ft.is_file() {
            files.push(entry.path());
        } else if ft.is_symlink() {
            if let Ok(meta) = std::fs::metadata(entry.path()) {
                if meta.is_file() {
                    files.push(entry.path());
                }
            }
        }
    }
    Ok(Listing { files, dirs })
}

fn display(p: &Path) -> String {
    p.to_string_lossy().into_owned()
}

/// Walk `root` breadth-first, collecting at most `max_files` files.
///
/// Hidden entries are skipped. Unreadable subdirectories become overflow
/// entries with a zero count; an unreadable root is an error. Cancellation
/// is checked between directories and between files.
pub fn walk_directory_bfs(
    root: &Path,
    max_files: i64,
    cancel: &CancellationToken,
) -> Result<WalkResult, WalkError> {
    let max = effective_max_files(max_files);
    let mut result = WalkResult::default();
    let mut queue: VecDeque<PathBuf> = VecDeque::from([root.to_path_buf()]);
    let mut stopped = false;

    while let Some(dir) = queue.pop_front() {
        if cancel.is_cancelled() {
            result.has_more = true;
            return Err(WalkError::new(result, Error::Cancelled));
        }

        let listing = match list_dir(&dir) {
            Ok(l) => l,
            Err(e) if dir == root => {
                return Err(WalkError::new(result, Error::Io(e)));
            }
            Err(e) => {
                tracing::debug!(dir = %dir.display(), error = %e, "skipping unreadable directory");
                result.overflow_dirs.push(OverflowDir {
                    dir_path: display(&dir),
                    file_count: 0,
                    partial: false,
                });
                continue;
            }
        };

        if result.files.len() >= max && !listing.files.is_empty() {
            result.overflow_dirs.push(OverflowDir {
                dir_path: display(&dir),
                file_count: listing.files.len() + listing.dirs.len(),
                partial: true,
            });
            stopped = true;
            break;
        }

        for (i, file) in listing.files.iter().enumerate() {
            if cancel.is_cancelled() {
                result.has_more = true;
                return Err(WalkError::new(result, Error::Cancelled));
            }
            if result.files.len() >= max {
                result.overflow_dirs.push(OverflowDir {
                    dir_path: display(&dir),
                    file_count: (listing.files.len() - i) + listing.dirs.len(),
                    partial: true,
                });
                stopped = true;
                break;
            }
            match PathInfo::stat(&display(file)) {
                Ok(info) => result.files.push(info),
                Err(e) => tracing::debug!(file = %file.display(), error = %e, "skipping file"),
            }
        }
        if stopped {
            break;
        }
        queue.extend(listing.dirs);
    }

    if stopped {
        // Directories that were queued but never visited get a shallow count.
        for dir in queue {
            let count = list_dir(&dir)
                .map(|l| l.files.len() + l.dirs.len())
                .unwrap_or(0);
            result.overflow_dirs.push(OverflowDir {
                dir_path: display(&dir),
                file_count: count,
                partial: false,
            });
        }
        result.has_more = true;
    }

    Ok(result)
}

/// Async wrapper running the walk on the blocking pool.
pub async fn walk_directory(
    root: PathBuf,
    max_files: i64,
    cancel: CancellationToken,
) -> Result<WalkResult, WalkError> {
    tokio::task::spawn_blocking(move || walk_directory_bfs(&root, max_files, &cancel))
        .await
        .unwrap_or_else(|e| {
            Err(WalkError::new(
                WalkResult::default(),
                Error::Internal(format!("walk task failed: {e}")),
            ))
        })
}
