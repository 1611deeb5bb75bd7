//! Source disposal: delete, or quarantine when deletion fails.
//!
//! After an artifact is stored, nothing from the batch may stay in the upload
//! area. Each file is deleted; if the filesystem refuses, it is moved into the
//! client's quarantine directory instead. A file is never left in both places.

use crate::output::{CleanupOutcome, CleanupRecord};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, error, warn};

/// Disposes of files for one client, quarantining into `quarantine_dir`.
#[derive(Debug, Clone)]
pub struct CleanupManager {
    quarantine_dir: PathBuf,
}

impl CleanupManager {
    pub fn new(quarantine_dir: impl Into<PathBuf>) -> Self {
        Self {
            quarantine_dir: quarantine_dir.into(),
        }
    }

    pub fn quarantine_dir(&self) -> &Path {
        &self.quarantine_dir
    }

    /// Delete `path`, falling back to quarantine.
    pub async fn dispose(&self, path: &Path) -> CleanupRecord {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                debug!("Deleted {}", path.display());
                record(path, CleanupOutcome::Deleted)
            }
            // Already gone counts as deleted.
            Err(e) if e.kind() == io::ErrorKind::NotFound => record(path, CleanupOutcome::Deleted),
            Err(e) => {
                warn!("Could not delete {} ({e}); quarantining", path.display());
                self.quarantine(path).await
            }
        }
    }

    /// Move `path` into quarantine without trying to delete it first.
    pub async fn quarantine(&self, path: &Path) -> CleanupRecord {
        match self.move_into_quarantine(path).await {
            Ok(to) => {
                warn!("Quarantined {} → {}", path.display(), to.display());
                record(path, CleanupOutcome::Quarantined { to })
            }
            Err(e) => {
                error!("Could not quarantine {}: {e}", path.display());
                record(
                    path,
                    CleanupOutcome::Stranded {
                        detail: e.to_string(),
                    },
                )
            }
        }
    }

    /// [`dispose`](Self::dispose) each path in order.
    pub async fn dispose_all<P: AsRef<Path>>(&self, paths: &[P]) -> Vec<CleanupRecord> {
        let mut records = Vec::with_capacity(paths.len());
        for path in paths {
            records.push(self.dispose(path.as_ref()).await);
        }
        records
    }

    async fn move_into_quarantine(&self, path: &Path) -> io::Result<PathBuf> {
        let is_dir = tokio::fs::symlink_metadata(path).await?.is_dir();
        tokio::fs::create_dir_all(&self.quarantine_dir).await?;
        let target = reserve_target(&self.quarantine_dir, path, is_dir).await?;

        // The placeholder is replaced in place; the name stays ours.
        if tokio::fs::rename(path, &target).await.is_err() {
            if let Err(e) = copy_over(path, &target, is_dir).await {
                let _ = remove_placeholder(&target, is_dir).await;
                return Err(e);
            }
        }

        // Retention counts from the move, not from the upload.
        touch(&target, is_dir).await;
        Ok(target)
    }
}

fn record(path: &Path, outcome: CleanupOutcome) -> CleanupRecord {
    CleanupRecord {
        path: path.to_path_buf(),
        outcome,
    }
}

/// Claim `<dir>/<name>`, or `<dir>/<name>.1`, `<dir>/<name>.2`, ... by
/// creating an empty placeholder of the same kind as the source. Creation
/// fails on an existing name, so two concurrent moves never get the same
/// target.
async fn reserve_target(dir: &Path, path: &Path, is_dir: bool) -> io::Result<PathBuf> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unnamed".to_string());

    let mut n = 0u32;
    loop {
        let candidate = if n == 0 {
            dir.join(&name)
        } else {
            dir.join(format!("{name}.{n}"))
        };
        let created = if is_dir {
            tokio::fs::create_dir(&candidate).await
        } else {
            tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&candidate)
                .await
                .map(drop)
        };
        match created {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => n += 1,
            Err(e) => return Err(e),
        }
    }
}

/// Cross-device fallback: copy onto the placeholder, then remove the original.
async fn copy_over(path: &Path, target: &Path, is_dir: bool) -> io::Result<()> {
    if is_dir {
        return Err(io::Error::other(format!(
            "cannot move directory {} across filesystems",
            path.display()
        )));
    }
    tokio::fs::copy(path, target).await?;
    tokio::fs::remove_file(path).await
}

async fn remove_placeholder(target: &Path, is_dir: bool) -> io::Result<()> {
    if is_dir {
        tokio::fs::remove_dir_all(target).await
    } else {
        tokio::fs::remove_file(target).await
    }
}

async fn touch(path: &Path, is_dir: bool) {
    let owned = path.to_path_buf();
    let result = tokio::task::spawn_blocking(move || {
        let file = if is_dir {
            std::fs::File::open(&owned)?
        } else {
            std::fs::File::options().write(true).open(&owned)?
        };
        file.set_modified(SystemTime::now())
    })
    .await
    .unwrap_or_else(|e| Err(io::Error::other(e)));
    if let Err(e) = result {
        debug!("Could not reset mtime of {}: {e}", path.display());
    }
}

/// Remove quarantine entries older than `retention`. Returns how many went.
///
/// A missing quarantine directory is not an error. Entries that cannot be
/// inspected or removed are logged and skipped.
pub async fn purge_quarantine(dir: &Path, retention: Duration) -> io::Result<usize> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let now = SystemTime::now();
    let mut purged = 0;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let meta = match entry.metadata().await {
            Ok(m) => m,
            Err(e) => {
                warn!("Skipping {}: {e}", path.display());
                continue;
            }
        };
        let age = meta
            .modified()
            .ok()
            .and_then(|m| now.duration_since(m).ok())
            .unwrap_or_default();
        if age <= retention {
            continue;
        }

        let removed = if meta.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        match removed {
            Ok(()) => {
                debug!("Purged {} (age {}s)", path.display(), age.as_secs());
                purged += 1;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not purge {}: {e}", path.display()),
        }
    }
    Ok(purged)
}
