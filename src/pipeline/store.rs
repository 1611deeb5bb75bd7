//! Artifact storage: deterministic paths, atomic replacement, writer locks.
//!
//! Layout under the upload root:
//!
//! ```text
//! <root>/<owner>/<client>/<category>/<category>.pdf   canonical artifact
//! <root>/<owner>/<client>/deletar/                     quarantine
//! <root>/<owner>/<client>/.staging/                    normalised temp images
//! ```
//!
//! Writes go to `<artifact>.pdf.tmp` and are renamed over the target, so a
//! reader never observes a half-written artifact. Two submissions for the same
//! key must not interleave their read-modify-write cycles; [`ArtifactLocks`]
//! hands out one async mutex per key for that.

use crate::error::AssemblyError;
use crate::submission::ArtifactKey;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

/// Resolves and persists canonical artifacts under one upload root.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<owner>/<client>`
    pub fn client_dir(&self, owner: &str, client_id: &str) -> PathBuf {
        self.root.join(owner).join(client_id)
    }

    /// `<root>/<owner>/<client>/<category>/<category>.pdf`
    pub fn artifact_path(&self, key: &ArtifactKey) -> PathBuf {
        self.client_dir(&key.owner, &key.client_id)
            .join(key.category.slug())
            .join(key.category.file_name())
    }

    /// The artifact path as stored on the client record: `/`-separated,
    /// independent of the host platform.
    pub fn record_path(&self, key: &ArtifactKey) -> String {
        self.artifact_path(key)
            .components()
            .filter_map(|c| match c {
                Component::RootDir => Some(String::new()),
                Component::CurDir => None,
                other => Some(other.as_os_str().to_string_lossy().into_owned()),
            })
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Current artifact bytes, or `None` if this key has never been stored.
    pub async fn read(&self, key: &ArtifactKey) -> Result<Option<Vec<u8>>, AssemblyError> {
        let path = self.artifact_path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(AssemblyError::ArtifactReadFailed { path, source }),
        }
    }

    /// Replace the artifact for `key` with `bytes`.
    ///
    /// Atomic write: write to temp, then rename.
    pub async fn write(&self, key: &ArtifactKey, bytes: &[u8]) -> Result<PathBuf, AssemblyError> {
        let path = self.artifact_path(key);
        let fail = |source| AssemblyError::StoreFailed {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(fail)?;
        }

        let tmp_path = path.with_extension("pdf.tmp");
        if let Err(e) = tokio::fs::write(&tmp_path, bytes).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(fail(e));
        }
        if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(fail(e));
        }

        debug!("Stored {} bytes at {}", bytes.len(), path.display());
        Ok(path)
    }
}

/// One writer lock per artifact key.
///
/// Share a single instance across every submission that may touch the same
/// upload root; [`crate::Assembler`] does this for its callers.
#[derive(Debug, Default)]
pub struct ArtifactLocks {
    locks: Mutex<HashMap<ArtifactKey, Arc<AsyncMutex<()>>>>,
}

impl ArtifactLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other task holds `key`, then hold it until the guard drops.
    pub async fn acquire(&self, key: &ArtifactKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            // Entries only referenced by the map are idle.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        lock.lock_owned().await
    }

    /// Number of keys currently held or awaited.
    pub fn active(&self) -> usize {
        let locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        locks.values().filter(|l| Arc::strong_count(l) > 1).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::submission::Category;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn key(category: Category) -> ArtifactKey {
        ArtifactKey {
            owner: "alice".into(),
            client_id: "42".into(),
            category,
        }
    }

    #[test]
    fn artifact_path_layout() {
        let store = ArtifactStore::new("uploads");
        assert_eq!(
            store.artifact_path(&key(Category::BankStatement)),
            PathBuf::from("uploads/alice/42/extrato_bancario/extrato_bancario.pdf")
        );
        assert_eq!(
            store.record_path(&key(Category::BankStatement)),
            "uploads/alice/42/extrato_bancario/extrato_bancario.pdf"
        );
    }

    #[test]
    fn record_path_keeps_absolute_root() {
        let store = ArtifactStore::new("/srv/up");
        assert_eq!(
            store.record_path(&key(Category::SpouseDocuments)),
            "/srv/up/alice/42/documentos_conjuge/documentos_conjuge.pdf"
        );
    }

    #[tokio::test]
    async fn read_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        assert!(store.read(&key(Category::BankStatement)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn write_replaces_and_leaves_no_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let k = key(Category::PersonalDocuments);

        store.write(&k, b"first").await.unwrap();
        let path = store.write(&k, b"second").await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        assert!(!path.with_extension("pdf.tmp").exists());
        assert_eq!(store.read(&k).await.unwrap().unwrap(), b"second");
    }

    #[tokio::test]
    async fn write_failure_is_store_failed() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the owner directory should be.
        std::fs::write(dir.path().join("alice"), b"").unwrap();
        let store = ArtifactStore::new(dir.path());
        let err = store
            .write(&key(Category::BankStatement), b"x")
            .await
            .unwrap_err();
        assert!(matches!(err, AssemblyError::StoreFailed { .. }));
    }

    #[tokio::test]
    async fn same_key_is_serialised() {
        let locks = Arc::new(ArtifactLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                let max_seen = Arc::clone(&max_seen);
                tokio::spawn(async move {
                    let _guard = locks.acquire(&key(Category::BankStatement)).await;
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks = ArtifactLocks::new();
        let _a = locks.acquire(&key(Category::BankStatement)).await;
        let b = tokio::time::timeout(
            Duration::from_secs(1),
            locks.acquire(&key(Category::SpouseDocuments)),
        )
        .await;
        assert!(b.is_ok());
        assert_eq!(locks.active(), 2);
    }
}
