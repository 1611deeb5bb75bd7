//! Pipeline coordinator: one submission in, one report out.
//!
//! ## Why per-category?
//!
//! Each category owns a separate artifact, so a failure in one (a corrupt
//! prior PDF, a full disk) must not cost the client the others. The
//! coordinator runs every category as its own pipeline and reports them
//! individually; [`SubmissionReport::into_result`] is there for callers who
//! prefer all-or-nothing.
//!
//! Within a category the stages run strictly in order:
//!
//! ```text
//! classify → normalize / parse → composite → [lock] read existing → merge → store [unlock] → cleanup
//! ```
//!
//! `category_timeout` bounds everything up to and including the merge. Once
//! the store has started it runs to completion, so a timeout can never leave
//! an artifact that was written but reported as failed.

use crate::config::{AssemblyConfig, PageSize};
use crate::error::{AssemblyError, SourceError};
use crate::output::{CategoryReport, CleanupOutcome, Stage, SubmissionReport};
use crate::pipeline::classify::{classify, partition, ClassifiedSource, SourceKind};
use crate::pipeline::cleanup::{purge_quarantine, CleanupManager};
use crate::pipeline::document::{parse_source, ArtifactDocument, DocumentError};
use crate::pipeline::layout::{place, Placement};
use crate::pipeline::normalize::{normalize, NormalizedImage};
use crate::pipeline::store::{ArtifactLocks, ArtifactStore};
use crate::submission::{ArtifactKey, Category, SourceFile, Submission};
use futures::future::join_all;
use lopdf::Document;
use once_cell::sync::Lazy;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

/// Lock registry shared by every [`Assembler`] built with [`Assembler::new`].
static GLOBAL_LOCKS: Lazy<Arc<ArtifactLocks>> = Lazy::new(|| Arc::new(ArtifactLocks::new()));

/// Runs submissions against one upload root.
///
/// Cheap to clone; clones share the artifact locks.
#[derive(Debug, Clone)]
pub struct Assembler {
    config: AssemblyConfig,
    store: ArtifactStore,
    locks: Arc<ArtifactLocks>,
}

impl Assembler {
    /// Build an assembler that serialises writers with every other assembler
    /// in this process.
    pub fn new(config: AssemblyConfig) -> Self {
        Self::with_locks(config, Arc::clone(&GLOBAL_LOCKS))
    }

    /// Build an assembler with its own lock registry.
    pub fn with_locks(config: AssemblyConfig, locks: Arc<ArtifactLocks>) -> Self {
        let store = ArtifactStore::new(config.upload_root.clone());
        Self {
            config,
            store,
            locks,
        }
    }

    pub fn config(&self) -> &AssemblyConfig {
        &self.config
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Process one submission.
    ///
    /// # Returns
    /// A report with one entry per non-empty category, whether it succeeded
    /// or not.
    ///
    /// # Errors
    /// Only when the submission itself is unusable (invalid identifiers).
    /// Category failures are reported, not returned.
    pub async fn assemble(&self, submission: &Submission) -> Result<SubmissionReport, AssemblyError> {
        let start = Instant::now();
        submission.validate()?;

        let groups = partition(&submission.files);
        info!(
            "Assembling {} file(s) in {} categories for {}/{}",
            submission.files.len(),
            groups.len(),
            submission.owner,
            submission.client_id
        );
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_submission_start(groups.len());
        }

        let runs = groups
            .into_iter()
            .map(|(category, files)| self.run_category(submission, category, files));
        let categories = if self.config.concurrent_categories {
            join_all(runs).await
        } else {
            let mut out = Vec::new();
            for run in runs {
                out.push(run.await);
            }
            out
        };

        let report = SubmissionReport {
            owner: submission.owner.clone(),
            client_id: submission.client_id.clone(),
            categories,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        let succeeded = report.succeeded().count();
        info!(
            "Submission for {}/{} complete: {}/{} categories stored, {}ms",
            report.owner,
            report.client_id,
            succeeded,
            report.categories.len(),
            report.duration_ms
        );
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_submission_complete(report.categories.len(), succeeded);
        }
        Ok(report)
    }

    /// Purge expired files from one client's quarantine directory.
    ///
    /// Uses `quarantine_retention` from the config; returns 0 when retention
    /// is disabled.
    pub async fn purge_quarantine(&self, owner: &str, client_id: &str) -> Result<usize, AssemblyError> {
        crate::submission::validate_segment("owner", owner)?;
        crate::submission::validate_segment("client", client_id)?;
        let Some(retention) = self.config.quarantine_retention else {
            return Ok(0);
        };
        let dir = self.quarantine_dir(owner, client_id);
        purge_quarantine(&dir, retention)
            .await
            .map_err(|e| AssemblyError::Internal(format!("purge of '{}' failed: {e}", dir.display())))
    }

    fn quarantine_dir(&self, owner: &str, client_id: &str) -> PathBuf {
        self.store
            .client_dir(owner, client_id)
            .join(&self.config.quarantine_dir)
    }

    async fn run_category(
        &self,
        submission: &Submission,
        category: Category,
        files: Vec<SourceFile>,
    ) -> CategoryReport {
        let start = Instant::now();
        let key = submission.key(category);
        let mut report = CategoryReport::new(category);
        let mut batch = Batch::default();
        let cleanup = CleanupManager::new(self.quarantine_dir(&key.owner, &key.client_id));

        info!("{key}: {} file(s) received", files.len());
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_category_start(category, files.len());
        }

        let result = match self.staging_area(&key).await {
            Ok(staging) => {
                let budget = self.config.category_timeout();
                let prepared = tokio::time::timeout(
                    budget,
                    self.prepare(&key, &files, staging.path(), &mut batch, &mut report),
                )
                .await
                .unwrap_or_else(|_| {
                    Err(AssemblyError::Timeout {
                        category,
                        millis: budget.as_millis() as u64,
                    })
                });
                let result = match prepared {
                    Ok(prepared) => self.commit(&key, prepared, &mut report).await,
                    Err(e) => Err(e),
                };
                self.finish(&key, &result, &batch, &cleanup, &mut report)
                    .await;
                if let Err(e) = staging.close() {
                    debug!("{key}: staging area not fully removed: {e}");
                }
                result
            }
            Err(e) => Err(e),
        };

        if let Err(ref e) = result {
            warn!("{key}: failed after {:?}: {e}", report.stage);
            report.fail(e);
            if let Some(ref cb) = self.config.progress_callback {
                cb.on_category_error(category, &e.to_string());
            }
        } else if let Some(ref cb) = self.config.progress_callback {
            cb.on_category_complete(category, report.total_pages, report.pages_added);
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        report
    }

    /// A fresh directory under the client's staging dir; removed on drop.
    async fn staging_area(&self, key: &ArtifactKey) -> Result<tempfile::TempDir, AssemblyError> {
        let root = self
            .store
            .client_dir(&key.owner, &key.client_id)
            .join(&self.config.staging_dir);
        let fail = |source| AssemblyError::StagingFailed {
            path: root.clone(),
            source,
        };
        tokio::fs::create_dir_all(&root).await.map_err(fail)?;
        tempfile::Builder::new()
            .prefix(&format!("{}-", key.category.slug()))
            .tempdir_in(&root)
            .map_err(fail)
    }

    /// Everything up to and including the merge. Returns holding the key lock.
    async fn prepare(
        &self,
        key: &ArtifactKey,
        files: &[SourceFile],
        staging: &Path,
        batch: &mut Batch,
        report: &mut CategoryReport,
    ) -> Result<Prepared, AssemblyError> {
        let category = key.category;
        let file_timeout = self.config.file_timeout();

        // ── Classify ─────────────────────────────────────────────────────
        let mut classified = Vec::with_capacity(files.len());
        for file in files {
            match classify(file).await {
                Ok(source) => classified.push(source),
                Err(e) => self.reject(category, file, e, batch, report),
            }
        }
        report.stage = Stage::Classified;

        // ── Normalize images, parse documents ────────────────────────────
        let mut images: Vec<NormalizedImage> = Vec::new();
        let mut documents: Vec<Document> = Vec::new();
        for source in classified {
            match source.kind {
                SourceKind::Image(_) => {
                    match normalize(&source, staging, self.config.jpeg_quality, file_timeout).await {
                        Ok(image) => {
                            batch.staged.push(image.path.clone());
                            batch.used.push(source.file.temporary_path.clone());
                            images.push(image);
                        }
                        Err(e) => self.reject(category, &source.file, e, batch, report),
                    }
                }
                SourceKind::Document => match parse_document(&source, file_timeout).await {
                    Ok(doc) => {
                        batch.used.push(source.file.temporary_path.clone());
                        documents.push(doc);
                    }
                    Err(e) => self.reject(category, &source.file, e, batch, report),
                },
            }
        }
        report.stage = Stage::Normalized;
        debug!(
            "{key}: {} image(s), {} document(s), {} rejected",
            images.len(),
            documents.len(),
            report.rejected.len()
        );

        if images.is_empty() && documents.is_empty() {
            return Err(AssemblyError::NoUsableSources {
                category,
                rejected: report.rejected.len(),
            });
        }

        // ── Composite ────────────────────────────────────────────────────
        let page = self.config.page_size;
        let composed: Vec<(NormalizedImage, Placement)> = images
            .into_iter()
            .map(|image| {
                let placement = place(image.width, image.height, page, self.config.max_fill_ratio);
                (image, placement)
            })
            .collect();
        report.stage = Stage::Composited;

        // ── Merge under the key lock ─────────────────────────────────────
        let guard = self.locks.acquire(key).await;
        let existing = self.store.read(key).await?;
        let artifact_path = self.store.artifact_path(key);

        let merged = tokio::task::spawn_blocking(move || {
            merge(existing, &composed, &documents, page, &artifact_path, category)
        })
        .await
        .map_err(|e| AssemblyError::Internal(format!("merge task panicked: {e}")))??;
        report.stage = Stage::Merged;

        Ok(Prepared {
            guard,
            bytes: merged.bytes,
            total_pages: merged.total_pages,
            pages_added: merged.pages_added,
        })
    }

    async fn commit(
        &self,
        key: &ArtifactKey,
        prepared: Prepared,
        report: &mut CategoryReport,
    ) -> Result<(), AssemblyError> {
        let Prepared {
            guard,
            bytes,
            total_pages,
            pages_added,
        } = prepared;

        let path = self.store.write(key, &bytes).await?;
        drop(guard);

        report.stage = Stage::Stored;
        report.artifact_path = Some(self.store.record_path(key));
        report.total_pages = total_pages;
        report.pages_added = pages_added;
        info!(
            "{key}: stored {} page(s) (+{}) at {}",
            total_pages,
            pages_added,
            path.display()
        );
        Ok(())
    }

    /// Dispose of the batch's files according to how the category ended.
    async fn finish(
        &self,
        key: &ArtifactKey,
        result: &Result<(), AssemblyError>,
        batch: &Batch,
        cleanup: &CleanupManager,
        report: &mut CategoryReport,
    ) {
        match result {
            Ok(()) => {
                let mut records = cleanup.dispose_all(&batch.used).await;
                for path in &batch.rejected {
                    records.push(cleanup.quarantine(path).await);
                }
                records.extend(cleanup.dispose_all(&batch.staged).await);

                let all_deleted = records
                    .iter()
                    .all(|r| r.outcome == CleanupOutcome::Deleted);
                report.stage = if all_deleted {
                    Stage::CleanedUp
                } else {
                    Stage::Quarantined
                };
                report.cleanup = records;

                if let Some(retention) = self.config.quarantine_retention {
                    match purge_quarantine(cleanup.quarantine_dir(), retention).await {
                        Ok(0) => {}
                        Ok(n) => info!("{key}: purged {n} expired quarantine file(s)"),
                        Err(e) => warn!("{key}: quarantine purge failed: {e}"),
                    }
                }
            }
            // Nothing was usable: the rejected files will never be merged.
            Err(AssemblyError::NoUsableSources { .. }) => {
                for path in &batch.rejected {
                    report.cleanup.push(cleanup.quarantine(path).await);
                }
            }
            // Sources stay where they are so the caller can retry.
            Err(_) => {}
        }
    }

    fn reject(
        &self,
        category: Category,
        file: &SourceFile,
        error: SourceError,
        batch: &mut Batch,
        report: &mut CategoryReport,
    ) {
        warn!("{category}: skipping {error}");
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_file_rejected(category, &error);
        }
        batch.rejected.push(file.temporary_path.clone());
        report.rejected.push(error);
    }
}

/// File paths touched by one category run, by fate.
#[derive(Debug, Default)]
struct Batch {
    /// Sources that made it into the artifact.
    used: Vec<PathBuf>,
    /// Sources that could not be used.
    rejected: Vec<PathBuf>,
    /// Normalised temp images.
    staged: Vec<PathBuf>,
}

struct Prepared {
    guard: OwnedMutexGuard<()>,
    bytes: Vec<u8>,
    total_pages: usize,
    pages_added: usize,
}

#[derive(Debug)]
struct Merged {
    bytes: Vec<u8>,
    total_pages: usize,
    pages_added: usize,
}

async fn parse_document(source: &ClassifiedSource, timeout: Duration) -> Result<Document, SourceError> {
    let name = source.file.original_name.clone();
    let bytes = source.bytes.clone();
    let task = tokio::task::spawn_blocking(move || parse_source(&bytes));
    match tokio::time::timeout(timeout, task).await {
        Err(_) => Err(SourceError::Timeout {
            name,
            millis: timeout.as_millis() as u64,
        }),
        Ok(Err(join)) => Err(SourceError::Unreadable {
            name,
            detail: format!("parser panicked: {join}"),
        }),
        Ok(Ok(Err(DocumentError::Encrypted))) => Err(SourceError::Encrypted { name }),
        Ok(Ok(Err(e))) => Err(SourceError::Unreadable {
            name,
            detail: e.to_string(),
        }),
        Ok(Ok(Ok(doc))) => Ok(doc),
    }
}

/// Blocking core of the merge stage: existing pages, then images, then
/// document pages.
fn merge(
    existing: Option<Vec<u8>>,
    images: &[(NormalizedImage, Placement)],
    documents: &[Document],
    page: PageSize,
    artifact_path: &Path,
    category: Category,
) -> Result<Merged, AssemblyError> {
    let had_artifact = existing.is_some();
    let corrupt = |e: DocumentError| {
        if had_artifact {
            AssemblyError::CorruptExistingArtifact {
                path: artifact_path.to_path_buf(),
                detail: e.to_string(),
            }
        } else {
            AssemblyError::Internal(format!("building {category}: {e}"))
        }
    };

    let mut doc = match existing {
        Some(bytes) => ArtifactDocument::load(&bytes).map_err(corrupt)?,
        None => ArtifactDocument::new(),
    };
    let prior = doc.page_count();

    for (image, placement) in images {
        doc.append_image_page(image, placement, page.width, page.height)
            .map_err(corrupt)?;
    }
    for source in documents {
        doc.append_document(source).map_err(corrupt)?;
    }

    let total_pages = doc.page_count();
    let bytes = doc.to_bytes().map_err(|e| AssemblyError::SerializeFailed {
        category,
        detail: e.to_string(),
    })?;
    Ok(Merged {
        bytes,
        total_pages,
        pages_added: total_pages - prior,
    })
}

/// Process one submission with a one-off [`Assembler`].
///
/// Writers are still serialised per artifact with every other assembler in
/// the process.
pub async fn assemble(
    submission: &Submission,
    config: &AssemblyConfig,
) -> Result<SubmissionReport, AssemblyError> {
    Assembler::new(config.clone()).assemble(submission).await
}

/// Synchronous wrapper around [`assemble`].
///
/// Creates a temporary tokio runtime internally.
pub fn assemble_sync(
    submission: &Submission,
    config: &AssemblyConfig,
) -> Result<SubmissionReport, AssemblyError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| AssemblyError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(assemble(submission, config))
}
