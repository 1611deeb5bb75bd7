//! Result types reported back to the caller of [`crate::assemble`].
//!
//! Every category gets a [`CategoryReport`], success or not, so the caller
//! can update the document fields of categories that succeeded and surface a
//! category-scoped message for those that failed.

use crate::error::{AssemblyError, SourceError};
use crate::submission::Category;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Pipeline position of one category batch.
///
/// ```text
/// Received → Classified → Normalized → Composited → Merged → Stored → CleanedUp | Quarantined
///     └──────────┴────────────┴─────────────┴──────────┴────────┴──→ Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Received,
    Classified,
    Normalized,
    Composited,
    Merged,
    Stored,
    /// Stored, and every file of the batch was deleted.
    CleanedUp,
    /// Stored, and at least one file of the batch ended up in quarantine.
    Quarantined,
    Failed,
}

/// What happened to one file during cleanup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CleanupOutcome {
    Deleted,
    Quarantined { to: PathBuf },
    /// Neither deletion nor the quarantine move worked; the file is still at
    /// its original path.
    Stranded { detail: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupRecord {
    pub path: PathBuf,
    #[serde(flatten)]
    pub outcome: CleanupOutcome,
}

/// Outcome for one category of a submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryReport {
    pub category: Category,

    /// Final stage. [`Stage::Failed`] when the artifact was not rebuilt.
    pub stage: Stage,

    /// Last stage completed before a failure.
    pub failed_after: Option<Stage>,

    /// Human-readable failure reason, if any.
    pub error: Option<String>,

    /// Path string for the record-persistence layer. `None` on failure.
    pub artifact_path: Option<String>,

    /// Page count of the stored artifact.
    pub total_pages: usize,

    /// Pages contributed by this submission.
    pub pages_added: usize,

    /// Files skipped because they could not be used.
    pub rejected: Vec<SourceError>,

    pub cleanup: Vec<CleanupRecord>,

    pub duration_ms: u64,
}

impl CategoryReport {
    pub(crate) fn new(category: Category) -> Self {
        Self {
            category,
            stage: Stage::Received,
            failed_after: None,
            error: None,
            artifact_path: None,
            total_pages: 0,
            pages_added: 0,
            rejected: Vec::new(),
            cleanup: Vec::new(),
            duration_ms: 0,
        }
    }

    pub(crate) fn fail(&mut self, err: &AssemblyError) {
        self.failed_after = Some(self.stage);
        self.stage = Stage::Failed;
        self.error = Some(err.to_string());
        self.artifact_path = None;
    }

    pub fn succeeded(&self) -> bool {
        self.stage != Stage::Failed
    }
}

/// Outcome for a whole submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionReport {
    pub owner: String,
    pub client_id: String,
    /// One entry per non-empty category, ordered by category.
    pub categories: Vec<CategoryReport>,
    pub duration_ms: u64,
}

impl SubmissionReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &CategoryReport> {
        self.categories.iter().filter(|c| c.succeeded())
    }

    pub fn failed(&self) -> impl Iterator<Item = &CategoryReport> {
        self.categories.iter().filter(|c| !c.succeeded())
    }

    pub fn category(&self, category: Category) -> Option<&CategoryReport> {
        self.categories.iter().find(|c| c.category == category)
    }

    /// `(category, artifact path)` for every category that was rebuilt.
    pub fn artifact_paths(&self) -> Vec<(Category, String)> {
        self.categories
            .iter()
            .filter_map(|c| c.artifact_path.clone().map(|p| (c.category, p)))
            .collect()
    }

    /// Treat any failed category as an error.
    pub fn into_result(self) -> Result<Self, AssemblyError> {
        let total = self.categories.len();
        let failed = self.failed().count();
        if failed > 0 {
            return Err(AssemblyError::PartialFailure {
                succeeded: total - failed,
                failed,
                total,
            });
        }
        Ok(self)
    }
}
