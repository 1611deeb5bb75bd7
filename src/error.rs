//! Error types for the doc-assembly library.
//!
//! Two distinct error types reflect two distinct failure scopes:
//!
//! * [`AssemblyError`]: **Category-fatal**: one category's artifact cannot be
//!   rebuilt (corrupt prior artifact, disk fault on store, timeout). The other
//!   categories of the same submission are unaffected; the failure is recorded
//!   in that category's [`crate::output::CategoryReport`].
//!
//! * [`SourceError`]: **Per-file**: a single uploaded file could not be used
//!   (undecodable image, encrypted PDF, unknown format). The file is skipped
//!   and quarantined; the rest of its category is still merged.
//!
//! Cleanup faults are neither: they are recovered locally by moving the file
//! into quarantine and only show up as a [`crate::output::CleanupRecord`].

use crate::submission::Category;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort the pipeline for one category (or a whole submission
/// when the submission itself is malformed).
#[derive(Debug, Error)]
pub enum AssemblyError {
    // ── Submission errors ─────────────────────────────────────────────────
    /// Owner or client identifier is not a single safe path segment.
    #[error("Invalid {field} identifier '{value}': must be a single non-empty path segment")]
    InvalidIdentifier { field: &'static str, value: String },

    // ── Artifact errors ───────────────────────────────────────────────────
    /// The prior artifact exists but cannot be parsed; it is left untouched.
    #[error("Existing artifact '{path}' is corrupt: {detail}\nThe file was left untouched.")]
    CorruptExistingArtifact { path: PathBuf, detail: String },

    /// Could not read the prior artifact from disk.
    #[error("Failed to read existing artifact '{path}': {source}")]
    ArtifactReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not create or write the rebuilt artifact.
    #[error("Failed to store artifact '{path}': {source}")]
    StoreFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The rebuilt document could not be serialised.
    #[error("Failed to serialise document for {category}: {detail}")]
    SerializeFailed { category: Category, detail: String },

    /// Every file in the category was rejected; nothing to merge.
    #[error("All {rejected} file(s) for {category} were rejected; artifact not rebuilt")]
    NoUsableSources { category: Category, rejected: usize },

    /// The category pipeline exceeded its time budget.
    #[error("Pipeline for {category} timed out after {millis}ms")]
    Timeout { category: Category, millis: u64 },

    /// Some categories succeeded but at least one failed.
    ///
    /// Returned by [`crate::output::SubmissionReport::into_result`] when
    /// the caller wants all-or-nothing semantics.
    #[error("{failed}/{total} categories failed during assembly")]
    PartialFailure {
        succeeded: usize,
        failed: usize,
        total: usize,
    },

    /// Could not prepare the staging area for temporary files.
    #[error("Failed to prepare staging directory '{path}': {source}")]
    StagingFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single uploaded file.
///
/// Stored in [`crate::output::CategoryReport::rejected`]. The category
/// continues with the remaining files.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum SourceError {
    /// The file could not be read or decoded.
    #[error("'{name}': unreadable source: {detail}")]
    Unreadable { name: String, detail: String },

    /// Content is neither a raster image nor a PDF.
    #[error("'{name}': unsupported content (declared '{mime_type}')")]
    Unsupported { name: String, mime_type: String },

    /// Password-protected documents are not accepted.
    #[error("'{name}': document is encrypted")]
    Encrypted { name: String },

    /// Per-file conversion exceeded its time budget.
    #[error("'{name}': conversion timed out after {millis}ms")]
    Timeout { name: String, millis: u64 },
}

impl SourceError {
    /// Original upload name of the rejected file.
    pub fn name(&self) -> &str {
        match self {
            SourceError::Unreadable { name, .. }
            | SourceError::Unsupported { name, .. }
            | SourceError::Encrypted { name }
            | SourceError::Timeout { name, .. } => name,
        }
    }
}
