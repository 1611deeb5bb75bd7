//! Progress-callback trait for per-category assembly events.
//!
//! Inject an [`Arc<dyn AssemblyProgressCallback>`] via
//! [`crate::config::AssemblyConfigBuilder::progress_callback`] to receive
//! events as the coordinator moves each category through its stages.
//!
//! # Example
//!
//! ```rust
//! use doc_assembly::{AssemblyConfig, AssemblyProgressCallback, Category};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct PageCounter {
//!     added: AtomicUsize,
//! }
//!
//! impl AssemblyProgressCallback for PageCounter {
//!     fn on_category_complete(&self, _category: Category, _total: usize, added: usize) {
//!         self.added.fetch_add(added, Ordering::SeqCst);
//!     }
//! }
//!
//! let counter = Arc::new(PageCounter { added: AtomicUsize::new(0) });
//!
//! let config = AssemblyConfig::builder()
//!     .progress_callback(counter as Arc<dyn AssemblyProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::error::SourceError;
use crate::submission::Category;
use std::sync::Arc;

/// Called by the coordinator as it processes each category.
///
/// Categories run concurrently by default, so every method may be called
/// from several tasks at once. All methods have default no-op
/// implementations so callers only override what they care about.
pub trait AssemblyProgressCallback: Send + Sync {
    /// Called once, after the batch has been partitioned.
    ///
    /// # Arguments
    /// * `categories`: number of non-empty categories in the submission
    fn on_submission_start(&self, categories: usize) {
        let _ = categories;
    }

    /// Called when a category pipeline starts.
    fn on_category_start(&self, category: Category, files: usize) {
        let _ = (category, files);
    }

    /// Called for every file that is skipped (and quarantined).
    fn on_file_rejected(&self, category: Category, error: &SourceError) {
        let _ = (category, error);
    }

    /// Called when a category's artifact has been stored.
    ///
    /// # Arguments
    /// * `total_pages`: page count of the stored artifact
    /// * `pages_added`: pages contributed by this submission
    fn on_category_complete(&self, category: Category, total_pages: usize, pages_added: usize) {
        let _ = (category, total_pages, pages_added);
    }

    /// Called when a category fails; its previous artifact is unchanged.
    fn on_category_error(&self, category: Category, error: &str) {
        let _ = (category, error);
    }

    /// Called once after every category has finished.
    fn on_submission_complete(&self, categories: usize, succeeded: usize) {
        let _ = (categories, succeeded);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl AssemblyProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::AssemblyConfig`].
pub type ProgressCallback = Arc<dyn AssemblyProgressCallback>;
