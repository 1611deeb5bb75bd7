//! Configuration types for document assembly.
//!
//! All pipeline behaviour is controlled through [`AssemblyConfig`], built via
//! its [`AssemblyConfigBuilder`]. One struct holds every knob so the same
//! config can be shared by concurrent category pipelines and logged as a unit.

use crate::error::AssemblyError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the assembly pipeline.
///
/// Built via [`AssemblyConfig::builder()`] or using
/// [`AssemblyConfig::default()`].
///
/// # Example
/// ```rust
/// use doc_assembly::{AssemblyConfig, PageSize};
///
/// let config = AssemblyConfig::builder()
///     .upload_root("/srv/uploads")
///     .page_size(PageSize::LETTER)
///     .jpeg_quality(85)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct AssemblyConfig {
    /// Root under which `<owner>/<client>/<category>/` directories live.
    /// Default: `uploads`.
    pub upload_root: PathBuf,

    /// Extent of every composited image page, in PDF points. Default: A4.
    pub page_size: PageSize,

    /// Largest fraction of either page extent an image may cover before it is
    /// scaled down. Range: 0.1–1.0. Default: 0.9.
    pub max_fill_ratio: f64,

    /// Quality used when re-encoding non-JPEG images. Range: 1–100. Default: 90.
    ///
    /// JPEG inputs bypass the encoder entirely, so this only affects PNG,
    /// TIFF, WebP and friends.
    pub jpeg_quality: u8,

    /// Name of the per-client quarantine directory. Default: `deletar`.
    pub quarantine_dir: String,

    /// Name of the per-client directory holding normalised temp files.
    /// Default: `.staging`.
    pub staging_dir: String,

    /// How long quarantined files are kept before purge. `None` keeps them
    /// forever. Default: 30 days.
    pub quarantine_retention: Option<Duration>,

    /// Upper bound on converting one file (decode, re-encode, parse). Default: 60s.
    pub file_timeout: Duration,

    /// Upper bound on one category's pipeline up to and including the merge.
    /// Default: 300s.
    pub category_timeout: Duration,

    /// Run the categories of one submission concurrently. Default: true.
    ///
    /// Categories map to disjoint artifact paths, so this is always safe;
    /// turning it off gives strictly sequential logs, which is handy when
    /// debugging.
    pub concurrent_categories: bool,

    /// Optional per-stage event sink.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            upload_root: PathBuf::from("uploads"),
            page_size: PageSize::default(),
            max_fill_ratio: 0.9,
            jpeg_quality: 90,
            quarantine_dir: "deletar".to_string(),
            staging_dir: ".staging".to_string(),
            quarantine_retention: Some(Duration::from_secs(30 * 24 * 60 * 60)),
            file_timeout: Duration::from_secs(60),
            category_timeout: Duration::from_secs(300),
            concurrent_categories: true,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for AssemblyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssemblyConfig")
            .field("upload_root", &self.upload_root)
            .field("page_size", &self.page_size)
            .field("max_fill_ratio", &self.max_fill_ratio)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("quarantine_dir", &self.quarantine_dir)
            .field("staging_dir", &self.staging_dir)
            .field("quarantine_retention", &self.quarantine_retention)
            .field("file_timeout", &self.file_timeout)
            .field("category_timeout", &self.category_timeout)
            .field("concurrent_categories", &self.concurrent_categories)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn AssemblyProgressCallback>"),
            )
            .finish()
    }
}

impl AssemblyConfig {
    /// Create a new builder for `AssemblyConfig`.
    pub fn builder() -> AssemblyConfigBuilder {
        AssemblyConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn file_timeout(&self) -> Duration {
        self.file_timeout
    }

    pub fn category_timeout(&self) -> Duration {
        self.category_timeout
    }
}

/// Builder for [`AssemblyConfig`].
#[derive(Debug)]
pub struct AssemblyConfigBuilder {
    config: AssemblyConfig,
}

impl AssemblyConfigBuilder {
    pub fn upload_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.upload_root = root.into();
        self
    }

    pub fn page_size(mut self, size: PageSize) -> Self {
        self.config.page_size = size;
        self
    }

    pub fn max_fill_ratio(mut self, ratio: f64) -> Self {
        self.config.max_fill_ratio = ratio;
        self
    }

    pub fn jpeg_quality(mut self, q: u8) -> Self {
        self.config.jpeg_quality = q.clamp(1, 100);
        self
    }

    pub fn quarantine_dir(mut self, name: impl Into<String>) -> Self {
        self.config.quarantine_dir = name.into();
        self
    }

    pub fn staging_dir(mut self, name: impl Into<String>) -> Self {
        self.config.staging_dir = name.into();
        self
    }

    pub fn quarantine_retention(mut self, retention: Option<Duration>) -> Self {
        self.config.quarantine_retention = retention;
        self
    }

    pub fn file_timeout(mut self, timeout: Duration) -> Self {
        self.config.file_timeout = timeout;
        self
    }

    /// Whole seconds, at least one.
    pub fn file_timeout_secs(self, secs: u64) -> Self {
        self.file_timeout(Duration::from_secs(secs.max(1)))
    }

    pub fn category_timeout(mut self, timeout: Duration) -> Self {
        self.config.category_timeout = timeout;
        self
    }

    /// Whole seconds, at least one.
    pub fn category_timeout_secs(self, secs: u64) -> Self {
        self.category_timeout(Duration::from_secs(secs.max(1)))
    }

    pub fn concurrent_categories(mut self, v: bool) -> Self {
        self.config.concurrent_categories = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<AssemblyConfig, AssemblyError> {
        let c = &self.config;
        if !(0.1..=1.0).contains(&c.max_fill_ratio) {
            return Err(AssemblyError::InvalidConfig(format!(
                "max fill ratio must be 0.1–1.0, got {}",
                c.max_fill_ratio
            )));
        }
        if !(c.page_size.width > 0.0 && c.page_size.height > 0.0) {
            return Err(AssemblyError::InvalidConfig(format!(
                "page size must be positive, got {}x{}",
                c.page_size.width, c.page_size.height
            )));
        }
        for (field, name) in [
            ("quarantine", &c.quarantine_dir),
            ("staging", &c.staging_dir),
        ] {
            crate::submission::validate_segment(field, name)
                .map_err(|e| AssemblyError::InvalidConfig(e.to_string()))?;
        }
        if c.file_timeout.is_zero() || c.category_timeout.is_zero() {
            return Err(AssemblyError::InvalidConfig(
                "timeouts must be greater than zero".into(),
            ));
        }
        if c.quarantine_dir == c.staging_dir {
            return Err(AssemblyError::InvalidConfig(
                "quarantine and staging directories must differ".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Page geometry ────────────────────────────────────────────────────────

/// Page extents in PDF points (1/72 inch).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageSize {
    pub width: f64,
    pub height: f64,
}

impl PageSize {
    /// ISO A4 portrait.
    pub const A4: PageSize = PageSize {
        width: 595.28,
        height: 841.89,
    };

    /// US Letter portrait.
    pub const LETTER: PageSize = PageSize {
        width: 612.0,
        height: 792.0,
    };

    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

impl Default for PageSize {
    fn default() -> Self {
        PageSize::A4
    }
}
