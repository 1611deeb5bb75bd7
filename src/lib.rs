//! # doc-assembly
//!
//! Merge client uploads (phone photos, scans, existing PDFs) into one
//! canonical, append-only PDF per client and document category.
//!
//! ## Why this crate?
//!
//! Clients send whatever their phone or scanner produces: HEIC-converted
//! JPEGs, transparent PNGs, TIFF scans, statements already in PDF. Reviewers
//! want one document per category that only ever grows. This crate brings
//! every raster image to a single encoding, lays it out on a standard page,
//! copies PDF pages across without re-rendering them, and replaces the stored
//! artifact atomically. Consumed uploads are removed afterwards, or
//! quarantined when the filesystem will not let go of them.
//!
//! ## Pipeline Overview
//!
//! ```text
//! Submission (owner, client, files)
//!  │
//!  ├─ partition by declared category ──┬── category A ──┐
//!  │                                   └── category B ──┤  (concurrent)
//!  │                                                    ▼
//!  ├─ 1. Classify   magic bytes → image / PDF / unsupported
//!  ├─ 2. Normalize  image → baseline JPEG (spawn_blocking)
//!  ├─ 3. Composite  centered placement, shrink above 90% of the page
//!  ├─ 4. Merge      existing pages → image pages → PDF pages (lock held)
//!  ├─ 5. Store      <root>/<owner>/<client>/<category>/<category>.pdf
//!  └─ 6. Cleanup    delete sources, quarantine failures, purge old quarantine
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use doc_assembly::{AssemblyConfig, Assembler, Category, SourceFile, Submission};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AssemblyConfig::builder().upload_root("/srv/uploads").build()?;
//!     let assembler = Assembler::new(config);
//!
//!     let submission = Submission::new("maria", "1042")
//!         .with_file(SourceFile::new(
//!             "/srv/intake/abc123",
//!             Category::BankStatement,
//!             "image/jpeg",
//!             "extrato-marco.jpg",
//!         ));
//!
//!     let report = assembler.assemble(&submission).await?;
//!     for (category, path) in report.artifact_paths() {
//!         println!("{category}: {path}");
//!     }
//!     for failed in report.failed() {
//!         eprintln!("{}: {}", failed.category, failed.error.as_deref().unwrap_or("?"));
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Concurrency
//!
//! Two submissions for the same `(owner, client, category)` are serialised on
//! a per-artifact lock, so neither batch's pages can be lost to a
//! last-writer-wins race. Every [`Assembler`] built with [`Assembler::new`]
//! shares one process-wide lock registry.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docasm` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! doc-assembly = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod assemble;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod submission;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use assemble::{assemble, assemble_sync, Assembler};
pub use config::{AssemblyConfig, AssemblyConfigBuilder, PageSize};
pub use error::{AssemblyError, SourceError};
pub use output::{CategoryReport, CleanupOutcome, CleanupRecord, Stage, SubmissionReport};
pub use progress::{AssemblyProgressCallback, NoopProgressCallback, ProgressCallback};
pub use submission::{ArtifactKey, Category, SourceFile, Submission};
