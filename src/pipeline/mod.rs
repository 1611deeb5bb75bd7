//! Pipeline stages for document assembly.
//!
//! Each submodule implements exactly one step, so each is testable on its own
//! and the coordinator in [`crate::assemble`] stays a thin sequence of calls.
//!
//! ## Data Flow
//!
//! ```text
//! classify ──▶ normalize ──▶ layout ──▶ document ──▶ store ──▶ cleanup
//! (probe)      (→ JPEG)      (place)    (merge)      (write)   (delete/quarantine)
//! ```
//!
//! 1. [`classify`]:  read each upload and decide image / PDF / unsupported
//!    from its bytes, never from the declared mime type alone
//! 2. [`normalize`]: bring every raster image to baseline JPEG; JPEG inputs
//!    are copied, everything else re-encoded
//! 3. [`layout`]:    centered, aspect-preserving placement on the page
//! 4. [`document`]:  load the prior artifact, append image pages, copy PDF
//!    pages verbatim; runs in `spawn_blocking` because parsing and
//!    serialising are CPU-bound
//! 5. [`store`]:     deterministic artifact path, write-then-rename, and the
//!    per-artifact writer locks
//! 6. [`cleanup`]:   delete consumed files, quarantine what cannot be
//!    deleted, purge expired quarantine entries

pub mod classify;
pub mod cleanup;
pub mod document;
pub mod layout;
pub mod normalize;
pub mod store;
