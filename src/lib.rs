//! PDF object graph surgery
//!
//! Parses a PDF into an id-keyed object store, exposes the catalog and page
//! tree for editing, rewrites content streams (grayscale conversion), strips
//! active content by policy, and writes the result back either as a full
//! rewrite or as an incremental update that keeps the original bytes intact.
//!
//! ```no_run
//! use pdf_surgeon::{Context, Document, SanitizePolicy};
//!
//! # fn main() -> pdf_surgeon::PdfResult<()> {
//! let original = std::fs::read("signed.pdf")?;
//! let mut doc = Document::load_mem(&original)?;
//! doc.remove_annotations(2)?;
//! doc.sanitize(&SanitizePolicy::all(), &Context::default())?;
//! doc.save_incremental(&original, "signed-clean.pdf")?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod content;
pub mod document;
mod error;
pub mod pdf;
pub mod pipeline;
pub mod sanitize;
pub mod writer;

pub use config::{CancellationToken, Config, Context};
pub use content::{ContentOperator, GrayscaleOptions, GrayscaleStats};
pub use document::{Document, DocumentInfo, Page, PageHandle, PageInfo, SharedDocument};
pub use error::{PdfError, PdfResult};
pub use pdf::{Dictionary, Object, ObjectId, Stream};
pub use pipeline::{Pipeline, PipelineOutput, WriteMode};
pub use sanitize::{ActionKind, SanitizePolicy, SanitizeReport};
pub use writer::{write_full, write_incremental};
