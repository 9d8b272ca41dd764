//! Error types for the PDF object graph

use std::io;
use thiserror::Error;

use crate::pdf::ObjectId;

/// Main error type for parsing, editing and writing documents
#[derive(Error, Debug)]
pub enum PdfError {
    /// Structural violation while parsing an object
    #[error("Malformed object at offset {offset}: {message}")]
    MalformedObject {
        offset: usize,
        message: String,
    },

    /// Stream length or filter mismatch
    #[error("Malformed stream{}: {message}", fmt_id(.id))]
    MalformedStream {
        id: Option<ObjectId>,
        message: String,
    },

    /// Nesting guard tripped
    #[error("Structure nested deeper than {limit} levels at offset {offset}")]
    StructureTooDeep {
        offset: usize,
        limit: usize,
    },

    /// The cross-reference chain is cyclic or points outside the file
    #[error("Broken cross-reference chain at offset {offset}: {reason}")]
    BrokenXRefChain {
        offset: usize,
        reason: String,
    },

    /// A page tree or graph cycle was found during traversal
    #[error("Cyclic structure detected at object {0}")]
    CyclicStructure(ObjectId),

    /// A reference has no corresponding object at write time
    #[error("Unresolved reference to object {target} (referenced from {})", fmt_holder(.holder))]
    UnresolvedReference {
        target: ObjectId,
        holder: Option<ObjectId>,
    },

    /// The document is encrypted
    #[error("Unsupported encryption: {0}")]
    UnsupportedEncryption(String),

    /// Object not found in the store or the cross-reference table
    #[error("Object not found: {0}")]
    ObjectNotFound(ObjectId),

    /// Invalid object type
    #[error("Invalid object type: expected {expected}, found {found}")]
    InvalidObjectType {
        expected: &'static str,
        found: &'static str,
    },

    /// Missing required dictionary entry
    #[error("Missing required dictionary entry: {0}")]
    MissingDictionaryEntry(String),

    /// Stream filter that cannot be decoded or encoded here
    #[error("Unsupported filter: {0}")]
    UnsupportedFilter(String),

    /// Compression error
    #[error("Compression error: {0}")]
    Compression(String),

    /// Page number outside the page tree
    #[error("Page {page} out of range (document has {count} pages)")]
    PageOutOfRange {
        page: usize,
        count: usize,
    },

    /// Revision number beyond the updates stored in the file
    #[error("Revision {revision} out of range (file has {count} revisions)")]
    RevisionOutOfRange {
        revision: usize,
        count: usize,
    },

    /// A per-page callback failed; the write was aborted
    #[error("Processing page {page} failed: {source}")]
    PageCallbackFailed {
        page: usize,
        #[source]
        source: Box<PdfError>,
    },

    /// Sanitization could not process some objects
    #[error("Sanitization failed for objects: {}", fmt_ids(.failed))]
    SanitizationFailed {
        failed: Vec<ObjectId>,
    },

    /// Operation aborted through a cancellation token
    #[error("Operation cancelled")]
    Cancelled,

    /// A pass over the document did not complete, so it must not be written
    #[error("Document is incomplete after an interrupted {0} pass")]
    IncompleteDocument(&'static str),

    /// Image decoding or encoding error
    #[error("Image error: {0}")]
    Image(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

/// Result type for PDF operations
pub type PdfResult<T> = Result<T, PdfError>;

fn fmt_id(id: &Option<ObjectId>) -> String {
    match id {
        Some(id) => format!(" in object {}", id),
        None => String::new(),
    }
}

fn fmt_holder(holder: &Option<ObjectId>) -> String {
    match holder {
        Some(id) => id.to_string(),
        None => "trailer".to_string(),
    }
}

fn fmt_ids(ids: &[ObjectId]) -> String {
    ids.iter()
        .map(ObjectId::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl PdfError {
    /// Create a new malformed object error
    pub fn malformed(offset: usize, msg: impl Into<String>) -> Self {
        Self::MalformedObject {
            offset,
            message: msg.into(),
        }
    }

    /// Create a new malformed stream error
    pub fn malformed_stream(id: Option<ObjectId>, msg: impl Into<String>) -> Self {
        Self::MalformedStream {
            id,
            message: msg.into(),
        }
    }

    /// Create a new broken xref chain error
    pub fn broken_xref(offset: usize, reason: impl Into<String>) -> Self {
        Self::BrokenXRefChain {
            offset,
            reason: reason.into(),
        }
    }

    /// Create a new compression error
    pub fn compression(msg: impl std::fmt::Display) -> Self {
        Self::Compression(msg.to_string())
    }

    /// Check if the reader recovers from this error with a fallback scan
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::BrokenXRefChain { .. })
    }

    /// Check if error is related to document structure
    pub fn is_structure_error(&self) -> bool {
        matches!(self,
            Self::MalformedObject { .. } |
            Self::MalformedStream { .. } |
            Self::StructureTooDeep { .. } |
            Self::BrokenXRefChain { .. } |
            Self::CyclicStructure(_) |
            Self::ObjectNotFound(_)
        )
    }

    /// Object id carried by this error, if any
    pub fn object_id(&self) -> Option<ObjectId> {
        match self {
            Self::MalformedStream { id, .. } => *id,
            Self::CyclicStructure(id) | Self::ObjectNotFound(id) => Some(*id),
            Self::UnresolvedReference { target, .. } => Some(*target),
            Self::PageCallbackFailed { source, .. } => source.object_id(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = PdfError::malformed(17, "Invalid header");
        assert!(matches!(err, PdfError::MalformedObject { offset: 17, .. }));

        let err = PdfError::malformed_stream(Some(ObjectId::new(4, 0)), "length exceeds buffer");
        assert!(matches!(err, PdfError::MalformedStream { .. }));

        let err = PdfError::broken_xref(900, "Prev points past end of file");
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_error_categorization() {
        let err = PdfError::CyclicStructure(ObjectId::new(3, 0));
        assert!(err.is_structure_error());
        assert!(!err.is_recoverable());
        assert_eq!(err.object_id(), Some(ObjectId::new(3, 0)));

        let err = PdfError::UnsupportedEncryption("Standard".to_string());
        assert!(!err.is_structure_error());
    }

    #[test]
    fn test_error_display() {
        let err = PdfError::UnresolvedReference {
            target: ObjectId::new(999, 0),
            holder: Some(ObjectId::new(2, 0)),
        };
        assert_eq!(
            err.to_string(),
            "Unresolved reference to object 999 0 R (referenced from 2 0 R)"
        );

        let err = PdfError::MalformedStream {
            id: None,
            message: "missing endstream".to_string(),
        };
        assert_eq!(err.to_string(), "Malformed stream: missing endstream");

        let err = PdfError::SanitizationFailed {
            failed: vec![ObjectId::new(5, 0), ObjectId::new(8, 1)],
        };
        assert_eq!(err.to_string(), "Sanitization failed for objects: 5 0 R, 8 1 R");
    }

    #[test]
    fn test_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let pdf_err: PdfError = io_err.into();
        assert!(matches!(pdf_err, PdfError::IoError(_)));
    }
}
