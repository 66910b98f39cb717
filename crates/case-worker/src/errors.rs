//! Pipeline error types
//!
//! Errors are split by how the worker recovers: extraction and watchlist
//! failures are transient and bounded-retried, mapping failures route the
//! case to recapture, integrity faults park the case for an operator and
//! are never retried.

use thiserror::Error;

/// What went wrong inside one extraction call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionErrorKind {
    /// Rejected credentials or expired key
    Auth,
    /// The service could not read the document format
    UnsupportedFormat,
    /// The overall extraction deadline elapsed
    Timeout,
    /// Connection or HTTP-level failure
    Transport,
}

impl ExtractionErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionErrorKind::Auth => "auth",
            ExtractionErrorKind::UnsupportedFormat => "unsupported_format",
            ExtractionErrorKind::Timeout => "timeout",
            ExtractionErrorKind::Transport => "transport",
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Extraction failed ({}): {message}", kind.as_str())]
    Extraction {
        kind: ExtractionErrorKind,
        message: String,
    },

    #[error("Screening failed: {message}")]
    Screening { message: String },

    #[error("Case {case_id} parked on an integrity fault: {message}")]
    Integrity {
        case_id: uuid::Uuid,
        message: String,
    },

    #[error("Document read failed: {0}")]
    DocumentRead(#[from] std::io::Error),

    #[error("Store error: {0}")]
    Store(#[from] kycflow_common::AppError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
