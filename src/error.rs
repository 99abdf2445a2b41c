//! Error types for the processing and delivery pipeline.
//!
//! Four families, matching how each failure is handled:
//!
//! | Error | Handling |
//! |-------|----------|
//! | [`ExtractionError`] | Terminal for the document identity until its bytes change |
//! | [`DeliveryError`] | Transient failures retried with backoff; never permanent |
//! | [`ValidationError`] | Rejected synchronously, no state mutation |
//! | [`StoreError`] | Aborts the operation; multi-entity writes commit atomically or not at all |
//!
//! Errors are logged with identity/user/operation context, never with
//! document content.

use thiserror::Error;

/// Extraction failed for a source document. Recorded as the document's
/// failure reason; every caller sees the same failure until re-upload.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("file is too small ({0} bytes); it may be empty or truncated")]
    FileTooSmall(u64),

    #[error("file is too large ({size} bytes, limit {limit})")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("file does not look like a valid {0} (bad magic bytes)")]
    BadMagic(&'static str),

    #[error("cannot read source file: {0}")]
    Io(#[from] std::io::Error),

    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("EPUB extraction failed: {0}")]
    Epub(String),

    #[error("no extractable text (the document may be image-only)")]
    NoText,
}

/// Segmentation failed. Empty input is an error, not an empty sequence.
#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("cannot segment empty or whitespace-only text")]
    EmptyInput,
}

/// A `request_processing` call failed. `Failed` is returned to every caller
/// for a previously failed identity; the others describe this attempt.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Segmentation(#[from] SegmentError),

    #[error("processing timed out after {0}s")]
    Timeout(u64),

    #[error("processing task aborted: {0}")]
    TaskAborted(String),

    #[error("document previously failed: {reason}")]
    Failed { reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A notifier send failed. `Transient` is the retryable family; `Rejected`
/// means the channel refused the message and retrying the same payload
/// cannot help.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("transient delivery failure: {0}")]
    Transient(String),

    #[error("message rejected by channel: {0}")]
    Rejected(String),
}

/// Bad input from a command or schedule request. Always rejected before any
/// state is touched.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("time of day must be HH:MM with hour 0-23 and minute 0-59 (got '{0}')")]
    BadTimeOfDay(String),

    #[error("unknown timezone '{0}' (expected an IANA name like Europe/Berlin)")]
    UnknownTimezone(String),

    #[error("unknown frequency '{0}' (expected daily, twice_daily, or weekly)")]
    UnknownFrequency(String),

    #[error("no document named '{0}' in the library")]
    UnknownDocument(String),

    #[error("unknown user {0}")]
    UnknownUser(i64),

    #[error("no schedule exists for user {0}")]
    NoSchedule(i64),
}

/// Persistence failure. The store never partially commits: a failed
/// multi-entity mutation leaves every entity unchanged.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Integrity(String),
}
