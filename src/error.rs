//! Error taxonomy shared by the job lifecycle components.

use std::time::Duration;

use thiserror::Error;

use crate::recognition::RecognitionError;
use crate::storage::StorageError;

/// Input or configuration rejected before any remote call is made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Annotation table is empty")]
    EmptyTable,

    #[error("Annotation table could not be read: {0}")]
    Unreadable(String),

    #[error("Annotation table is missing column '{0}'")]
    MissingColumn(String),

    #[error("Row {row}: missing field '{field}'")]
    MissingField { row: usize, field: &'static str },

    #[error("Row {row}: '{field}' must be a non-negative integer, got '{value}'")]
    InvalidNumber {
        row: usize,
        field: &'static str,
        value: String,
    },

    #[error("Row {row}: begin offset {begin} must be less than end offset {end}")]
    InvalidSpan { row: usize, begin: u64, end: u64 },

    #[error("Row {row}: {message}")]
    MalformedRow { row: usize, message: String },

    #[error("Row {row}: document '{document}' is not in the uploaded document set")]
    UnknownDocument { row: usize, document: String },

    #[error("Row {row}: line {line} is past the end of '{document}' ({lines} lines)")]
    LineOutOfRange {
        row: usize,
        document: String,
        line: u64,
        lines: usize,
    },

    #[error("Row {row}: end offset {end} exceeds length {length} of line {line} in '{document}'")]
    OffsetOutOfRange {
        row: usize,
        document: String,
        line: u64,
        end: u64,
        length: usize,
    },

    #[error("Label set is empty")]
    EmptyLabelSet,

    #[error("Invalid label '{label}': {reason}")]
    InvalidLabel { label: String, reason: &'static str },

    #[error("Invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("Invalid location '{0}'")]
    InvalidLocation(String),

    #[error("{0}")]
    InvalidInput(String),
}

/// Errors surfaced by the job lifecycle components.
///
/// A remote job reaching `Failed` is not an error: pollers report it as
/// `PollOutcome::RemoteJobFailed`.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The service rejected a submission. `message` is the service's
    /// diagnostic, unmodified.
    #[error("Submission rejected ({code}): {message}")]
    Submission { code: String, message: String },

    #[error("Recognition service error: {0}")]
    Remote(#[from] RecognitionError),

    #[error("Timed out after {elapsed:?} waiting for {job}")]
    Timeout { job: String, elapsed: Duration },

    #[error("Polling cancelled for {0}")]
    Cancelled(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Job ledger error: {0}")]
    Ledger(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl JobError {
    /// Map an error returned by a submission call.
    ///
    /// Rejections keep the remote diagnostic verbatim; transport failures
    /// stay `Remote`.
    pub fn from_submission(err: RecognitionError) -> Self {
        match err {
            RecognitionError::Rejected { kind, message } => JobError::Submission {
                code: kind,
                message,
            },
            RecognitionError::Api { status, body } => JobError::Submission {
                code: format!("HTTP {}", status),
                message: body,
            },
            other => JobError::Remote(other),
        }
    }
}
