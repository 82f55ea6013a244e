//! Error taxonomy for the synchronisation core.
//!
//! - [`ParseError`]: the document could not be turned into a rubric. Always fatal, never retried.
//! - [`ApiError`]: a remote call failed after the client's retry policy gave up.
//! - [`RenderError`]: a model could not be written back to the tabular schema.
//! - [`SyncError`]: a run aborted before any mutation (invalid options, parse,
//!   client setup or fetch failure), or an export could not be rendered.

use serde::Serialize;
use thiserror::Error;

/// Validation failures raised while parsing a rubric document.
///
/// Row numbers are 1-based and count the header as row 1.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("malformed header: {reason}")]
    MalformedHeader { reason: String },

    #[error("row {row}: required column '{column}' is empty")]
    MissingField { row: usize, column: String },

    #[error("row {row}: column '{column}' must be a non-negative number, got '{value}'")]
    NonNumericPoints {
        row: usize,
        column: String,
        value: String,
    },

    #[error("row {row}: criterion '{name}' is declared more than once")]
    DuplicateCriterion { row: usize, name: String },

    #[error("row {row}: ratings of criterion '{criterion}' must not increase from left to right")]
    NonMonotonicRatings { row: usize, criterion: String },

    #[error("document could not be read: {reason}")]
    Unreadable { row: Option<usize>, reason: String },
}

/// Failures of the remote rubric API, as seen by callers of the client.
///
/// Transient failures are retried inside the client and only surface as
/// [`ApiError::Transient`] once the retry budget is exhausted.
#[derive(Debug, Error, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApiError {
    #[error("transient failure persisted after {attempts} attempts (status {status:?}): {message}")]
    Transient {
        attempts: u32,
        status: Option<u16>,
        message: String,
    },

    #[error("request rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("credential rejected with HTTP {status}")]
    Unauthorized { status: u16 },

    #[error("pagination did not terminate: page token '{cursor}' was returned twice")]
    Incomplete { cursor: String },

    #[error("invalid client configuration: {reason}")]
    Configuration { reason: String },
}

impl ApiError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized { .. })
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to write document: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to finish document: {0}")]
    Finish(String),
}

/// Reasons a synchronisation run stopped before touching the remote rubric.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("document rejected: {0}")]
    Parse(#[from] ParseError),

    #[error("could not set up the Canvas client: {0}")]
    Client(#[source] ApiError),

    #[error("failed to fetch remote rubric: {0}")]
    Fetch(#[source] ApiError),

    #[error("invalid sync options: {reason}")]
    InvalidOptions { reason: String },

    #[error(transparent)]
    Render(#[from] RenderError),
}
