use thiserror::Error;

/// A news source could not be read. The source is skipped for this run.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("source returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Parse(err.to_string())
    }
}

/// The rewrite service could not produce styled content for one article.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("no rewrite API key configured")]
    MissingCredentials,

    #[error("network error: {0}")]
    Network(String),

    #[error("rewrite API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("unusable rewrite output: {0}")]
    Content(String),
}

impl From<reqwest::Error> for TransformError {
    fn from(err: reqwest::Error) -> Self {
        TransformError::Network(err.to_string())
    }
}

/// The social page refused or failed to accept a post.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("post rejected (status {status}): {message}")]
    Rejected { status: u16, message: String },
}

impl From<reqwest::Error> for PublishError {
    fn from(err: reqwest::Error) -> Self {
        PublishError::Transient(err.to_string())
    }
}

/// A published article could not be recorded durably. The external post
/// exists without a ledger entry, so this needs operator attention.
#[derive(Debug, Error)]
#[error("failed to record article {id} in the ledger: {message}")]
pub struct LedgerWriteError {
    pub id: String,
    pub message: String,
}

/// Another pipeline run holds the exclusive run slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("a pipeline run is already in progress")]
pub struct AlreadyRunning;
