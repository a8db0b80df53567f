use std::sync::Arc;

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the evaluation cache and the signed transport.
///
/// `Error` is `Clone` because a single failed fetch is shared by every caller waiting on it, and
/// each of them receives the same error.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The request was rejected before any cache mutation or I/O.
    #[error(transparent)]
    Validation(ValidationError),

    /// Feature evaluations were requested but no project is configured.
    #[error("feature evaluations are not enabled")]
    NotEnabled,

    /// Evaluations for the listed features were never requested or failed to materialize.
    #[error("evaluations for features [{}] not loaded", .0.join(", "))]
    NotLoaded(Vec<String>),

    /// The endpoint in the client configuration is not a valid URL.
    #[error("invalid endpoint configuration")]
    InvalidEndpoint(#[source] url::ParseError),

    /// Network, signing or HTTP failure. Never cached and never retried.
    #[error(transparent)]
    Transport(TransportError),
}

/// Reasons an evaluation request is considered malformed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ValidationError {
    /// More features than the configured per-request maximum.
    #[error("can only request up to {max} features at a time, got {requested}")]
    TooManyFeatures { max: usize, requested: usize },

    /// A feature name was the empty string.
    #[error("feature names must not be empty")]
    EmptyFeatureName,

    /// A loosely-typed request did not have the expected shape.
    #[error("malformed evaluation request: {0}")]
    Malformed(String),
}

/// Failures of the dispatch layer.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum TransportError {
    /// The request could not be signed.
    #[error("cannot sign request: {0}")]
    Signing(String),

    /// The assembled request URL could not be parsed.
    #[error("invalid request url")]
    InvalidUrl(#[source] url::ParseError),

    /// The server answered with a non-success status.
    #[error("request failed with status {status}")]
    HttpStatus { status: u16, body: String },

    /// Network error.
    // reqwest::Error is not clonable, so we're wrapping it in an Arc.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),

    /// The request body could not be serialized.
    #[error("failed to serialize request body")]
    Serialization(#[source] Arc<serde_json::Error>),

    /// The response body is not a valid evaluation response.
    #[error("failed to parse response body")]
    InvalidResponse(#[source] Arc<serde_json::Error>),

    /// Best-effort delivery could not be queued (no async runtime available).
    #[error("beacon could not be queued for delivery")]
    BeaconNotQueued,
}

impl From<ValidationError> for Error {
    fn from(value: ValidationError) -> Self {
        Error::Validation(value)
    }
}

impl From<TransportError> for Error {
    fn from(value: TransportError) -> Self {
        Error::Transport(value)
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Transport(TransportError::Network(Arc::new(value.without_url())))
    }
}
