use thiserror::Error;

/// Failure taxonomy shared by every docqa crate.
///
/// Empty input and empty search results are not errors; they surface as
/// empty collections.
#[derive(Debug, Error)]
pub enum Error {
    /// Fatal misconfiguration; retrying will not help.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The embedder or the store is unreachable or failed transiently.
    #[error("Upstream unavailable: {0}")]
    Upstream(String),

    /// An external call exceeded its deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation failed: {0}")]
    Operation(String),
}

impl Error {
    /// Whether the whole request may be retried by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Upstream(_) | Error::Timeout(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Operation(format!("json: {e}"))
    }
}

impl From<figment::Error> for Error {
    fn from(e: figment::Error) -> Self {
        Error::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
