use thiserror::Error;

pub type Result<T> = std::result::Result<T, ApiError>;

/// YouTube Data API failure taxonomy.
///
/// `NotFound` and `QuotaExceeded` are expected, policy-relevant outcomes for
/// the engine (invalid video ids and daily quota exhaustion); the remaining
/// variants are surfaced to an operator.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("resource not found")]
    NotFound,

    #[error("daily api quota exhausted")]
    QuotaExceeded,

    #[error("http error: {0}")]
    Http(String),

    #[error("unexpected response format: {0}")]
    ResponseFormat(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        Self::ResponseFormat(e.to_string())
    }
}
