//! Errors surfaced by the chain client and its guarded dependents (energy
//! rental, price feed). Shaped after the teacher's `HttpError`: one variant
//! per network/protocol failure mode, plus a breaker-open fast-fail variant.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("middleware error: {0}")]
    MiddlewareError(#[from] reqwest_middleware::Error),

    #[error("server error {status}: {body}")]
    ServerError { status: reqwest::StatusCode, body: String },

    #[error("url parse error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// The circuit breaker is open; callers should fail fast rather than retry.
    #[error("circuit breaker open, retry after cooldown")]
    CircuitOpen,
}
