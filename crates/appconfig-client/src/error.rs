//! Store error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Store unauthorized")]
    Unauthorized,

    #[error("Store returned error: {status} - {message}")]
    Upstream { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}
