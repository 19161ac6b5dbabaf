//! Error types for OIDC client operations

/// Errors from OIDC client operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("discovery failed: {0}")]
    Discovery(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("invalid sign-in callback: {0}")]
    Callback(String),

    #[error("user store parse error: {0}")]
    StoreParse(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("navigation failed: {0}")]
    Navigation(String),
}

/// Result alias for OIDC client operations.
pub type Result<T> = std::result::Result<T, Error>;
