//! Error types for session and authenticated-fetch operations

/// Errors surfaced by the session core.
///
/// `Clone` so that one initialization failure can be handed to every caller
/// waiting on the same pending session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("failed to fetch OIDC config: {0}")]
    ConfigFetch(String),

    #[error("not authenticated")]
    NotAuthenticated,

    #[error("HTTP request failed: {0}")]
    Transport(String),

    #[error("identity provider error: {0}")]
    Identity(String),

    #[error("session initialization aborted: {0}")]
    Initialization(String),
}

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;
