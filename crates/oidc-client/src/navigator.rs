//! Redirect target for sign-in and sign-out flows

use url::Url;

use crate::error::Result;

/// Moves the user agent to an identity-provider URL.
///
/// In a browser this replaces the current page; a CLI prints or opens it.
pub trait Navigator: Send + Sync {
    fn navigate(&self, url: &Url) -> Result<()>;
}
