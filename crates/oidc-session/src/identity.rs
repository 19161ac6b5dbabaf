//! Capability interfaces for the identity-provider client
//!
//! The OIDC protocol (authorization code exchange, token refresh) lives behind
//! [`IdentityClient`]. This crate never looks past that contract: it builds one
//! client via [`IdentityClientFactory`] and forwards session actions to it.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use reqwest::Url;

use crate::error::Result;
use crate::types::{ClientSettings, CurrentUser};

/// A configured OIDC client.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn IdentityClient>`).
pub trait IdentityClient: Send + Sync {
    /// Start the redirect-based sign-in flow. Navigates away from the
    /// current page.
    fn signin_redirect(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Start the redirect-based sign-out flow. Navigates away from the
    /// current page.
    fn signout_redirect(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// The currently stored user, or `None` if never signed in or the
    /// session lapsed past renewal.
    fn get_user(&self) -> Pin<Box<dyn Future<Output = Result<Option<CurrentUser>>> + Send + '_>>;

    /// Complete sign-in from the URL the identity provider redirected back to.
    fn signin_callback<'a>(
        &'a self,
        callback_url: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<CurrentUser>> + Send + 'a>>;
}

/// Builds the identity client once configuration is known.
pub trait IdentityClientFactory: Send + Sync {
    fn create(&self, settings: &ClientSettings) -> Result<Arc<dyn IdentityClient>>;
}

impl<F> IdentityClientFactory for F
where
    F: Fn(&ClientSettings) -> Result<Arc<dyn IdentityClient>> + Send + Sync,
{
    fn create(&self, settings: &ClientSettings) -> Result<Arc<dyn IdentityClient>> {
        self(settings)
    }
}

/// Source of the application's current origin (scheme, host and base path).
pub trait Origin: Send + Sync {
    fn origin(&self) -> Url;
}

impl Origin for Url {
    fn origin(&self) -> Url {
        self.clone()
    }
}
