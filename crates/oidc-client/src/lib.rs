//! Default OIDC client for the session core
//!
//! A small authorization-code + PKCE client: discovery, sign-in redirect,
//! callback code exchange, sign-out redirect, a user store and background
//! silent renewal with the refresh token. It implements just enough of the
//! protocol for the session core's identity-client contract.
//!
//! Sign-in flow:
//! 1. `UserManager::signin_redirect()` stores a pending `state -> verifier`
//!    and hands the authorization URL to a `Navigator`
//! 2. The provider redirects back to `redirect_uri?code=...&state=...`
//! 3. `UserManager::signin_callback()` exchanges the code and stores the `User`
//! 4. `renew::spawn_silent_renew()` refreshes the access token before expiry

pub mod discovery;
pub mod error;
pub mod manager;
pub mod navigator;
pub mod pkce;
pub mod renew;
pub mod store;
pub mod token;

pub use discovery::ProviderMetadata;
pub use error::{Error, Result};
pub use manager::{UserManager, UserManagerSettings};
pub use navigator::Navigator;
pub use renew::{RenewOutcome, spawn_silent_renew};
pub use store::{User, UserStore};
pub use token::TokenResponse;
