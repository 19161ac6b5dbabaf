//! OIDC session lifecycle for an application front end
//!
//! Owns the single identity-provider client of the process and gates every
//! outbound API call on a bearer credential. The identity protocol itself is
//! delegated to an [`IdentityClient`] implementation; this crate decides when
//! that client is built and how its tokens reach the network.
//!
//! Flow:
//! 1. First call to `SessionProvider::session_client()` fetches
//!    [`RemoteAuthConfig`] from `v1/config` and builds the client through the
//!    injected [`IdentityClientFactory`]. Concurrent callers share that one
//!    initialization.
//! 2. `login()` / `logout()` hand off to the client's redirect flows.
//! 3. `AuthenticatedFetch::fetch()` re-reads the current user on every call and
//!    refuses to touch the network without an access token.

pub mod constants;
pub mod error;
pub mod fetch;
pub mod identity;
pub mod provider;
pub mod transport;
pub mod types;

#[cfg(test)]
mod testing;

pub use constants::*;
pub use error::{Error, Result};
pub use fetch::{AuthenticatedFetch, RequestOptions};
pub use identity::{IdentityClient, IdentityClientFactory, Origin};
pub use provider::{FailurePolicy, SessionClient, SessionProvider, SessionState};
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
pub use types::{ClientSettings, CurrentUser, RemoteAuthConfig};
