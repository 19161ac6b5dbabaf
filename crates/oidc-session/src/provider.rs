//! Memoized session client with single-flight initialization
//!
//! The provider owns one slot:
//! - `Uninitialized` until the first caller arrives
//! - `Pending` while configuration is fetched and the client is built
//! - `Ready` once the client exists (terminal)
//! - `Failed` if initialization failed (terminal under `FailurePolicy::Memoize`)
//!
//! The slot is guarded by a mutex held only for check-and-set. The pending
//! initialization is stored in the slot before the lock is released, so every
//! caller that arrives before it settles awaits the same shared handle. The
//! work itself runs in a spawned task: it completes even if every waiter is
//! dropped.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde::Deserialize;
use tracing::{debug, info};

use crate::constants::CONFIG_PATH;
use crate::error::{Error, Result};
use crate::identity::{IdentityClient, IdentityClientFactory, Origin};
use crate::transport::{HttpRequest, Transport};
use crate::types::{ClientSettings, CurrentUser, RemoteAuthConfig};

/// What happens to later callers after initialization failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Every later call returns the original failure without refetching.
    #[default]
    Memoize,
    /// The next call starts a fresh initialization.
    Retry,
}

/// Observable lifecycle of the session client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Ready,
    Failed,
}

impl SessionState {
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Initializing => "initializing",
            SessionState::Ready => "ready",
            SessionState::Failed => "failed",
        }
    }
}

/// The configured identity client, built exactly once.
pub struct SessionClient {
    settings: ClientSettings,
    identity: Arc<dyn IdentityClient>,
}

impl SessionClient {
    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn identity(&self) -> &dyn IdentityClient {
        self.identity.as_ref()
    }
}

impl fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionClient")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

type InitHandle = Shared<BoxFuture<'static, Result<Arc<SessionClient>>>>;

enum Slot {
    Uninitialized,
    Pending(InitHandle),
    Ready(Arc<SessionClient>),
    Failed(Error),
}

enum Checkout {
    Ready(Arc<SessionClient>),
    Failed(Error),
    Wait(InitHandle),
}

/// Process-wide owner of the session client.
///
/// Share it behind an `Arc`; other components reach the client only through
/// [`SessionProvider::session_client`]. Must be used within a Tokio runtime.
pub struct SessionProvider {
    transport: Arc<dyn Transport>,
    origin: Arc<dyn Origin>,
    factory: Arc<dyn IdentityClientFactory>,
    config_path: String,
    failure_policy: FailurePolicy,
    slot: Arc<Mutex<Slot>>,
}

impl SessionProvider {
    pub fn new(
        transport: Arc<dyn Transport>,
        origin: Arc<dyn Origin>,
        factory: Arc<dyn IdentityClientFactory>,
    ) -> Self {
        Self {
            transport,
            origin,
            factory,
            config_path: CONFIG_PATH.to_string(),
            failure_policy: FailurePolicy::default(),
            slot: Arc::new(Mutex::new(Slot::Uninitialized)),
        }
    }

    /// Override the configuration endpoint (default `v1/config`).
    #[must_use]
    pub fn with_config_path(mut self, path: impl Into<String>) -> Self {
        self.config_path = path.into();
        self
    }

    #[must_use]
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    pub fn state(&self) -> SessionState {
        match &*lock(&self.slot) {
            Slot::Uninitialized => SessionState::Uninitialized,
            Slot::Pending(_) => SessionState::Initializing,
            Slot::Ready(_) => SessionState::Ready,
            Slot::Failed(_) => SessionState::Failed,
        }
    }

    /// Resolve the session client, starting initialization on first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigFetch`] if the configuration endpoint is
    /// unreachable, answers non-2xx, or sends an unreadable body. The same
    /// error is returned to every caller that waited on that initialization.
    pub async fn session_client(&self) -> Result<Arc<SessionClient>> {
        match self.checkout() {
            Checkout::Ready(client) => Ok(client),
            Checkout::Failed(error) => Err(error),
            Checkout::Wait(handle) => handle.await,
        }
    }

    /// Redirect to the identity provider's sign-in page.
    pub async fn login(&self) -> Result<()> {
        let client = self.session_client().await?;
        info!(authority = %client.settings.authority, "starting sign-in redirect");
        client.identity.signin_redirect().await
    }

    /// Redirect to the identity provider's sign-out page.
    pub async fn logout(&self) -> Result<()> {
        let client = self.session_client().await?;
        info!(authority = %client.settings.authority, "starting sign-out redirect");
        client.identity.signout_redirect().await
    }

    /// The signed-in user, re-read from the identity client on every call.
    pub async fn current_user(&self) -> Result<Option<CurrentUser>> {
        let client = self.session_client().await?;
        client.identity.get_user().await
    }

    /// Finish sign-in from the identity provider's callback URL.
    pub async fn complete_login(&self, callback_url: &str) -> Result<CurrentUser> {
        let client = self.session_client().await?;
        let user = client.identity.signin_callback(callback_url).await?;
        info!(sub = user.subject().unwrap_or("<unknown>"), "sign-in completed");
        Ok(user)
    }

    /// Check-and-set on the slot. Never suspends while the lock is held.
    fn checkout(&self) -> Checkout {
        let mut slot = lock(&self.slot);
        match &*slot {
            Slot::Ready(client) => return Checkout::Ready(Arc::clone(client)),
            Slot::Pending(handle) => return Checkout::Wait(handle.clone()),
            Slot::Failed(error) if self.failure_policy == FailurePolicy::Memoize => {
                return Checkout::Failed(error.clone());
            }
            Slot::Uninitialized | Slot::Failed(_) => {}
        }

        debug!(config_path = %self.config_path, "initializing session client");
        let handle = self.spawn_initialization();
        *slot = Slot::Pending(handle.clone());
        Checkout::Wait(handle)
    }

    fn spawn_initialization(&self) -> InitHandle {
        let transport = Arc::clone(&self.transport);
        let origin = Arc::clone(&self.origin);
        let factory = Arc::clone(&self.factory);
        let config_path = self.config_path.clone();
        let slot = Arc::clone(&self.slot);

        let task = tokio::spawn(async move {
            let result = initialize(
                transport.as_ref(),
                origin.as_ref(),
                factory.as_ref(),
                &config_path,
            )
            .await;
            settle(&slot, &result);
            result
        });

        let slot = Arc::clone(&self.slot);
        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    let result = Err(Error::Initialization(e.to_string()));
                    settle(&slot, &result);
                    result
                }
            }
        }
        .boxed()
        .shared()
    }
}

async fn initialize(
    transport: &dyn Transport,
    origin: &dyn Origin,
    factory: &dyn IdentityClientFactory,
    config_path: &str,
) -> Result<Arc<SessionClient>> {
    let config = fetch_remote_config(transport, config_path).await?;
    let settings = ClientSettings::from_remote(&config, &origin.origin())?;
    let identity = factory.create(&settings)?;

    info!(
        authority = %settings.authority,
        client_id = %settings.client_id,
        redirect_uri = %settings.redirect_uri,
        "session client ready"
    );
    Ok(Arc::new(SessionClient { settings, identity }))
}

async fn fetch_remote_config(transport: &dyn Transport, path: &str) -> Result<RemoteAuthConfig> {
    let response = transport
        .send(HttpRequest::get(path))
        .await
        .map_err(|e| Error::ConfigFetch(format!("configuration endpoint unreachable: {e}")))?;

    if !response.is_success() {
        return Err(Error::ConfigFetch(format!(
            "configuration endpoint returned {}",
            response.status
        )));
    }

    response
        .json::<RemoteAuthConfig>()
        .map_err(|e| Error::ConfigFetch(format!("invalid configuration body: {e}")))
}

fn settle(slot: &Mutex<Slot>, result: &Result<Arc<SessionClient>>) {
    let mut slot = lock(slot);
    let state = match result {
        Ok(client) => {
            *slot = Slot::Ready(Arc::clone(client));
            SessionState::Ready
        }
        Err(error) => {
            *slot = Slot::Failed(error.clone());
            SessionState::Failed
        }
    };
    debug!(state = state.label(), "session initialization settled");
}

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}
