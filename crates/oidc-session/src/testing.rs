//! Test doubles for the transport and identity capabilities

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::{StatusCode, Url};

use crate::constants::CONFIG_PATH;
use crate::error::{Error, Result};
use crate::identity::{IdentityClient, IdentityClientFactory};
use crate::provider::{FailurePolicy, SessionProvider};
use crate::transport::{HttpRequest, HttpResponse, Transport};
use crate::types::{ClientSettings, CurrentUser};

pub(crate) const CONFIG_JSON: &str =
    r#"{"oidc_authority":"https://idp.example","oidc_client_id":"abc"}"#;

/// Routes requests by exact URL and records every request it sees.
/// Unknown URLs fail like an unreachable host.
pub(crate) struct FakeTransport {
    routes: Mutex<HashMap<String, (u16, String)>>,
    requests: Mutex<Vec<HttpRequest>>,
    delay: Duration,
}

impl FakeTransport {
    pub(crate) fn new() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    pub(crate) fn config_ok() -> Self {
        Self::new().route(CONFIG_PATH, 200, CONFIG_JSON)
    }

    pub(crate) fn route(self, url: &str, status: u16, body: &str) -> Self {
        self.set_route(url, status, body);
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn set_route(&self, url: &str, status: u16, body: &str) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), (status, body.to_string()));
    }

    pub(crate) fn calls_to(&self, url: &str) -> usize {
        self.requests_to(url).len()
    }

    pub(crate) fn requests_to(&self, url: &str) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url == url)
            .cloned()
            .collect()
    }
}

impl Transport for FakeTransport {
    fn send(
        &self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse>> + Send + '_>> {
        Box::pin(async move {
            let route = self.routes.lock().unwrap().get(&request.url).cloned();
            let url = request.url.clone();
            self.requests.lock().unwrap().push(request);

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            match route {
                Some((status, body)) => Ok(HttpResponse::new(
                    StatusCode::from_u16(status).unwrap(),
                    body,
                )),
                None => Err(Error::Transport(format!("connection refused: {url}"))),
            }
        })
    }
}

/// Identity client holding an in-memory user and counting redirects.
pub(crate) struct FakeIdentity {
    user: Mutex<Option<CurrentUser>>,
    pub(crate) signins: AtomicUsize,
    pub(crate) signouts: AtomicUsize,
}

impl FakeIdentity {
    pub(crate) fn signed_out() -> Self {
        Self {
            user: Mutex::new(None),
            signins: AtomicUsize::new(0),
            signouts: AtomicUsize::new(0),
        }
    }

    pub(crate) fn signed_in(user: CurrentUser) -> Self {
        let identity = Self::signed_out();
        identity.set_user(Some(user));
        identity
    }

    pub(crate) fn set_user(&self, user: Option<CurrentUser>) {
        *self.user.lock().unwrap() = user;
    }
}

impl IdentityClient for FakeIdentity {
    fn signin_redirect(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        self.signins.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }

    fn signout_redirect(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        self.signouts.fetch_add(1, Ordering::SeqCst);
        self.set_user(None);
        Box::pin(async { Ok(()) })
    }

    fn get_user(&self) -> Pin<Box<dyn Future<Output = Result<Option<CurrentUser>>> + Send + '_>> {
        let user = self.user.lock().unwrap().clone();
        Box::pin(async move { Ok(user) })
    }

    fn signin_callback<'a>(
        &'a self,
        _callback_url: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<CurrentUser>> + Send + 'a>> {
        let user = CurrentUser::new("from-callback");
        self.set_user(Some(user.clone()));
        Box::pin(async move { Ok(user) })
    }
}

pub(crate) fn counting_factory(
    identity: Arc<FakeIdentity>,
    builds: Arc<AtomicUsize>,
) -> Arc<dyn IdentityClientFactory> {
    let factory = move |_settings: &ClientSettings| -> Result<Arc<dyn IdentityClient>> {
        builds.fetch_add(1, Ordering::SeqCst);
        let client: Arc<dyn IdentityClient> = identity.clone();
        Ok(client)
    };
    Arc::new(factory)
}

pub(crate) struct Harness {
    pub(crate) transport: Arc<FakeTransport>,
    pub(crate) identity: Arc<FakeIdentity>,
    pub(crate) builds: Arc<AtomicUsize>,
    pub(crate) provider: Arc<SessionProvider>,
}

pub(crate) fn harness(transport: FakeTransport, identity: FakeIdentity) -> Harness {
    harness_with(transport, identity, FailurePolicy::Memoize)
}

pub(crate) fn harness_with(
    transport: FakeTransport,
    identity: FakeIdentity,
    policy: FailurePolicy,
) -> Harness {
    let transport = Arc::new(transport);
    let identity = Arc::new(identity);
    let builds = Arc::new(AtomicUsize::new(0));
    let origin: Url = "https://app.example/".parse().unwrap();

    let provider = SessionProvider::new(
        transport.clone(),
        Arc::new(origin),
        counting_factory(identity.clone(), builds.clone()),
    )
    .with_failure_policy(policy);

    Harness {
        transport,
        identity,
        builds,
        provider: Arc::new(provider),
    }
}
