//! Bearer-authenticated fetch
//!
//! Drop-in for a plain HTTP call: same path and options, but the request only
//! leaves the process if the session holds an access token, and it always
//! carries that token. Header merge order:
//! 1. `Content-Type: application/json`
//! 2. caller headers (may replace the default content type)
//! 3. `Authorization: Bearer <token>` (always wins)

use std::sync::Arc;

use bytes::Bytes;
use reqwest::Method;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::error::{Error, Result};
use crate::provider::SessionProvider;
use crate::transport::{HttpRequest, HttpResponse, Transport};
use crate::types::CurrentUser;

/// Caller-supplied request options. Defaults to a bodiless GET.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Add a header, replacing any earlier value with the same name.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the JSON request body.
    pub fn with_json<T: Serialize>(self, value: &T) -> serde_json::Result<Self> {
        let body = serde_json::to_vec(value)?;
        Ok(self.with_body(body))
    }
}

/// Issues requests that always carry the session's bearer token.
pub struct AuthenticatedFetch {
    sessions: Arc<SessionProvider>,
    transport: Arc<dyn Transport>,
}

impl AuthenticatedFetch {
    pub fn new(sessions: Arc<SessionProvider>, transport: Arc<dyn Transport>) -> Self {
        Self {
            sessions,
            transport,
        }
    }

    /// Send `options` to `path` with the current access token.
    ///
    /// No retries. A non-2xx response is returned as-is; only transport
    /// failures become errors.
    ///
    /// # Errors
    ///
    /// - [`Error::NotAuthenticated`] if there is no user, or the access token
    ///   is empty or cannot be carried in a header. No request is sent.
    /// - Any session initialization error (e.g. [`Error::ConfigFetch`]).
    ///   No request is sent.
    /// - [`Error::Transport`] if the request itself fails.
    #[instrument(skip_all, fields(path = %path, method = %options.method))]
    pub async fn fetch(&self, path: &str, options: RequestOptions) -> Result<HttpResponse> {
        let user = self
            .sessions
            .current_user()
            .await?
            .filter(CurrentUser::has_access_token)
            .ok_or(Error::NotAuthenticated)?;

        let request = HttpRequest {
            method: options.method,
            url: path.to_string(),
            headers: authorized_headers(options.headers, &user)?,
            body: options.body,
        };

        let response = self.transport.send(request).await?;
        debug!(status = %response.status, "authenticated request completed");
        Ok(response)
    }
}

fn authorized_headers(caller: HeaderMap, user: &CurrentUser) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    // Extend replaces existing entries, so caller headers override the default
    headers.extend(caller);

    let mut bearer = HeaderValue::from_str(&format!("Bearer {}", user.access_token.expose()))
        .map_err(|_| {
            warn!("access token is not a valid header value");
            Error::NotAuthenticated
        })?;
    bearer.set_sensitive(true);
    headers.insert(AUTHORIZATION, bearer);

    Ok(headers)
}
