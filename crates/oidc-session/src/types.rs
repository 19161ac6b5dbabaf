//! Session data model
//!
//! `RemoteAuthConfig` is what the server tells us about the identity provider,
//! `ClientSettings` is what we hand to the identity client factory, and
//! `CurrentUser` is the token view the rest of the application gates on.

use common::Secret;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::constants::{CALLBACK_PATH, SCOPES};
use crate::error::{Error, Result};

/// Identity provider coordinates served by the configuration endpoint.
///
/// Wire format: `{"oidc_authority": "...", "oidc_client_id": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAuthConfig {
    #[serde(rename = "oidc_authority")]
    pub issuer_url: String,
    #[serde(rename = "oidc_client_id")]
    pub client_id: String,
}

/// Settings the identity client is constructed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub authority: String,
    pub client_id: String,
    pub redirect_uri: Url,
    pub scopes: Vec<String>,
    pub automatic_silent_renew: bool,
}

impl ClientSettings {
    /// Derive client settings from the remote configuration and the current
    /// origin. The callback target is `<origin>/callback`.
    pub fn from_remote(config: &RemoteAuthConfig, origin: &Url) -> Result<Self> {
        let redirect_uri = origin.join(CALLBACK_PATH).map_err(|e| {
            Error::Initialization(format!("cannot derive redirect URI from {origin}: {e}"))
        })?;

        Ok(Self {
            authority: config.issuer_url.clone(),
            client_id: config.client_id.clone(),
            redirect_uri,
            scopes: SCOPES.iter().map(|s| s.to_string()).collect(),
            automatic_silent_renew: true,
        })
    }

    /// Space-separated scope parameter.
    pub fn scope(&self) -> String {
        self.scopes.join(" ")
    }
}

/// The signed-in user as reported by the identity client.
///
/// Never cached by this crate: callers re-query it so a renewed token is
/// picked up immediately.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub access_token: Secret<String>,
    pub refresh_token: Option<Secret<String>>,
    pub id_token: Option<Secret<String>>,
    pub token_type: String,
    /// Access token expiry as unix seconds
    pub expires_at: Option<u64>,
    /// Profile claims (`sub`, `email`, `name`, ...)
    pub claims: serde_json::Map<String, serde_json::Value>,
}

impl CurrentUser {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: Secret::new(access_token.into()),
            refresh_token: None,
            id_token: None,
            token_type: "Bearer".into(),
            expires_at: None,
            claims: serde_json::Map::new(),
        }
    }

    #[must_use]
    pub fn with_expires_at(mut self, expires_at: u64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    #[must_use]
    pub fn with_claim(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.claims.insert(name.into(), value);
        self
    }

    /// Whether a non-empty access token is present.
    pub fn has_access_token(&self) -> bool {
        !self.access_token.is_empty()
    }

    /// Subject claim, if the identity provider supplied one.
    pub fn subject(&self) -> Option<&str> {
        self.claims.get("sub").and_then(|v| v.as_str())
    }

    pub fn is_expired_at(&self, now_secs: u64) -> bool {
        self.expires_at.is_some_and(|at| at <= now_secs)
    }

    pub fn is_expired(&self) -> bool {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.is_expired_at(now)
    }
}
