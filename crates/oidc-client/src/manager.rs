//! User manager: the redirect flows on top of discovery, PKCE and the store

use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};
use url::Url;

use crate::discovery::{self, ProviderMetadata};
use crate::error::{Error, Result};
use crate::navigator::Navigator;
use crate::pkce;
use crate::store::{PendingSignin, User, UserStore};
use crate::token;

/// Client registration and flow parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserManagerSettings {
    pub authority: String,
    pub client_id: String,
    pub redirect_uri: Url,
    /// Where the provider sends the user after sign-out. Omitted from the
    /// end-session request when unset.
    pub post_logout_redirect_uri: Option<Url>,
    pub scope: String,
    pub automatic_silent_renew: bool,
}

pub struct UserManager {
    settings: UserManagerSettings,
    http: reqwest::Client,
    store: Arc<UserStore>,
    navigator: Arc<dyn Navigator>,
    metadata: OnceCell<ProviderMetadata>,
}

impl UserManager {
    pub fn new(
        settings: UserManagerSettings,
        store: Arc<UserStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self {
            settings,
            http: reqwest::Client::new(),
            store,
            navigator,
            metadata: OnceCell::new(),
        }
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn settings(&self) -> &UserManagerSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<UserStore> {
        &self.store
    }

    /// Provider metadata, discovered on first use. A failed discovery is not
    /// cached; the next call tries again.
    pub async fn metadata(&self) -> Result<&ProviderMetadata> {
        self.metadata
            .get_or_try_init(|| discovery::discover(&self.http, &self.settings.authority))
            .await
    }

    /// Start an authorization-code sign-in. Stores the PKCE verifier under a
    /// fresh `state`, then hands the authorization URL to the navigator.
    #[instrument(skip(self), fields(client_id = %self.settings.client_id))]
    pub async fn signin_redirect(&self) -> Result<Url> {
        let metadata = self.metadata().await?;

        let verifier = pkce::generate_verifier();
        let challenge = pkce::compute_challenge(&verifier);
        let state = pkce::generate_state();

        let url = pkce::build_authorization_url(
            &metadata.authorization_endpoint,
            &self.settings.client_id,
            &self.settings.redirect_uri,
            &self.settings.scope,
            &state,
            &challenge,
        );

        self.store
            .add_pending(
                state,
                PendingSignin {
                    code_verifier: verifier,
                    created_at: now_secs(),
                },
            )
            .await?;

        info!("redirecting to identity provider for sign-in");
        self.navigator.navigate(&url)?;
        Ok(url)
    }

    /// Complete sign-in from the redirect URL the provider sent back.
    #[instrument(skip_all)]
    pub async fn signin_callback(&self, callback_url: &str) -> Result<User> {
        let url = Url::parse(callback_url)
            .map_err(|e| Error::Callback(format!("not a URL: {e}")))?;
        let params = token::query_map(&url);

        if let Some(error) = params.get("error") {
            let description = params
                .get("error_description")
                .map(String::as_str)
                .unwrap_or("");
            return Err(Error::Callback(format!("{error} {description}").trim_end().to_string()));
        }

        let code = params
            .get("code")
            .ok_or_else(|| Error::Callback("missing code parameter".into()))?;
        let state = params
            .get("state")
            .ok_or_else(|| Error::Callback("missing state parameter".into()))?;

        let now = now_secs();
        let pending = self
            .store
            .take_pending(state, now)
            .await?
            .ok_or_else(|| Error::Callback("no matching sign-in state".into()))?;

        let metadata = self.metadata().await?;
        let response = token::exchange_code(
            &self.http,
            &metadata.token_endpoint,
            &self.settings.client_id,
            &self.settings.redirect_uri,
            code,
            &pending.code_verifier,
        )
        .await?;

        let profile = match response.id_token.as_deref() {
            Some(id_token) => token::decode_claims(id_token)?,
            None => serde_json::Map::new(),
        };

        let user = User::from_token_response(response, now, profile);
        self.store.set_user(user.clone()).await?;
        info!(
            subject = user.profile.get("sub").and_then(|v| v.as_str()).unwrap_or("-"),
            "sign-in completed"
        );
        Ok(user)
    }

    /// Drop the local user and send the user agent to the provider's
    /// end-session endpoint.
    #[instrument(skip(self), fields(client_id = %self.settings.client_id))]
    pub async fn signout_redirect(&self) -> Result<Url> {
        let metadata = self.metadata().await?;
        let endpoint = metadata.end_session_endpoint.clone().ok_or_else(|| {
            Error::Discovery("provider does not advertise an end_session_endpoint".into())
        })?;

        let removed = self.store.remove_user().await?;

        let mut url = endpoint;
        {
            let mut query = url.query_pairs_mut();
            if let Some(id_token) = removed.as_ref().and_then(|u| u.id_token.as_deref()) {
                query.append_pair("id_token_hint", id_token);
            }
            query.append_pair("client_id", &self.settings.client_id);
            if let Some(post_logout) = &self.settings.post_logout_redirect_uri {
                query.append_pair("post_logout_redirect_uri", post_logout.as_str());
            }
        }

        info!("redirecting to identity provider for sign-out");
        self.navigator.navigate(&url)?;
        Ok(url)
    }

    pub async fn get_user(&self) -> Option<User> {
        self.store.user().await
    }

    pub async fn remove_user(&self) -> Result<Option<User>> {
        self.store.remove_user().await
    }

    /// Remove the user only if it still holds `refresh_token`.
    pub async fn remove_user_if(&self, refresh_token: &str) -> Result<Option<User>> {
        self.store.remove_user_if(refresh_token).await
    }

    /// Exchange the stored refresh token for a new access token.
    ///
    /// Returns `Ok(None)` when there is no user, no refresh token, or the
    /// stored user was removed or replaced while the refresh was in flight
    /// (the result is discarded then). A rejected refresh token surfaces as
    /// [`Error::InvalidCredentials`] and leaves the stored user untouched; the
    /// caller decides whether to drop it.
    pub async fn renew(&self) -> Result<Option<User>> {
        let Some(mut user) = self.store.user().await else {
            return Ok(None);
        };
        let Some(refresh) = user.refresh_token.clone() else {
            debug!("user has no refresh token, cannot renew");
            return Ok(None);
        };

        let metadata = self.metadata().await?;
        let response = token::refresh_token(
            &self.http,
            &metadata.token_endpoint,
            &self.settings.client_id,
            &refresh,
        )
        .await?;

        let now = now_secs();
        if let Some(id_token) = response.id_token.as_deref() {
            user.profile = token::decode_claims(id_token)?;
        }
        user.apply_refresh(response, now);
        if !self.store.replace_user_if(&refresh, user.clone()).await? {
            return Ok(None);
        }
        debug!(expires_at = ?user.expires_at, "access token renewed");
        Ok(Some(user))
    }
}

pub(crate) fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
