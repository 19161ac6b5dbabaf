//! User and pending sign-in storage
//!
//! Holds the signed-in user and the PKCE verifiers of sign-ins still waiting
//! for their callback. Either purely in memory, or backed by a JSON file so a
//! CLI session survives between invocations. File writes use atomic temp-file
//! + rename; a tokio Mutex serializes writers (callback, renewal, sign-out).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::token::TokenResponse;

/// Pending sign-ins older than this are dropped.
const PENDING_TTL_SECS: u64 = 600;

/// The signed-in user and its tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub access_token: String,
    pub token_type: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    /// Access token expiry as unix seconds
    #[serde(default)]
    pub expires_at: Option<u64>,
    /// Claims decoded from the ID token
    #[serde(default)]
    pub profile: serde_json::Map<String, serde_json::Value>,
}

impl User {
    /// Build a user from a token response received at `now` (unix seconds).
    pub fn from_token_response(
        token: TokenResponse,
        now: u64,
        profile: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            access_token: token.access_token,
            token_type: token.token_type,
            refresh_token: token.refresh_token,
            id_token: token.id_token,
            scope: token.scope,
            expires_at: token.expires_in.map(|secs| now.saturating_add(secs)),
            profile,
        }
    }

    /// Apply a refresh response. Providers may omit the refresh and ID tokens
    /// on refresh; the previous values are kept in that case.
    pub fn apply_refresh(&mut self, token: TokenResponse, now: u64) {
        self.access_token = token.access_token;
        self.token_type = token.token_type;
        self.expires_at = token.expires_in.map(|secs| now.saturating_add(secs));
        if token.refresh_token.is_some() {
            self.refresh_token = token.refresh_token;
        }
        if token.id_token.is_some() {
            self.id_token = token.id_token;
        }
        if token.scope.is_some() {
            self.scope = token.scope;
        }
    }

    /// Whether the access token expires within `threshold_secs` of `now`.
    /// Tokens without an expiry never need renewal.
    pub fn expires_within(&self, threshold_secs: u64, now: u64) -> bool {
        self.expires_at
            .is_some_and(|at| at <= now.saturating_add(threshold_secs))
    }
}

/// A sign-in redirect that has not come back yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingSignin {
    pub code_verifier: String,
    pub created_at: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreState {
    #[serde(default)]
    user: Option<User>,
    #[serde(default)]
    pending: HashMap<String, PendingSignin>,
}

pub struct UserStore {
    path: Option<PathBuf>,
    state: Mutex<StoreState>,
}

impl UserStore {
    /// A store that lives only as long as the process.
    pub fn memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(StoreState::default()),
        }
    }

    /// Load the store from `path`, creating an empty file on cold start.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading user store: {e}")))?;
            let state: StoreState = serde_json::from_str(&contents)
                .map_err(|e| Error::StoreParse(format!("parsing user store: {e}")))?;
            info!(
                path = %path.display(),
                signed_in = state.user.is_some(),
                "loaded user store"
            );
            state
        } else {
            info!(path = %path.display(), "user store not found, starting signed out");
            let state = StoreState::default();
            write_atomic(&path, &state).await?;
            state
        };

        Ok(Self {
            path: Some(path),
            state: Mutex::new(state),
        })
    }

    pub async fn user(&self) -> Option<User> {
        let state = self.state.lock().await;
        state.user.clone()
    }

    pub async fn set_user(&self, user: User) -> Result<()> {
        let mut state = self.state.lock().await;
        state.user = Some(user);
        debug!("stored user");
        self.persist(&state).await
    }

    /// Remove the user. Returns the removed user if there was one.
    pub async fn remove_user(&self) -> Result<Option<User>> {
        let mut state = self.state.lock().await;
        let removed = state.user.take();
        if removed.is_some() {
            debug!("removed user");
            self.persist(&state).await?;
        }
        Ok(removed)
    }

    /// Replace the stored user only if it still holds `refresh_token`.
    ///
    /// A renewal started from that token must not resurrect a user removed by
    /// sign-out, nor overwrite a user stored by a newer sign-in. Returns
    /// whether the replacement happened.
    pub async fn replace_user_if(&self, refresh_token: &str, user: User) -> Result<bool> {
        let mut state = self.state.lock().await;
        if !holds_refresh_token(&state, refresh_token) {
            debug!("stored user changed during renewal, discarding result");
            return Ok(false);
        }
        state.user = Some(user);
        self.persist(&state).await?;
        Ok(true)
    }

    /// Remove the stored user only if it still holds `refresh_token`.
    pub async fn remove_user_if(&self, refresh_token: &str) -> Result<Option<User>> {
        let mut state = self.state.lock().await;
        if !holds_refresh_token(&state, refresh_token) {
            return Ok(None);
        }
        let removed = state.user.take();
        debug!("removed user");
        self.persist(&state).await?;
        Ok(removed)
    }

    /// Remember the verifier for `state` until its callback arrives.
    pub async fn add_pending(&self, state_param: String, pending: PendingSignin) -> Result<()> {
        let mut state = self.state.lock().await;
        let cutoff = pending.created_at.saturating_sub(PENDING_TTL_SECS);
        state.pending.retain(|_, p| p.created_at >= cutoff);
        state.pending.insert(state_param, pending);
        self.persist(&state).await
    }

    /// Consume the pending sign-in for `state`. A state can be used once.
    pub async fn take_pending(&self, state_param: &str, now: u64) -> Result<Option<PendingSignin>> {
        let mut state = self.state.lock().await;
        let taken = state
            .pending
            .remove(state_param)
            .filter(|p| p.created_at.saturating_add(PENDING_TTL_SECS) >= now);
        self.persist(&state).await?;
        Ok(taken)
    }

    async fn persist(&self, state: &StoreState) -> Result<()> {
        match &self.path {
            Some(path) => write_atomic(path, state).await,
            None => Ok(()),
        }
    }
}

fn holds_refresh_token(state: &StoreState, refresh_token: &str) -> bool {
    state
        .user
        .as_ref()
        .and_then(|u| u.refresh_token.as_deref())
        == Some(refresh_token)
}

/// Write the store atomically (temp file + rename) with 0600 permissions,
/// since the file holds bearer and refresh tokens.
async fn write_atomic(path: &Path, state: &StoreState) -> Result<()> {
    let json = serde_json::to_string_pretty(state)
        .map_err(|e| Error::StoreParse(format!("serializing user store: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("user store path has no parent directory".into()))?;
    if !dir.as_os_str().is_empty() {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| Error::Io(format!("creating user store directory: {e}")))?;
    }

    let tmp_path = dir.join(format!(".user-store.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp user store: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting user store permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp user store: {e}")))?;

    debug!(path = %path.display(), "persisted user store");
    Ok(())
}
