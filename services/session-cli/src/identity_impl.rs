//! IdentityClient backed by the oidc-client UserManager
//!
//! Bridges the session core's capability traits to the default OIDC client:
//! - `OidcIdentityFactory` turns `ClientSettings` into a `UserManager`
//!   (and starts silent renewal when the settings ask for it)
//! - `OidcIdentity` maps `oidc_client::User` to `CurrentUser` and the client's
//!   errors to `Error::Identity`
//! - `TerminalNavigator` prints redirect URLs for the operator to open

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use common::Secret;
use oidc_client::{Navigator, User, UserManager, UserManagerSettings, UserStore};
use oidc_session::{ClientSettings, CurrentUser, Error, IdentityClient, IdentityClientFactory};
use reqwest::Url;
use tracing::{debug, info};

/// Silent renew schedule.
#[derive(Debug, Clone, Copy)]
pub struct RenewSchedule {
    pub interval: Duration,
    pub threshold: Duration,
}

/// Builds an [`OidcIdentity`] per session client.
pub struct OidcIdentityFactory {
    store: Arc<UserStore>,
    navigator: Arc<dyn Navigator>,
    http: reqwest::Client,
    post_logout_redirect_uri: Option<Url>,
    renew: Option<RenewSchedule>,
}

impl OidcIdentityFactory {
    pub fn new(store: Arc<UserStore>, navigator: Arc<dyn Navigator>) -> Self {
        Self {
            store,
            navigator,
            http: reqwest::Client::new(),
            post_logout_redirect_uri: None,
            renew: None,
        }
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn with_post_logout_redirect_uri(mut self, uri: Option<Url>) -> Self {
        self.post_logout_redirect_uri = uri;
        self
    }

    /// Run silent renewal in the background for clients created with
    /// `automatic_silent_renew`.
    pub fn with_silent_renew(mut self, schedule: RenewSchedule) -> Self {
        self.renew = Some(schedule);
        self
    }

    fn build(&self, settings: &ClientSettings) -> OidcIdentity {
        let manager_settings = UserManagerSettings {
            authority: settings.authority.clone(),
            client_id: settings.client_id.clone(),
            redirect_uri: settings.redirect_uri.clone(),
            post_logout_redirect_uri: self.post_logout_redirect_uri.clone(),
            scope: settings.scope(),
            automatic_silent_renew: settings.automatic_silent_renew,
        };

        let manager = Arc::new(
            UserManager::new(manager_settings, self.store.clone(), self.navigator.clone())
                .with_http_client(self.http.clone()),
        );

        let renew_task = match self.renew {
            Some(schedule) if settings.automatic_silent_renew => {
                debug!(
                    interval_secs = schedule.interval.as_secs(),
                    threshold_secs = schedule.threshold.as_secs(),
                    "starting silent renew"
                );
                Some(oidc_client::spawn_silent_renew(
                    manager.clone(),
                    schedule.interval,
                    schedule.threshold,
                ))
            }
            _ => None,
        };

        info!(authority = %settings.authority, client_id = %settings.client_id, "identity client created");
        OidcIdentity {
            manager,
            renew_task,
        }
    }
}

impl IdentityClientFactory for OidcIdentityFactory {
    fn create(&self, settings: &ClientSettings) -> oidc_session::Result<Arc<dyn IdentityClient>> {
        Ok(Arc::new(self.build(settings)))
    }
}

pub struct OidcIdentity {
    manager: Arc<UserManager>,
    renew_task: Option<tokio::task::JoinHandle<()>>,
}

impl Drop for OidcIdentity {
    fn drop(&mut self) {
        if let Some(task) = self.renew_task.take() {
            task.abort();
        }
    }
}

impl IdentityClient for OidcIdentity {
    fn signin_redirect(&self) -> Pin<Box<dyn Future<Output = oidc_session::Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.manager.signin_redirect().await.map_err(identity_error)?;
            Ok(())
        })
    }

    fn signout_redirect(&self) -> Pin<Box<dyn Future<Output = oidc_session::Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.manager.signout_redirect().await.map_err(identity_error)?;
            Ok(())
        })
    }

    fn get_user(
        &self,
    ) -> Pin<Box<dyn Future<Output = oidc_session::Result<Option<CurrentUser>>> + Send + '_>> {
        Box::pin(async move { Ok(self.manager.get_user().await.map(to_current_user)) })
    }

    fn signin_callback<'a>(
        &'a self,
        callback_url: &'a str,
    ) -> Pin<Box<dyn Future<Output = oidc_session::Result<CurrentUser>> + Send + 'a>> {
        Box::pin(async move {
            let user = self
                .manager
                .signin_callback(callback_url)
                .await
                .map_err(identity_error)?;
            Ok(to_current_user(user))
        })
    }
}

fn identity_error(e: oidc_client::Error) -> Error {
    Error::Identity(e.to_string())
}

fn to_current_user(user: User) -> CurrentUser {
    CurrentUser {
        access_token: Secret::new(user.access_token),
        refresh_token: user.refresh_token.map(Secret::new),
        id_token: user.id_token.map(Secret::new),
        token_type: user.token_type,
        expires_at: user.expires_at,
        claims: user.profile,
    }
}

/// Prints redirect URLs to stdout; the operator opens them in a browser and
/// pastes the callback URL back into `oidc-session callback`.
pub struct TerminalNavigator;

impl Navigator for TerminalNavigator {
    fn navigate(&self, url: &Url) -> oidc_client::Result<()> {
        println!("Open this URL in your browser:\n\n  {url}\n");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored_user() -> User {
        let mut profile = serde_json::Map::new();
        profile.insert("sub".into(), "user-1".into());
        User {
            access_token: "at-1".into(),
            token_type: "Bearer".into(),
            refresh_token: Some("rt-1".into()),
            id_token: Some("id.token.sig".into()),
            scope: None,
            expires_at: Some(4_102_444_800),
            profile,
        }
    }

    fn settings(automatic_silent_renew: bool) -> ClientSettings {
        ClientSettings {
            authority: "http://127.0.0.1:1".into(),
            client_id: "abc".into(),
            redirect_uri: "https://app.example/callback".parse().unwrap(),
            scopes: vec!["openid".into()],
            automatic_silent_renew,
        }
    }

    #[test]
    fn user_maps_to_current_user() {
        let current = to_current_user(stored_user());
        assert_eq!(current.access_token.expose(), "at-1");
        assert_eq!(current.refresh_token.as_ref().unwrap().expose(), "rt-1");
        assert_eq!(current.expires_at, Some(4_102_444_800));
        assert_eq!(current.subject(), Some("user-1"));
    }

    #[test]
    fn client_errors_become_identity_errors() {
        let err = identity_error(oidc_client::Error::Callback("missing code parameter".into()));
        assert_eq!(
            err,
            Error::Identity("invalid sign-in callback: missing code parameter".into())
        );
    }

    #[tokio::test]
    async fn created_client_reads_the_shared_store() {
        let store = Arc::new(UserStore::memory());
        store.set_user(stored_user()).await.unwrap();
        let factory = OidcIdentityFactory::new(store, Arc::new(TerminalNavigator));

        let client = factory.create(&settings(true)).unwrap();
        let user = client.get_user().await.unwrap().unwrap();
        assert_eq!(user.access_token.expose(), "at-1");
    }

    #[tokio::test]
    async fn signed_out_store_reports_no_user() {
        let factory = OidcIdentityFactory::new(Arc::new(UserStore::memory()), Arc::new(TerminalNavigator));
        let client = factory.create(&settings(false)).unwrap();
        assert!(client.get_user().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn renew_task_only_runs_when_enabled() {
        let schedule = RenewSchedule {
            interval: Duration::from_secs(3600),
            threshold: Duration::from_secs(60),
        };
        let factory = OidcIdentityFactory::new(Arc::new(UserStore::memory()), Arc::new(TerminalNavigator))
            .with_silent_renew(schedule);

        let built = factory.build(&settings(false));
        assert!(built.renew_task.is_none());
        let built = factory.build(&settings(true));
        assert!(built.renew_task.is_some());
    }

    #[tokio::test]
    async fn unreachable_provider_surfaces_identity_error() {
        let factory = OidcIdentityFactory::new(Arc::new(UserStore::memory()), Arc::new(TerminalNavigator));
        let client = factory.create(&settings(false)).unwrap();

        let err = client.signin_redirect().await.unwrap_err();
        assert!(matches!(err, Error::Identity(_)));
    }
}
