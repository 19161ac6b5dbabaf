//! Automatic silent renewal
//!
//! Spawns a periodic task that renews the access token with the refresh token
//! before it expires, so callers of `get_user()` keep receiving a usable token.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::Error;
use crate::manager::{UserManager, now_secs};

/// What one renewal cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewOutcome {
    NoUser,
    /// The access token is not close to expiry
    Fresh,
    NoRefreshToken,
    Renewed,
    /// The provider rejected the refresh token; the user was removed
    Rejected,
    /// Transient failure; the next cycle tries again
    Failed,
    /// The user signed out or signed in again while the refresh was in
    /// flight; its result was discarded
    Superseded,
}

/// Spawn a background task that renews the access token when it expires
/// within `threshold`.
///
/// On a rejected refresh token the user is removed, so the session reads as
/// signed out. Transient errors leave the user in place. A cycle never
/// touches a user stored after it started.
pub fn spawn_silent_renew(
    manager: Arc<UserManager>,
    interval: Duration,
    threshold: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let outcome = renew_cycle(&manager, threshold).await;
            debug!(?outcome, "silent renew cycle finished");
        }
    })
}

/// Run one renewal check.
pub async fn renew_cycle(manager: &UserManager, threshold: Duration) -> RenewOutcome {
    let Some(user) = manager.get_user().await else {
        return RenewOutcome::NoUser;
    };
    if !user.expires_within(threshold.as_secs(), now_secs()) {
        return RenewOutcome::Fresh;
    }
    let Some(refresh) = user.refresh_token else {
        return RenewOutcome::NoRefreshToken;
    };

    debug!("access token expiring within threshold, renewing");

    match manager.renew().await {
        Ok(Some(_)) => {
            info!("silent renew succeeded");
            RenewOutcome::Renewed
        }
        Ok(None) => {
            debug!("stored user changed during renewal");
            RenewOutcome::Superseded
        }
        Err(Error::InvalidCredentials(msg)) => match manager.remove_user_if(&refresh).await {
            Ok(Some(_)) => {
                warn!(error = %msg, "refresh token rejected, user removed");
                RenewOutcome::Rejected
            }
            Ok(None) => {
                debug!("refresh token rejected for a user that is no longer stored");
                RenewOutcome::Superseded
            }
            Err(e) => {
                warn!(error = %e, "failed to remove user after rejected refresh");
                RenewOutcome::Rejected
            }
        },
        Err(e) => {
            warn!(error = %e, "silent renew failed (transient), will retry next cycle");
            RenewOutcome::Failed
        }
    }
}
