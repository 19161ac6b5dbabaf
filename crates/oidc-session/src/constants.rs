//! Fixed coordinates of the session bootstrap

/// Configuration endpoint, relative to the application origin
pub const CONFIG_PATH: &str = "v1/config";

/// Post-login callback path, joined onto the current origin
pub const CALLBACK_PATH: &str = "callback";

/// Scopes requested from the identity provider.
/// `offline_access` yields a refresh token for silent renewal.
pub const SCOPES: &[&str] = &["openid", "profile", "email", "offline_access"];
