//! OpenID provider metadata (`/.well-known/openid-configuration`)

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};

const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";

/// The subset of provider metadata this client uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: Url,
    pub token_endpoint: Url,
    #[serde(default)]
    pub end_session_endpoint: Option<Url>,
    #[serde(default)]
    pub userinfo_endpoint: Option<Url>,
    #[serde(default)]
    pub jwks_uri: Option<Url>,
}

/// Discovery document location for an authority. A trailing slash on the
/// authority is ignored.
pub fn discovery_url(authority: &str) -> String {
    format!("{}{DISCOVERY_PATH}", authority.trim_end_matches('/'))
}

/// Fetch the provider metadata for `authority`.
pub async fn discover(client: &reqwest::Client, authority: &str) -> Result<ProviderMetadata> {
    let url = discovery_url(authority);
    debug!(url = %url, "fetching provider metadata");

    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| Error::Http(format!("discovery request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::Discovery(format!("{url} returned {status}")));
    }

    response
        .json::<ProviderMetadata>()
        .await
        .map_err(|e| Error::Discovery(format!("invalid provider metadata: {e}")))
}
