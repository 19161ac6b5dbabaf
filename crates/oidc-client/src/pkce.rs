//! PKCE (Proof Key for Code Exchange) per RFC 7636
//!
//! The verifier stays in the user store until the callback arrives; the S256
//! challenge goes into the authorization URL so the provider can tie the code
//! exchange to the party that started the flow.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use sha2::{Digest, Sha256};
use url::Url;

/// Generate a random PKCE code verifier.
///
/// 32 random bytes as URL-safe base64 (no padding): 43 characters, the
/// RFC 7636 minimum length with 256 bits of entropy.
pub fn generate_verifier() -> String {
    random_token::<32>()
}

/// Generate the opaque `state` value echoed back in the callback.
pub fn generate_state() -> String {
    random_token::<16>()
}

/// `challenge = BASE64URL(SHA256(verifier))`
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Append the authorization-code + PKCE parameters to the provider's
/// authorization endpoint.
pub fn build_authorization_url(
    authorization_endpoint: &Url,
    client_id: &str,
    redirect_uri: &Url,
    scope: &str,
    state: &str,
    challenge: &str,
) -> Url {
    let mut url = authorization_endpoint.clone();
    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", client_id)
        .append_pair("redirect_uri", redirect_uri.as_str())
        .append_pair("scope", scope)
        .append_pair("state", state)
        .append_pair("code_challenge", challenge)
        .append_pair("code_challenge_method", "S256");
    url
}

fn random_token<const N: usize>() -> String {
    let mut bytes = [0u8; N];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
