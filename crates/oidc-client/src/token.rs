//! Token endpoint interactions
//!
//! Both operations POST a form to the provider's `token_endpoint`:
//! 1. Authorization code exchange (completes the sign-in redirect)
//! 2. Refresh token grant (silent renewal)

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

/// Response from the token endpoint for both exchange and refresh.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Seconds until the access token expires (delta, not absolute)
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".into()
}

/// Exchange an authorization code plus PKCE verifier for tokens.
pub async fn exchange_code(
    client: &reqwest::Client,
    token_endpoint: &Url,
    client_id: &str,
    redirect_uri: &Url,
    code: &str,
    verifier: &str,
) -> Result<TokenResponse> {
    let response = client
        .post(token_endpoint.clone())
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("code_verifier", verifier),
            ("client_id", client_id),
            ("redirect_uri", redirect_uri.as_str()),
        ])
        .send()
        .await
        .map_err(|e| Error::Http(format!("token exchange request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(Error::TokenExchange(format!(
            "token endpoint returned {status}: {body}"
        )));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid token response: {e}")))
}

/// Obtain a new access token with a refresh token.
///
/// A rejected refresh token (401/403, or 400 `invalid_grant`) is reported as
/// [`Error::InvalidCredentials`]; the caller should drop the session.
pub async fn refresh_token(
    client: &reqwest::Client,
    token_endpoint: &Url,
    client_id: &str,
    refresh: &str,
) -> Result<TokenResponse> {
    let response = client
        .post(token_endpoint.clone())
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh),
            ("client_id", client_id),
        ])
        .send()
        .await
        .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));

        let rejected = matches!(status.as_u16(), 401 | 403)
            || (status.as_u16() == 400 && body.contains("invalid_grant"));
        if rejected {
            return Err(Error::InvalidCredentials(format!(
                "refresh token rejected ({status}): {body}"
            )));
        }

        return Err(Error::TokenExchange(format!(
            "token refresh returned {status}: {body}"
        )));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid refresh response: {e}")))
}

/// Decode the payload of an ID token without verifying its signature.
///
/// Only used for display claims (`sub`, `email`, `name`). Authorization
/// decisions belong to the resource server, which verifies the access token.
pub fn decode_claims(id_token: &str) -> Result<serde_json::Map<String, serde_json::Value>> {
    let payload = id_token
        .split('.')
        .nth(1)
        .ok_or_else(|| Error::TokenExchange("id_token is not a JWT".into()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| Error::TokenExchange(format!("id_token payload is not base64url: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| Error::TokenExchange(format!("id_token payload is not a JSON object: {e}")))
}

/// Parse the query of a redirect URL into a map (last value wins).
pub(crate) fn query_map(url: &Url) -> HashMap<String, String> {
    url.query_pairs().into_owned().collect()
}

#[cfg(test)]
pub(crate) fn encode_test_id_token(claims: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Form;
    use axum::http::StatusCode;
    use tokio::net::TcpListener;

    #[test]
    fn token_response_defaults_optional_fields() {
        let json = r#"{"access_token":"at_abc"}"#;
        let token: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(token.access_token, "at_abc");
        assert_eq!(token.token_type, "Bearer");
        assert!(token.refresh_token.is_none());
        assert!(token.expires_in.is_none());
    }

    #[test]
    fn decode_claims_reads_payload() {
        let token = encode_test_id_token(&serde_json::json!({
            "sub": "user-1",
            "email": "ada@example.com",
        }));
        let claims = decode_claims(&token).unwrap();
        assert_eq!(claims["sub"], "user-1");
        assert_eq!(claims["email"], "ada@example.com");
    }

    #[test]
    fn decode_claims_rejects_opaque_token() {
        assert!(decode_claims("opaque-token").is_err());
    }

    /// Token endpoint accepting `code=good-code` and `refresh_token=rt-good`.
    async fn start_token_endpoint() -> (Url, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let url: Url = format!("http://{addr}/token").parse().unwrap();

        let handle = tokio::spawn(async move {
            let app = axum::Router::new().route(
                "/token",
                axum::routing::post(|Form(form): Form<HashMap<String, String>>| async move {
                    let ok = match form.get("grant_type").map(String::as_str) {
                        Some("authorization_code") => {
                            form.get("code").map(String::as_str) == Some("good-code")
                                && form.contains_key("code_verifier")
                        }
                        Some("refresh_token") => {
                            form.get("refresh_token").map(String::as_str) == Some("rt-good")
                        }
                        _ => false,
                    };
                    if ok {
                        (
                            StatusCode::OK,
                            r#"{"access_token":"at-new","refresh_token":"rt-next","expires_in":300}"#,
                        )
                    } else {
                        (StatusCode::BAD_REQUEST, r#"{"error":"invalid_grant"}"#)
                    }
                }),
            );
            axum::serve(listener, app).await.unwrap();
        });

        (url, handle)
    }

    #[tokio::test]
    async fn exchange_code_returns_tokens() {
        let (endpoint, _server) = start_token_endpoint().await;
        let redirect: Url = "https://app.example/callback".parse().unwrap();

        let token = exchange_code(
            &reqwest::Client::new(),
            &endpoint,
            "abc",
            &redirect,
            "good-code",
            "verifier",
        )
        .await
        .unwrap();
        assert_eq!(token.access_token, "at-new");
        assert_eq!(token.expires_in, Some(300));
    }

    #[tokio::test]
    async fn exchange_code_rejects_bad_code() {
        let (endpoint, _server) = start_token_endpoint().await;
        let redirect: Url = "https://app.example/callback".parse().unwrap();

        let err = exchange_code(
            &reqwest::Client::new(),
            &endpoint,
            "abc",
            &redirect,
            "bad-code",
            "verifier",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::TokenExchange(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn refresh_rejection_is_invalid_credentials() {
        let (endpoint, _server) = start_token_endpoint().await;

        let err = refresh_token(&reqwest::Client::new(), &endpoint, "abc", "rt-revoked")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidCredentials(_)), "got: {err:?}");

        let token = refresh_token(&reqwest::Client::new(), &endpoint, "abc", "rt-good")
            .await
            .unwrap();
        assert_eq!(token.refresh_token.as_deref(), Some("rt-next"));
    }
}
