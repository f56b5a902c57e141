//! Remote authority fetcher
//!
//! One GET per call with the credential as query parameters. Every failure
//! (transport, status, body, missing token) is reported as `FetchFailed`.

use std::time::Duration;

use anyhow::{anyhow, Result};
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::config::apps::AppCredential;
use crate::config::settings::AuthorityConfig;
use crate::error::TokenError;
use crate::utils::constants::{ACCESS_TOKEN_FIELD, GRANT_TYPE};

/// Where refresh waves get new tokens from.
pub trait FetchToken: Send + Sync + 'static {
    fn fetch_token(
        &self,
        app: &AppCredential,
    ) -> impl std::future::Future<Output = Result<String, TokenError>> + Send;
}

#[derive(Debug, Clone)]
pub struct AuthoritySource {
    url: String,
    client: Client,
}

impl AuthoritySource {
    pub fn new(cfg: &AuthorityConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(cfg.request_timeout_ms))
            .build()
            .map_err(|e| anyhow!("failed to build HTTP client: {}", e))?;
        Ok(Self::with_client(cfg.url.clone(), client))
    }

    pub fn with_client(url: String, client: Client) -> Self {
        Self { url, client }
    }
}

impl FetchToken for AuthoritySource {
    async fn fetch_token(&self, app: &AppCredential) -> Result<String, TokenError> {
        let response = self
            .client
            .get(&self.url)
            .query(&[
                ("grant_type", GRANT_TYPE),
                ("appid", app.appid.as_str()),
                ("secret", app.appsecret.as_str()),
            ])
            .send()
            .await
            // reqwest errors may embed the url, which carries the secret
            .map_err(|e| TokenError::FetchFailed(format!("request failed: {}", e.without_url())))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TokenError::FetchFailed(format!("HTTP request failed: {}", status)));
        }
        let body = response
            .text()
            .await
            .map_err(|e| TokenError::FetchFailed(format!("cannot read body: {}", e.without_url())))?;
        debug!("authority answered for appid {}", app.appid);
        parse_access_token(&body)
    }
}

/// Extract `access_token` from the authority body.
pub fn parse_access_token(body: &str) -> Result<String, TokenError> {
    let json: Value = serde_json::from_str(body)
        .map_err(|e| TokenError::FetchFailed(format!("response is not JSON: {}", e)))?;

    match json.get(ACCESS_TOKEN_FIELD).and_then(Value::as_str) {
        Some(token) if !token.is_empty() => Ok(token.to_owned()),
        _ => {
            let reason = match (json.get("errcode"), json.get("errmsg").and_then(Value::as_str)) {
                (Some(code), Some(msg)) => format!("authority error {}: {}", code, msg),
                (Some(code), None) => format!("authority error {}", code),
                _ => format!("response has no '{}' field", ACCESS_TOKEN_FIELD),
            };
            Err(TokenError::FetchFailed(reason))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::Method::GET;
    use httpmock::MockServer;
    use serde_json::json;

    fn source(server: &MockServer) -> AuthoritySource {
        AuthoritySource::new(&AuthorityConfig {
            url: server.url("/cgi-bin/token"),
            request_timeout_ms: 2000,
        })
        .unwrap()
    }

    #[test]
    fn parses_access_token() {
        let token = parse_access_token(r#"{"access_token":"T1","expires_in":7200}"#).unwrap();
        assert_eq!(token, "T1");
    }

    #[test]
    fn authority_error_codes_are_reported() {
        let err = parse_access_token(r#"{"errcode":40013,"errmsg":"invalid appid"}"#).unwrap_err();
        assert_eq!(err, TokenError::FetchFailed("authority error 40013: invalid appid".into()));
    }

    #[test]
    fn missing_or_empty_token_fails() {
        assert!(matches!(parse_access_token(r#"{"expires_in":7200}"#), Err(TokenError::FetchFailed(_))));
        assert!(matches!(parse_access_token(r#"{"access_token":""}"#), Err(TokenError::FetchFailed(_))));
        assert!(matches!(parse_access_token("<html>oops</html>"), Err(TokenError::FetchFailed(_))));
    }

    #[tokio::test]
    async fn sends_credential_as_query() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/cgi-bin/token")
                    .query_param("grant_type", "client_credential")
                    .query_param("appid", "wx1")
                    .query_param("secret", "s1");
                then.status(200).json_body(json!({"access_token": "T1", "expires_in": 7200}));
            })
            .await;

        let token = source(&server).fetch_token(&AppCredential::new("wx1", "s1")).await.unwrap();
        assert_eq!(token, "T1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_success_status_is_fetch_failure() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/cgi-bin/token");
                then.status(503).body("busy");
            })
            .await;

        let err = source(&server).fetch_token(&AppCredential::new("wx1", "s1")).await.unwrap_err();
        assert!(matches!(err, TokenError::FetchFailed(reason) if reason.contains("503")));
    }

    #[tokio::test]
    async fn unreachable_authority_is_fetch_failure() {
        let source = AuthoritySource::new(&AuthorityConfig {
            url: "http://127.0.0.1:9/cgi-bin/token".to_owned(),
            request_timeout_ms: 500,
        })
        .unwrap();

        let err = source.fetch_token(&AppCredential::new("wx1", "s1")).await.unwrap_err();
        match err {
            TokenError::FetchFailed(reason) => assert!(!reason.contains("secret=")),
            other => panic!("unexpected error {:?}", other),
        }
    }
}
