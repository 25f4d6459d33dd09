//! Third-party authorization server client
//!
//! The gateway talks to the provider server-to-server only: the authorization
//! code is exchanged for an access token at the token endpoint, then the
//! identity endpoint is read with that token. The user agent never sees the
//! provider credential.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, header};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ResolvedProvider;
use crate::{Error, Result};

/// User agent sent to the provider (GitHub rejects requests without one)
pub const USER_AGENT: &str = concat!("mcp-oauth-gateway/", env!("CARGO_PKG_VERSION"));

/// Access token issued by the third party.
///
/// Owned by the gateway; `Debug` is redacted and the type is not `Serialize`.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderCredential(String);

impl ProviderCredential {
    /// Wrap a raw provider token
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token, for building the outbound `Authorization` header only
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ProviderCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProviderCredential([REDACTED])")
    }
}

/// Result of a successful code exchange
#[derive(Debug, Clone)]
pub struct ProviderToken {
    /// The provider access token
    pub credential: ProviderCredential,
    /// Scopes actually granted (may be narrower than requested)
    pub granted_scopes: Vec<String>,
}

/// Identity as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderIdentity {
    /// Stable subject identifier (GitHub numeric user id)
    pub subject: String,
    /// Human-readable handle (GitHub login)
    pub login: String,
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Public email
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Network operations against the authorization server.
///
/// Implementations must not retry: a code is single-use at the provider.
#[async_trait]
pub trait AuthorizationProvider: Send + Sync + 'static {
    /// Exchange an authorization code (plus PKCE verifier when one was sent)
    async fn exchange_code(&self, code: &str, code_verifier: Option<&str>) -> Result<ProviderToken>;

    /// Resolve the identity behind a freshly issued credential
    async fn fetch_identity(&self, credential: &ProviderCredential) -> Result<ProviderIdentity>;
}

/// GitHub token endpoint response.
///
/// GitHub answers `200 OK` with an `error` body for bad codes, so every field
/// is optional and the error fields are checked first.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubUser {
    id: u64,
    login: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

/// GitHub OAuth App client
pub struct GitHubProvider {
    http_client: Client,
    settings: ResolvedProvider,
}

impl GitHubProvider {
    /// Build a provider client with the configured outbound timeout
    pub fn new(settings: ResolvedProvider) -> Result<Self> {
        let http_client = build_http_client(settings.timeout)?;
        Ok(Self {
            http_client,
            settings,
        })
    }
}

/// Shared outbound client: bounded timeout, JSON accept, fixed user agent
pub fn build_http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))
}

#[async_trait]
impl AuthorizationProvider for GitHubProvider {
    async fn exchange_code(&self, code: &str, code_verifier: Option<&str>) -> Result<ProviderToken> {
        let mut params = vec![
            ("client_id", self.settings.client_id.as_str()),
            ("client_secret", self.settings.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", self.settings.redirect_uri.as_str()),
        ];
        if let Some(verifier) = code_verifier {
            params.push(("code_verifier", verifier));
        }

        let response = self
            .http_client
            .post(self.settings.token_endpoint.clone())
            .header(header::ACCEPT, "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|e| Error::from_transport("Token endpoint", &e))?;

        if !response.status().is_success() {
            let status = response.status();
            warn!(status = %status, "Provider token exchange returned non-success status");
            return Err(Error::upstream_rejected(format!(
                "Token exchange failed: HTTP {status}"
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::from_transport("Token endpoint", &e))?;

        token_from_response(body)
    }

    async fn fetch_identity(&self, credential: &ProviderCredential) -> Result<ProviderIdentity> {
        let url = format!("{}/user", self.settings.api_base);
        debug!(url = %url, "Fetching provider identity");

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(credential.expose())
            .header(header::ACCEPT, "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| Error::from_transport("Identity endpoint", &e))?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(Error::Authentication(format!(
                    "provider refused freshly issued credential (HTTP {})",
                    response.status()
                )));
            }
            status => {
                return Err(Error::upstream_rejected(format!(
                    "Identity lookup failed: HTTP {status}"
                )));
            }
        }

        let user: GitHubUser = response
            .json()
            .await
            .map_err(|e| Error::from_transport("Identity endpoint", &e))?;

        Ok(ProviderIdentity {
            subject: user.id.to_string(),
            login: user.login,
            name: user.name,
            email: user.email,
        })
    }
}

fn token_from_response(body: TokenResponse) -> Result<ProviderToken> {
    if let Some(error) = body.error {
        let description = body.error_description.unwrap_or_default();
        return Err(Error::Authentication(format!(
            "provider rejected authorization code: {error} {description}"
        )));
    }

    let access_token = body
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::upstream_rejected("Token response did not contain an access token"))?;

    Ok(ProviderToken {
        credential: ProviderCredential::new(access_token),
        granted_scopes: parse_scopes(body.scope.as_deref().unwrap_or("")),
    })
}

/// Split a scope string. GitHub separates with commas, RFC 6749 with spaces.
#[must_use]
pub fn parse_scopes(scope: &str) -> Vec<String> {
    let mut scopes: Vec<String> = Vec::new();
    for s in scope.split([',', ' ']).map(str::trim).filter(|s| !s.is_empty()) {
        if !scopes.iter().any(|existing| existing == s) {
            scopes.push(s.to_string());
        }
    }
    scopes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_scopes_handles_commas_and_spaces() {
        assert_eq!(parse_scopes("repo,gist"), vec!["repo", "gist"]);
        assert_eq!(parse_scopes("read:user gist"), vec!["read:user", "gist"]);
        assert_eq!(parse_scopes("repo, gist,repo"), vec!["repo", "gist"]);
        assert!(parse_scopes("").is_empty());
    }

    #[test]
    fn error_body_with_200_is_authentication_error() {
        let body: TokenResponse = serde_json::from_str(
            r#"{"error":"bad_verification_code","error_description":"The code passed is incorrect or expired."}"#,
        )
        .unwrap();

        let err = token_from_response(body).unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
    }

    #[test]
    fn token_body_yields_credential_and_granted_scopes() {
        let body: TokenResponse = serde_json::from_str(
            r#"{"access_token":"gho_abc","token_type":"bearer","scope":"gist,read:user"}"#,
        )
        .unwrap();

        let token = token_from_response(body).unwrap();
        assert_eq!(token.credential.expose(), "gho_abc");
        assert_eq!(token.granted_scopes, vec!["gist", "read:user"]);
    }

    #[test]
    fn missing_access_token_is_upstream_rejection() {
        let body: TokenResponse = serde_json::from_str(r#"{"scope":"gist"}"#).unwrap();

        let err = token_from_response(body).unwrap_err();
        assert!(matches!(err, Error::Upstream { transient: false, .. }));
    }

    #[test]
    fn credential_debug_is_redacted() {
        let credential = ProviderCredential::new("gho_secret_value");
        assert!(!format!("{credential:?}").contains("gho_secret_value"));
    }
}
