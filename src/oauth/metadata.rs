//! OAuth Metadata Documents
//!
//! Serves RFC 8414 (Authorization Server Metadata) and RFC 9728 (Protected
//! Resource Metadata) for the gateway. Both documents are static: they are
//! derived from configuration once and carry no per-request state.

use serde::Serialize;

use super::pkce::CHALLENGE_METHOD_S256;
use crate::config::Config;

/// OAuth Authorization Server Metadata (RFC 8414)
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationServerMetadata {
    /// Authorization server issuer URL
    pub issuer: String,

    /// Authorization endpoint URL
    pub authorization_endpoint: String,

    /// Token endpoint URL
    pub token_endpoint: String,

    /// Dynamic client registration endpoint (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_endpoint: Option<String>,

    /// Supported grant types
    pub grant_types_supported: Vec<String>,

    /// Supported response types
    pub response_types_supported: Vec<String>,

    /// Supported scopes
    pub scopes_supported: Vec<String>,

    /// Supported token endpoint auth methods
    pub token_endpoint_auth_methods_supported: Vec<String>,

    /// Supported PKCE code challenge methods
    pub code_challenge_methods_supported: Vec<String>,
}

/// OAuth Protected Resource Metadata (RFC 9728)
#[derive(Debug, Clone, Serialize)]
pub struct ProtectedResourceMetadata {
    /// Protected resource identifier
    pub resource: String,

    /// Authorization servers that can issue tokens for this resource
    pub authorization_servers: Vec<String>,

    /// Supported bearer token methods
    pub bearer_methods_supported: Vec<String>,

    /// Supported scopes
    pub scopes_supported: Vec<String>,
}

impl AuthorizationServerMetadata {
    /// Metadata describing this gateway's client-facing endpoints
    #[must_use]
    pub fn for_gateway(config: &Config) -> Self {
        let base = config.server.base_url();
        Self {
            issuer: base.to_string(),
            authorization_endpoint: format!("{base}/oauth/authorize"),
            token_endpoint: format!("{base}/oauth/token"),
            registration_endpoint: config
                .clients
                .registration_enabled
                .then(|| format!("{base}/oauth/register")),
            grant_types_supported: vec!["authorization_code".to_string()],
            response_types_supported: vec!["code".to_string()],
            scopes_supported: config.provider.allowed_scopes.clone(),
            token_endpoint_auth_methods_supported: vec![
                "none".to_string(),
                "client_secret_post".to_string(),
            ],
            code_challenge_methods_supported: vec![CHALLENGE_METHOD_S256.to_string()],
        }
    }
}

impl ProtectedResourceMetadata {
    /// Metadata for the gateway's protected tool endpoints
    #[must_use]
    pub fn for_gateway(config: &Config) -> Self {
        let base = config.server.base_url();
        Self {
            resource: base.to_string(),
            authorization_servers: vec![base.to_string()],
            bearer_methods_supported: vec!["header".to_string()],
            scopes_supported: config.provider.allowed_scopes.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_metadata_points_at_own_endpoints() {
        let mut config = Config::default();
        config.server.public_url = "https://gw.example.com/".to_string();

        let meta = AuthorizationServerMetadata::for_gateway(&config);

        assert_eq!(meta.issuer, "https://gw.example.com");
        assert_eq!(meta.authorization_endpoint, "https://gw.example.com/oauth/authorize");
        assert_eq!(meta.token_endpoint, "https://gw.example.com/oauth/token");
        assert!(meta.registration_endpoint.is_none());
        assert_eq!(meta.code_challenge_methods_supported, vec!["S256"]);
    }

    #[test]
    fn registration_endpoint_only_when_enabled() {
        let mut config = Config::default();
        config.clients.registration_enabled = true;

        let meta = AuthorizationServerMetadata::for_gateway(&config);
        assert_eq!(
            meta.registration_endpoint.as_deref(),
            Some("http://localhost:8002/oauth/register")
        );
    }

    #[test]
    fn registration_endpoint_is_omitted_from_json_when_disabled() {
        let meta = AuthorizationServerMetadata::for_gateway(&Config::default());
        let json = serde_json::to_value(&meta).unwrap();
        assert!(json.get("registration_endpoint").is_none());
    }

    #[test]
    fn protected_resource_lists_gateway_as_authorization_server() {
        let config = Config::default();
        let meta = ProtectedResourceMetadata::for_gateway(&config);

        assert_eq!(meta.authorization_servers, vec!["http://localhost:8002"]);
        assert_eq!(meta.scopes_supported, config.provider.allowed_scopes);
    }
}
