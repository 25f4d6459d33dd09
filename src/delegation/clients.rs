//! Client registry for the client-facing `/oauth/*` endpoints.
//!
//! Clients come from two places: the static `clients.registered` list in the
//! configuration, and (when enabled) RFC 7591 dynamic registration. Both live
//! in the same `DashMap`; dynamic entries are lost on restart.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::info;
use url::Url;

use crate::config::ClientsConfig;
use crate::oauth::pkce::random_token;
use crate::{Error, Result};

/// A client allowed to use `/oauth/authorize` and `/oauth/token`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredClient {
    /// Client identifier
    pub client_id: String,
    /// Secret for confidential clients. `None` means a public client that must use PKCE.
    pub client_secret: Option<String>,
    /// Exact redirect URIs
    pub redirect_uris: Vec<String>,
    /// Display name
    pub name: String,
}

impl RegisteredClient {
    /// Whether this client authenticates at the token endpoint
    #[must_use]
    pub fn is_confidential(&self) -> bool {
        self.client_secret.is_some()
    }

    /// Exact string match against the registered redirect URIs
    #[must_use]
    pub fn allows_redirect(&self, redirect_uri: &str) -> bool {
        self.redirect_uris.iter().any(|u| u == redirect_uri)
    }

    /// Check a presented secret in constant time.
    ///
    /// Public clients pass only when no secret is presented.
    #[must_use]
    pub fn secret_matches(&self, presented: Option<&str>) -> bool {
        match (&self.client_secret, presented) {
            (Some(expected), Some(given)) => expected.as_bytes().ct_eq(given.as_bytes()).into(),
            (None, None) => true,
            _ => false,
        }
    }
}

/// RFC 7591 registration request
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationRequest {
    /// Redirect URIs to register
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    /// Display name
    #[serde(default)]
    pub client_name: Option<String>,
    /// `none` for public clients, `client_secret_post` for confidential ones
    #[serde(default)]
    pub token_endpoint_auth_method: Option<String>,
}

/// RFC 7591 registration response
#[derive(Debug, Clone, Serialize)]
pub struct RegistrationResponse {
    /// Assigned client id
    pub client_id: String,
    /// Assigned secret (confidential clients only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    /// Registered redirect URIs
    pub redirect_uris: Vec<String>,
    /// Display name
    #[serde(skip_serializing_if = "String::is_empty")]
    pub client_name: String,
    /// Token endpoint auth method
    pub token_endpoint_auth_method: String,
    /// Supported grant types
    pub grant_types: Vec<String>,
    /// Supported response types
    pub response_types: Vec<String>,
}

/// All clients known to the gateway
pub struct ClientRegistry {
    clients: DashMap<String, RegisteredClient>,
    registration_enabled: bool,
}

impl ClientRegistry {
    /// Build the registry from configuration, resolving `env:` secrets
    pub fn from_config(config: &ClientsConfig) -> Result<Self> {
        let clients = DashMap::new();
        for client in &config.registered {
            let registered = RegisteredClient {
                client_id: client.client_id.clone(),
                client_secret: client.resolve_secret()?,
                redirect_uris: client.redirect_uris.clone(),
                name: client.name.clone(),
            };
            clients.insert(registered.client_id.clone(), registered);
        }
        Ok(Self {
            clients,
            registration_enabled: config.registration_enabled,
        })
    }

    /// Whether `/oauth/register` accepts requests
    #[must_use]
    pub fn registration_enabled(&self) -> bool {
        self.registration_enabled
    }

    /// Look up a client by id
    #[must_use]
    pub fn get(&self, client_id: &str) -> Option<RegisteredClient> {
        self.clients.get(client_id).map(|c| c.clone())
    }

    /// Number of known clients
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns `true` if no clients are known
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Dynamic client registration (RFC 7591)
    pub fn register(&self, request: RegistrationRequest) -> Result<RegistrationResponse> {
        if !self.registration_enabled {
            return Err(Error::InvalidRequest(
                "Dynamic client registration is disabled".to_string(),
            ));
        }
        if request.redirect_uris.is_empty() {
            return Err(Error::InvalidRequest(
                "redirect_uris must contain at least one URI".to_string(),
            ));
        }
        for uri in &request.redirect_uris {
            let parsed = Url::parse(uri)
                .map_err(|e| Error::InvalidRequest(format!("Invalid redirect_uri '{uri}': {e}")))?;
            if parsed.fragment().is_some() {
                return Err(Error::InvalidRequest(format!(
                    "redirect_uri '{uri}' must not contain a fragment"
                )));
            }
        }

        let auth_method = request
            .token_endpoint_auth_method
            .unwrap_or_else(|| "none".to_string());
        let client_secret = match auth_method.as_str() {
            "none" => None,
            "client_secret_post" => Some(random_token::<32>()),
            other => {
                return Err(Error::InvalidRequest(format!(
                    "Unsupported token_endpoint_auth_method '{other}'"
                )));
            }
        };

        let client = RegisteredClient {
            client_id: format!("dyn_{}", random_token::<12>()),
            client_secret,
            redirect_uris: request.redirect_uris,
            name: request.client_name.unwrap_or_default(),
        };
        info!(client_id = %client.client_id, name = %client.name, "Registered OAuth client");

        let response = RegistrationResponse {
            client_id: client.client_id.clone(),
            client_secret: client.client_secret.clone(),
            redirect_uris: client.redirect_uris.clone(),
            client_name: client.name.clone(),
            token_endpoint_auth_method: auth_method,
            grant_types: vec!["authorization_code".to_string()],
            response_types: vec!["code".to_string()],
        };
        self.clients.insert(client.client_id.clone(), client);
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;

    fn registry(registration_enabled: bool) -> ClientRegistry {
        ClientRegistry::from_config(&ClientsConfig {
            registration_enabled,
            registered: vec![ClientConfig {
                client_id: "desktop".to_string(),
                client_secret: Some("s3cret".to_string()),
                redirect_uris: vec!["http://127.0.0.1:3000/callback".to_string()],
                name: "Desktop".to_string(),
            }],
        })
        .unwrap()
    }

    #[test]
    fn redirect_must_match_exactly() {
        let client = registry(false).get("desktop").unwrap();

        assert!(client.allows_redirect("http://127.0.0.1:3000/callback"));
        assert!(!client.allows_redirect("http://127.0.0.1:3000/callback/"));
        assert!(!client.allows_redirect("http://127.0.0.1:3000/callback?x=1"));
        assert!(!client.allows_redirect("http://evil.example/callback"));
    }

    #[test]
    fn secret_check_distinguishes_public_and_confidential() {
        let confidential = registry(false).get("desktop").unwrap();
        assert!(confidential.secret_matches(Some("s3cret")));
        assert!(!confidential.secret_matches(Some("s3cre")));
        assert!(!confidential.secret_matches(None));

        let public = RegisteredClient {
            client_secret: None,
            ..confidential
        };
        assert!(public.secret_matches(None));
        assert!(!public.secret_matches(Some("anything")));
    }

    #[test]
    fn registration_disabled_is_rejected() {
        let err = registry(false)
            .register(RegistrationRequest {
                redirect_uris: vec!["http://localhost:9/cb".to_string()],
                client_name: None,
                token_endpoint_auth_method: None,
            })
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[test]
    fn registered_public_client_is_retrievable() {
        // GIVEN: registration enabled
        let registry = registry(true);

        // WHEN: a public client registers
        let response = registry
            .register(RegistrationRequest {
                redirect_uris: vec!["http://localhost:9/cb".to_string()],
                client_name: Some("Inspector".to_string()),
                token_endpoint_auth_method: None,
            })
            .unwrap();

        // THEN: it gets a dyn_ id, no secret, and is known to the registry
        assert!(response.client_id.starts_with("dyn_"));
        assert!(response.client_secret.is_none());
        let client = registry.get(&response.client_id).unwrap();
        assert!(!client.is_confidential());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn confidential_registration_returns_secret() {
        let response = registry(true)
            .register(RegistrationRequest {
                redirect_uris: vec!["https://app.example.com/cb".to_string()],
                client_name: None,
                token_endpoint_auth_method: Some("client_secret_post".to_string()),
            })
            .unwrap();
        assert!(response.client_secret.is_some());
    }

    #[test]
    fn registration_rejects_bad_redirects() {
        let registry = registry(true);
        for uris in [vec![], vec!["not a url".to_string()], vec!["https://a.example/cb#frag".to_string()]] {
            let result = registry.register(RegistrationRequest {
                redirect_uris: uris,
                client_name: None,
                token_endpoint_auth_method: None,
            });
            assert!(result.is_err());
        }
    }
}
