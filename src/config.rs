//! Configuration management

use std::{env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// Minimum HMAC signing key length in bytes (HS256 block strength)
pub const MIN_SIGNING_KEY_LEN: usize = 32;

/// Upper bound on how long a started login may wait for its callback
pub const MAX_PENDING_TTL: Duration = Duration::from_secs(30 * 60);

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before resolving `env:` references.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Third-party authorization server (GitHub)
    pub provider: ProviderConfig,
    /// Internal token and session lifetimes
    pub tokens: TokenConfig,
    /// Client-facing OAuth clients (two-hop variant)
    pub clients: ClientsConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Externally visible base URL (issuer and metadata endpoints)
    pub public_url: String,
    /// Per-request timeout for inbound requests
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8002,
            public_url: "http://localhost:8002".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    /// Public base URL without a trailing slash
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.public_url.trim_end_matches('/')
    }
}

/// Third-party authorization server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Provider name used in `/login/{name}`
    pub name: String,
    /// OAuth client id (supports `env:VAR_NAME`)
    pub client_id: Option<String>,
    /// OAuth client secret (supports `env:VAR_NAME`)
    pub client_secret: Option<String>,
    /// Authorization endpoint
    pub authorization_endpoint: String,
    /// Token endpoint
    pub token_endpoint: String,
    /// REST API base (identity endpoint is `{api_base}/user`)
    pub api_base: String,
    /// Callback registered with the provider. Defaults to `{public_url}/auth/callback`.
    pub redirect_uri: Option<String>,
    /// Scopes requested when the caller does not ask for any
    pub default_scopes: Vec<String>,
    /// Scopes a caller may request
    pub allowed_scopes: Vec<String>,
    /// Send a PKCE challenge on the gateway's own hop
    pub use_pkce: bool,
    /// Timeout for every request to the provider
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: "github".to_string(),
            client_id: Some("env:GITHUB_CLIENT_ID".to_string()),
            client_secret: Some("env:GITHUB_CLIENT_SECRET".to_string()),
            authorization_endpoint: "https://github.com/login/oauth/authorize".to_string(),
            token_endpoint: "https://github.com/login/oauth/access_token".to_string(),
            api_base: "https://api.github.com".to_string(),
            redirect_uri: None,
            default_scopes: vec!["read:user".to_string(), "gist".to_string()],
            allowed_scopes: vec![
                "read:user".to_string(),
                "user:email".to_string(),
                "gist".to_string(),
                "repo".to_string(),
            ],
            use_pkce: true,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Provider settings with secrets resolved and URLs validated
#[derive(Debug, Clone)]
pub struct ResolvedProvider {
    /// Provider name
    pub name: String,
    /// Resolved client id
    pub client_id: String,
    /// Resolved client secret
    pub client_secret: String,
    /// Authorization endpoint
    pub authorization_endpoint: Url,
    /// Token endpoint
    pub token_endpoint: Url,
    /// API base without trailing slash
    pub api_base: String,
    /// Gateway callback URL
    pub redirect_uri: String,
    /// Default scopes
    pub default_scopes: Vec<String>,
    /// Allowed scopes
    pub allowed_scopes: Vec<String>,
    /// PKCE on the provider hop
    pub use_pkce: bool,
    /// Outbound timeout
    pub timeout: Duration,
}

impl ProviderConfig {
    /// Resolve secrets and validate endpoints.
    ///
    /// Missing credentials are a fatal configuration error.
    pub fn resolve(&self, server: &ServerConfig) -> Result<ResolvedProvider> {
        let client_id = resolve_required(self.client_id.as_deref(), "provider.client_id")?;
        let client_secret =
            resolve_required(self.client_secret.as_deref(), "provider.client_secret")?;

        let authorization_endpoint = parse_url(&self.authorization_endpoint, "provider.authorization_endpoint")?;
        let token_endpoint = parse_url(&self.token_endpoint, "provider.token_endpoint")?;
        parse_url(&self.api_base, "provider.api_base")?;

        let redirect_uri = self
            .redirect_uri
            .clone()
            .unwrap_or_else(|| format!("{}/auth/callback", server.base_url()));
        parse_url(&redirect_uri, "provider.redirect_uri")?;

        if self.name.is_empty() {
            return Err(Error::Config("provider.name must not be empty".to_string()));
        }
        if let Some(unknown) = self
            .default_scopes
            .iter()
            .find(|s| !self.allowed_scopes.contains(s))
        {
            return Err(Error::Config(format!(
                "provider.default_scopes contains '{unknown}' which is not in provider.allowed_scopes"
            )));
        }

        Ok(ResolvedProvider {
            name: self.name.clone(),
            client_id,
            client_secret,
            authorization_endpoint,
            token_endpoint,
            api_base: self.api_base.trim_end_matches('/').to_string(),
            redirect_uri,
            default_scopes: self.default_scopes.clone(),
            allowed_scopes: self.allowed_scopes.clone(),
            use_pkce: self.use_pkce,
            timeout: self.timeout,
        })
    }
}

/// Internal token and session lifetime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// HMAC signing key for internal tokens (supports `env:VAR_NAME`)
    pub signing_key: Option<String>,
    /// `iss` claim of issued tokens
    pub issuer: String,
    /// Hard lifetime of a delegated session (and of its token)
    #[serde(with = "humantime_serde")]
    pub session_ttl: Duration,
    /// How long a started login may take to come back
    #[serde(with = "humantime_serde")]
    pub pending_ttl: Duration,
    /// Lifetime of a one-time client code (two-hop variant)
    #[serde(with = "humantime_serde")]
    pub client_code_ttl: Duration,
    /// Interval of the background expiry sweep
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            signing_key: Some("env:MCP_GATEWAY_SIGNING_KEY".to_string()),
            issuer: "mcp-oauth-gateway".to_string(),
            session_ttl: Duration::from_secs(24 * 3600),
            pending_ttl: Duration::from_secs(600),
            client_code_ttl: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl TokenConfig {
    /// Resolve and validate the signing key
    pub fn resolve_signing_key(&self) -> Result<String> {
        let key = resolve_required(self.signing_key.as_deref(), "tokens.signing_key")?;
        if key.len() < MIN_SIGNING_KEY_LEN {
            return Err(Error::Config(format!(
                "tokens.signing_key must be at least {MIN_SIGNING_KEY_LEN} bytes"
            )));
        }
        Ok(key)
    }

    /// Validate lifetimes
    pub fn validate(&self) -> Result<()> {
        if self.issuer.is_empty() {
            return Err(Error::Config("tokens.issuer must not be empty".to_string()));
        }
        for (name, ttl) in [
            ("tokens.session_ttl", self.session_ttl),
            ("tokens.pending_ttl", self.pending_ttl),
            ("tokens.client_code_ttl", self.client_code_ttl),
            ("tokens.sweep_interval", self.sweep_interval),
        ] {
            if ttl.is_zero() {
                return Err(Error::Config(format!("{name} must be greater than zero")));
            }
        }
        if self.pending_ttl > MAX_PENDING_TTL {
            return Err(Error::Config(format!(
                "tokens.pending_ttl must not exceed {} minutes",
                MAX_PENDING_TTL.as_secs() / 60
            )));
        }
        Ok(())
    }
}

/// Client-facing OAuth clients
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ClientsConfig {
    /// Allow RFC 7591 dynamic registration at `/oauth/register`
    pub registration_enabled: bool,
    /// Pre-registered clients
    pub registered: Vec<ClientConfig>,
}

/// A pre-registered client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Client identifier
    pub client_id: String,
    /// Client secret (supports `env:VAR_NAME`); absent for public clients
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Exact redirect URIs the client may use
    pub redirect_uris: Vec<String>,
    /// Human-readable name
    #[serde(default)]
    pub name: String,
}

impl ClientConfig {
    /// Resolve the client secret (expand env vars)
    pub fn resolve_secret(&self) -> Result<Option<String>> {
        self.client_secret
            .as_deref()
            .map(|s| resolve_secret(s, &format!("clients.registered[{}].client_secret", self.client_id)))
            .transpose()
    }
}

/// Resolve a literal or `env:VAR_NAME` reference.
///
/// Unlike header expansion, an unset variable is an error: secrets never fall
/// back to the literal reference.
pub fn resolve_secret(value: &str, field: &str) -> Result<String> {
    let resolved = if let Some(var_name) = value.strip_prefix("env:") {
        env::var(var_name).map_err(|_| {
            Error::Config(format!("{field}: environment variable {var_name} is not set"))
        })?
    } else {
        value.to_string()
    };

    if resolved.trim().is_empty() {
        return Err(Error::Config(format!("{field} must not be empty")));
    }
    Ok(resolved)
}

fn resolve_required(value: Option<&str>, field: &str) -> Result<String> {
    let value = value.ok_or_else(|| Error::Config(format!("{field} is required")))?;
    resolve_secret(value, field)
}

fn parse_url(value: &str, field: &str) -> Result<Url> {
    Url::parse(value).map_err(|e| Error::Config(format!("{field} is not a valid URL: {e}")))
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (MCP_GATEWAY_ prefix)
        figment = figment.merge(Env::prefixed("MCP_GATEWAY_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();
        config.expand_env_vars();

        Ok(config)
    }

    /// Validate everything needed to serve. Called before binding the listener.
    pub fn validate(&self) -> Result<()> {
        parse_url(&self.server.public_url, "server.public_url")?;
        self.provider.resolve(&self.server)?;
        self.tokens.resolve_signing_key()?;
        self.tokens.validate()?;

        for client in &self.clients.registered {
            if client.client_id.is_empty() {
                return Err(Error::Config("clients.registered: client_id must not be empty".to_string()));
            }
            if client.redirect_uris.is_empty() {
                return Err(Error::Config(format!(
                    "clients.registered[{}]: at least one redirect_uri is required",
                    client.client_id
                )));
            }
            for uri in &client.redirect_uris {
                parse_url(uri, &format!("clients.registered[{}].redirect_uris", client.client_id))?;
            }
            client.resolve_secret()?;
        }
        Ok(())
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand ${VAR} and ${VAR:-default} patterns in URL-valued settings
    fn expand_env_vars(&mut self) {
        // Pattern: ${VAR} or ${VAR:-default}
        let Ok(re) = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}") else {
            return;
        };

        self.server.public_url = Self::expand_string(&re, &self.server.public_url);
        if let Some(uri) = self.provider.redirect_uri.as_mut() {
            *uri = Self::expand_string(&re, uri);
        }
        for client in &mut self.clients.registered {
            for uri in &mut client.redirect_uris {
                *uri = Self::expand_string(&re, uri);
            }
        }
    }

    /// Expand environment variables in a string
    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }
}
