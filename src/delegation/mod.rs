//! Delegated login: third-party authorization mapped onto gateway sessions.
//!
//! 1. **Begin**: `/login/{provider}` (direct) or `/oauth/authorize` (two-hop)
//!    records a pending login keyed by a fresh `state` and redirects the user
//!    agent to the provider.
//!
//! 2. **Callback**: the provider redirects back with `code` and `state`. The
//!    pending login is consumed atomically, the code is exchanged
//!    server-to-server, and the identity is resolved. Exactly one
//!    [`DelegatedSession`] is created.
//!
//! 3. **Issue**: the direct variant mints an internal token and shows it once.
//!    The two-hop variant hands a one-time code to the client, redeemed at
//!    `/oauth/token` after client and PKCE checks.
//!
//! 4. **Use**: every protected call presents the internal token. The
//!    signature alone is never enough: the session named by `sid` must still be
//!    live in the [`SessionStore`].
//!
//! # Architecture
//!
//! ```text
//! Protected request
//!   -> Extract bearer token
//!   -> InternalTokenCodec::verify      -- signature, issuer, expiry
//!   -> SessionStore::get_session(sid)  -- O(1) DashMap lookup, lazy expiry
//!   -> DelegatedCall injected into request extensions
//! ```

pub mod audit;
pub mod clients;
pub mod handler;
pub mod store;
pub mod token;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{Config, ResolvedProvider, TokenConfig};
use crate::gateway::auth::DelegatedCall;
use crate::oauth::pkce::{self, CHALLENGE_METHOD_S256, PkcePair, generate_state, random_token};
use crate::oauth::provider::parse_scopes;
use crate::oauth::{AuthorizationProvider, GitHubProvider};
use crate::{Error, Result};

pub use audit::AuditEvent;
pub use clients::{ClientRegistry, RegisteredClient, RegistrationRequest, RegistrationResponse};
pub use store::{
    ClientAuthorizationRequest, ClientGrant, DelegatedSession, InMemorySessionStore,
    PendingAuthorization, SessionStore, SweepStats, now_secs,
};
pub use token::{InternalClaims, InternalTokenCodec, TokenRejection};

/// Provider redirect parameters delivered to `/auth/callback`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    /// Authorization code
    #[serde(default)]
    pub code: Option<String>,
    /// Echoed state
    #[serde(default)]
    pub state: Option<String>,
    /// Provider-reported error (e.g. `access_denied`)
    #[serde(default)]
    pub error: Option<String>,
    /// Provider-reported error detail
    #[serde(default)]
    pub error_description: Option<String>,
}

/// Query of the client-facing `/oauth/authorize`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientAuthorizeParams {
    /// Must be `code`
    #[serde(default)]
    pub response_type: Option<String>,
    /// Registered client id
    #[serde(default)]
    pub client_id: Option<String>,
    /// Must exactly match a registered redirect URI
    #[serde(default)]
    pub redirect_uri: Option<String>,
    /// Client state, echoed back with the code
    #[serde(default)]
    pub state: Option<String>,
    /// Requested scopes
    #[serde(default)]
    pub scope: Option<String>,
    /// Client PKCE challenge
    #[serde(default)]
    pub code_challenge: Option<String>,
    /// Must be `S256` when a challenge is given
    #[serde(default)]
    pub code_challenge_method: Option<String>,
}

/// Form body of `POST /oauth/token`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenRequest {
    /// Must be `authorization_code`
    pub grant_type: String,
    /// One-time client code
    #[serde(default)]
    pub code: Option<String>,
    /// Redirect URI the code was delivered to
    #[serde(default)]
    pub redirect_uri: Option<String>,
    /// Client id
    #[serde(default)]
    pub client_id: Option<String>,
    /// Client secret (confidential clients)
    #[serde(default)]
    pub client_secret: Option<String>,
    /// PKCE verifier for the client hop
    #[serde(default)]
    pub code_verifier: Option<String>,
}

/// Successful token endpoint response
#[derive(Serialize)]
pub struct TokenResponse {
    /// Internal token
    pub access_token: String,
    /// Always `"Bearer"`
    pub token_type: &'static str,
    /// Seconds until the backing session expires
    pub expires_in: u64,
    /// Space-separated granted scopes
    pub scope: String,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Token minted at the end of a direct browser login
pub struct IssuedToken {
    /// The internal token, shown to the user once
    pub access_token: String,
    /// Its claims
    pub claims: InternalClaims,
    /// The session it is bound to
    pub session: DelegatedSession,
}

impl fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedToken")
            .field("access_token", &"[REDACTED]")
            .field("claims", &self.claims)
            .finish_non_exhaustive()
    }
}

/// What the callback produced
#[derive(Debug)]
pub enum CallbackOutcome {
    /// Direct variant: render the token page
    Token(IssuedToken),
    /// Two-hop variant: redirect to the client with a one-time code
    ClientRedirect(Url),
}

/// Central coordinator for delegated login.
///
/// Holds every subsystem and exposes the operations called from the HTTP
/// handlers in [`handler`] and the guard middleware.
pub struct DelegationGateway {
    /// Pending logins, sessions, and client codes
    pub store: Arc<dyn SessionStore>,
    /// Third-party authorization server
    pub provider: Arc<dyn AuthorizationProvider>,
    /// Internal token codec
    pub codec: InternalTokenCodec,
    /// Resolved provider settings
    pub settings: ResolvedProvider,
    /// Client-facing OAuth clients
    pub clients: ClientRegistry,
    /// Lifetimes
    pub tokens: TokenConfig,
}

impl DelegationGateway {
    /// Build the gateway from configuration with the GitHub provider and an
    /// in-memory store.
    ///
    /// # Errors
    ///
    /// Fails fast on any missing credential or invalid setting.
    pub fn from_config(config: &Config) -> Result<Self> {
        let settings = config.provider.resolve(&config.server)?;
        let provider = Arc::new(GitHubProvider::new(settings)?);
        Self::with_parts(config, Arc::new(InMemorySessionStore::new()), provider)
    }

    /// Build the gateway around an explicit store and provider
    pub fn with_parts(
        config: &Config,
        store: Arc<dyn SessionStore>,
        provider: Arc<dyn AuthorizationProvider>,
    ) -> Result<Self> {
        config.validate()?;
        let settings = config.provider.resolve(&config.server)?;
        let signing_key = config.tokens.resolve_signing_key()?;
        let codec = InternalTokenCodec::new(signing_key.as_bytes(), config.tokens.issuer.clone());
        let clients = ClientRegistry::from_config(&config.clients)?;

        Ok(Self {
            store,
            provider,
            codec,
            settings,
            clients,
            tokens: config.tokens.clone(),
        })
    }

    /// Provider name used in `/login/{provider}`
    #[must_use]
    pub fn provider_name(&self) -> &str {
        &self.settings.name
    }

    /// Start a direct browser login. Returns the provider authorization URL.
    pub async fn begin_login(&self, scope: Option<&str>) -> Result<Url> {
        let scopes = self.resolve_scopes(scope)?;
        self.start_pending(scopes, None).await
    }

    /// Start a two-hop login on behalf of a registered client.
    ///
    /// Every failure here is returned to the user agent directly; nothing is
    /// redirected to an unverified URI.
    pub async fn begin_client_authorization(&self, params: ClientAuthorizeParams) -> Result<Url> {
        match params.response_type.as_deref() {
            Some("code") => {}
            Some(other) => {
                return Err(Error::InvalidRequest(format!(
                    "Unsupported response_type '{other}'; only 'code' is supported"
                )));
            }
            None => return Err(Error::InvalidRequest("response_type is required".to_string())),
        }

        let client_id = params
            .client_id
            .ok_or_else(|| Error::InvalidRequest("client_id is required".to_string()))?;
        let client = self
            .clients
            .get(&client_id)
            .ok_or_else(|| Error::InvalidRequest(format!("Unknown client_id '{client_id}'")))?;

        let redirect_uri = match params.redirect_uri {
            Some(uri) if client.allows_redirect(&uri) => uri,
            Some(_) => {
                return Err(Error::InvalidRequest(
                    "redirect_uri does not match any registered redirect URI".to_string(),
                ));
            }
            None if client.redirect_uris.len() == 1 => client.redirect_uris[0].clone(),
            None => return Err(Error::InvalidRequest("redirect_uri is required".to_string())),
        };

        if let Some(challenge) = &params.code_challenge {
            if params.code_challenge_method.as_deref() != Some(CHALLENGE_METHOD_S256) {
                return Err(Error::InvalidRequest(
                    "code_challenge_method must be S256".to_string(),
                ));
            }
            if challenge.is_empty() {
                return Err(Error::InvalidRequest("code_challenge must not be empty".to_string()));
            }
        } else if !client.is_confidential() {
            return Err(Error::InvalidRequest(
                "Public clients must send a PKCE code_challenge".to_string(),
            ));
        }

        let scopes = self.resolve_scopes(params.scope.as_deref())?;
        let request = ClientAuthorizationRequest {
            client_id: client.client_id,
            redirect_uri,
            state: params.state,
            code_challenge: params.code_challenge,
        };
        self.start_pending(scopes, Some(request)).await
    }

    async fn start_pending(
        &self,
        scopes: Vec<String>,
        client_request: Option<ClientAuthorizationRequest>,
    ) -> Result<Url> {
        let state = generate_state();
        let pkce = self.settings.use_pkce.then(PkcePair::generate);

        let mut url = self.settings.authorization_endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &self.settings.client_id)
                .append_pair("redirect_uri", &self.settings.redirect_uri)
                .append_pair("scope", &scopes.join(" "))
                .append_pair("state", &state)
                .append_pair("response_type", "code");
            if let Some(pair) = &pkce {
                query
                    .append_pair("code_challenge", &pair.challenge)
                    .append_pair("code_challenge_method", CHALLENGE_METHOD_S256);
            }
        }

        audit::emit(&AuditEvent::login_started(
            &scopes,
            client_request.as_ref().map(|r| r.client_id.as_str()),
        ));

        let now = now_secs();
        let (pkce_verifier, pkce_challenge) = match pkce {
            Some(pair) => (Some(pair.verifier), Some(pair.challenge)),
            None => (None, None),
        };
        self.store
            .insert_pending(PendingAuthorization {
                state,
                pkce_verifier,
                pkce_challenge,
                redirect_uri: self.settings.redirect_uri.clone(),
                requested_scopes: scopes,
                client_request,
                created_at: now,
                expires_at: now + self.tokens.pending_ttl.as_secs(),
            })
            .await;

        Ok(url)
    }

    /// Handle the provider's redirect back to the gateway.
    ///
    /// The pending login is consumed before any network call, so a replayed
    /// `state` fails even when the first attempt's exchange failed.
    pub async fn complete_callback(&self, params: CallbackParams) -> Result<CallbackOutcome> {
        let pending = match params.state.as_deref() {
            Some(state) => self.store.take_pending(state).await,
            None => None,
        };

        if let Some(error) = params.error {
            let detail = params.error_description.unwrap_or_default();
            audit::emit(&AuditEvent::login_failed(format!("provider error: {error} {detail}")));
            return Err(Error::Authentication(format!(
                "provider reported an error: {error}"
            )));
        }

        let Some(pending) = pending else {
            audit::emit(&AuditEvent::login_failed("unknown, expired, or reused state"));
            return Err(Error::Authentication(
                "state is unknown, expired, or already used".to_string(),
            ));
        };

        let Some(code) = params.code.filter(|c| !c.is_empty()) else {
            audit::emit(&AuditEvent::login_failed("callback without code"));
            return Err(Error::InvalidRequest("Missing authorization code".to_string()));
        };

        let token = self
            .provider
            .exchange_code(&code, pending.pkce_verifier.as_deref())
            .await
            .inspect_err(|e| audit::emit(&AuditEvent::login_failed(e.to_string())))?;

        let identity = self
            .provider
            .fetch_identity(&token.credential)
            .await
            .inspect_err(|e| audit::emit(&AuditEvent::login_failed(e.to_string())))?;

        if token.granted_scopes != pending.requested_scopes {
            debug!(
                requested = %pending.requested_scopes.join(" "),
                granted = %token.granted_scopes.join(" "),
                "Provider granted a different scope set than requested"
            );
        }

        let now = now_secs();
        let session = DelegatedSession {
            session_id: random_token::<32>(),
            provider_credential: token.credential,
            identity,
            granted_scopes: token.granted_scopes,
            issued_at: now,
            expires_at: now + self.tokens.session_ttl.as_secs(),
        };
        self.store.create_session(session.clone()).await;
        audit::emit(&AuditEvent::login_completed(
            &session.identity,
            &session.session_id,
            &session.granted_scopes,
        ));
        info!(login = %session.identity.login, "Delegated login completed");

        match pending.client_request {
            Some(request) => self.issue_client_grant(request, &session).await,
            None => {
                let (access_token, claims) = self.codec.mint(&session)?;
                Ok(CallbackOutcome::Token(IssuedToken {
                    access_token,
                    claims,
                    session,
                }))
            }
        }
    }

    async fn issue_client_grant(
        &self,
        request: ClientAuthorizationRequest,
        session: &DelegatedSession,
    ) -> Result<CallbackOutcome> {
        let mut url = Url::parse(&request.redirect_uri)
            .map_err(|e| Error::Internal(format!("Registered redirect_uri is invalid: {e}")))?;

        let grant = ClientGrant {
            code: random_token::<32>(),
            client_id: request.client_id,
            redirect_uri: request.redirect_uri,
            code_challenge: request.code_challenge,
            session_id: session.session_id.clone(),
            expires_at: now_secs() + self.tokens.client_code_ttl.as_secs(),
        };

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("code", &grant.code);
            if let Some(state) = &request.state {
                query.append_pair("state", state);
            }
        }

        audit::emit(&AuditEvent::grant_issued(&grant.client_id, &grant.session_id));
        self.store.insert_grant(grant).await;
        Ok(CallbackOutcome::ClientRedirect(url))
    }

    /// Redeem a one-time client code at the token endpoint
    pub async fn exchange_client_code(&self, request: TokenRequest) -> Result<TokenResponse> {
        if request.grant_type != "authorization_code" {
            return Err(Error::InvalidRequest(format!(
                "Unsupported grant_type '{}'; only 'authorization_code' is supported",
                request.grant_type
            )));
        }
        let code = request
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .ok_or_else(|| Error::InvalidRequest("code is required".to_string()))?;

        let Some(grant) = self.store.take_grant(&code).await else {
            audit::emit(&AuditEvent::grant_rejected("unknown, expired, or reused code", None));
            return Err(Error::InvalidGrant(
                "Authorization code is invalid, expired, or already used".to_string(),
            ));
        };

        let result = self.redeem(&grant, &request).await;
        if let Err(e) = &result {
            audit::emit(&AuditEvent::grant_rejected(e.to_string(), Some(&grant.client_id)));
            // The code is burned, so nothing can reach the session any more
            self.store.delete_session(&grant.session_id).await;
        }
        result
    }

    async fn redeem(&self, grant: &ClientGrant, request: &TokenRequest) -> Result<TokenResponse> {
        let client_id = request
            .client_id
            .as_deref()
            .ok_or_else(|| Error::InvalidClient("client_id is required".to_string()))?;
        let client = self
            .clients
            .get(client_id)
            .ok_or_else(|| Error::InvalidClient("Unknown client".to_string()))?;
        if !client.secret_matches(request.client_secret.as_deref()) {
            return Err(Error::InvalidClient("Client authentication failed".to_string()));
        }
        if grant.client_id != client.client_id {
            return Err(Error::InvalidGrant(
                "Authorization code was issued to another client".to_string(),
            ));
        }
        if request.redirect_uri.as_deref() != Some(grant.redirect_uri.as_str()) {
            return Err(Error::InvalidGrant("redirect_uri does not match".to_string()));
        }

        if let Some(challenge) = &grant.code_challenge {
            let verifier = request
                .code_verifier
                .as_deref()
                .ok_or_else(|| Error::InvalidGrant("code_verifier is required".to_string()))?;
            if !pkce::is_valid_verifier(verifier) || !pkce::verify(verifier, challenge) {
                return Err(Error::InvalidGrant("PKCE verification failed".to_string()));
            }
        }

        let session = self
            .store
            .get_session(&grant.session_id)
            .await
            .ok_or_else(|| Error::InvalidGrant("The login session has ended".to_string()))?;

        let (access_token, claims) = self.codec.mint(&session)?;
        audit::emit(&AuditEvent::grant_redeemed(&grant.client_id, &session.session_id));

        Ok(TokenResponse {
            access_token,
            token_type: "Bearer",
            expires_in: claims.exp.saturating_sub(now_secs()),
            scope: claims.scope,
        })
    }

    /// Resolve a bearer token to a live session.
    ///
    /// Every failure yields the same [`Error::Authentication`]; the specific
    /// reason only reaches the audit log.
    pub async fn authenticate(&self, bearer: &str) -> Result<DelegatedCall> {
        let claims = self.codec.verify(bearer).map_err(|reason| {
            audit::emit(&AuditEvent::session_rejected(reason.as_str(), None));
            Error::Authentication(format!("token rejected: {}", reason.as_str()))
        })?;

        let Some(session) = self.store.get_session(&claims.sid).await else {
            audit::emit(&AuditEvent::session_rejected("session not found", Some(&claims.sid)));
            return Err(Error::Authentication("session not found".to_string()));
        };

        if session.identity.subject != claims.sub {
            warn!(sid = %claims.sid, "Token subject does not match session");
            audit::emit(&AuditEvent::session_rejected("subject mismatch", Some(&claims.sid)));
            return Err(Error::Authentication("subject mismatch".to_string()));
        }

        audit::emit(&AuditEvent::session_used(&session.identity, &session.session_id));
        Ok(DelegatedCall::new(session, claims))
    }

    /// End the session behind `call`. Tokens bound to it stop working immediately.
    pub async fn logout(&self, call: &DelegatedCall) -> bool {
        let session = call.session();
        let removed = self.store.delete_session(&session.session_id).await;
        if removed {
            audit::emit(&AuditEvent::session_revoked(&session.identity, &session.session_id));
        }
        removed
    }

    /// Dynamic client registration
    pub fn register_client(&self, request: RegistrationRequest) -> Result<RegistrationResponse> {
        self.clients.register(request)
    }

    fn resolve_scopes(&self, scope: Option<&str>) -> Result<Vec<String>> {
        let requested = scope.map(parse_scopes).unwrap_or_default();
        if requested.is_empty() {
            return Ok(self.settings.default_scopes.clone());
        }
        if let Some(unknown) = requested
            .iter()
            .find(|s| !self.settings.allowed_scopes.contains(s))
        {
            return Err(Error::InvalidRequest(format!(
                "Scope '{unknown}' is not allowed; allowed scopes: {}",
                self.settings.allowed_scopes.join(" ")
            )));
        }
        Ok(requested)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fake provider shared by unit tests in this module tree.

    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::oauth::{ProviderCredential, ProviderIdentity, ProviderToken};
    use crate::{Error, Result};

    use super::AuthorizationProvider;

    /// Scripted provider: records calls, answers from fixed values
    pub struct FakeProvider {
        pub granted: Vec<String>,
        pub reject_code: bool,
        pub calls: Mutex<Vec<(String, Option<String>)>>,
    }

    impl FakeProvider {
        pub fn granting(scopes: &[&str]) -> Self {
            Self {
                granted: scopes.iter().map(ToString::to_string).collect(),
                reject_code: false,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AuthorizationProvider for FakeProvider {
        async fn exchange_code(&self, code: &str, code_verifier: Option<&str>) -> Result<ProviderToken> {
            self.calls
                .lock()
                .unwrap()
                .push((code.to_string(), code_verifier.map(str::to_string)));
            if self.reject_code {
                return Err(Error::Authentication("bad_verification_code".to_string()));
            }
            Ok(ProviderToken {
                credential: ProviderCredential::new(format!("gho_{code}")),
                granted_scopes: self.granted.clone(),
            })
        }

        async fn fetch_identity(&self, _credential: &ProviderCredential) -> Result<ProviderIdentity> {
            Ok(ProviderIdentity {
                subject: "583231".to_string(),
                login: "octocat".to_string(),
                name: Some("The Octocat".to_string()),
                email: None,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::testing::FakeProvider;
    use super::*;
    use crate::config::ClientConfig;

    fn config() -> Config {
        let mut config = Config::default();
        config.provider.client_id = Some("Iv1.client".to_string());
        config.provider.client_secret = Some("shhh".to_string());
        config.tokens.signing_key = Some("0123456789abcdef0123456789abcdef".to_string());
        config.clients.registered.push(ClientConfig {
            client_id: "desktop".to_string(),
            client_secret: None,
            redirect_uris: vec!["http://127.0.0.1:3000/callback".to_string()],
            name: "Desktop".to_string(),
        });
        config
    }

    fn gateway_with(provider: FakeProvider) -> (DelegationGateway, Arc<FakeProvider>) {
        let provider = Arc::new(provider);
        let gateway = DelegationGateway::with_parts(
            &config(),
            Arc::new(InMemorySessionStore::new()),
            Arc::clone(&provider) as Arc<dyn AuthorizationProvider>,
        )
        .unwrap();
        (gateway, provider)
    }

    fn query_param(url: &Url, name: &str) -> Option<String> {
        url.query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    async fn login(gateway: &DelegationGateway) -> IssuedToken {
        let url = gateway.begin_login(None).await.unwrap();
        let outcome = gateway
            .complete_callback(CallbackParams {
                code: Some("abc".to_string()),
                state: query_param(&url, "state"),
                ..CallbackParams::default()
            })
            .await
            .unwrap();
        match outcome {
            CallbackOutcome::Token(issued) => issued,
            CallbackOutcome::ClientRedirect(_) => panic!("direct login produced a client redirect"),
        }
    }

    #[tokio::test]
    async fn authorization_url_carries_pkce_and_state() {
        let (gateway, _) = gateway_with(FakeProvider::granting(&["read:user"]));

        let url = gateway.begin_login(Some("read:user gist")).await.unwrap();

        assert_eq!(url.host_str(), Some("github.com"));
        assert_eq!(query_param(&url, "client_id").as_deref(), Some("Iv1.client"));
        assert_eq!(query_param(&url, "scope").as_deref(), Some("read:user gist"));
        assert_eq!(query_param(&url, "response_type").as_deref(), Some("code"));
        assert_eq!(query_param(&url, "code_challenge_method").as_deref(), Some("S256"));
        assert!(query_param(&url, "code_challenge").is_some());
        assert!(query_param(&url, "state").is_some());
        assert_eq!(
            query_param(&url, "redirect_uri").as_deref(),
            Some("http://localhost:8002/auth/callback")
        );
    }

    #[tokio::test]
    async fn disallowed_scope_is_invalid_request() {
        let (gateway, _) = gateway_with(FakeProvider::granting(&[]));
        let err = gateway.begin_login(Some("admin:org")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn callback_sends_retained_verifier_matching_challenge() {
        // GIVEN: a started login
        let (gateway, provider) = gateway_with(FakeProvider::granting(&["read:user"]));
        let url = gateway.begin_login(None).await.unwrap();
        let challenge = query_param(&url, "code_challenge").unwrap();

        // WHEN: the provider redirects back
        gateway
            .complete_callback(CallbackParams {
                code: Some("abc".to_string()),
                state: query_param(&url, "state"),
                ..CallbackParams::default()
            })
            .await
            .unwrap();

        // THEN: the verifier sent to the provider reproduces the challenge
        let calls = provider.calls.lock().unwrap();
        let verifier = calls[0].1.clone().unwrap();
        assert!(pkce::verify(&verifier, &challenge));
    }

    #[tokio::test]
    async fn replayed_state_is_rejected_without_second_exchange() {
        let (gateway, provider) = gateway_with(FakeProvider::granting(&["read:user"]));
        let url = gateway.begin_login(None).await.unwrap();
        let params = CallbackParams {
            code: Some("abc".to_string()),
            state: query_param(&url, "state"),
            ..CallbackParams::default()
        };

        assert!(gateway.complete_callback(params.clone()).await.is_ok());
        let err = gateway.complete_callback(params).await.unwrap_err();

        assert!(matches!(err, Error::Authentication(_)));
        assert_eq!(provider.calls.lock().unwrap().len(), 1);
        assert_eq!(gateway.store.session_count().await, 1);
    }

    #[tokio::test]
    async fn rejected_code_creates_no_session_and_consumes_state() {
        let (gateway, _) = gateway_with(FakeProvider {
            reject_code: true,
            ..FakeProvider::granting(&[])
        });
        let url = gateway.begin_login(None).await.unwrap();
        let params = CallbackParams {
            code: Some("stale".to_string()),
            state: query_param(&url, "state"),
            ..CallbackParams::default()
        };

        assert!(matches!(
            gateway.complete_callback(params.clone()).await,
            Err(Error::Authentication(_))
        ));
        assert_eq!(gateway.store.session_count().await, 0);
        assert!(gateway.complete_callback(params).await.is_err());
    }

    #[tokio::test]
    async fn provider_error_is_authentication_failure() {
        let (gateway, provider) = gateway_with(FakeProvider::granting(&[]));
        let url = gateway.begin_login(None).await.unwrap();

        let err = gateway
            .complete_callback(CallbackParams {
                state: query_param(&url, "state"),
                error: Some("access_denied".to_string()),
                ..CallbackParams::default()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Authentication(_)));
        assert!(provider.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn issued_token_authenticates_until_logout() {
        // GIVEN: a completed login
        let (gateway, _) = gateway_with(FakeProvider::granting(&["read:user", "gist"]));
        let issued = login(&gateway).await;

        // WHEN: the token is presented
        let call = gateway.authenticate(&issued.access_token).await.unwrap();

        // THEN: it resolves to the session, and stops working after logout
        assert_eq!(call.session().identity.login, "octocat");
        assert!(call.require_scope("gist").is_ok());
        assert!(matches!(
            call.require_scope("repo"),
            Err(Error::Authorization { .. })
        ));

        assert!(gateway.logout(&call).await);
        assert!(matches!(
            gateway.authenticate(&issued.access_token).await,
            Err(Error::Authentication(_))
        ));
    }

    #[tokio::test]
    async fn token_for_unknown_session_is_rejected() {
        let (gateway, _) = gateway_with(FakeProvider::granting(&["read:user"]));
        let issued = login(&gateway).await;
        gateway.store.delete_session(&issued.session.session_id).await;

        let err = gateway.authenticate(&issued.access_token).await.unwrap_err();
        assert_eq!(err.public_message(), crate::error::UNAUTHENTICATED_MESSAGE);
    }

    #[tokio::test]
    async fn client_authorize_rejects_bad_requests_without_redirect() {
        let (gateway, _) = gateway_with(FakeProvider::granting(&[]));
        let valid = ClientAuthorizeParams {
            response_type: Some("code".to_string()),
            client_id: Some("desktop".to_string()),
            redirect_uri: Some("http://127.0.0.1:3000/callback".to_string()),
            state: Some("xyz".to_string()),
            scope: None,
            code_challenge: Some(pkce::challenge_for(&"v".repeat(43))),
            code_challenge_method: Some("S256".to_string()),
        };
        assert!(gateway.begin_client_authorization(valid.clone()).await.is_ok());

        let cases = [
            ClientAuthorizeParams { response_type: Some("token".to_string()), ..valid.clone() },
            ClientAuthorizeParams { client_id: Some("nobody".to_string()), ..valid.clone() },
            ClientAuthorizeParams {
                redirect_uri: Some("http://evil.example/callback".to_string()),
                ..valid.clone()
            },
            ClientAuthorizeParams { code_challenge_method: Some("plain".to_string()), ..valid.clone() },
            ClientAuthorizeParams { code_challenge: None, ..valid.clone() },
        ];
        for params in cases {
            let err = gateway.begin_client_authorization(params).await.unwrap_err();
            assert!(matches!(err, Error::InvalidRequest(_)));
        }
    }

    #[tokio::test]
    async fn client_code_redeems_once_with_matching_verifier() {
        // GIVEN: a two-hop login completed at the callback
        let (gateway, _) = gateway_with(FakeProvider::granting(&["read:user"]));
        let verifier = "x".repeat(64);
        let provider_url = gateway
            .begin_client_authorization(ClientAuthorizeParams {
                response_type: Some("code".to_string()),
                client_id: Some("desktop".to_string()),
                redirect_uri: None,
                state: Some("client-state".to_string()),
                scope: Some("read:user".to_string()),
                code_challenge: Some(pkce::challenge_for(&verifier)),
                code_challenge_method: Some("S256".to_string()),
            })
            .await
            .unwrap();
        let outcome = gateway
            .complete_callback(CallbackParams {
                code: Some("abc".to_string()),
                state: query_param(&provider_url, "state"),
                ..CallbackParams::default()
            })
            .await
            .unwrap();
        let CallbackOutcome::ClientRedirect(redirect) = outcome else {
            panic!("expected client redirect");
        };
        assert!(redirect.as_str().starts_with("http://127.0.0.1:3000/callback?"));
        assert_eq!(query_param(&redirect, "state").as_deref(), Some("client-state"));
        let code = query_param(&redirect, "code").unwrap();

        let request = TokenRequest {
            grant_type: "authorization_code".to_string(),
            code: Some(code),
            redirect_uri: Some("http://127.0.0.1:3000/callback".to_string()),
            client_id: Some("desktop".to_string()),
            client_secret: None,
            code_verifier: Some(verifier),
        };

        // WHEN: the code is redeemed twice
        let first = gateway.exchange_client_code(request.clone()).await.unwrap();
        let second = gateway.exchange_client_code(request).await;

        // THEN: the first yields a working token, the second is refused
        assert_eq!(first.token_type, "Bearer");
        assert_eq!(first.scope, "read:user");
        assert!(gateway.authenticate(&first.access_token).await.is_ok());
        assert!(matches!(second, Err(Error::InvalidGrant(_))));
    }

    #[tokio::test]
    async fn client_code_with_wrong_verifier_is_invalid_grant() {
        let (gateway, _) = gateway_with(FakeProvider::granting(&["read:user"]));
        let session = DelegatedSession {
            session_id: "sid".to_string(),
            provider_credential: crate::oauth::ProviderCredential::new("gho"),
            identity: crate::oauth::ProviderIdentity {
                subject: "1".to_string(),
                login: "octocat".to_string(),
                name: None,
                email: None,
            },
            granted_scopes: vec![],
            issued_at: now_secs(),
            expires_at: now_secs() + 60,
        };
        gateway.store.create_session(session).await;
        gateway
            .store
            .insert_grant(ClientGrant {
                code: "code-1".to_string(),
                client_id: "desktop".to_string(),
                redirect_uri: "http://127.0.0.1:3000/callback".to_string(),
                code_challenge: Some(pkce::challenge_for(&"a".repeat(43))),
                session_id: "sid".to_string(),
                expires_at: now_secs() + 60,
            })
            .await;

        let err = gateway
            .exchange_client_code(TokenRequest {
                grant_type: "authorization_code".to_string(),
                code: Some("code-1".to_string()),
                redirect_uri: Some("http://127.0.0.1:3000/callback".to_string()),
                client_id: Some("desktop".to_string()),
                client_secret: None,
                code_verifier: Some("b".repeat(43)),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidGrant(_)));
        // The burned code was the only path to the session
        assert_eq!(gateway.store.session_count().await, 0);

        let retry = gateway
            .exchange_client_code(TokenRequest {
                grant_type: "authorization_code".to_string(),
                code: Some("code-1".to_string()),
                redirect_uri: Some("http://127.0.0.1:3000/callback".to_string()),
                client_id: Some("desktop".to_string()),
                client_secret: None,
                code_verifier: Some("a".repeat(43)),
            })
            .await;
        assert!(matches!(retry, Err(Error::InvalidGrant(_))));
    }

    #[test]
    fn token_response_debug_redacts_token() {
        let response = TokenResponse {
            access_token: "eyJ.secret.sig".to_string(),
            token_type: "Bearer",
            expires_in: 60,
            scope: "gist".to_string(),
        };

        let rendered = format!("{response:?}");
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[tokio::test]
    async fn unsupported_grant_type_is_invalid_request() {
        let (gateway, _) = gateway_with(FakeProvider::granting(&[]));
        let err = gateway
            .exchange_client_code(TokenRequest {
                grant_type: "client_credentials".to_string(),
                ..TokenRequest::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }
}
