//! Protected-call guard
//!
//! Every protected route runs behind [`require_session`]:
//! - Extracts `Authorization: Bearer <internal token>`
//! - Verifies it and resolves the live session it is bound to
//! - Injects a [`DelegatedCall`] into the request extensions
//!
//! Requests that fail any step are answered with 401 before the handler runs.
//! Scope checks happen inside handlers via [`DelegatedCall::require_scope`],
//! which answers 403.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use crate::delegation::{DelegatedSession, DelegationGateway, InternalClaims, audit};
use crate::oauth::{ProviderCredential, ProviderIdentity};
use crate::{Error, Result};

/// An authenticated call, bound to a live delegated session.
///
/// Holds a snapshot of the session taken when the guard ran.
#[derive(Debug, Clone)]
pub struct DelegatedCall {
    session: DelegatedSession,
    claims: InternalClaims,
}

impl DelegatedCall {
    /// Bind a verified token to its session
    #[must_use]
    pub fn new(session: DelegatedSession, claims: InternalClaims) -> Self {
        Self { session, claims }
    }

    /// Session snapshot
    #[must_use]
    pub fn session(&self) -> &DelegatedSession {
        &self.session
    }

    /// Caller identity
    #[must_use]
    pub fn identity(&self) -> &ProviderIdentity {
        &self.session.identity
    }

    /// Claims of the presented token
    #[must_use]
    pub fn claims(&self) -> &InternalClaims {
        &self.claims
    }

    /// Provider credential for outbound calls made on the caller's behalf
    #[must_use]
    pub fn credential(&self) -> &ProviderCredential {
        &self.session.provider_credential
    }

    /// Fail with [`Error::Authorization`] unless the session holds `scope`.
    ///
    /// The session's granted scopes are authoritative, not the token's `scope` claim.
    pub fn require_scope(&self, scope: &str) -> Result<()> {
        if self.session.has_scope(scope) {
            return Ok(());
        }
        audit::emit(&audit::AuditEvent::scope_denied(
            &self.session.identity,
            &self.session.session_id,
            scope,
        ));
        Err(Error::Authorization {
            required: scope.to_string(),
        })
    }
}

/// Extract a bearer token from the `Authorization` header
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split_once(' '))
        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
        .map(|(_, token)| token.trim())
        .filter(|t| !t.is_empty())
}

/// Guard middleware for protected routes
pub async fn require_session(
    State(gateway): State<Arc<DelegationGateway>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    let Some(token) = bearer_token(request.headers()) else {
        warn!(path = %path, "Missing Authorization header");
        return Error::Authentication("missing bearer token".to_string()).into_response();
    };

    match gateway.authenticate(token).await {
        Ok(call) => {
            debug!(login = %call.identity().login, path = %path, "Authenticated request");
            request.extensions_mut().insert(call);
            next.run(request).await
        }
        Err(e) => {
            warn!(path = %path, error = %e, "Rejected protected request");
            e.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;
    use crate::delegation::now_secs;

    fn call(scopes: &[&str]) -> DelegatedCall {
        let session = DelegatedSession {
            session_id: "sid".to_string(),
            provider_credential: ProviderCredential::new("gho_x"),
            identity: ProviderIdentity {
                subject: "1".to_string(),
                login: "octocat".to_string(),
                name: None,
                email: None,
            },
            granted_scopes: scopes.iter().map(ToString::to_string).collect(),
            issued_at: now_secs(),
            expires_at: now_secs() + 60,
        };
        let claims = InternalClaims {
            iss: "mcp-oauth-gateway".to_string(),
            sub: "1".to_string(),
            login: "octocat".to_string(),
            sid: "sid".to_string(),
            // The claim lists more than the session; the session wins.
            scope: "repo gist".to_string(),
            iat: now_secs(),
            exp: now_secs() + 60,
            jti: "j".to_string(),
        };
        DelegatedCall::new(session, claims)
    }

    #[test]
    fn require_scope_uses_session_not_claim() {
        let call = call(&["gist"]);
        assert!(call.require_scope("gist").is_ok());
        assert!(matches!(
            call.require_scope("repo"),
            Err(Error::Authorization { ref required }) if required == "repo"
        ));
    }

    #[test]
    fn bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers), Some("abc.def"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("bearer xyz"));
        assert_eq!(bearer_token(&headers), Some("xyz"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("BEARER upper"));
        assert_eq!(bearer_token(&headers), Some("upper"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("bEaReR mixed"));
        assert_eq!(bearer_token(&headers), Some("mixed"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearerabc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic dXNlcg=="));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);
    }
}
