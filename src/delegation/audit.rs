//! Audit logging for login, session, and client-code lifecycle events.
//!
//! Every event is emitted via `tracing::info!` (or `warn!` for failures) with
//! structured fields, making the audit trail queryable by any log aggregator.
//! Credentials and internal tokens are never part of an event.
//!
//! # Events
//!
//! | Event | When |
//! |-------|------|
//! | `login.started` | A pending authorization was created |
//! | `login.completed` | The provider confirmed identity and a session was created |
//! | `login.failed` | State, code exchange, or identity lookup failed |
//! | `session.used` | A protected call resolved its session |
//! | `session.rejected` | A bearer token failed verification or its session is gone |
//! | `session.revoked` | A session was deleted by logout |
//! | `scope.denied` | A live session lacked the scope an operation needs |
//! | `grant.issued` | A one-time client code was sent to a client redirect URI |
//! | `grant.redeemed` | A client code was exchanged for an internal token |
//! | `grant.rejected` | The token endpoint refused a code |

use serde::Serialize;
use tracing::{info, warn};

use crate::oauth::ProviderIdentity;

/// Structured audit event emitted for every lifecycle transition.
#[derive(Debug, Serialize)]
pub struct AuditEvent {
    /// Event type string (e.g., `"login.completed"`).
    pub event: &'static str,
    /// Identity associated with the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<ProviderIdentity>,
    /// Session id. Logged so logout and expiry can be correlated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Client id (two-hop variant).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Scopes requested, granted, or required, depending on the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
    /// Human-readable reason for failure events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditEvent {
    fn bare(event: &'static str) -> Self {
        Self {
            event,
            identity: None,
            session_id: None,
            client_id: None,
            scopes: None,
            reason: None,
        }
    }

    /// Construct a `login.started` event.
    #[must_use]
    pub fn login_started(scopes: &[String], client_id: Option<&str>) -> Self {
        Self {
            scopes: Some(scopes.to_vec()),
            client_id: client_id.map(str::to_string),
            ..Self::bare("login.started")
        }
    }

    /// Construct a `login.completed` event.
    #[must_use]
    pub fn login_completed(identity: &ProviderIdentity, session_id: &str, granted: &[String]) -> Self {
        Self {
            identity: Some(identity.clone()),
            session_id: Some(session_id.to_string()),
            scopes: Some(granted.to_vec()),
            ..Self::bare("login.completed")
        }
    }

    /// Construct a `login.failed` event.
    #[must_use]
    pub fn login_failed(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::bare("login.failed")
        }
    }

    /// Construct a `session.used` event.
    #[must_use]
    pub fn session_used(identity: &ProviderIdentity, session_id: &str) -> Self {
        Self {
            identity: Some(identity.clone()),
            session_id: Some(session_id.to_string()),
            ..Self::bare("session.used")
        }
    }

    /// Construct a `session.rejected` event.
    #[must_use]
    pub fn session_rejected(reason: impl Into<String>, session_id: Option<&str>) -> Self {
        Self {
            session_id: session_id.map(str::to_string),
            reason: Some(reason.into()),
            ..Self::bare("session.rejected")
        }
    }

    /// Construct a `session.revoked` event.
    #[must_use]
    pub fn session_revoked(identity: &ProviderIdentity, session_id: &str) -> Self {
        Self {
            identity: Some(identity.clone()),
            session_id: Some(session_id.to_string()),
            ..Self::bare("session.revoked")
        }
    }

    /// Construct a `scope.denied` event.
    #[must_use]
    pub fn scope_denied(identity: &ProviderIdentity, session_id: &str, required: &str) -> Self {
        Self {
            identity: Some(identity.clone()),
            session_id: Some(session_id.to_string()),
            scopes: Some(vec![required.to_string()]),
            ..Self::bare("scope.denied")
        }
    }

    /// Construct a `grant.issued` event.
    #[must_use]
    pub fn grant_issued(client_id: &str, session_id: &str) -> Self {
        Self {
            client_id: Some(client_id.to_string()),
            session_id: Some(session_id.to_string()),
            ..Self::bare("grant.issued")
        }
    }

    /// Construct a `grant.redeemed` event.
    #[must_use]
    pub fn grant_redeemed(client_id: &str, session_id: &str) -> Self {
        Self {
            client_id: Some(client_id.to_string()),
            session_id: Some(session_id.to_string()),
            ..Self::bare("grant.redeemed")
        }
    }

    /// Construct a `grant.rejected` event.
    #[must_use]
    pub fn grant_rejected(reason: impl Into<String>, client_id: Option<&str>) -> Self {
        Self {
            client_id: client_id.map(str::to_string),
            reason: Some(reason.into()),
            ..Self::bare("grant.rejected")
        }
    }

    fn is_failure(&self) -> bool {
        matches!(
            self.event,
            "login.failed" | "session.rejected" | "scope.denied" | "grant.rejected"
        )
    }
}

/// Emit an audit event through `tracing`.
pub fn emit(event: &AuditEvent) {
    let login = event.identity.as_ref().map(|i| i.login.as_str());
    let subject = event.identity.as_ref().map(|i| i.subject.as_str());
    let scopes = event.scopes.as_ref().map(|s| s.join(" "));

    if event.is_failure() {
        warn!(
            target: "audit",
            event = event.event,
            login = login,
            subject = subject,
            session_id = event.session_id.as_deref(),
            client_id = event.client_id.as_deref(),
            scopes = scopes.as_deref(),
            reason = event.reason.as_deref(),
            "audit"
        );
    } else {
        info!(
            target: "audit",
            event = event.event,
            login = login,
            subject = subject,
            session_id = event.session_id.as_deref(),
            client_id = event.client_id.as_deref(),
            scopes = scopes.as_deref(),
            "audit"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn octocat() -> ProviderIdentity {
        ProviderIdentity {
            subject: "583231".to_string(),
            login: "octocat".to_string(),
            name: None,
            email: None,
        }
    }

    #[test]
    fn completed_event_serializes_without_empty_fields() {
        let ev = AuditEvent::login_completed(&octocat(), "sid", &["gist".to_string()]);
        let json = serde_json::to_value(&ev).unwrap();

        assert_eq!(json["event"], "login.completed");
        assert_eq!(json["identity"]["login"], "octocat");
        assert!(json.get("reason").is_none());
        assert!(json.get("client_id").is_none());
    }

    #[test]
    fn failure_events_are_classified() {
        assert!(AuditEvent::login_failed("bad state").is_failure());
        assert!(AuditEvent::scope_denied(&octocat(), "sid", "repo").is_failure());
        assert!(!AuditEvent::session_used(&octocat(), "sid").is_failure());
    }
}
