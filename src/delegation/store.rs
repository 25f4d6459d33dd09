//! Session store: pending logins, delegated sessions, and one-time client codes.
//!
//! The [`SessionStore`] trait abstracts over storage backends so a
//! multi-instance deployment can swap in an external cache. The in-process
//! implementation is [`InMemorySessionStore`], three `DashMap`s with a
//! background sweeper.
//!
//! # Invariants
//!
//! - Every read path treats an expired record exactly like a missing one and
//!   evicts it on the spot. The sweeper only reclaims memory.
//! - `take_*` operations are atomic removals: two concurrent callbacks with the
//!   same `state` observe exactly one `Some`.
//! - No map-wide lock is ever held: `DashMap` locks one shard per operation,
//!   and nothing here awaits while holding an entry guard.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

use crate::oauth::{ProviderCredential, ProviderIdentity};

/// Current Unix time in seconds
#[must_use]
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

/// The end client's own authorization request (two-hop variant)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAuthorizationRequest {
    /// Registered client id
    pub client_id: String,
    /// Client redirect URI (already matched against the registration)
    pub redirect_uri: String,
    /// Client state, echoed back verbatim
    pub state: Option<String>,
    /// Client PKCE challenge for the gateway hop
    pub code_challenge: Option<String>,
}

/// A login that was started but has not come back from the provider yet
#[derive(Debug, Clone)]
pub struct PendingAuthorization {
    /// Opaque one-time correlation value sent to the provider
    pub state: String,
    /// PKCE verifier for the provider hop (never leaves the gateway)
    pub pkce_verifier: Option<String>,
    /// Challenge sent to the provider
    pub pkce_challenge: Option<String>,
    /// The gateway callback the provider redirects to
    pub redirect_uri: String,
    /// Scopes requested from the provider
    pub requested_scopes: Vec<String>,
    /// Present when a client-facing `/oauth/authorize` started this login
    pub client_request: Option<ClientAuthorizationRequest>,
    /// Creation time (Unix seconds)
    pub created_at: u64,
    /// Expiry time (Unix seconds)
    pub expires_at: u64,
}

impl PendingAuthorization {
    /// Returns `true` once the login window has closed
    #[must_use]
    pub fn is_expired(&self) -> bool {
        now_secs() >= self.expires_at
    }
}

/// Server-side record binding an identity to a live provider credential
#[derive(Debug, Clone)]
pub struct DelegatedSession {
    /// Unguessable session id (referenced by the internal token's `sid`)
    pub session_id: String,
    /// Provider access token. Never returned to clients.
    pub provider_credential: ProviderCredential,
    /// Identity resolved from the provider
    pub identity: ProviderIdentity,
    /// Scopes the provider actually granted
    pub granted_scopes: Vec<String>,
    /// Issued-at (Unix seconds)
    pub issued_at: u64,
    /// Hard expiry (Unix seconds)
    pub expires_at: u64,
}

impl DelegatedSession {
    /// Returns `true` if the session has passed its expiry time
    #[must_use]
    pub fn is_expired(&self) -> bool {
        now_secs() >= self.expires_at
    }

    /// Whether the provider granted `scope`
    #[must_use]
    pub fn has_scope(&self, scope: &str) -> bool {
        self.granted_scopes.iter().any(|s| s == scope)
    }

    /// Seconds until expiry (0 when expired)
    #[must_use]
    pub fn remaining_secs(&self) -> u64 {
        self.expires_at.saturating_sub(now_secs())
    }
}

/// One-time code handed to a client-facing redirect URI
#[derive(Debug, Clone)]
pub struct ClientGrant {
    /// The code value
    pub code: String,
    /// Client the code was issued to
    pub client_id: String,
    /// Redirect URI the code was delivered to
    pub redirect_uri: String,
    /// Client PKCE challenge to check at the token endpoint
    pub code_challenge: Option<String>,
    /// Session the code redeems into
    pub session_id: String,
    /// Expiry (Unix seconds)
    pub expires_at: u64,
}

impl ClientGrant {
    /// Returns `true` if the code can no longer be redeemed
    #[must_use]
    pub fn is_expired(&self) -> bool {
        now_secs() >= self.expires_at
    }
}

/// Counts from one sweep pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepStats {
    /// Expired pending logins removed
    pub pending: usize,
    /// Expired sessions removed
    pub sessions: usize,
    /// Expired client codes removed
    pub grants: usize,
}

impl SweepStats {
    /// Total number of removed records
    #[must_use]
    pub fn total(&self) -> usize {
        self.pending + self.sessions + self.grants
    }
}

/// Trait abstracting the session storage backend.
///
/// Implementations must be `Send + Sync` because the store is shared across
/// async tasks.
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync + 'static {
    /// Persist a pending login keyed by its `state`.
    async fn insert_pending(&self, pending: PendingAuthorization);

    /// Remove and return the pending login for `state`.
    ///
    /// Returns `None` if it was never issued, already consumed, or expired.
    async fn take_pending(&self, state: &str) -> Option<PendingAuthorization>;

    /// Create a delegated session.
    async fn create_session(&self, session: DelegatedSession);

    /// Look up a live session. Expired sessions are indistinguishable from missing ones.
    async fn get_session(&self, session_id: &str) -> Option<DelegatedSession>;

    /// Delete a session. Returns `true` if a live session was removed.
    async fn delete_session(&self, session_id: &str) -> bool;

    /// Persist a one-time client code.
    async fn insert_grant(&self, grant: ClientGrant);

    /// Remove and return a client code. Expired codes yield `None`.
    async fn take_grant(&self, code: &str) -> Option<ClientGrant>;

    /// Remove every expired record. Called periodically by the sweeper.
    async fn sweep_expired(&self) -> SweepStats;

    /// Number of live sessions.
    async fn session_count(&self) -> usize;
}

/// In-memory session store backed by `DashMap`s
#[derive(Default)]
pub struct InMemorySessionStore {
    pending: DashMap<String, PendingAuthorization>,
    sessions: DashMap<String, DelegatedSession>,
    grants: DashMap<String, ClientGrant>,
}

impl InMemorySessionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn insert_pending(&self, pending: PendingAuthorization) {
        self.pending.insert(pending.state.clone(), pending);
    }

    async fn take_pending(&self, state: &str) -> Option<PendingAuthorization> {
        let (_, pending) = self.pending.remove(state)?;
        if pending.is_expired() {
            debug!("Discarded expired pending authorization");
            return None;
        }
        Some(pending)
    }

    async fn create_session(&self, session: DelegatedSession) {
        self.sessions.insert(session.session_id.clone(), session);
    }

    async fn get_session(&self, session_id: &str) -> Option<DelegatedSession> {
        let entry = self.sessions.get(session_id)?;
        let session = entry.clone();
        drop(entry);

        if session.is_expired() {
            // Lazy eviction: remove on access
            self.sessions
                .remove_if(session_id, |_, s| s.is_expired());
            debug!(login = %session.identity.login, "Lazy-evicted expired session");
            return None;
        }

        Some(session)
    }

    async fn delete_session(&self, session_id: &str) -> bool {
        self.sessions
            .remove(session_id)
            .is_some_and(|(_, s)| !s.is_expired())
    }

    async fn insert_grant(&self, grant: ClientGrant) {
        self.grants.insert(grant.code.clone(), grant);
    }

    async fn take_grant(&self, code: &str) -> Option<ClientGrant> {
        let (_, grant) = self.grants.remove(code)?;
        if grant.is_expired() {
            self.sessions.remove(&grant.session_id);
            debug!(client_id = %grant.client_id, "Discarded expired client code");
            return None;
        }
        Some(grant)
    }

    async fn sweep_expired(&self) -> SweepStats {
        let before = (self.pending.len(), self.sessions.len(), self.grants.len());

        self.pending.retain(|_, p| !p.is_expired());
        // An unredeemed client code is the only way to reach its session
        let mut orphaned = Vec::new();
        self.grants.retain(|_, g| {
            let expired = g.is_expired();
            if expired {
                orphaned.push(g.session_id.clone());
            }
            !expired
        });
        for session_id in &orphaned {
            self.sessions.remove(session_id);
        }
        self.sessions.retain(|_, s| !s.is_expired());

        SweepStats {
            pending: before.0.saturating_sub(self.pending.len()),
            sessions: before.1.saturating_sub(self.sessions.len()),
            grants: before.2.saturating_sub(self.grants.len()),
        }
    }

    async fn session_count(&self) -> usize {
        self.sessions.iter().filter(|e| !e.value().is_expired()).count()
    }
}

/// Spawn a background task that sweeps expired records every `interval`.
///
/// The task exits when the `shutdown` receiver fires.
pub fn spawn_sweeper(
    store: Arc<dyn SessionStore>,
    interval: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let stats = store.sweep_expired().await;
                    if stats.total() > 0 {
                        debug!(
                            pending = stats.pending,
                            sessions = stats.sessions,
                            grants = stats.grants,
                            "Swept expired records"
                        );
                    }
                }
                _ = shutdown.recv() => {
                    debug!("Session sweeper shutting down");
                    break;
                }
            }
        }
    })
}
