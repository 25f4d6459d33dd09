//! Internal token codec, the gateway's own signed bearer credential.
//!
//! Tokens are HS256 JWTs. The claim set is fixed at issuance: `exp` is copied
//! from the backing session and is never extended. A token that verifies here
//! is still only a *claim*; the caller must resolve `sid` against the
//! [`SessionStore`](super::store::SessionStore) before trusting it.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, errors::ErrorKind};
use serde::{Deserialize, Serialize};

use super::store::{DelegatedSession, now_secs};
use crate::{Error, Result};

/// Claims carried by an internal token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalClaims {
    /// Issuer tag
    pub iss: String,
    /// Provider subject id
    pub sub: String,
    /// Provider login handle
    pub login: String,
    /// Backing session id
    pub sid: String,
    /// Space-separated granted scopes (informational; the session is authoritative)
    pub scope: String,
    /// Issued-at (Unix seconds)
    pub iat: u64,
    /// Expiry (Unix seconds)
    pub exp: u64,
    /// Unique token id
    pub jti: String,
}

/// Why a token was refused. Logged, never returned to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenRejection {
    /// Not a JWT, bad base64, bad JSON, missing claim
    Malformed,
    /// Signature does not verify under the gateway key
    BadSignature,
    /// `exp` has passed
    Expired,
    /// `iss` is not this gateway
    WrongIssuer,
    /// Algorithm other than HS256
    WrongAlgorithm,
}

impl TokenRejection {
    /// Log-friendly reason
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::BadSignature => "bad_signature",
            Self::Expired => "expired",
            Self::WrongIssuer => "wrong_issuer",
            Self::WrongAlgorithm => "wrong_algorithm",
        }
    }
}

/// Signs and verifies internal tokens
pub struct InternalTokenCodec {
    issuer: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl InternalTokenCodec {
    /// Create a codec for `issuer` signing with `signing_key`
    #[must_use]
    pub fn new(signing_key: &[u8], issuer: impl Into<String>) -> Self {
        let issuer = issuer.into();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        validation.validate_aud = false;
        validation.leeway = 0;

        Self {
            issuer,
            encoding_key: EncodingKey::from_secret(signing_key),
            decoding_key: DecodingKey::from_secret(signing_key),
            validation,
        }
    }

    /// Issuer tag written into every token
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Mint a token bound to `session`.
    ///
    /// The token expires together with the session.
    pub fn mint(&self, session: &DelegatedSession) -> Result<(String, InternalClaims)> {
        let claims = InternalClaims {
            iss: self.issuer.clone(),
            sub: session.identity.subject.clone(),
            login: session.identity.login.clone(),
            sid: session.session_id.clone(),
            scope: session.granted_scopes.join(" "),
            iat: now_secs(),
            exp: session.expires_at,
            jti: uuid::Uuid::new_v4().to_string(),
        };

        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| Error::Internal(format!("Failed to sign internal token: {e}")))?;

        Ok((token, claims))
    }

    /// Verify signature, issuer, and expiry.
    ///
    /// Expiry is checked a second time against the wall clock, independent of
    /// the JWT library's own validation.
    pub fn verify(&self, token: &str) -> std::result::Result<InternalClaims, TokenRejection> {
        let data = jsonwebtoken::decode::<InternalClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| classify(e.kind()))?;

        let claims = data.claims;
        if claims.iss != self.issuer {
            return Err(TokenRejection::WrongIssuer);
        }
        if now_secs() >= claims.exp {
            return Err(TokenRejection::Expired);
        }
        Ok(claims)
    }
}

fn classify(kind: &ErrorKind) -> TokenRejection {
    match kind {
        ErrorKind::InvalidSignature => TokenRejection::BadSignature,
        ErrorKind::ExpiredSignature => TokenRejection::Expired,
        ErrorKind::InvalidIssuer => TokenRejection::WrongIssuer,
        ErrorKind::InvalidAlgorithm => TokenRejection::WrongAlgorithm,
        _ => TokenRejection::Malformed,
    }
}
