//! OAuth building blocks for the delegation gateway
//!
//! - PKCE (RFC 7636) verifier/challenge generation and verification
//! - Third-party authorization server client (GitHub)
//! - Authorization server / protected resource metadata (RFC 8414, RFC 9728)
//! - Browser pages rendered at the end of the login

pub mod metadata;
pub mod pages;
pub mod pkce;
pub mod provider;

pub use metadata::{AuthorizationServerMetadata, ProtectedResourceMetadata};
pub use pkce::PkcePair;
pub use provider::{
    AuthorizationProvider, GitHubProvider, ProviderCredential, ProviderIdentity, ProviderToken,
};
