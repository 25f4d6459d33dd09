//! MCP OAuth Gateway Library
//!
//! OAuth 2.1 delegation gateway for MCP tool servers: end users log in with a
//! third-party provider (GitHub), and the gateway issues its own
//! session-bound bearer tokens in return.
//!
//! # Features
//!
//! - **Delegated login**: Authorization Code flow with PKCE (S256) against the provider
//! - **Session-bound tokens**: HS256 internal tokens that stop working the moment
//!   their session ends (logout or expiry)
//! - **Protected tools**: GitHub calls made with the session's provider credential,
//!   gated per scope
//! - **Client-facing OAuth**: `/oauth/authorize` + `/oauth/token` for MCP clients
//!   that run their own PKCE, with optional dynamic registration
//! - **Metadata**: RFC 8414 and RFC 9728 discovery documents

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod delegation;
pub mod error;
pub mod gateway;
pub mod oauth;
pub mod tools;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let result = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };

    result.map_err(|e| Error::Internal(format!("Failed to initialize tracing: {e}")))
}
