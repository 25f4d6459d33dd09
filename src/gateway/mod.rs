//! Gateway server implementation

pub mod auth;
mod router;
mod server;

pub use auth::{DelegatedCall, require_session};
pub use router::{AppState, create_router};
pub use server::Gateway;
