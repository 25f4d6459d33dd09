//! HTTP handlers for the login and client-facing OAuth endpoints.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/login/{provider}` | Start a direct browser login |
//! | `GET` | `/auth/callback` | Provider redirect target |
//! | `GET` | `/oauth/authorize` | Start a two-hop login for a registered client |
//! | `POST` | `/oauth/token` | Redeem a client code for an internal token |
//! | `POST` | `/oauth/register` | Dynamic client registration (opt-in) |
//!
//! None of these routes sit behind the session guard: they are how a session
//! comes to exist.

use std::sync::Arc;

use axum::{
    Form, Json, Router,
    extract::{
        Path, Query, State,
        rejection::{FormRejection, JsonRejection, QueryRejection},
    },
    http::{HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tracing::{info, warn};

use super::{
    CallbackOutcome, CallbackParams, ClientAuthorizeParams, DelegationGateway, RegistrationRequest,
    TokenRequest,
};
use crate::Error;
use crate::oauth::pages;

/// Query of `/login/{provider}`
#[derive(Debug, Default, Deserialize)]
pub struct LoginQuery {
    /// Space- or comma-separated scopes narrowing the defaults
    #[serde(default)]
    pub scope: Option<String>,
}

/// Build the delegation routes
pub fn delegation_routes(gateway: Arc<DelegationGateway>) -> Router {
    Router::new()
        .route("/login/{provider}", get(start_login))
        .route("/auth/callback", get(auth_callback))
        .route("/oauth/authorize", get(client_authorize))
        .route("/oauth/token", post(client_token))
        .route("/oauth/register", post(register_client))
        .with_state(gateway)
}

/// `GET /login/{provider}`
async fn start_login(
    State(gateway): State<Arc<DelegationGateway>>,
    Path(provider): Path<String>,
    query: Result<Query<LoginQuery>, QueryRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => return Error::from(rejection).into_response(),
    };
    if provider != gateway.provider_name() {
        return Error::InvalidRequest(format!("Unknown provider '{provider}'")).into_response();
    }

    match gateway.begin_login(query.scope.as_deref()).await {
        Ok(url) => Redirect::to(url.as_str()).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `GET /auth/callback`
async fn auth_callback(
    State(gateway): State<Arc<DelegationGateway>>,
    params: Result<Query<CallbackParams>, QueryRejection>,
) -> Response {
    let result = match params {
        Ok(Query(params)) => gateway.complete_callback(params).await,
        Err(rejection) => Err(Error::from(rejection)),
    };
    match result {
        Ok(CallbackOutcome::Token(issued)) => {
            info!(login = %issued.session.identity.login, "Rendering token page");
            let page = pages::success_page(
                &issued.session.identity.login,
                &issued.access_token,
                issued.session.expires_at,
            );
            no_store(Html(page).into_response())
        }
        Ok(CallbackOutcome::ClientRedirect(url)) => Redirect::to(url.as_str()).into_response(),
        Err(e) => {
            warn!(error = %e, "Login callback failed");
            let page = pages::error_page(e.error_code(), &e.public_message());
            no_store((e.status_code(), Html(page)).into_response())
        }
    }
}

/// `GET /oauth/authorize`
async fn client_authorize(
    State(gateway): State<Arc<DelegationGateway>>,
    params: Result<Query<ClientAuthorizeParams>, QueryRejection>,
) -> Response {
    let result = match params {
        Ok(Query(params)) => gateway.begin_client_authorization(params).await,
        Err(rejection) => Err(Error::from(rejection)),
    };
    match result {
        Ok(url) => Redirect::to(url.as_str()).into_response(),
        Err(e) => {
            warn!(error = %e, "Rejected client authorization request");
            e.into_response()
        }
    }
}

/// `POST /oauth/token`
async fn client_token(
    State(gateway): State<Arc<DelegationGateway>>,
    request: Result<Form<TokenRequest>, FormRejection>,
) -> Response {
    let result = match request {
        Ok(Form(request)) => gateway.exchange_client_code(request).await,
        Err(rejection) => Err(Error::from(rejection)),
    };
    match result {
        Ok(token) => no_store(Json(token).into_response()),
        Err(e) => no_store(e.into_response()),
    }
}

/// `POST /oauth/register`
async fn register_client(
    State(gateway): State<Arc<DelegationGateway>>,
    request: Result<Json<RegistrationRequest>, JsonRejection>,
) -> Response {
    if !gateway.clients.registration_enabled() {
        return StatusCode::NOT_FOUND.into_response();
    }
    let result = request
        .map_err(Error::from)
        .and_then(|Json(request)| gateway.register_client(request));
    match result {
        Ok(response) => (StatusCode::CREATED, Json(response)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Tokens and codes must never be cached by intermediaries
fn no_store(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}
