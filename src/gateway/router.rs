//! HTTP router

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Extension, Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::{Value, json};
use tower_http::{catch_panic::CatchPanicLayer, timeout::TimeoutLayer, trace::TraceLayer};

use super::auth::{DelegatedCall, require_session};
use crate::delegation::DelegationGateway;
use crate::delegation::handler::delegation_routes;
use crate::oauth::{AuthorizationServerMetadata, ProtectedResourceMetadata};
use crate::tools::{self, ToolExecutor};
use crate::Result;

/// Shared application state
pub struct AppState {
    /// Login, session, and token coordinator
    pub gateway: Arc<DelegationGateway>,
    /// Protected tool runner
    pub tools: Arc<ToolExecutor>,
    /// RFC 8414 document
    pub authorization_metadata: AuthorizationServerMetadata,
    /// RFC 9728 document
    pub resource_metadata: ProtectedResourceMetadata,
}

/// Create the router
pub fn create_router(state: Arc<AppState>, request_timeout: Duration) -> Router {
    let gateway = Arc::clone(&state.gateway);

    let public = Router::new()
        .route("/", get(info_handler))
        .route("/health", get(health_handler))
        .route("/tools", get(list_tools_handler))
        .route(
            "/.well-known/oauth-authorization-server",
            get(authorization_metadata_handler),
        )
        .route(
            "/.well-known/oauth-protected-resource",
            get(resource_metadata_handler),
        )
        .with_state(Arc::clone(&state));

    let protected = Router::new()
        .route("/tools/{name}", post(call_tool_handler))
        .route("/logout", post(logout_handler))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&gateway),
            require_session,
        ))
        .with_state(state);

    Router::new()
        .merge(public)
        .merge(protected)
        .merge(delegation_routes(gateway))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
}

/// `GET /` server info
async fn info_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let provider = state.gateway.provider_name();
    Json(json!({
        "server": "mcp-oauth-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "auth_provider": provider,
        "endpoints": {
            "login": format!("/login/{provider}"),
            "callback": "/auth/callback",
            "logout": "/logout",
            "tools": "/tools",
            "authorize": "/oauth/authorize",
            "token": "/oauth/token",
        },
        "tools": tools::catalog().iter().map(|t| t.name).collect::<Vec<_>>(),
    }))
}

/// `GET /health` liveness
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "active_sessions": state.gateway.store.session_count().await,
    }))
}

/// `GET /tools` catalog
async fn list_tools_handler() -> impl IntoResponse {
    Json(json!({ "tools": tools::catalog() }))
}

async fn authorization_metadata_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.authorization_metadata.clone())
}

async fn resource_metadata_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.resource_metadata.clone())
}

/// `POST /tools/{name}` (guarded)
async fn call_tool_handler(
    State(state): State<Arc<AppState>>,
    Extension(call): Extension<DelegatedCall>,
    Path(name): Path<String>,
    body: std::result::Result<Option<Json<Value>>, JsonRejection>,
) -> Result<Json<Value>> {
    let args = body?.map_or_else(|| json!({}), |Json(v)| v);
    let result = state.tools.invoke(&name, &call, args).await?;
    Ok(Json(json!({ "tool": name, "result": result })))
}

/// `POST /logout` (guarded)
async fn logout_handler(
    State(state): State<Arc<AppState>>,
    Extension(call): Extension<DelegatedCall>,
) -> impl IntoResponse {
    let removed = state.gateway.logout(&call).await;
    Json(json!({
        "logged_out": removed,
        "login": call.identity().login,
    }))
}
