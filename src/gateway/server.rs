//! Gateway server

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};

use super::router::{AppState, create_router};
use crate::config::Config;
use crate::delegation::{DelegationGateway, store::spawn_sweeper};
use crate::oauth::{AuthorizationServerMetadata, ProtectedResourceMetadata};
use crate::tools::{GitHubApi, ToolExecutor};
use crate::{Error, Result};

/// OAuth delegation gateway server
pub struct Gateway {
    /// Configuration
    config: Config,
    /// Login, session, and token coordinator
    delegation: Arc<DelegationGateway>,
    /// Shutdown channel
    shutdown_tx: tokio::sync::broadcast::Sender<()>,
}

impl Gateway {
    /// Create a new gateway.
    ///
    /// Fails fast when provider credentials or the signing key are missing.
    pub fn new(config: Config) -> Result<Self> {
        let delegation = Arc::new(DelegationGateway::from_config(&config)?);
        Ok(Self::with_delegation(config, delegation))
    }

    /// Create a gateway around an already built coordinator
    #[must_use]
    pub fn with_delegation(config: Config, delegation: Arc<DelegationGateway>) -> Self {
        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
        Self {
            config,
            delegation,
            shutdown_tx,
        }
    }

    /// Build the HTTP application without binding a listener
    pub fn router(&self) -> Result<Router> {
        let api = GitHubApi::new(
            self.delegation.settings.api_base.clone(),
            self.delegation.settings.timeout,
        )?;
        let state = Arc::new(AppState {
            gateway: Arc::clone(&self.delegation),
            tools: Arc::new(ToolExecutor::new(api)),
            authorization_metadata: AuthorizationServerMetadata::for_gateway(&self.config),
            resource_metadata: ProtectedResourceMetadata::for_gateway(&self.config),
        });
        Ok(create_router(state, self.config.server.request_timeout))
    }

    /// Run the gateway until Ctrl-C or SIGTERM
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let app = self.router()?;
        let sweeper = spawn_sweeper(
            Arc::clone(&self.delegation.store),
            self.config.tokens.sweep_interval,
            self.shutdown_tx.subscribe(),
        );

        let listener = TcpListener::bind(addr).await?;

        let base = self.config.server.base_url();
        info!("============================================================");
        info!("MCP OAUTH GATEWAY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(provider = %self.delegation.provider_name(), "Delegating login");
        info!("  GET  {base}/login/{}", self.delegation.provider_name());
        info!("  GET  {base}/auth/callback");
        info!("  POST {base}/tools/{{name}}  (Authorization: Bearer <token>)");
        info!(
            clients = self.delegation.clients.len(),
            registration = self.delegation.clients.registration_enabled(),
            "Client-facing OAuth endpoints at {base}/oauth/*"
        );
        info!("============================================================");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(self.shutdown_tx.clone()))
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        if let Err(e) = sweeper.await {
            error!(error = %e, "Session sweeper task failed");
        }
        info!("Gateway stopped");
        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
