//! MCP OAuth Gateway - GitHub login, PKCE, and session-bound bearer tokens

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use mcp_oauth_gateway::{
    cli::{Cli, Command},
    config::Config,
    gateway::Gateway,
    oauth::{AuthorizationServerMetadata, ProtectedResourceMetadata},
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(code) => return code,
    };

    match cli.command {
        Some(Command::CheckConfig) => check_config(&config),
        Some(Command::Metadata) => print_metadata(&config),
        Some(Command::Serve) | None => run_server(config).await,
    }
}

fn load_config(cli: &Cli) -> Result<Config, ExitCode> {
    let mut config = Config::load(cli.config.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {e}");
        ExitCode::FAILURE
    })?;

    // Override with CLI args
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(ref host) = cli.host {
        config.server.host.clone_from(host);
    }
    Ok(config)
}

fn check_config(config: &Config) -> ExitCode {
    match config.validate() {
        Ok(()) => {
            println!("Configuration OK");
            println!("  provider:  {}", config.provider.name);
            println!("  listen:    {}:{}", config.server.host, config.server.port);
            println!("  public:    {}", config.server.base_url());
            println!("  clients:   {}", config.clients.registered.len());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Configuration invalid: {e}");
            ExitCode::FAILURE
        }
    }
}

fn print_metadata(config: &Config) -> ExitCode {
    let documents = serde_json::json!({
        "oauth-authorization-server": AuthorizationServerMetadata::for_gateway(config),
        "oauth-protected-resource": ProtectedResourceMetadata::for_gateway(config),
    });
    match serde_json::to_string_pretty(&documents) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Failed to serialize metadata: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_server(config: Config) -> ExitCode {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting MCP OAuth Gateway"
    );

    let gateway = match Gateway::new(config) {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to create gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = gateway.run().await {
        error!("Gateway error: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
