use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mcp_cascade_impact::{
    cli::{execute_command, Cli, Commands},
    config::{Config, LogFormat},
    server::{AppState, McpServer},
    ImpactEngine,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    init_logging(&config);

    let engine = match ImpactEngine::from_config(config.clone()).await {
        Ok(engine) => {
            info!(
                backend = ?config.database.backend,
                path = %config.database.path.display(),
                "Impact engine initialized"
            );
            Arc::new(engine)
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize impact engine");
            return Err(e.into());
        }
    };

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config, engine).await,
        command => {
            let result = execute_command(command, &engine).await;
            if result.exit_code == 0 {
                println!("{}", result.message);
            } else {
                eprintln!("{}", result.message);
            }
            std::process::exit(result.exit_code);
        }
    }
}

async fn serve(config: Config, engine: Arc<ImpactEngine>) -> anyhow::Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        "MCP cascade impact server starting..."
    );

    let discovery = engine.spawn_discovery_loop();
    if discovery.is_some() {
        info!(
            interval_secs = config.discovery.interval_secs,
            "Background discovery started"
        );
    }

    let state = Arc::new(AppState::new(config, engine));
    let server = McpServer::new(state);

    info!("Server ready, waiting for requests on stdin...");

    let outcome = server.run().await;

    if let Some(handle) = discovery {
        handle.abort();
    }

    if let Err(e) = outcome {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging. Output goes to stderr, stdout carries the protocol.
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
