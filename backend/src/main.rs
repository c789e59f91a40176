//! MCP sendmail server.

use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info, warn};

use mcp_sendmail::{
    config::{CliOverrides, Config},
    create_app,
    logging::init_logging,
    state::AppState,
};

/// MCP server exposing SMTP email tools over Streamable HTTP
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML config file
    #[arg(long, env = "MCP_SENDMAIL_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind to
    #[arg(long, env = "MCP_SENDMAIL_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "MCP_SENDMAIL_PORT")]
    port: Option<u16>,

    /// Log level or filter directive (overrides RUST_LOG)
    #[arg(long, env = "MCP_SENDMAIL_LOG_LEVEL")]
    log_level: Option<String>,
}

impl From<Args> for CliOverrides {
    fn from(args: Args) -> Self {
        Self {
            config_file: args.config,
            host: args.host,
            port: args.port,
            log_level: args.log_level,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::from_figment(args.into())?;

    // Held until exit so the file writer flushes
    let _log_guard = init_logging(config.log_level.as_deref(), config.log_file.as_deref())?;

    info!(
        "Starting MCP sendmail server v{} (SMTP {}:{})",
        env!("CARGO_PKG_VERSION"),
        config.smtp.host,
        config.smtp.port
    );
    if !config.smtp.has_credentials() {
        warn!("SMTP credentials not configured, mail is sent without authentication");
    }

    let state = AppState::new(&config)?;
    state.transport().start().await;

    let app = create_app(state.clone(), &config.cors_allowed_origins);

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);
    info!("MCP endpoint: http://{}/mcp", addr);

    let shutdown_state = state.clone();
    let shutdown_signal = async move {
        wait_for_signal().await;
        info!("Shutting down gracefully...");

        // Closing sessions ends every open SSE stream so the server can drain
        shutdown_state.transport().shutdown().await;
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Resolve on Ctrl+C or, on Unix, SIGTERM.
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
