use anyhow::Result;
use clap::Parser;
use tracing::info;

use yildly_chat::{app, app_config::AppConfig, AppState};

#[derive(Parser)]
#[command(name = "chat-server")]
#[command(about = "Web chat with a canned-reply bot", long_about = None)]
struct Cli {
    /// Bind address (overrides HOST)
    #[arg(long)]
    host: Option<String>,

    /// Bind port (overrides PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Enable name-only sign-in for local runs (overrides DEV_SIGN_IN)
    #[arg(long)]
    dev_sign_in: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // Load + validate env ONCE
    let mut config = AppConfig::load()?;
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    config.dev_sign_in |= cli.dev_sign_in;

    info!("Starting chat server");

    let state = AppState::from_config(&config)?;
    info!(
        "✓ Sign-in: google={} dev={}",
        state.google.is_some(),
        state.dev.is_some()
    );

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {addr}");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
