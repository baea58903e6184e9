// crates/server/src/main.rs
//! Applydesk server binary.
//!
//! Parses flags/env, probes the Claude CLI once so a missing install shows up
//! on the console, then serves the API until Ctrl-C.

use anyhow::Result;
use applydesk_server::{create_app, AppState, ServerConfig};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::parse();

    // RUST_LOG wins over --log.
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.log))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .init();

    eprintln!("\n\u{1f4c4} applydesk v{}\n", env!("CARGO_PKG_VERSION"));

    let addr = config.addr();
    // CLI detection shells out and waits; keep it off the runtime threads.
    let state = tokio::task::spawn_blocking(move || AppState::new(config)).await?;

    let cli = state.cli_status().await;
    if cli.available {
        eprintln!(
            "  \u{2713} claude {} at {}",
            cli.version.as_deref().unwrap_or("(unknown version)"),
            cli.path.as_deref().unwrap_or(state.claude.program()),
        );
    } else {
        eprintln!(
            "  \u{2717} claude CLI not available ({}); tailoring requests will fail",
            state.claude.program()
        );
    }

    let app = create_app(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");
    eprintln!("  \u{2192} http://{}\n", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "could not install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
