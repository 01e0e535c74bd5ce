use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::{header, HeaderName, HeaderValue, Method};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use hub_domain::config::{Config, CorsConfig};
use hub_server::cli::{Cli, Command};
use hub_server::{api, bootstrap};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Version) => {
            println!("agent-hub {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            let config = Arc::new(hub_server::cli::load_config(&cli)?);
            run_server(config).await
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,hub_server=debug")),
        )
        .init();
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "agent-hub starting");

    let state = bootstrap::build_app_state(config.clone())?;
    let background = bootstrap::spawn_background_tasks(&state);

    // ── Router ───────────────────────────────────────────────────────
    let cors = build_cors_layer(&config.server.cors);
    let app = api::router(state.clone())
        .layer(cors)
        .with_state(state.clone());

    // ── Bind ─────────────────────────────────────────────────────────
    let addr = config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, "agent-hub listening");

    // ── Shutdown signal ──────────────────────────────────────────────
    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone());

    // Drain task: wait for turns to finish within the grace window, then
    // force-cancel and give them a short post-force drain. SSE streams
    // end as their turns finalize, which lets the server close out its
    // remaining connections.
    let drain = {
        let state = state.clone();
        let shutdown = shutdown.clone();
        let grace = Duration::from_secs(config.server.shutdown_grace_secs);
        tokio::spawn(async move {
            shutdown.cancelled().await;
            tracing::info!("shutdown requested, draining active turns");
            if !state.controller.wait_for_idle(grace).await {
                let cancelled = state.controller.cancel_all();
                tracing::warn!(cancelled, "drain grace elapsed, force-cancelled turns");
                let _ = state.controller.wait_for_idle(Duration::from_secs(2)).await;
            }
        })
    };

    axum::serve(listener, app)
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move { shutdown.cancelled().await }
        })
        .await
        .context("server error")?;

    // ── Teardown ─────────────────────────────────────────────────────
    let _ = drain.await;
    for task in background {
        task.abort();
    }
    state.agents.close_all().await;
    tracing::info!("agent-hub stopped");
    Ok(())
}

fn spawn_signal_listener(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("installing SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        shutdown.cancel();
    });
}

/// Exact-origin CORS allowlist from config; invalid origins are skipped
/// with a warning.
fn build_cors_layer(cors: &CorsConfig) -> CorsLayer {
    let mut origins: Vec<HeaderValue> = Vec::new();
    for origin in &cors.allowed_origins {
        match origin.parse::<HeaderValue>() {
            Ok(value) => origins.push(value),
            Err(_) => tracing::warn!(origin = %origin, "invalid CORS origin, skipping"),
        }
    }

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-client-id"),
        ])
}
