//! mlq-daemon entry point.
//!
//! Tracing, config, database, engine and scheduler wiring,
//! middleware, then the HTTP server. Route handlers live in `routes.rs`;
//! shared state in `state.rs`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use mlq_daemon::{routes, state};
use mlq_db::PgQuestionStore;
use mlq_runtime::ReconcileScheduler;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let paths = mlq_config::paths_from_env();
    let path_refs: Vec<&str> = paths.iter().map(String::as_str).collect();
    let loaded = mlq_config::load_layered_yaml(&path_refs).context("load config")?;
    info!(config_hash = %loaded.config_hash, files = paths.len(), "config loaded");

    let pool = mlq_db::connect_from_env().await?;
    mlq_db::migrate(&pool).await?;
    let store = Arc::new(PgQuestionStore::new(pool));

    let bus = state::bus_channel();
    let sink = Arc::new(state::BusSink::new(bus.clone()));
    let engine = Arc::new(mlq_runtime::build_engine(&loaded, store, sink)?);
    let shared = Arc::new(state::AppState::new(bus.clone(), Arc::clone(&engine)));

    state::spawn_heartbeat(bus, Duration::from_secs(1));
    let scheduler = ReconcileScheduler::new(Arc::clone(&engine));
    let scheduler_task = scheduler.spawn();

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr_from_env().unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8898)));
    info!("mlq-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    scheduler.shutdown();
    engine.stop().await;
    let _ = scheduler_task.await;
    info!("mlq-daemon stopped");

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("MLQ_DAEMON_ADDR").ok()?.parse().ok()
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers(tower_http::cors::Any)
}
