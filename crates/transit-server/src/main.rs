//! `transit-server` binary entry point.
//!
//! Startup sequence:
//! 1. Load and validate [`Config`] from environment variables.
//! 2. Initialise the telemetry pipeline (tracing + optional OTLP).
//! 3. Build the empty key registry and the engines on top of it.
//! 4. Build the Axum router and serve it over HTTPS or plain HTTP.

mod batch;
mod config;
mod crypto;
mod engine;
mod envelope;
mod error;
mod keys;
mod server;
mod telemetry;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use batch::BatchProcessor;
use config::Config;
use engine::CryptoEngine;
use keys::{KeyStore, OsKeySource};
use server::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg = Config::from_env().map_err(|e| {
        // Telemetry is not yet up; write to stderr directly.
        eprintln!("ERROR: configuration invalid: {e:#}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init_telemetry(cfg.otel_exporter_otlp_endpoint.as_deref(), &cfg.log_level)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = cfg.listen_port,
        tls = cfg.tls_paths().is_some(),
        "transit-server starting"
    );

    // -----------------------------------------------------------------------
    // 3. Key registry and engines
    // -----------------------------------------------------------------------
    let store = KeyStore::new(Arc::new(OsKeySource));
    let engine = CryptoEngine::new(store, cfg.engine_limits());
    let batch = BatchProcessor::new(engine, cfg.batch_limits());

    // -----------------------------------------------------------------------
    // 4. HTTP server
    // -----------------------------------------------------------------------
    let router = server::router::build(AppState::new(batch), cfg.request_timeout());

    let addr: std::net::SocketAddr = ([0, 0, 0, 0], cfg.listen_port).into();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "listening");

    match cfg.tls_paths() {
        Some((cert_path, key_path)) => {
            let cert_pem = std::fs::read(cert_path)
                .with_context(|| format!("failed to read TLS certificate {cert_path}"))?;
            let key_pem = std::fs::read(key_path)
                .with_context(|| format!("failed to read TLS private key {key_path}"))?;
            let tls_config = server::tls::build_server_config(&cert_pem, &key_pem)?;
            server::tls::serve_tls(listener, tls_config, router).await?;
        }
        None => axum::serve(listener, router).await?,
    }

    Ok(())
}
