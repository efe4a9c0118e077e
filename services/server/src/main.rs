use std::sync::Arc;

use anyhow::{Context, Result};
use bverify_server::{
    config::AppConfig,
    routes,
    state::{open_ledger, AppState},
    worker::spawn_apply_worker,
};
use receipts::PkiDirectory;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cfg = AppConfig::from_env()?;

    let pki = PkiDirectory::load(&cfg.pki_path)
        .with_context(|| format!("Failed to load PKI directory {}", cfg.pki_path.display()))?;
    info!(accounts=%pki.len(), "pki: loaded");

    let ledger = open_ledger(&cfg, &pki)?;
    let (state, rx) = AppState::new(cfg.clone(), ledger, pki);
    let state = Arc::new(state);

    let shutdown = CancellationToken::new();
    let worker = spawn_apply_worker(state.clone(), rx, state.mailbox.clone(), shutdown.clone());

    let app = routes::router(state);
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", cfg.bind_addr))?;
    info!(addr=%cfg.bind_addr, "bverify-server: listening");

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
            signal.cancel();
        })
        .await
        .context("HTTP server failed")?;

    shutdown.cancel();
    worker.await.ok();
    Ok(())
}
