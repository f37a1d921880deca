// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use ledger_identity_lifecycle::api::router;
use ledger_identity_lifecycle::config::{LifecycleConfig, LOG_FORMAT_ENV};
use ledger_identity_lifecycle::monitor::CertificateMonitor;
use ledger_identity_lifecycle::scheduler::LifecycleScheduler;
use ledger_identity_lifecycle::secrets::SecretManager;
use ledger_identity_lifecycle::session::SessionKeyManager;
use ledger_identity_lifecycle::state::AppState;
use ledger_identity_lifecycle::storage::{IdentityDatabase, WalletStore};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var(LOG_FORMAT_ENV)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "Ledger identity lifecycle service failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = LifecycleConfig::from_env();

    // Secret backend and master key
    let secrets = SecretManager::from_config(&config.secrets).await?;
    let master_key = secrets
        .resolve_master_key(config.secrets.auto_provision_master_key)
        .await?;
    tracing::info!(mode = %secrets.mode(), "Master key loaded");

    // Identity database
    let db = Arc::new(IdentityDatabase::open(&config.database_path())?);
    tracing::info!(path = %config.database_path().display(), "Identity database opened");

    // Session signing keys: never run with zero active keys
    let session_keys =
        SessionKeyManager::new(db.clone(), master_key.clone(), config.session.clone());
    let active_key = session_keys.initialize()?;
    tracing::info!(key_id = %active_key, "Session signing key ready");

    let store = WalletStore::new(db.clone(), master_key);
    let monitor = CertificateMonitor::new(store);

    // The CA registrar is supplied by the embedding deployment. The bundled
    // binary monitors and rotates keys but does not re-enroll.
    let scheduler = LifecycleScheduler::new(
        monitor,
        session_keys.clone(),
        config.renewal.threshold_days,
        config.session.rotation_interval,
        config.check_interval,
    );

    let shutdown = CancellationToken::new();
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown.clone()));

    let state = AppState::new(db, session_keys, secrets.mode());
    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Probe server listening");

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "Failed to listen for shutdown signal");
                    }
                }
                _ = server_shutdown.cancelled() => {}
            }
            tracing::info!("Shutdown signal received");
            server_shutdown.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Err(e) = scheduler_handle.await {
        tracing::warn!(error = %e, "Scheduler task ended abnormally");
    }

    tracing::info!("Ledger identity lifecycle service stopped");
    Ok(())
}
