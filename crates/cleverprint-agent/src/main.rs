// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// CleverPrint agent — headless local print spooler.
//
// Entry point. Initialises logging and the backend services in a fixed
// order — config store, spooler, local HTTP API, remote client — and tears
// them down in reverse on Ctrl-C.

mod api;
mod data_dir;
mod remote;

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};

use cleverprint_core::config::ConfigStore;
use cleverprint_print::executor::SystemPrintExecutor;
use cleverprint_print::spooler::Spooler;

use remote::RemoteClient;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "CleverPrint agent starting");

    // 1. Config — single source of truth for everything below.
    let config = Arc::new(ConfigStore::load(data_dir::data_dir().join("config.json")));

    // 2. Spooler with the OS-backed executor.
    let executor = Arc::new(SystemPrintExecutor::new(config.sumatra_path()));
    let spooler = Spooler::new(Arc::clone(&config), executor);
    let dispatch = spooler.start();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // 3. Local HTTP API.
    let api_task = tokio::spawn(api::serve(
        Arc::clone(&spooler),
        Arc::clone(&config),
        shutdown_rx.clone(),
    ));

    // 4. Remote client — only when a command-center is configured.
    let remote_tasks = match config.server_base_url() {
        Some(base_url) => {
            let client = RemoteClient::new(base_url, Arc::clone(&config), Arc::clone(&spooler));
            client.start(shutdown_rx.clone())
        }
        None => {
            info!("serverBaseUrl not configured — remote client disabled");
            Vec::new()
        }
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received");

    // Teardown in reverse init order: remote, API, spooler.
    let _ = shutdown_tx.send(true);
    for task in remote_tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "remote task ended abnormally");
        }
    }
    match api_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "local API server failed"),
        Err(e) => warn!(error = %e, "API task ended abnormally"),
    }
    spooler.shutdown().await;
    dispatch.abort();

    info!("CleverPrint agent stopped");
}
