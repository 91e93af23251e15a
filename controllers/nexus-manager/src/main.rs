//! nexus-manager
//!
//! Operator that materializes `Host` resources into host-manager
//! workloads:
//! - renders a Deployment and an optional Service per Host
//! - keeps them converged with the Host spec and the cluster defaults
//! - defaults and validates Hosts at admission
//! - reports progress through status conditions and events

mod admission;
mod backoff;
mod config;
mod controller;
mod defaults;
mod diff;
mod error;
mod metrics;
mod reconciler;
mod renderer;
mod reporter;
mod server;
mod watcher;
mod webhook;

#[cfg(test)]
mod renderer_test;
#[cfg(test)]
mod test_utils;

use anyhow::Result;
use config::Config;
use controller::Controller;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A rustls crypto provider was already installed");
    }

    info!("Starting nexus-manager");

    let config = Config::from_env()?;
    info!("Configuration:");
    info!("  Namespace: {}", config.watch_namespace.as_deref().unwrap_or("all namespaces"));
    info!("  HostDefaults: {}", config.defaults_name);
    info!("  Concurrency: {}", config.concurrency);
    info!("  Probes: {}", config.http_addr);
    info!(
        "  Webhook: {} ({})",
        config.webhook_addr,
        if config.webhook_tls.is_some() { "tls" } else { "plain" }
    );

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    let controller = Controller::new(config, cancel).await?;
    controller.run().await?;

    info!("nexus-manager stopped");
    Ok(())
}

/// Cancels `cancel` on SIGINT or SIGTERM.
async fn cancel_on_signal(cancel: CancellationToken) {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "Cannot listen for SIGTERM");
            let _ = tokio::signal::ctrl_c().await;
            cancel.cancel();
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
        _ = terminate.recv() => info!("Received SIGTERM"),
    }
    cancel.cancel();
}
