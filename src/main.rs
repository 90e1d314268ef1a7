// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::Result;
use kube::Client;
use std::sync::Arc;
use tracing::{info, warn};

use warden::config::Config;
use warden::kubernetes::wait_for_unseal_config_crd;
use warden::reconcilers::VaultConfigReconciler;
use warden::registry::InstanceRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    info!("Starting Warden operator");

    // Load configuration
    let config = Config::from_env()?;
    info!(
        "Configuration loaded: reconcile_interval={}s",
        config.reconcile_interval.as_secs()
    );

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    // Wait for the VaultUnsealConfig CRD before starting the reconciler
    info!("Waiting for VaultUnsealConfig CRD to become available...");
    wait_for_unseal_config_crd(&client).await?;

    // Shared registry of seal clients and pod watchers
    let registry = Arc::new(InstanceRegistry::new(client.clone(), config.clone()));

    let reconciler =
        VaultConfigReconciler::new(client, registry, config.reconcile_interval);

    info!("Starting reconciler...");
    reconciler.run().await?;

    // This should never be reached as the reconciler runs forever
    warn!("Reconciler stopped unexpectedly");
    Ok(())
}
