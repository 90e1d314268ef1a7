// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! VaultUnsealConfig reconciler - validates specs, drives the instance
//! registry and writes seal status back to the resource.
//!
//! One reconcile pass covers create, resume, update and the periodic
//! timer: the level-triggered controller requeues every resource on a
//! fixed cadence, and the registry decides whether resources must be
//! rebuilt by comparing the validated config. Deletion is observed
//! through a finalizer so watchers are torn down before the resource
//! disappears.

use crate::constants::FINALIZER;
use crate::error::WardenError;
use crate::registry::{InstanceKey, InstanceRegistry};
use crate::types::{Condition, VaultStatus, VaultUnsealConfig, VaultUnsealConfigStatus};
use crate::validation::{sanitize_log_value, validate_spec};
use futures::StreamExt;
use kube::{
    api::{Patch, PatchParams},
    runtime::{
        controller::Action,
        finalizer::{finalizer, Event as Finalizer},
        watcher, Controller,
    },
    Api, Client, ResourceExt,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

type ReconcileError = kube::runtime::finalizer::Error<WardenError>;

pub struct VaultConfigReconciler {
    client: Client,
    registry: Arc<InstanceRegistry>,
    reconcile_interval: Duration,
}

impl VaultConfigReconciler {
    pub fn new(
        client: Client,
        registry: Arc<InstanceRegistry>,
        reconcile_interval: Duration,
    ) -> Self {
        Self {
            client,
            registry,
            reconcile_interval,
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let configs: Api<VaultUnsealConfig> = Api::all(self.client.clone());
        let context = Arc::new(self);

        Controller::new(configs, watcher::Config::default())
            .run(reconcile, error_policy, context)
            .for_each(|res| async move {
                match res {
                    Ok(o) => debug!("Reconciled VaultUnsealConfig: {:?}", o),
                    Err(e) => warn!("Reconciliation error: {:?}", e),
                }
            })
            .await;

        Ok(())
    }

    /// Handle a live (non-deleted) resource: validate, ensure registry
    /// resources, run one check-and-unseal pass, publish status
    async fn apply(&self, config: Arc<VaultUnsealConfig>) -> crate::error::Result<Action> {
        let namespace = config.namespace().unwrap_or_else(|| "default".to_string());
        let key = InstanceKey::new(namespace, config.name_any());

        info!("Reconciling VaultUnsealConfig {}", key);

        let validated = match validate_spec(&config.spec, &key.namespace) {
            Ok(validated) => validated,
            Err(e) => {
                warn!("Rejected VaultUnsealConfig {}: {}", key, e);
                let condition = Condition::ready(false, "Error", e.to_string());
                self.write_status(&key, condition, None).await;
                // A malformed spec is not retried; editing it triggers
                // the next pass
                return Ok(Action::await_change());
            }
        };

        debug!(
            "Validated spec for {}: {}",
            key,
            sanitize_log_value(&serde_json::to_value(&config.spec).unwrap_or_default())
        );

        let status = self.registry.check_and_unseal(&key, &validated).await;

        let condition = match &status.error {
            None => Condition::ready(
                true,
                "ConfigurationApplied",
                "Vault configuration applied successfully",
            ),
            Some(message) => Condition::ready(false, "Error", message.clone()),
        };
        self.write_status(&key, condition, Some(status)).await;

        Ok(Action::requeue(self.reconcile_interval))
    }

    /// Handle deletion: tear down the instance's client and watcher
    async fn cleanup(&self, config: Arc<VaultUnsealConfig>) -> crate::error::Result<Action> {
        let namespace = config.namespace().unwrap_or_else(|| "default".to_string());
        let key = InstanceKey::new(namespace, config.name_any());

        info!("Deleting VaultUnsealConfig {}", key);
        self.registry.cleanup_instance(&key).await;

        Ok(Action::await_change())
    }

    async fn write_status(
        &self,
        key: &InstanceKey,
        condition: Condition,
        vault_status: Option<VaultStatus>,
    ) {
        let api: Api<VaultUnsealConfig> =
            Api::namespaced(self.client.clone(), &key.namespace);
        let status = VaultUnsealConfigStatus {
            conditions: Some(vec![condition]),
            vault_status,
        };
        let patch = serde_json::json!({ "status": status });

        if let Err(e) = api
            .patch_status(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            error!("Failed to update status for {}: {}", key, e);
        }
    }
}

async fn reconcile(
    config: Arc<VaultUnsealConfig>,
    ctx: Arc<VaultConfigReconciler>,
) -> std::result::Result<Action, ReconcileError> {
    let namespace = config.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<VaultUnsealConfig> = Api::namespaced(ctx.client.clone(), &namespace);

    finalizer(&api, FINALIZER, config, |event| async {
        match event {
            Finalizer::Apply(config) => ctx.apply(config).await,
            Finalizer::Cleanup(config) => ctx.cleanup(config).await,
        }
    })
    .await
}

fn error_policy(
    _config: Arc<VaultUnsealConfig>,
    error: &ReconcileError,
    _ctx: Arc<VaultConfigReconciler>,
) -> Action {
    error!("Reconciliation error: {}", error);
    Action::requeue(Duration::from_secs(60))
}
