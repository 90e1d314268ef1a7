// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Instance registry - owns the seal client and optional pod watcher for
//! every managed vault instance, keyed by namespace/name.

use crate::config::Config;
use crate::error::Result;
use crate::kubernetes::resolve_unseal_keys;
use crate::types::VaultStatus;
use crate::validation::ValidatedConfig;
use crate::vault::{unseal, SealApi, SealClient};
use crate::watch::PodWatcher;
use kube::Client;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};

/// Unique identity of a managed vault instance
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceKey {
    pub namespace: String,
    pub name: String,
}

impl InstanceKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        InstanceKey {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

struct InstanceEntry {
    seal: Arc<dyn SealApi>,
    watcher: Option<Arc<PodWatcher>>,
    config: ValidatedConfig,
}

/// Registry of live instances. Entries are created lazily on first use
/// and torn down on delete or spec change; the maps are shared across
/// concurrent reconciles, so no lock is held across a network call.
pub struct InstanceRegistry {
    client: Client,
    config: Config,
    entries: RwLock<HashMap<InstanceKey, InstanceEntry>>,
}

impl InstanceRegistry {
    pub fn new(client: Client, config: Config) -> Self {
        InstanceRegistry {
            client,
            config,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Ensure an instance exists for `key` with resources matching `cfg`.
    ///
    /// Strict create-if-absent: an existing entry built from an equal
    /// config is left untouched. A config change tears the old entry down
    /// (stopping its watcher) and rebuilds from scratch - update is a full
    /// rebuild, not a diff.
    pub async fn ensure_instance(&self, key: &InstanceKey, cfg: &ValidatedConfig) -> Result<()> {
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(key) {
                if entry.config == *cfg {
                    return Ok(());
                }
            }
        }

        // Take the stale entry out before suspending; stop() must not run
        // under the registry lock
        let old = self.entries.write().await.remove(key);
        if let Some(old) = old {
            info!("Spec changed for {}, rebuilding instance resources", key);
            if let Some(watcher) = old.watcher {
                watcher.stop().await;
            }
        }

        let entry = self.build_entry(key, cfg).await?;
        self.entries.write().await.insert(key.clone(), entry);
        Ok(())
    }

    /// Tear down the instance's client and watcher, if present
    pub async fn cleanup_instance(&self, key: &InstanceKey) {
        let entry = self.entries.write().await.remove(key);
        if let Some(entry) = entry {
            if let Some(watcher) = entry.watcher {
                watcher.stop().await;
            }
            info!("Cleaned up vault instance {}", key);
        }
    }

    /// Query the instance and unseal it if needed. Runs forever on a
    /// timer, so every failure folds into the returned status instead of
    /// propagating.
    pub async fn check_and_unseal(&self, key: &InstanceKey, cfg: &ValidatedConfig) -> VaultStatus {
        if let Err(e) = self.ensure_instance(key, cfg).await {
            error!("Failed to set up vault instance {}: {}", key, e);
            return VaultStatus {
                sealed: true,
                last_unsealed: None,
                last_checked: Some(now()),
                error: Some(e.to_string()),
            };
        }

        let seal = {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) => entry.seal.clone(),
                None => {
                    // Concurrent cleanup between ensure and here
                    return VaultStatus {
                        sealed: true,
                        last_unsealed: None,
                        last_checked: Some(now()),
                        error: Some(format!("instance {key} is not registered")),
                    };
                }
            }
        };

        match seal.is_sealed().await {
            Ok(false) => VaultStatus {
                sealed: false,
                last_unsealed: None,
                last_checked: Some(now()),
                error: None,
            },
            Ok(true) => {
                info!("Vault {} is sealed, attempting to unseal", key);
                self.unseal_instance(key, cfg, seal.as_ref()).await
            }
            Err(e) => {
                error!("Failed to check seal status for {}: {}", key, e);
                VaultStatus {
                    sealed: true,
                    last_unsealed: None,
                    last_checked: Some(now()),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn unseal_instance(
        &self,
        key: &InstanceKey,
        cfg: &ValidatedConfig,
        seal: &dyn SealApi,
    ) -> VaultStatus {
        let keys = match resolve_unseal_keys(&self.client, &cfg.key_source, &key.namespace).await {
            Ok(keys) => keys,
            Err(e) => {
                error!("Failed to resolve unseal keys for {}: {}", key, e);
                return VaultStatus {
                    sealed: true,
                    last_unsealed: None,
                    last_checked: Some(now()),
                    error: Some(e.to_string()),
                };
            }
        };

        match unseal(seal, &keys, cfg.threshold).await {
            Ok(status) => VaultStatus {
                sealed: status.sealed,
                // Only stamped on the sealed -> unsealed transition
                last_unsealed: (!status.sealed).then(now),
                last_checked: Some(now()),
                error: None,
            },
            Err(e) => {
                error!("Failed to unseal vault {}: {}", key, e);
                VaultStatus {
                    sealed: true,
                    last_unsealed: None,
                    last_checked: Some(now()),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn build_entry(&self, key: &InstanceKey, cfg: &ValidatedConfig) -> Result<InstanceEntry> {
        let seal: Arc<dyn SealApi> = Arc::new(SealClient::new(
            &cfg.url,
            cfg.tls_skip_verify,
            self.config.vault_timeout,
        )?);

        let watcher = if cfg.ha_enabled {
            let keys =
                resolve_unseal_keys(&self.client, &cfg.key_source, &key.namespace).await?;
            let watcher = Arc::new(PodWatcher::new(
                self.client.clone(),
                cfg.namespace.clone(),
                cfg.pod_selector.clone(),
                seal.clone(),
                keys,
                cfg.threshold,
            ));
            watcher.start();
            Some(watcher)
        } else {
            None
        };

        Ok(InstanceEntry {
            seal,
            watcher,
            config: cfg.clone(),
        })
    }

    pub async fn instance_count(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn contains(&self, key: &InstanceKey) -> bool {
        self.entries.read().await.contains_key(key)
    }

    /// Watcher handle for an instance, when HA mode is active
    pub async fn watcher(&self, key: &InstanceKey) -> Option<Arc<PodWatcher>> {
        self.entries.read().await.get(key).and_then(|e| e.watcher.clone())
    }

    #[cfg(test)]
    pub(crate) async fn seal_handle(&self, key: &InstanceKey) -> Option<Arc<dyn SealApi>> {
        self.entries.read().await.get(key).map(|e| e.seal.clone())
    }

    #[cfg(test)]
    pub(crate) async fn insert_for_tests(
        &self,
        key: InstanceKey,
        cfg: ValidatedConfig,
        seal: Arc<dyn SealApi>,
    ) {
        self.entries.write().await.insert(
            key,
            InstanceEntry {
                seal,
                watcher: None,
                config: cfg,
            },
        );
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockSealApi, MockService};
    use crate::validation::KeySource;
    use base64::Engine;
    use std::time::Duration;

    fn b64(raw: &str) -> String {
        base64::engine::general_purpose::STANDARD.encode(raw)
    }

    fn inline_config(keys: Vec<String>, threshold: usize) -> ValidatedConfig {
        ValidatedConfig {
            url: "https://vault.example.com:8200".to_string(),
            key_source: KeySource::Inline(keys),
            namespace: "default".to_string(),
            pod_selector: Default::default(),
            threshold,
            ha_enabled: false,
            tls_skip_verify: false,
            reconcile_interval: Duration::from_secs(30),
        }
    }

    fn registry() -> InstanceRegistry {
        InstanceRegistry::new(MockService::new().into_client(), Config::default())
    }

    #[tokio::test]
    async fn test_ensure_is_create_if_absent() {
        let registry = registry();
        let key = InstanceKey::new("default", "vault-main");
        let cfg = inline_config(vec![b64("k1")], 1);

        registry.ensure_instance(&key, &cfg).await.unwrap();
        let first = registry.seal_handle(&key).await.unwrap();

        // Same config again: the entry must not be replaced
        registry.ensure_instance(&key, &cfg).await.unwrap();
        let second = registry.seal_handle(&key).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.instance_count().await, 1);
    }

    #[tokio::test]
    async fn test_ensure_rebuilds_on_config_change() {
        let registry = registry();
        let key = InstanceKey::new("default", "vault-main");
        let cfg = inline_config(vec![b64("k1")], 1);

        registry.ensure_instance(&key, &cfg).await.unwrap();
        let first = registry.seal_handle(&key).await.unwrap();

        let mut changed = cfg.clone();
        changed.url = "https://vault2.example.com:8200".to_string();
        registry.ensure_instance(&key, &changed).await.unwrap();
        let second = registry.seal_handle(&key).await.unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(registry.instance_count().await, 1);
    }

    #[tokio::test]
    async fn test_cleanup_removes_instance() {
        let registry = registry();
        let key = InstanceKey::new("default", "vault-main");
        let cfg = inline_config(vec![b64("k1")], 1);

        registry.ensure_instance(&key, &cfg).await.unwrap();
        assert!(registry.contains(&key).await);

        registry.cleanup_instance(&key).await;
        assert!(!registry.contains(&key).await);

        // Cleaning up an absent key is a no-op
        registry.cleanup_instance(&key).await;
    }

    #[tokio::test]
    async fn test_ha_instance_gets_a_running_watcher() {
        let registry = registry();
        let key = InstanceKey::new("default", "vault-main");
        let mut cfg = inline_config(vec![b64("k1")], 1);
        cfg.ha_enabled = true;
        cfg.namespace = "vault-system".to_string();

        registry.ensure_instance(&key, &cfg).await.unwrap();
        let watcher = registry.watcher(&key).await.expect("watcher missing");
        assert!(watcher.is_running());
        assert_eq!(watcher.namespace(), "vault-system");
        assert!(watcher.monitored_pods().await.is_empty());

        registry.cleanup_instance(&key).await;
        assert!(!watcher.is_running());
    }

    #[tokio::test]
    async fn test_check_and_unseal_already_unsealed() {
        // Idempotence: an unsealed instance sees no key submissions
        let registry = registry();
        let key = InstanceKey::new("default", "vault-main");
        let cfg = inline_config(vec![b64("k1"), b64("k2")], 2);
        let seal = MockSealApi::unsealed();
        registry
            .insert_for_tests(key.clone(), cfg.clone(), Arc::new(seal.clone()))
            .await;

        let status = registry.check_and_unseal(&key, &cfg).await;
        assert!(!status.sealed);
        assert!(status.error.is_none());
        assert!(status.last_unsealed.is_none());
        assert!(status.last_checked.is_some());
        assert_eq!(seal.submissions(), 0);
    }

    #[tokio::test]
    async fn test_check_and_unseal_scenario_a() {
        // Scenario A: three inline keys, threshold 2, unsealed after two
        let registry = registry();
        let key = InstanceKey::new("default", "vault-main");
        let cfg = inline_config(vec![b64("k1"), b64("k2"), b64("k3")], 2);
        let seal = MockSealApi::sealed()
            .status_sealed()
            .submit_sealed()
            .submit_unsealed();
        registry
            .insert_for_tests(key.clone(), cfg.clone(), Arc::new(seal.clone()))
            .await;

        let status = registry.check_and_unseal(&key, &cfg).await;
        assert!(!status.sealed);
        assert!(status.error.is_none());
        assert!(status.last_unsealed.is_some());
        assert_eq!(seal.submissions(), 2);
    }

    #[tokio::test]
    async fn test_check_and_unseal_folds_connectivity_errors() {
        let registry = registry();
        let key = InstanceKey::new("default", "vault-main");
        let cfg = inline_config(vec![b64("k1")], 1);
        let seal = MockSealApi::status_error("connection refused");
        registry
            .insert_for_tests(key.clone(), cfg.clone(), Arc::new(seal))
            .await;

        let status = registry.check_and_unseal(&key, &cfg).await;
        assert!(status.sealed);
        let message = status.error.expect("error missing");
        assert!(message.contains("connection refused"));
    }

    #[tokio::test]
    async fn test_check_and_unseal_reports_missing_secret() {
        let registry = registry();
        let key = InstanceKey::new("default", "vault-main");
        let mut cfg = inline_config(vec![], 1);
        cfg.key_source = KeySource::SecretRef {
            name: "absent".to_string(),
            namespace: None,
            key: "unseal-keys".to_string(),
        };
        let seal = MockSealApi::sealed();
        registry
            .insert_for_tests(key.clone(), cfg.clone(), Arc::new(seal))
            .await;

        let status = registry.check_and_unseal(&key, &cfg).await;
        assert!(status.sealed);
        assert!(status.error.expect("error missing").contains("not found"));
    }
}
