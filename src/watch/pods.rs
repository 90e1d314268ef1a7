// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Pod watcher - streams pod events for one HA-enabled vault instance and
//! unseals any selector-matching pod observed ready and sealed.
//!
//! The watch stream runs as a spawned task. Watch-request timeouts and
//! resource-version expiry reopen the stream transparently; any other
//! stream error is logged and retried after a fixed delay, forever, until
//! `stop` is called. Stopping is cooperative: the shutdown signal is
//! observed between events and during retry sleeps, and the task is
//! joined so the underlying connection is dropped, not leaked.

use crate::constants::watch::{RETRY_DELAY_SECS, STREAM_TIMEOUT_SECS};
use crate::vault::{unseal, SealApi};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client, ResourceExt};
use kube_runtime::watcher::{watcher, Config as WatcherConfig, Event as WatchEvent};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch as watch_channel, RwLock};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// A pod currently tracked as sealed and eligible for unsealing
#[derive(Debug, Clone)]
pub struct MonitoredPod {
    pub pod_uid: String,
    pub name: String,
    pub namespace: String,
    pub last_unseal_attempt: Option<DateTime<Utc>>,
}

pub struct PodWatcher {
    client: Client,
    ctx: WatchContext,
    running: Arc<AtomicBool>,
    shutdown: watch_channel::Sender<bool>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// The shared pieces the stream task operates on
#[derive(Clone)]
struct WatchContext {
    namespace: String,
    selector: BTreeMap<String, String>,
    seal: Arc<dyn SealApi>,
    unseal_keys: Vec<String>,
    threshold: usize,
    monitored: Arc<RwLock<HashMap<String, MonitoredPod>>>,
}

impl PodWatcher {
    pub fn new(
        client: Client,
        namespace: String,
        selector: BTreeMap<String, String>,
        seal: Arc<dyn SealApi>,
        unseal_keys: Vec<String>,
        threshold: usize,
    ) -> Self {
        let (shutdown, _) = watch_channel::channel(false);
        PodWatcher {
            client,
            ctx: WatchContext {
                namespace,
                selector,
                seal,
                unseal_keys,
                threshold,
                monitored: Arc::new(RwLock::new(HashMap::new())),
            },
            running: Arc::new(AtomicBool::new(false)),
            shutdown,
            task: std::sync::Mutex::new(None),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.ctx.namespace
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the watch task. Idempotent: a second call while running is a
    /// no-op and never replaces the existing task.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!(
                "Pod watcher for namespace {} already running",
                self.ctx.namespace
            );
            return;
        }

        let _ = self.shutdown.send(false);
        let ctx = self.ctx.clone();
        let client = self.client.clone();
        let running = self.running.clone();
        let shutdown_rx = self.shutdown.subscribe();

        let handle = tokio::spawn(watch_loop(ctx, client, running, shutdown_rx));
        *self.task.lock().unwrap() = Some(handle);

        info!("Started pod watcher for namespace {}", self.ctx.namespace);
    }

    /// Signal the watch task to stop and wait for it to unwind
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.shutdown.send(true);

        let handle = self.task.lock().unwrap().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                debug!("Pod watcher task ended abnormally: {}", e);
            }
        }

        info!("Stopped pod watcher for namespace {}", self.ctx.namespace);
    }

    /// Read-only snapshot of the monitored set
    pub async fn monitored_pods(&self) -> Vec<MonitoredPod> {
        self.ctx.monitored.read().await.values().cloned().collect()
    }
}

async fn watch_loop(
    ctx: WatchContext,
    client: Client,
    running: Arc<AtomicBool>,
    mut shutdown: watch_channel::Receiver<bool>,
) {
    let pods: Api<Pod> = Api::namespaced(client, &ctx.namespace);
    let config = WatcherConfig::default().timeout(STREAM_TIMEOUT_SECS);

    while running.load(Ordering::SeqCst) {
        info!("Starting pod watch stream for namespace {}", ctx.namespace);
        let stream = watcher(pods.clone(), config.clone());
        tokio::pin!(stream);

        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                item = stream.next() => match item {
                    Some(Ok(event)) => ctx.handle_event(event).await,
                    Some(Err(e)) => {
                        error!(
                            "Pod watch error in namespace {}: {}, retrying in {}s",
                            ctx.namespace, e, RETRY_DELAY_SECS
                        );
                        tokio::select! {
                            _ = shutdown.changed() => return,
                            _ = sleep(Duration::from_secs(RETRY_DELAY_SECS)) => {}
                        }
                    }
                    // Watch request timed out; reopen the stream
                    None => break,
                }
            }
        }
    }
}

impl WatchContext {
    async fn handle_event(&self, event: WatchEvent<Pod>) {
        match event {
            WatchEvent::Apply(pod) | WatchEvent::InitApply(pod) => {
                self.handle_pod_update(pod).await
            }
            WatchEvent::Delete(pod) => self.handle_pod_delete(&pod).await,
            WatchEvent::Init | WatchEvent::InitDone => {}
        }
    }

    async fn handle_pod_update(&self, pod: Pod) {
        if !self.matches_selector(pod.labels()) {
            return;
        }
        let Some(uid) = pod.uid() else { return };
        let name = pod.name_any();

        debug!("Processing event for pod {}", name);

        if self.is_actionable(&pod).await {
            let newly_monitored = {
                let mut monitored = self.monitored.write().await;
                let newly = !monitored.contains_key(&uid);
                monitored.insert(
                    uid.clone(),
                    MonitoredPod {
                        pod_uid: uid,
                        name: name.clone(),
                        namespace: self.namespace.clone(),
                        last_unseal_attempt: Some(Utc::now()),
                    },
                );
                newly
            };
            if newly_monitored {
                info!("Detected new sealed vault pod: {}", name);
            }
            self.attempt_unseal(&name).await;
        } else if self.monitored.write().await.remove(&uid).is_some() {
            debug!(
                "Pod {} no longer sealed or not ready, removed from monitoring",
                name
            );
        }
    }

    async fn handle_pod_delete(&self, pod: &Pod) {
        if !self.matches_selector(pod.labels()) {
            return;
        }
        let Some(uid) = pod.uid() else { return };
        if self.monitored.write().await.remove(&uid).is_some() {
            info!("Removed pod {} from monitoring", pod.name_any());
        }
    }

    /// Conjunction of exact label matches; an empty selector matches all
    fn matches_selector(&self, labels: &BTreeMap<String, String>) -> bool {
        self.selector
            .iter()
            .all(|(key, value)| labels.get(key) == Some(value))
    }

    /// A pod is actionable iff it is Running with an IP, every container
    /// is ready, and the instance currently reports sealed. Any error
    /// evaluating that (including the seal query) fails closed.
    async fn is_actionable(&self, pod: &Pod) -> bool {
        let Some(status) = pod.status.as_ref() else {
            return false;
        };
        if status.phase.as_deref() != Some("Running") {
            return false;
        }
        if status.pod_ip.as_deref().unwrap_or("").is_empty() {
            return false;
        }
        let all_ready = status
            .container_statuses
            .as_deref()
            .unwrap_or(&[])
            .iter()
            .all(|c| c.ready);
        if !all_ready {
            return false;
        }

        match self.seal.is_sealed().await {
            Ok(sealed) => sealed,
            Err(e) => {
                error!("Error checking vault seal status for pod event: {}", e);
                false
            }
        }
    }

    async fn attempt_unseal(&self, pod_name: &str) {
        info!("Attempting to unseal vault in pod {}", pod_name);

        match unseal(self.seal.as_ref(), &self.unseal_keys, self.threshold).await {
            Ok(status) if !status.sealed => {
                info!("Successfully unsealed vault in pod {}", pod_name);
            }
            Ok(_) => {
                warn!(
                    "Vault in pod {} remains sealed after unseal attempt",
                    pod_name
                );
            }
            Err(e) => {
                error!("Failed to unseal vault in pod {}: {}", pod_name, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockSealApi, MockService};
    use base64::Engine;
    use k8s_openapi::api::core::v1::{ContainerStatus, PodStatus};
    use kube::api::ObjectMeta;
    use tokio::time::timeout;

    fn b64(raw: &str) -> String {
        base64::engine::general_purpose::STANDARD.encode(raw)
    }

    fn make_pod(
        name: &str,
        uid: &str,
        labels: &[(&str, &str)],
        phase: &str,
        pod_ip: Option<&str>,
        ready: bool,
    ) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("vault-system".to_string()),
                uid: Some(uid.to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            spec: None,
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                pod_ip: pod_ip.map(str::to_string),
                container_statuses: Some(vec![ContainerStatus {
                    name: "vault".to_string(),
                    ready,
                    ..Default::default()
                }]),
                ..Default::default()
            }),
        }
    }

    fn make_context(seal: MockSealApi, selector: &[(&str, &str)]) -> WatchContext {
        WatchContext {
            namespace: "vault-system".to_string(),
            selector: selector
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            seal: Arc::new(seal),
            unseal_keys: vec![b64("share-1"), b64("share-2")],
            threshold: 2,
            monitored: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    #[tokio::test]
    async fn test_selector_subset_matches() {
        let ctx = make_context(MockSealApi::sealed(), &[("app", "vault")]);
        let labels: BTreeMap<String, String> = [("app", "vault"), ("extra", "x")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert!(ctx.matches_selector(&labels));
    }

    #[tokio::test]
    async fn test_selector_missing_label_does_not_match() {
        let ctx = make_context(MockSealApi::sealed(), &[("app", "vault")]);
        let labels: BTreeMap<String, String> =
            [("extra".to_string(), "x".to_string())].into_iter().collect();
        assert!(!ctx.matches_selector(&labels));

        let wrong: BTreeMap<String, String> =
            [("app".to_string(), "nginx".to_string())].into_iter().collect();
        assert!(!ctx.matches_selector(&wrong));
    }

    #[tokio::test]
    async fn test_empty_selector_matches_everything() {
        let ctx = make_context(MockSealApi::sealed(), &[]);
        assert!(ctx.matches_selector(&BTreeMap::new()));
        let labels: BTreeMap<String, String> =
            [("any".to_string(), "thing".to_string())].into_iter().collect();
        assert!(ctx.matches_selector(&labels));
    }

    #[tokio::test]
    async fn test_actionable_requires_running_ip_ready_sealed() {
        let ctx = make_context(MockSealApi::sealed(), &[]);

        let good = make_pod("vault-0", "u1", &[], "Running", Some("10.0.0.5"), true);
        assert!(ctx.is_actionable(&good).await);

        let pending = make_pod("vault-0", "u1", &[], "Pending", Some("10.0.0.5"), true);
        assert!(!ctx.is_actionable(&pending).await);

        let no_ip = make_pod("vault-0", "u1", &[], "Running", None, true);
        assert!(!ctx.is_actionable(&no_ip).await);

        let not_ready = make_pod("vault-0", "u1", &[], "Running", Some("10.0.0.5"), false);
        assert!(!ctx.is_actionable(&not_ready).await);
    }

    #[tokio::test]
    async fn test_actionable_false_when_unsealed() {
        let ctx = make_context(MockSealApi::unsealed(), &[]);
        let pod = make_pod("vault-0", "u1", &[], "Running", Some("10.0.0.5"), true);
        assert!(!ctx.is_actionable(&pod).await);
    }

    #[tokio::test]
    async fn test_actionable_fails_closed_on_seal_query_error() {
        let ctx = make_context(MockSealApi::status_error("vault unreachable"), &[]);
        let pod = make_pod("vault-0", "u1", &[], "Running", Some("10.0.0.5"), true);
        assert!(!ctx.is_actionable(&pod).await);
    }

    #[tokio::test]
    async fn test_sealed_pod_is_monitored_and_unsealed_then_removed() {
        // Scenario D: sealed ready pod triggers one unseal attempt; a later
        // event observing it unsealed drops it from the monitored set.
        let seal = MockSealApi::sealed()
            .status_sealed()
            .submit_unsealed()
            .status_unsealed();
        let ctx = make_context(seal.clone(), &[("app", "vault")]);
        let pod = make_pod(
            "vault-0",
            "uid-1",
            &[("app", "vault")],
            "Running",
            Some("10.0.0.5"),
            true,
        );

        ctx.handle_event(WatchEvent::Apply(pod.clone())).await;
        assert_eq!(ctx.monitored.read().await.len(), 1);
        // one share reached quorum in this script, so exactly one submission
        assert_eq!(seal.submissions(), 1);

        ctx.handle_event(WatchEvent::Apply(pod)).await;
        assert!(ctx.monitored.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_selector_mismatch_is_ignored() {
        let ctx = make_context(MockSealApi::sealed(), &[("app", "vault")]);
        let pod = make_pod(
            "web-0",
            "uid-9",
            &[("app", "nginx")],
            "Running",
            Some("10.0.0.9"),
            true,
        );

        ctx.handle_event(WatchEvent::Apply(pod)).await;
        assert!(ctx.monitored.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_delete_removes_monitored_pod() {
        let ctx = make_context(MockSealApi::sealed(), &[]);
        let pod = make_pod("vault-0", "uid-1", &[], "Running", Some("10.0.0.5"), true);

        ctx.handle_event(WatchEvent::Apply(pod.clone())).await;
        assert_eq!(ctx.monitored.read().await.len(), 1);

        ctx.handle_event(WatchEvent::Delete(pod)).await;
        assert!(ctx.monitored.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_stop_terminates() {
        let client = MockService::new().into_client();
        let pod_watcher = PodWatcher::new(
            client,
            "vault-system".to_string(),
            BTreeMap::new(),
            Arc::new(MockSealApi::sealed()),
            vec![b64("share-1")],
            1,
        );

        pod_watcher.start();
        assert!(pod_watcher.is_running());
        // second start must not replace the running task
        pod_watcher.start();
        assert!(pod_watcher.is_running());

        timeout(Duration::from_secs(5), pod_watcher.stop())
            .await
            .expect("stop did not terminate");
        assert!(!pod_watcher.is_running());
    }

    #[tokio::test]
    async fn test_stop_without_start_is_safe() {
        let client = MockService::new().into_client();
        let pod_watcher = PodWatcher::new(
            client,
            "vault-system".to_string(),
            BTreeMap::new(),
            Arc::new(MockSealApi::sealed()),
            vec![b64("share-1")],
            1,
        );

        timeout(Duration::from_secs(1), pod_watcher.stop())
            .await
            .expect("stop did not terminate");
    }
}
