// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use kube::CustomResource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, schemars::JsonSchema)]
#[kube(group = "vault.geeko.me", version = "v1", kind = "VaultUnsealConfig")]
#[kube(namespaced)]
#[kube(status = "VaultUnsealConfigStatus")]
#[serde(rename_all = "camelCase")]
pub struct VaultUnsealConfigSpec {
    /// Vault endpoint, e.g. https://vault.example.com:8200
    pub url: String,
    /// Where the unseal key shares come from
    pub unseal_keys: UnsealKeySource,
    /// Namespace of the vault pods watched in HA mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_selector: Option<PodSelector>,
    /// Number of key shares submitted per unseal attempt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<u32>,
    #[serde(default)]
    pub ha_enabled: bool,
    #[serde(default)]
    pub tls_skip_verify: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconcile_interval: Option<String>,
}

/// Exactly one of `secret` (inline base64 key shares) or `secret_ref`
/// must be set; validation rejects both-or-neither.
#[derive(Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UnsealKeySource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<SecretRef>,
}

#[derive(Serialize, Deserialize, Clone, Debug, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretRef {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodSelector {
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VaultUnsealConfigStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<Condition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vault_status: Option<VaultStatus>,
}

#[derive(Serialize, Deserialize, Clone, Debug, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: String,
    pub last_transition_time: String,
    pub reason: String,
    pub message: String,
}

/// Result of one check-and-unseal pass, written back on every reconcile
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VaultStatus {
    pub sealed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_unsealed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Condition {
    /// Build a Ready condition stamped with the current time
    pub fn ready(ok: bool, reason: &str, message: impl Into<String>) -> Self {
        Condition {
            condition_type: "Ready".to_string(),
            status: if ok { "True" } else { "False" }.to_string(),
            last_transition_time: chrono::Utc::now().to_rfc3339(),
            reason: reason.to_string(),
            message: message.into(),
        }
    }
}

impl VaultUnsealConfig {
    /// Check if this resource currently reports Ready=True
    pub fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .is_some_and(|conditions| {
                conditions
                    .iter()
                    .any(|c| c.condition_type == "Ready" && c.status == "True")
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;

    fn make_config(name: &str, status: Option<VaultUnsealConfigStatus>) -> VaultUnsealConfig {
        VaultUnsealConfig {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: VaultUnsealConfigSpec {
                url: "https://vault.example.com:8200".to_string(),
                unseal_keys: UnsealKeySource {
                    secret: Some(vec!["a2V5".to_string()]),
                    secret_ref: None,
                },
                namespace: None,
                pod_selector: None,
                threshold: Some(1),
                ha_enabled: false,
                tls_skip_verify: false,
                reconcile_interval: None,
            },
            status,
        }
    }

    #[test]
    fn test_is_ready_with_ready_condition() {
        let config = make_config(
            "vault-main",
            Some(VaultUnsealConfigStatus {
                conditions: Some(vec![Condition::ready(true, "ConfigurationApplied", "ok")]),
                vault_status: None,
            }),
        );

        assert!(config.is_ready());
    }

    #[test]
    fn test_is_ready_with_error_condition() {
        let config = make_config(
            "vault-main",
            Some(VaultUnsealConfigStatus {
                conditions: Some(vec![Condition::ready(false, "Error", "validation failed")]),
                vault_status: None,
            }),
        );

        assert!(!config.is_ready());
    }

    #[test]
    fn test_is_ready_with_no_status() {
        let config = make_config("vault-main", None);
        assert!(!config.is_ready());
    }

    #[test]
    fn test_spec_round_trips_camel_case() {
        let json = serde_json::json!({
            "url": "http://vault:8200",
            "unsealKeys": {
                "secretRef": {"name": "vault-keys", "key": "unseal-keys"}
            },
            "haEnabled": true,
            "tlsSkipVerify": false,
            "podSelector": {"matchLabels": {"app": "vault"}},
            "threshold": 3
        });

        let spec: VaultUnsealConfigSpec = serde_json::from_value(json).unwrap();
        assert!(spec.ha_enabled);
        assert_eq!(spec.threshold, Some(3));
        let secret_ref = spec.unseal_keys.secret_ref.as_ref().unwrap();
        assert_eq!(secret_ref.name, "vault-keys");
        assert_eq!(
            spec.pod_selector.unwrap().match_labels.get("app"),
            Some(&"vault".to_string())
        );
    }

    #[test]
    fn test_vault_status_omits_empty_fields() {
        let status = VaultStatus {
            sealed: true,
            last_unsealed: None,
            last_checked: Some("2026-01-01T00:00:00Z".to_string()),
            error: None,
        };

        let value = serde_json::to_value(&status).unwrap();
        assert!(value.get("lastUnsealed").is_none());
        assert!(value.get("error").is_none());
        assert_eq!(value["sealed"], true);
    }
}
