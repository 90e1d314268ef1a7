// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Unseal-key resolution from the spec or a referenced Secret.

use crate::error::{Result, WardenError};
use crate::validation::KeySource;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use serde_json::Value;
use tracing::{debug, instrument};

/// Resolve a key source into the ordered list of base64 key shares.
///
/// Inline keys pass through as-is. A secretRef is fetched from its
/// namespace (falling back to `default_namespace`, the namespace of the
/// owning resource) and its data key parsed: a JSON array of strings
/// first, newline-separated entries as the fallback.
#[instrument(skip(client, source))]
pub async fn resolve_unseal_keys(
    client: &Client,
    source: &KeySource,
    default_namespace: &str,
) -> Result<Vec<String>> {
    match source {
        KeySource::Inline(keys) => Ok(keys.clone()),
        KeySource::SecretRef {
            name,
            namespace,
            key,
        } => {
            let ns = namespace.as_deref().unwrap_or(default_namespace);
            debug!("Resolving unseal keys from secret {}/{}", ns, name);

            let secrets: Api<Secret> = Api::namespaced(client.clone(), ns);
            let secret = secrets.get(name).await.map_err(|e| match e {
                kube::Error::Api(ref err) if err.code == 404 => WardenError::SecretNotFound {
                    name: name.clone(),
                    namespace: ns.to_string(),
                },
                other => WardenError::Kube(other),
            })?;

            let data = secret
                .data
                .as_ref()
                .and_then(|d| d.get(key))
                .ok_or_else(|| WardenError::KeyNotFound {
                    key: key.clone(),
                    name: name.clone(),
                })?;

            // Secret data is base64 on the wire; the client has already
            // decoded it into raw bytes here
            let raw = std::str::from_utf8(&data.0).map_err(|_| {
                WardenError::validation(format!("secret '{name}' data is not valid UTF-8"))
            })?;

            parse_key_list(raw)
        }
    }
}

/// Parse secret data as a JSON string array, falling back to
/// newline-separated non-empty trimmed lines when it is not JSON at all.
/// Data that parses as JSON but is not a string array is rejected.
fn parse_key_list(raw: &str) -> Result<Vec<String>> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                _ => Err(WardenError::validation(
                    "secret data array must contain only strings",
                )),
            })
            .collect(),
        Ok(_) => Err(WardenError::validation(
            "secret data must contain a JSON array",
        )),
        Err(_) => {
            let keys: Vec<String> = raw
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect();
            if keys.is_empty() {
                return Err(WardenError::validation("no valid keys found in secret"));
            }
            Ok(keys)
        }
    }
}
