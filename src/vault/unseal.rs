// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Threshold-based unseal protocol.
//!
//! Submits the first `threshold` key shares in order, tolerating
//! individual submission failures, and stops as soon as the instance
//! reports unsealed. Key material is decoded at the last possible moment,
//! dropped immediately after submission, and scrubbed from every error
//! message that could reach a log or a status field.

use crate::error::{Result, WardenError};
use crate::validation::validate_unseal_keys;
use crate::vault::client::{SealApi, SealStatus};
use base64::Engine;
use tracing::{error, info, warn};

/// Run the unseal protocol against `client` with the given ordered key
/// shares. Errors only on a precondition violation or a total inability
/// to query seal status; a rejected individual key does not abort the
/// loop. If the instance remains sealed after all threshold keys and at
/// least one submission failed, that failure surfaces as
/// [`WardenError::UnsealIncomplete`].
pub async fn unseal(client: &dyn SealApi, keys: &[String], threshold: usize) -> Result<SealStatus> {
    if keys.is_empty() {
        return Err(WardenError::InvalidInput("no unseal keys provided".into()));
    }
    if threshold < 1 {
        return Err(WardenError::InvalidInput(
            "threshold must be at least 1".into(),
        ));
    }
    if threshold > keys.len() {
        return Err(WardenError::InvalidInput(
            "threshold exceeds number of available keys".into(),
        ));
    }

    // Defense in depth: the spec was validated on admission, but keys may
    // also arrive from a secret resolved moments ago
    validate_unseal_keys(keys).map_err(|e| WardenError::InvalidInput(e.to_string()))?;

    let status = client.seal_status().await?;
    if !status.sealed {
        info!("Vault is already unsealed");
        return Ok(status);
    }

    info!("Attempting to unseal vault");

    let mut submitted = 0usize;
    let mut last_error: Option<WardenError> = None;

    for (i, key) in keys.iter().take(threshold).enumerate() {
        let decoded = match decode_key_share(key) {
            Ok(decoded) => decoded,
            Err(e) => {
                error!("Failed to decode unseal key {}: {}", i + 1, e);
                last_error = Some(e);
                continue;
            }
        };

        match client.submit_unseal_key(&decoded).await {
            Ok(result) => {
                submitted += 1;
                if !result.sealed {
                    info!("Successfully unsealed vault with {} keys", submitted);
                    return Ok(result);
                }
            }
            Err(e) => {
                error!(
                    "Failed to submit unseal key {}: {}",
                    i + 1,
                    scrub_key_material(&e.to_string(), keys)
                );
                last_error = Some(e);
            }
        }
        // decoded share dropped here, before the next submission
    }

    let final_status = client.seal_status().await?;
    if final_status.sealed {
        if let Some(err) = last_error {
            return Err(WardenError::UnsealIncomplete {
                submitted,
                detail: scrub_key_material(&err.to_string(), keys),
            });
        }
        warn!(
            "Vault remains sealed after submitting {} keys (progress {}/{})",
            submitted, final_status.progress, final_status.t
        );
    } else {
        info!("Successfully unsealed vault");
    }

    Ok(final_status)
}

/// Strict base64 decode of one key share into its UTF-8 form
fn decode_key_share(key: &str) -> Result<String> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(key)
        .map_err(|_| WardenError::InvalidInput("unseal key is not valid base64".into()))?;
    String::from_utf8(decoded)
        .map_err(|_| WardenError::InvalidInput("unseal key payload is not valid UTF-8".into()))
}

/// Replace any occurrence of a key share in `message` with a marker
pub fn scrub_key_material(message: &str, keys: &[String]) -> String {
    let mut scrubbed = message.to_string();
    for key in keys {
        if !key.is_empty() {
            scrubbed = scrubbed.replace(key.as_str(), crate::validation::REDACTED);
        }
    }
    scrubbed
}
