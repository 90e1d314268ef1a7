// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::Result;
use std::env;
use std::time::Duration;

/// Operator configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Fixed requeue cadence for managed resources.
    /// Independent of the spec's own reconcileInterval field, which is
    /// validated but not used for scheduling.
    pub reconcile_interval: Duration,
    /// Request timeout for the Vault HTTP client
    pub vault_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let reconcile_secs: u64 = env::var("RECONCILE_INTERVAL_SECS")
            .unwrap_or("30".to_string())
            .parse()
            .unwrap_or(30);
        let vault_timeout_secs: u64 = env::var("VAULT_TIMEOUT_SECS")
            .unwrap_or("30".to_string())
            .parse()
            .unwrap_or(30);

        Ok(Config {
            reconcile_interval: Duration::from_secs(reconcile_secs),
            vault_timeout: Duration::from_secs(vault_timeout_secs),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_secs(30),
            vault_timeout: Duration::from_secs(30),
        }
    }
}
