// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! HTTP binding to a single Vault instance's seal endpoints.

use crate::constants::vault::{MAX_RETRIES, USER_AGENT};
use crate::error::{Result, WardenError};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, warn};

/// Response of /v1/sys/seal-status and /v1/sys/unseal.
/// Only `sealed` is inspected semantically; the rest is diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealStatus {
    pub sealed: bool,
    #[serde(default)]
    pub initialized: bool,
    #[serde(default)]
    pub t: u32,
    #[serde(default)]
    pub n: u32,
    #[serde(default)]
    pub progress: u32,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    #[serde(default)]
    pub initialized: bool,
    #[serde(default = "default_true")]
    pub sealed: bool,
    #[serde(default)]
    pub standby: bool,
}

fn default_true() -> bool {
    true
}

impl HealthStatus {
    /// Degraded result used when the health endpoint cannot be reached
    pub fn unavailable() -> Self {
        HealthStatus {
            initialized: false,
            sealed: true,
            standby: false,
        }
    }
}

/// Seal-state operations against one Vault instance.
///
/// The trait is the seam between the reconciliation logic and the HTTP
/// binding; tests script it, production uses [`SealClient`].
#[async_trait]
pub trait SealApi: Send + Sync {
    async fn seal_status(&self) -> Result<SealStatus>;

    /// Submit one decoded key share; returns the resulting seal status
    async fn submit_unseal_key(&self, key: &str) -> Result<SealStatus>;

    /// Failure degrades to `false`, never propagates
    async fn is_initialized(&self) -> bool;

    /// Failure degrades to the sealed/uninitialized sentinel
    async fn health_check(&self) -> HealthStatus;

    async fn is_sealed(&self) -> Result<bool> {
        Ok(self.seal_status().await?.sealed)
    }
}

/// Reqwest-backed [`SealApi`] bound to one validated base URL.
pub struct SealClient {
    http: reqwest::Client,
    base_url: String,
}

impl SealClient {
    pub fn new(base_url: &str, tls_skip_verify: bool, timeout: Duration) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT);

        if tls_skip_verify {
            warn!("TLS verification disabled for {}", base_url);
            builder = builder.danger_accept_invalid_certs(true);
        }

        let http = builder.build().map_err(|e| {
            WardenError::connectivity(format!("failed to build http client: {e}"))
        })?;

        Ok(SealClient {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/v1/sys/{}", self.base_url, path)
    }

    /// Send a request, retrying transient failures with linear backoff.
    /// Transient = transport error or status in {429, 500, 502, 503, 504}.
    async fn send_with_retry<F>(&self, make_request: F) -> Result<reqwest::Response>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match make_request().send().await {
                Ok(resp) if is_retryable_status(resp.status()) && attempt <= MAX_RETRIES => {
                    warn!(
                        "Vault returned {} (attempt {}/{}), retrying",
                        resp.status(),
                        attempt,
                        MAX_RETRIES
                    );
                }
                Ok(resp) => return Ok(resp),
                Err(e) if attempt <= MAX_RETRIES => {
                    warn!(
                        "Vault request failed (attempt {}/{}): {}",
                        attempt, MAX_RETRIES, e
                    );
                }
                Err(e) => {
                    return Err(WardenError::connectivity(format!(
                        "request to {} failed: {e}",
                        self.base_url
                    )))
                }
            }
            tokio::time::sleep(backoff_delay(attempt)).await;
        }
    }
}

#[async_trait]
impl SealApi for SealClient {
    async fn seal_status(&self) -> Result<SealStatus> {
        let url = self.endpoint("seal-status");
        let resp = self.send_with_retry(|| self.http.get(&url)).await?;

        if !resp.status().is_success() {
            return Err(WardenError::connectivity(format!(
                "seal status request to {} returned {}",
                self.base_url,
                resp.status()
            )));
        }

        resp.json().await.map_err(|e| {
            WardenError::connectivity(format!("failed to parse seal status response: {e}"))
        })
    }

    async fn submit_unseal_key(&self, key: &str) -> Result<SealStatus> {
        let url = self.endpoint("unseal");
        let body = serde_json::json!({ "key": key });
        let resp = self
            .send_with_retry(|| self.http.put(&url).json(&body))
            .await?;

        if !resp.status().is_success() {
            // Status only; the response body could echo the key back
            return Err(WardenError::connectivity(format!(
                "unseal key submission returned {}",
                resp.status()
            )));
        }

        resp.json().await.map_err(|e| {
            WardenError::connectivity(format!("failed to parse unseal response: {e}"))
        })
    }

    async fn is_initialized(&self) -> bool {
        #[derive(Deserialize)]
        struct InitStatus {
            initialized: bool,
        }

        let url = self.endpoint("init");
        let result = async {
            let resp = self.send_with_retry(|| self.http.get(&url)).await?;
            if !resp.status().is_success() {
                return Err(WardenError::connectivity(format!(
                    "init status request returned {}",
                    resp.status()
                )));
            }
            resp.json::<InitStatus>().await.map_err(|e| {
                WardenError::connectivity(format!("failed to parse init response: {e}"))
            })
        }
        .await;

        match result {
            Ok(status) => status.initialized,
            Err(e) => {
                error!(
                    "Failed to check initialization status for {}: {}",
                    self.base_url, e
                );
                false
            }
        }
    }

    async fn health_check(&self) -> HealthStatus {
        // Single attempt, body parsed on any status: /sys/health encodes
        // standby and sealed states as 429/503, which must not be retried
        let url = self.endpoint("health");
        let result = async {
            let resp = self
                .http
                .get(&url)
                .send()
                .await
                .map_err(|e| WardenError::connectivity(e.to_string()))?;
            resp.json::<HealthStatus>()
                .await
                .map_err(|e| WardenError::connectivity(e.to_string()))
        }
        .await;

        match result {
            Ok(health) => health,
            Err(e) => {
                error!("Health check failed for {}: {}", self.base_url, e);
                HealthStatus::unavailable()
            }
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504)
}

fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(attempt as u64)
}
