// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WardenError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("invalid configuration: {0}")]
    Validation(String),

    #[error("invalid unseal request: {0}")]
    InvalidInput(String),

    #[error("vault request failed: {0}")]
    Connectivity(String),

    #[error("secret {namespace}/{name} not found")]
    SecretNotFound { name: String, namespace: String },

    #[error("key '{key}' not found in secret '{name}'")]
    KeyNotFound { key: String, name: String },

    #[error("vault remains sealed after {submitted} key submissions: {detail}")]
    UnsealIncomplete { submitted: usize, detail: String },
}

impl WardenError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn connectivity(msg: impl Into<String>) -> Self {
        Self::Connectivity(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, WardenError>;
