// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Custom resource types for the warden operator.

pub mod vault_unseal_config;

pub use vault_unseal_config::{
    Condition, PodSelector, SecretRef, UnsealKeySource, VaultStatus, VaultUnsealConfig,
    VaultUnsealConfigSpec, VaultUnsealConfigStatus,
};
