// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Vault seal-status binding and the threshold unseal protocol.

pub mod client;
pub mod unseal;

pub use client::{HealthStatus, SealApi, SealClient, SealStatus};
pub use unseal::unseal;
