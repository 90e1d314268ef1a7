// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes utilities for CRD discovery and unseal-key resolution.

pub mod crd;
pub mod secrets;

pub use crd::wait_for_unseal_config_crd;
pub use secrets::resolve_unseal_keys;
