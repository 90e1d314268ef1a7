// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Per-instance pod watching for HA mode.

pub mod pods;

pub use pods::{MonitoredPod, PodWatcher};
