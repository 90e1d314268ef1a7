// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

/// The operator name used for patches and log fields
pub const OPERATOR_NAME: &str = "warden";

/// Finalizer placed on managed VaultUnsealConfig resources
pub const FINALIZER: &str = "vault.geeko.me/cleanup";

/// CRD polling configuration
pub mod crd {
    /// Initial polling interval in seconds when waiting for CRD
    pub const POLL_INTERVAL_SECS: u64 = 10;
    /// Maximum polling interval in seconds (exponential backoff cap)
    pub const POLL_MAX_INTERVAL_SECS: u64 = 60;
}

/// Pod watch configuration
pub mod watch {
    /// Per-request watch timeout in seconds; stream end triggers a reopen
    pub const STREAM_TIMEOUT_SECS: u32 = 60;
    /// Fixed delay in seconds after an unexpected watch error
    pub const RETRY_DELAY_SECS: u64 = 5;
}

/// Vault HTTP client configuration
pub mod vault {
    /// Maximum retries for transient HTTP failures
    pub const MAX_RETRIES: u32 = 3;
    /// User agent sent on every Vault request
    pub const USER_AGENT: &str = "warden/1.0";
    /// Secret data key used when a secretRef does not name one
    pub const DEFAULT_SECRET_KEY: &str = "unseal-keys";
}

/// Upper bounds on untrusted spec fields
pub mod limits {
    pub const MAX_URL_LENGTH: usize = 2048;
    pub const MAX_NAMESPACE_LENGTH: usize = 63;
    pub const MAX_SECRET_NAME_LENGTH: usize = 253;
    pub const MAX_SECRET_KEY_LENGTH: usize = 253;
    pub const MAX_UNSEAL_KEYS: usize = 10;
    pub const MAX_UNSEAL_KEY_LENGTH: usize = 1024;
    pub const MAX_LABEL_KEY_LENGTH: usize = 253;
    pub const MAX_LABEL_VALUE_LENGTH: usize = 63;
}
