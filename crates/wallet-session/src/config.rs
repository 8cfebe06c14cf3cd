use crate::{
    network::{self, NetworkId, DEFAULT_NETWORK_ID},
    retry::BackoffConfig,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Network assumed before anything was restored or reported by a provider.
    /// Accepts a canonical id (`eip155:1`) or a legacy chain name (`ethereum`).
    pub default_network: String,

    /// How long `is_network_switching()` stays true after a network switch (milliseconds).
    pub network_switch_cooldown_ms: u64,

    /// Prefix of the label given to newly connected wallets (`"<prefix> 0x1234…abcd"`).
    pub default_label_prefix: String,

    /// Send switch/connect events to the analytics sink.
    pub analytics_enabled: bool,

    /// Look up a display name for newly connected wallets.
    pub name_resolution_enabled: bool,

    /// Upper bound for a single name lookup (milliseconds). 0 disables the timeout.
    pub name_resolution_timeout_ms: u64,

    /// Retry policy for fire-and-forget registry writes (primary flag).
    pub primary_sync: BackoffConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_network: DEFAULT_NETWORK_ID.to_owned(),
            network_switch_cooldown_ms: 500,
            default_label_prefix: "Wallet".to_owned(),
            analytics_enabled: true,
            name_resolution_enabled: true,
            name_resolution_timeout_ms: 3_000,
            primary_sync: BackoffConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Resolved default network; never fails (unknown values become `eip155:1`).
    pub fn default_network_id(&self) -> NetworkId {
        network::to_canonical_network(&self.default_network)
    }

    pub const fn switch_cooldown(&self) -> Duration {
        Duration::from_millis(self.network_switch_cooldown_ms)
    }

    pub fn name_resolution_timeout(&self) -> Option<Duration> {
        (self.name_resolution_timeout_ms > 0)
            .then(|| Duration::from_millis(self.name_resolution_timeout_ms))
    }

    pub fn default_label(&self, address: &crate::address::Address) -> String {
        let prefix = self.default_label_prefix.trim();
        if prefix.is_empty() {
            address.short()
        } else {
            format!("{prefix} {}", address.short())
        }
    }
}
