use crate::{address::Address, network::NetworkId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, collections::BTreeMap};

/// Advisory per-network data for a wallet. May be stale; never used for correctness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance_usd: Option<Decimal>,
    /// Trust/risk score, 0 (safe) ..= 100 (high risk).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<u8>,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: String,
    pub address: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_name: Option<String>,
    /// Insertion-ordered, duplicate free. Never empty once a wallet is in a session.
    #[serde(default)]
    pub supported_networks: Vec<NetworkId>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub per_network_cache: BTreeMap<NetworkId, NetworkSnapshot>,
    #[serde(default)]
    pub is_primary: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Registration request handed to the registry on first connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewWallet {
    pub address: Address,
    pub network: NetworkId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Wallet {
    pub fn from_new(id: String, new: NewWallet, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            address: new.address,
            label: new.label,
            resolved_name: None,
            supported_networks: vec![new.network],
            per_network_cache: BTreeMap::new(),
            is_primary: false,
            created_at,
            last_used_at: None,
        }
    }

    pub fn supports(&self, network: &NetworkId) -> bool {
        self.supported_networks.contains(network)
    }

    pub fn first_network(&self) -> Option<&NetworkId> {
        self.supported_networks.first()
    }

    /// Record that the wallet was seen on `network`. Returns true if it was new.
    pub fn observe_network(&mut self, network: &NetworkId) -> bool {
        if self.supports(network) {
            return false;
        }
        self.supported_networks.push(network.clone());
        true
    }

    /// Best display name: user label, then resolved name, then short address.
    pub fn display_name(&self) -> String {
        self.label
            .clone()
            .or_else(|| self.resolved_name.clone())
            .unwrap_or_else(|| self.address.short())
    }

    fn dedup_networks(&mut self) {
        let mut seen: Vec<NetworkId> = Vec::with_capacity(self.supported_networks.len());
        for n in self.supported_networks.drain(..) {
            if !seen.contains(&n) {
                seen.push(n);
            }
        }
        self.supported_networks = seen;
    }
}

/// Registry list order: primary first, then newest first, then id ascending.
pub fn registry_order(a: &Wallet, b: &Wallet) -> Ordering {
    b.is_primary
        .cmp(&a.is_primary)
        .then_with(|| b.created_at.cmp(&a.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

pub fn sort_registry_order(wallets: &mut [Wallet]) {
    wallets.sort_by(registry_order);
}

/// Merge a fresh registry listing into the in-memory collection.
///
/// Registry data wins for existence, label, primary flag and timestamps. Locally-known
/// advisory data (resolved name, per-network snapshots, observed networks, `last_used_at`
/// when newer) is carried over. Case-duplicate addresses keep only the first record in
/// registry order, and wallets without any network get `fallback_network`.
pub fn merge_registry(
    current: &[Wallet],
    fetched: Vec<Wallet>,
    fallback_network: &NetworkId,
) -> Vec<Wallet> {
    let mut fetched = fetched;
    sort_registry_order(&mut fetched);

    let mut out: Vec<Wallet> = Vec::with_capacity(fetched.len());
    for mut w in fetched {
        if out.iter().any(|o| o.address == w.address) {
            tracing::warn!(address = %w.address, wallet_id = %w.id, "registry returned duplicate address; keeping first");
            continue;
        }
        if let Some(local) = current.iter().find(|c| c.address == w.address) {
            if w.resolved_name.is_none() {
                w.resolved_name.clone_from(&local.resolved_name);
            }
            for (net, snap) in &local.per_network_cache {
                w.per_network_cache
                    .entry(net.clone())
                    .or_insert_with(|| snap.clone());
            }
            for net in &local.supported_networks {
                w.observe_network(net);
            }
            if local.last_used_at > w.last_used_at {
                w.last_used_at = local.last_used_at;
            }
        }
        w.dedup_networks();
        if w.supported_networks.is_empty() {
            w.supported_networks.push(fallback_network.clone());
        }
        out.push(w);
    }

    // At most one primary survives; order already puts the winner first.
    let mut seen_primary = false;
    for w in &mut out {
        if w.is_primary {
            if seen_primary {
                w.is_primary = false;
            }
            seen_primary = true;
        }
    }
    out
}
