//! Static catalog of supported networks and the legacy chain-name translation.
//!
//! Networks are identified by CAIP-2 style ids (`namespace:reference`, e.g. `eip155:1`).
//! Older persisted data and some providers still speak plain chain names (`"ethereum"`,
//! `"base"`); [`to_canonical_network`] and [`to_legacy_name`] translate between the two and
//! never fail.

use crate::errors::SessionError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Network used whenever a legacy name or id cannot be resolved.
pub const DEFAULT_NETWORK_ID: &str = "eip155:1";
pub const DEFAULT_LEGACY_NAME: &str = "ethereum";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NetworkId(String);

impl NetworkId {
    /// Parse a `namespace:reference` id. Does not check catalog membership.
    pub fn parse(s: &str) -> Result<Self, SessionError> {
        let v = s.trim().to_ascii_lowercase();
        let Some((ns, reference)) = v.split_once(':') else {
            return Err(SessionError::UnsupportedNetwork(s.to_owned()));
        };
        let ns_ok = (3..=8).contains(&ns.len())
            && ns
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-');
        let ref_ok = (1..=64).contains(&reference.len())
            && reference
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        if !ns_ok || !ref_ok {
            return Err(SessionError::UnsupportedNetwork(s.to_owned()));
        }
        Ok(Self(v))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn default_network() -> Self {
        Self(DEFAULT_NETWORK_ID.to_owned())
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for NetworkId {
    type Error = SessionError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<NetworkId> for String {
    fn from(n: NetworkId) -> Self {
        n.0
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct NetworkInfo {
    pub id: &'static str,
    pub legacy_name: &'static str,
    pub display_name: &'static str,
    pub native_symbol: &'static str,
    pub is_testnet: bool,
}

impl NetworkInfo {
    pub fn network_id(&self) -> NetworkId {
        NetworkId(self.id.to_owned())
    }
}

const NETWORKS: &[NetworkInfo] = &[
    NetworkInfo {
        id: "eip155:1",
        legacy_name: "ethereum",
        display_name: "Ethereum",
        native_symbol: "ETH",
        is_testnet: false,
    },
    NetworkInfo {
        id: "eip155:8453",
        legacy_name: "base",
        display_name: "Base",
        native_symbol: "ETH",
        is_testnet: false,
    },
    NetworkInfo {
        id: "eip155:42161",
        legacy_name: "arbitrum",
        display_name: "Arbitrum One",
        native_symbol: "ETH",
        is_testnet: false,
    },
    NetworkInfo {
        id: "eip155:10",
        legacy_name: "optimism",
        display_name: "OP Mainnet",
        native_symbol: "ETH",
        is_testnet: false,
    },
    NetworkInfo {
        id: "eip155:137",
        legacy_name: "polygon",
        display_name: "Polygon",
        native_symbol: "POL",
        is_testnet: false,
    },
    NetworkInfo {
        id: "eip155:56",
        legacy_name: "bnb",
        display_name: "BNB Smart Chain",
        native_symbol: "BNB",
        is_testnet: false,
    },
    NetworkInfo {
        id: "eip155:43114",
        legacy_name: "avalanche",
        display_name: "Avalanche C-Chain",
        native_symbol: "AVAX",
        is_testnet: false,
    },
    NetworkInfo {
        id: "eip155:11155111",
        legacy_name: "sepolia",
        display_name: "Sepolia",
        native_symbol: "ETH",
        is_testnet: true,
    },
    NetworkInfo {
        id: "eip155:84532",
        legacy_name: "base-sepolia",
        display_name: "Base Sepolia",
        native_symbol: "ETH",
        is_testnet: true,
    },
];

pub const fn catalog() -> &'static [NetworkInfo] {
    NETWORKS
}

/// Find a catalog entry by canonical id or legacy name (case-insensitive).
pub fn lookup(id_or_name: &str) -> Option<&'static NetworkInfo> {
    let v = id_or_name.trim();
    NETWORKS
        .iter()
        .find(|n| n.id.eq_ignore_ascii_case(v) || n.legacy_name.eq_ignore_ascii_case(v))
}

pub fn is_supported(id: &NetworkId) -> bool {
    NETWORKS.iter().any(|n| n.id == id.as_str())
}

/// Resolve a catalog network, rejecting anything outside the catalog.
pub fn resolve_supported(id_or_name: &str) -> Result<NetworkId, SessionError> {
    lookup(id_or_name)
        .map(NetworkInfo::network_id)
        .ok_or_else(|| SessionError::UnsupportedNetwork(id_or_name.trim().to_owned()))
}

/// Legacy chain name (or canonical id) to canonical id. Unknown input yields the default
/// network so that stale persisted values keep loading.
pub fn to_canonical_network(legacy_name: &str) -> NetworkId {
    lookup(legacy_name).map_or_else(NetworkId::default_network, NetworkInfo::network_id)
}

/// Canonical id to legacy chain name. Unknown ids yield [`DEFAULT_LEGACY_NAME`].
pub fn to_legacy_name(id: &NetworkId) -> &'static str {
    NETWORKS
        .iter()
        .find(|n| n.id == id.as_str())
        .map_or(DEFAULT_LEGACY_NAME, |n| n.legacy_name)
}
