//! Dependent-query invalidation: which cached queries go stale when the (wallet, network)
//! pair changes, and where to send that list.

use crate::{address::Address, network::NetworkId};
use serde::Serialize;
use std::{
    fmt,
    sync::{Mutex, PoisonError},
};
use tracing::debug;

/// Structured cache key, e.g. `["balances", "0xabc…", "eip155:1"]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct QueryKey(pub Vec<String>);

impl QueryKey {
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    pub fn scope(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

pub trait QueryKeyProvider: Send + Sync {
    fn keys_for(&self, address: &Address, network: &NetworkId) -> Vec<QueryKey>;
}

pub trait InvalidationSink: Send + Sync {
    fn invalidate(&self, keys: &[QueryKey]);
}

/// Keys used by the dashboard surfaces that depend on the active pair.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardQueryKeys;

impl QueryKeyProvider for StandardQueryKeys {
    fn keys_for(&self, address: &Address, network: &NetworkId) -> Vec<QueryKey> {
        let a = address.as_str();
        let n = network.as_str();
        vec![
            QueryKey::new(["balances", a, n]),
            QueryKey::new(["portfolio", a, n]),
            QueryKey::new(["security_scan", a, n]),
            // Achievements are tracked per address across networks.
            QueryKey::new(["achievements", a]),
        ]
    }
}

/// Logs what would be invalidated. Default sink when nothing downstream caches queries.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingInvalidationSink;

impl InvalidationSink for TracingInvalidationSink {
    fn invalidate(&self, keys: &[QueryKey]) {
        for k in keys {
            debug!(key = %k, "query invalidated");
        }
    }
}

/// Keeps every batch it receives.
#[derive(Debug, Default)]
pub struct RecordingSink {
    batches: Mutex<Vec<Vec<QueryKey>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<Vec<QueryKey>> {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl InvalidationSink for RecordingSink {
    fn invalidate(&self, keys: &[QueryKey]) {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(keys.to_vec());
    }
}
