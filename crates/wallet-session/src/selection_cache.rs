//! Device-local persistence of the active selection (two scalars: address, network).
//!
//! Values are opaque strings in a synchronous key-value store. Anything unparseable is treated
//! exactly like "absent" and removed. If the store itself fails (read-only profile, private
//! browsing style restrictions, disk errors) the cache degrades to a no-op for the rest of the
//! session and the coordinator keeps working from memory.

use crate::{
    address::{normalize, Address},
    network::{self, NetworkId},
};
use eyre::Context as _;
use std::{
    collections::BTreeMap,
    fmt,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};
use thiserror::Error;
use tracing::{debug, warn};

pub const ACTIVE_ADDRESS_KEY: &str = "wallet_session.active_address";
pub const ACTIVE_NETWORK_KEY: &str = "wallet_session.active_network";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("local storage unavailable: {0}")]
pub struct StorageError(pub String);

pub trait KeyValueStore: Send + Sync + fmt::Debug {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Process-memory store. `set_unavailable(true)` makes every call fail.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, String>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn values(&self) -> Result<MutexGuard<'_, BTreeMap<String, String>>, StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError("storage disabled".to_owned()));
        }
        Ok(self.values.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.values()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.values()?.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.values()?.remove(key);
        Ok(())
    }
}

/// JSON object file acting as device storage for the CLI.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn load(&self) -> eyre::Result<BTreeMap<String, String>> {
        match crate::fsutil::read_json_opt(&self.path) {
            Ok(v) => Ok(v.unwrap_or_default()),
            // A torn or hand-edited file is corruption, not an outage: start over.
            Err(e) if e.downcast_ref::<serde_json::Error>().is_some() => {
                warn!(path = %self.path.display(), error = %e, "local storage file corrupted; resetting");
                Ok(BTreeMap::new())
            }
            Err(e) => Err(e),
        }
    }

    fn update(&self, f: impl FnOnce(&mut BTreeMap<String, String>)) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut m = self.load().map_err(|e| StorageError(format!("{e:#}")))?;
        f(&mut m);
        crate::fsutil::write_json_atomic(&self.path, &m)
            .context("write local storage")
            .map_err(|e| StorageError(format!("{e:#}")))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let m = self.load().map_err(|e| StorageError(format!("{e:#}")))?;
        Ok(m.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.update(|m| {
            m.insert(key.to_owned(), value.to_owned());
        })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.update(|m| {
            m.remove(key);
        })
    }
}

/// What the device remembers. Either field may be absent independently.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CachedSelection {
    pub address: Option<Address>,
    pub network: Option<NetworkId>,
}

impl CachedSelection {
    pub const fn is_empty(&self) -> bool {
        self.address.is_none() && self.network.is_none()
    }
}

#[derive(Debug)]
pub struct SelectionCache {
    store: Arc<dyn KeyValueStore>,
    degraded: AtomicBool,
}

impl SelectionCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            degraded: AtomicBool::new(false),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    fn degrade(&self, op: &'static str, e: &StorageError) {
        if !self.degraded.swap(true, Ordering::SeqCst) {
            warn!(op, error = %e, "local storage failed; selection will not persist this session");
        }
    }

    fn get(&self, key: &'static str) -> Option<String> {
        if self.is_degraded() {
            return None;
        }
        match self.store.get(key) {
            Ok(v) => v,
            Err(e) => {
                self.degrade("get", &e);
                None
            }
        }
    }

    fn set(&self, key: &'static str, value: &str) {
        if self.is_degraded() {
            return;
        }
        if let Err(e) = self.store.set(key, value) {
            self.degrade("set", &e);
        }
    }

    fn remove(&self, key: &'static str) {
        if self.is_degraded() {
            return;
        }
        if let Err(e) = self.store.remove(key) {
            self.degrade("remove", &e);
        }
    }

    /// Read both scalars, clearing any value that does not parse.
    pub fn read(&self) -> CachedSelection {
        let address = self.get(ACTIVE_ADDRESS_KEY).and_then(|raw| match normalize(&raw) {
            Ok(a) => Some(a),
            Err(_) => {
                warn!(key = ACTIVE_ADDRESS_KEY, "discarding unparseable cached address");
                self.remove(ACTIVE_ADDRESS_KEY);
                None
            }
        });

        let network = self
            .get(ACTIVE_NETWORK_KEY)
            .and_then(|raw| match parse_cached_network(&raw) {
                Some(n) => {
                    if n.as_str() != raw {
                        debug!(from = %raw, to = %n, "rewriting legacy cached network");
                        self.set(ACTIVE_NETWORK_KEY, n.as_str());
                    }
                    Some(n)
                }
                None => {
                    warn!(key = ACTIVE_NETWORK_KEY, "discarding unparseable cached network");
                    self.remove(ACTIVE_NETWORK_KEY);
                    None
                }
            });

        CachedSelection { address, network }
    }

    pub fn write(&self, address: &Address, network: &NetworkId) {
        self.set(ACTIVE_ADDRESS_KEY, address.as_str());
        self.set(ACTIVE_NETWORK_KEY, network.as_str());
    }

    pub fn write_network(&self, network: &NetworkId) {
        self.set(ACTIVE_NETWORK_KEY, network.as_str());
    }

    pub fn clear(&self) {
        self.remove(ACTIVE_ADDRESS_KEY);
        self.remove(ACTIVE_NETWORK_KEY);
    }
}

/// Canonical ids must be in the catalog; bare names are legacy chain names and always map
/// to something (unknown ones to the default network).
fn parse_cached_network(raw: &str) -> Option<NetworkId> {
    let v = raw.trim();
    if v.is_empty() {
        return None;
    }
    if v.contains(':') {
        return NetworkId::parse(v).ok().filter(network::is_supported);
    }
    Some(network::to_canonical_network(v))
}
