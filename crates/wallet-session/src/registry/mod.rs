//! Durable, per-user wallet registry (the remote source of truth for wallet existence).
//!
//! The coordinator only consumes this interface. [`MemoryRegistry`] and [`FileRegistry`] are
//! in-process implementations used by the CLI, embedders without a backend, and tests.

mod file;
mod memory;

pub use file::FileRegistry;
pub use memory::MemoryRegistry;

use crate::{errors::SessionError, wallet::NewWallet, wallet::Wallet};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Opaque id of the authenticated user that owns a registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The wallet is already registered for this user.
    #[error("wallet already registered")]
    DuplicateKey,

    #[error("wallet not registered: {0}")]
    NotFound(String),

    #[error("registry backend error: {0}")]
    Backend(String),
}

impl RegistryError {
    pub fn backend(e: impl fmt::Display) -> Self {
        Self::Backend(e.to_string())
    }

    /// Mapping for mutating calls. Duplicate-add is handled by the caller before this.
    pub fn into_write_error(self) -> SessionError {
        SessionError::RegistryWriteFailed(self.to_string())
    }

    pub fn into_read_error(self) -> SessionError {
        SessionError::RegistryUnavailable(self.to_string())
    }
}

#[async_trait]
pub trait WalletRegistry: Send + Sync {
    /// All wallets for `user`, ordered by `is_primary` desc, `created_at` desc, `id` asc
    /// (see [`crate::wallet::sort_registry_order`]).
    async fn list(&self, user: &UserId) -> Result<Vec<Wallet>, RegistryError>;

    /// Register a wallet. Returns [`RegistryError::DuplicateKey`] if the (normalized) address
    /// is already present for `user`.
    async fn add(&self, user: &UserId, wallet: NewWallet) -> Result<Wallet, RegistryError>;

    async fn remove(&self, user: &UserId, wallet_id: &str) -> Result<(), RegistryError>;

    /// Mark `wallet_id` primary and clear the flag on every other wallet of `user`.
    async fn set_primary(&self, user: &UserId, wallet_id: &str) -> Result<(), RegistryError>;

    async fn update_label(
        &self,
        user: &UserId,
        wallet_id: &str,
        label: Option<&str>,
    ) -> Result<Wallet, RegistryError>;
}

/// Shared mutation logic for the in-process registries, applied to one user's wallet list.
pub(crate) mod ops {
    use super::RegistryError;
    use crate::wallet::{sort_registry_order, NewWallet, Wallet};

    pub fn add(wallets: &mut Vec<Wallet>, new: NewWallet) -> Result<Wallet, RegistryError> {
        if wallets.iter().any(|w| w.address == new.address) {
            return Err(RegistryError::DuplicateKey);
        }
        let w = Wallet::from_new(uuid::Uuid::new_v4().to_string(), new, chrono::Utc::now());
        wallets.push(w.clone());
        sort_registry_order(wallets);
        Ok(w)
    }

    pub fn remove(wallets: &mut Vec<Wallet>, wallet_id: &str) -> Result<(), RegistryError> {
        let before = wallets.len();
        wallets.retain(|w| w.id != wallet_id);
        if wallets.len() == before {
            return Err(RegistryError::NotFound(wallet_id.to_owned()));
        }
        Ok(())
    }

    pub fn set_primary(wallets: &mut [Wallet], wallet_id: &str) -> Result<(), RegistryError> {
        if !wallets.iter().any(|w| w.id == wallet_id) {
            return Err(RegistryError::NotFound(wallet_id.to_owned()));
        }
        for w in wallets.iter_mut() {
            w.is_primary = w.id == wallet_id;
        }
        sort_registry_order(wallets);
        Ok(())
    }

    pub fn update_label(
        wallets: &mut [Wallet],
        wallet_id: &str,
        label: Option<&str>,
    ) -> Result<Wallet, RegistryError> {
        let w = wallets
            .iter_mut()
            .find(|w| w.id == wallet_id)
            .ok_or_else(|| RegistryError::NotFound(wallet_id.to_owned()))?;
        w.label = label
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned);
        Ok(w.clone())
    }
}
