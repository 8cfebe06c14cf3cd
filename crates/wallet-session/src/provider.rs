//! Wallet-connection provider (injected extension or mobile signer) and name resolution.

use crate::address::Address;
use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider not ready: {0}")]
    NotReady(String),

    #[error("provider request failed: {0}")]
    Request(String),
}

/// Change notifications pushed by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    /// Raw account strings as reported; the first one is the one the user picked.
    AccountsChanged(Vec<String>),
    /// Network as reported: canonical id or legacy chain name.
    NetworkChanged(String),
}

#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Authorized accounts, most relevant first. Empty when the user authorized nothing.
    async fn request_accounts(&self) -> Result<Vec<String>, ProviderError>;

    /// Current network as reported by the provider (canonical id or legacy name).
    async fn current_network(&self) -> Result<String, ProviderError>;

    /// Stream of account / network changes.
    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent>;
}

/// Provider with fixed answers, driven by hand. Used by the CLI (`connect --account ..`) and
/// in tests to emit change events.
#[derive(Debug)]
pub struct StaticProvider {
    accounts: Mutex<Vec<String>>,
    network: Mutex<String>,
    events: broadcast::Sender<ProviderEvent>,
}

impl StaticProvider {
    pub fn new(accounts: Vec<String>, network: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            accounts: Mutex::new(accounts),
            network: Mutex::new(network.into()),
            events,
        }
    }

    pub fn set_accounts(&self, accounts: Vec<String>) {
        *self.accounts.lock().unwrap_or_else(PoisonError::into_inner) = accounts.clone();
        // No subscribers is fine.
        drop(self.events.send(ProviderEvent::AccountsChanged(accounts)));
    }

    pub fn set_network(&self, network: &str) {
        *self.network.lock().unwrap_or_else(PoisonError::into_inner) = network.to_owned();
        drop(
            self.events
                .send(ProviderEvent::NetworkChanged(network.to_owned())),
        );
    }
}

#[async_trait]
impl WalletProvider for StaticProvider {
    async fn request_accounts(&self) -> Result<Vec<String>, ProviderError> {
        Ok(self
            .accounts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    async fn current_network(&self) -> Result<String, ProviderError> {
        Ok(self
            .network
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }
}

/// Reverse name lookup (ENS-style). `Ok(None)` means "no name", which is not an error.
#[async_trait]
pub trait NameResolver: Send + Sync {
    async fn resolve(&self, address: &Address) -> eyre::Result<Option<String>>;
}

/// Fixed address -> name table.
#[derive(Debug, Default)]
pub struct StaticResolver {
    names: Vec<(Address, String)>,
}

impl StaticResolver {
    pub fn new(names: Vec<(Address, String)>) -> Self {
        Self { names }
    }
}

#[async_trait]
impl NameResolver for StaticResolver {
    async fn resolve(&self, address: &Address) -> eyre::Result<Option<String>> {
        Ok(self
            .names
            .iter()
            .find(|(a, _)| a == address)
            .map(|(_, n)| n.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_provider_emits_changes() -> eyre::Result<()> {
        let p = StaticProvider::new(vec![], "ethereum");
        let mut rx = p.subscribe();
        p.set_network("base");
        p.set_accounts(vec!["0xabc".to_owned()]);
        assert_eq!(rx.recv().await?, ProviderEvent::NetworkChanged("base".to_owned()));
        assert_eq!(
            rx.recv().await?,
            ProviderEvent::AccountsChanged(vec!["0xabc".to_owned()])
        );
        assert_eq!(p.current_network().await?, "base");
        assert_eq!(p.request_accounts().await?, vec!["0xabc".to_owned()]);
        Ok(())
    }
}
