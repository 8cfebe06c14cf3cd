use super::{ops, RegistryError, UserId, WalletRegistry};
use crate::wallet::{sort_registry_order, NewWallet, Wallet};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
};

/// In-process registry. Writes can be made to fail on demand to exercise error paths.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    users: Mutex<HashMap<UserId, Vec<Wallet>>>,
    fail_writes: AtomicBool,
    fail_list: AtomicBool,
    list_calls: AtomicUsize,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn users(&self) -> MutexGuard<'_, HashMap<UserId, Vec<Wallet>>> {
        self.users.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the stored list for `user` (kept in registry order).
    pub fn seed(&self, user: &UserId, wallets: Vec<Wallet>) {
        let mut wallets = wallets;
        sort_registry_order(&mut wallets);
        self.users().insert(user.clone(), wallets);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Snapshot without going through the async trait.
    pub fn wallets(&self, user: &UserId) -> Vec<Wallet> {
        self.users().get(user).cloned().unwrap_or_default()
    }

    fn check_writes(&self) -> Result<(), RegistryError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RegistryError::Backend("write rejected".to_owned()));
        }
        Ok(())
    }
}

#[async_trait]
impl WalletRegistry for MemoryRegistry {
    async fn list(&self, user: &UserId) -> Result<Vec<Wallet>, RegistryError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(RegistryError::Backend("list unavailable".to_owned()));
        }
        Ok(self.wallets(user))
    }

    async fn add(&self, user: &UserId, wallet: NewWallet) -> Result<Wallet, RegistryError> {
        let mut users = self.users();
        let list = users.entry(user.clone()).or_default();
        // Duplicate detection comes first so racing registrations still see success semantics.
        if list.iter().any(|w| w.address == wallet.address) {
            return Err(RegistryError::DuplicateKey);
        }
        self.check_writes()?;
        ops::add(list, wallet)
    }

    async fn remove(&self, user: &UserId, wallet_id: &str) -> Result<(), RegistryError> {
        self.check_writes()?;
        let mut users = self.users();
        let list = users.entry(user.clone()).or_default();
        ops::remove(list, wallet_id)
    }

    async fn set_primary(&self, user: &UserId, wallet_id: &str) -> Result<(), RegistryError> {
        self.check_writes()?;
        let mut users = self.users();
        let list = users.entry(user.clone()).or_default();
        ops::set_primary(list, wallet_id)
    }

    async fn update_label(
        &self,
        user: &UserId,
        wallet_id: &str,
        label: Option<&str>,
    ) -> Result<Wallet, RegistryError> {
        self.check_writes()?;
        let mut users = self.users();
        let list = users.entry(user.clone()).or_default();
        ops::update_label(list, wallet_id, label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{address::normalize, network::NetworkId};

    fn new_wallet(addr: &str) -> eyre::Result<NewWallet> {
        Ok(NewWallet {
            address: normalize(addr)?,
            network: NetworkId::default_network(),
            label: None,
        })
    }

    #[tokio::test]
    async fn duplicate_add_reports_duplicate_key() -> eyre::Result<()> {
        let reg = MemoryRegistry::new();
        let user = UserId::new("u1");
        reg.add(&user, new_wallet("0xabababababababababababababababababababab")?)
            .await?;
        let again = reg
            .add(&user, new_wallet("0xABABABABABABABABABABABABABABABABABABABAB")?)
            .await;
        assert_eq!(again, Err(RegistryError::DuplicateKey));
        assert_eq!(reg.list(&user).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn set_primary_moves_flag_and_reorders() -> eyre::Result<()> {
        let reg = MemoryRegistry::new();
        let user = UserId::new("u1");
        let a = reg
            .add(&user, new_wallet("0x1111111111111111111111111111111111111111")?)
            .await?;
        let b = reg
            .add(&user, new_wallet("0x2222222222222222222222222222222222222222")?)
            .await?;
        reg.set_primary(&user, &a.id).await?;
        reg.set_primary(&user, &b.id).await?;
        let list = reg.list(&user).await?;
        assert_eq!(list.iter().filter(|w| w.is_primary).count(), 1);
        assert_eq!(list.first().map(|w| w.id.as_str()), Some(b.id.as_str()));
        Ok(())
    }

    #[tokio::test]
    async fn users_are_isolated_and_writes_can_fail() -> eyre::Result<()> {
        let reg = MemoryRegistry::new();
        let u1 = UserId::new("u1");
        let u2 = UserId::new("u2");
        let w = reg
            .add(&u1, new_wallet("0x3333333333333333333333333333333333333333")?)
            .await?;
        assert!(reg.list(&u2).await?.is_empty());

        reg.set_fail_writes(true);
        assert!(matches!(
            reg.remove(&u1, &w.id).await,
            Err(RegistryError::Backend(_))
        ));
        reg.set_fail_writes(false);
        reg.remove(&u1, &w.id).await?;
        assert!(matches!(
            reg.remove(&u1, &w.id).await,
            Err(RegistryError::NotFound(_))
        ));
        Ok(())
    }
}
