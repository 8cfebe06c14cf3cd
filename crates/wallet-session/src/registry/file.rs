use super::{ops, RegistryError, UserId, WalletRegistry};
use crate::wallet::{sort_registry_order, NewWallet, Wallet};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{
    path::PathBuf,
    sync::{Mutex, PoisonError},
};

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    wallets: Vec<Wallet>,
}

/// JSON-file registry: one `<hex(user id)>.json` per user under `root`.
///
/// Stands in for the remote record store when running the CLI locally. Every mutation is a
/// read-modify-write under a process-local lock with an atomic rename at the end.
#[derive(Debug)]
pub struct FileRegistry {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FileRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn path_for(&self, user: &UserId) -> PathBuf {
        // Hex keeps arbitrary user ids (emails, `../`) out of path syntax.
        self.root
            .join(format!("{}.json", hex::encode(user.as_str().as_bytes())))
    }

    fn load(&self, user: &UserId) -> Result<Vec<Wallet>, RegistryError> {
        let file: Option<RegistryFile> =
            crate::fsutil::read_json_opt(&self.path_for(user)).map_err(RegistryError::backend)?;
        let mut wallets = file.unwrap_or_default().wallets;
        sort_registry_order(&mut wallets);
        Ok(wallets)
    }

    fn save(&self, user: &UserId, wallets: Vec<Wallet>) -> Result<(), RegistryError> {
        crate::fsutil::write_json_atomic(&self.path_for(user), &RegistryFile { wallets })
            .map_err(RegistryError::backend)
    }

    fn mutate<T>(
        &self,
        user: &UserId,
        f: impl FnOnce(&mut Vec<Wallet>) -> Result<T, RegistryError>,
    ) -> Result<T, RegistryError> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut wallets = self.load(user)?;
        let out = f(&mut wallets)?;
        self.save(user, wallets)?;
        Ok(out)
    }
}

#[async_trait]
impl WalletRegistry for FileRegistry {
    async fn list(&self, user: &UserId) -> Result<Vec<Wallet>, RegistryError> {
        self.load(user)
    }

    async fn add(&self, user: &UserId, wallet: NewWallet) -> Result<Wallet, RegistryError> {
        self.mutate(user, |ws| ops::add(ws, wallet))
    }

    async fn remove(&self, user: &UserId, wallet_id: &str) -> Result<(), RegistryError> {
        self.mutate(user, |ws| ops::remove(ws, wallet_id))
    }

    async fn set_primary(&self, user: &UserId, wallet_id: &str) -> Result<(), RegistryError> {
        self.mutate(user, |ws| ops::set_primary(ws, wallet_id))
    }

    async fn update_label(
        &self,
        user: &UserId,
        wallet_id: &str,
        label: Option<&str>,
    ) -> Result<Wallet, RegistryError> {
        self.mutate(user, |ws| ops::update_label(ws, wallet_id, label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{address::normalize, network::to_canonical_network};

    #[tokio::test]
    async fn persists_across_instances() -> eyre::Result<()> {
        let td = tempfile::tempdir()?;
        let user = UserId::new("alice@example.com");
        let reg = FileRegistry::new(td.path());
        let w = reg
            .add(
                &user,
                NewWallet {
                    address: normalize("0x4444444444444444444444444444444444444444")?,
                    network: to_canonical_network("base"),
                    label: Some("Trading".to_owned()),
                },
            )
            .await?;
        reg.set_primary(&user, &w.id).await?;
        reg.update_label(&user, &w.id, Some("  Savings ")).await?;

        let reopened = FileRegistry::new(td.path());
        let list = reopened.list(&user).await?;
        let got = list.first().ok_or_else(|| eyre::eyre!("wallet missing"))?;
        assert_eq!(got.id, w.id);
        assert!(got.is_primary);
        assert_eq!(got.label.as_deref(), Some("Savings"));
        assert_eq!(got.supported_networks, vec![to_canonical_network("base")]);
        Ok(())
    }

    #[tokio::test]
    async fn user_ids_never_escape_root() -> eyre::Result<()> {
        let td = tempfile::tempdir()?;
        let reg = FileRegistry::new(td.path().join("reg"));
        let user = UserId::new("../../etc/passwd");
        assert!(reg.path_for(&user).starts_with(td.path().join("reg")));
        assert!(reg.list(&user).await?.is_empty());
        Ok(())
    }
}
