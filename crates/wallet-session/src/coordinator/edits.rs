use super::SessionCoordinator;
use crate::{
    address::{normalize, Address},
    errors::SessionError,
    network,
    optimistic::Optimistic,
    retry::retry_with_backoff,
    wallet::{NetworkSnapshot, Wallet},
};
use std::sync::Arc;
use tracing::{debug, info, warn};

fn clean_label(label: Option<&str>) -> Option<String> {
    label
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

impl SessionCoordinator {
    /// Rename a wallet. The new label is visible immediately; if the registry rejects it, the
    /// previous label comes back (unless a newer rename already replaced this one).
    pub async fn update_label(
        &self,
        address: &str,
        label: Option<&str>,
    ) -> Result<Wallet, SessionError> {
        let address = normalize(address)?;
        let label = clean_label(label);

        let (user, wallet_id) = {
            let mut guard = self.state();
            let st = &mut *guard;
            let user = st.user.clone().ok_or(SessionError::NotAuthenticated)?;
            let w = st
                .wallets
                .iter_mut()
                .find(|w| w.address == address)
                .ok_or_else(|| SessionError::WalletNotFound(address.to_string()))?;
            st.labels
                .entry(address.clone())
                .or_insert_with(|| Optimistic::committed(w.label.clone()))
                .propose(label.clone());
            w.label.clone_from(&label);
            (user, w.id.clone())
        };

        let res = self
            .inner
            .registry
            .update_label(&user, &wallet_id, label.as_deref())
            .await;

        let mut guard = self.state();
        let st = &mut *guard;
        let settled = match &res {
            Ok(server) => st
                .labels
                .get_mut(&address)
                .is_some_and(|slot| slot.commit(&label, server.label.clone())),
            Err(_) => st
                .labels
                .get_mut(&address)
                .is_some_and(|slot| slot.rollback(&label)),
        };
        if settled {
            let value = st
                .labels
                .remove(&address)
                .and_then(|slot| slot.current().clone());
            if let Some(w) = st.wallets.iter_mut().find(|w| w.address == address) {
                w.label = value;
            }
        }

        match res {
            Ok(_) => {
                debug!(address = %address, "label saved");
                st.wallets
                    .iter()
                    .find(|w| w.address == address)
                    .cloned()
                    .ok_or_else(|| SessionError::WalletNotFound(address.to_string()))
            }
            Err(e) => {
                warn!(address = %address, error = %e, rolled_back = settled, "label update failed");
                Err(e.into_write_error())
            }
        }
    }

    pub fn is_label_pending(&self, address: &Address) -> bool {
        self.state()
            .labels
            .get(address)
            .is_some_and(Optimistic::is_pending)
    }

    /// Make a wallet the user's primary. Applied locally right away; the registry write runs in
    /// the background with bounded retries and is rolled back if it never succeeds.
    pub fn set_primary(&self, address: &str) -> Result<(), SessionError> {
        let address = normalize(address)?;
        let (user, wallet_id) = {
            let mut st = self.state();
            let user = st.user.clone().ok_or(SessionError::NotAuthenticated)?;
            let wallet = st
                .find(&address)
                .ok_or_else(|| SessionError::WalletNotFound(address.to_string()))?;
            if wallet.is_primary && st.primary.is_none() {
                return Ok(());
            }
            let wallet_id = wallet.id.clone();
            let prior = st
                .wallets
                .iter()
                .find(|w| w.is_primary)
                .map(|w| w.address.clone());
            st.primary
                .get_or_insert_with(|| Optimistic::committed(prior))
                .propose(Some(address.clone()));
            st.apply_primary(Some(&address));
            (user, wallet_id)
        };
        info!(address = %address, "primary wallet changed");

        let this = self.clone();
        let registry = Arc::clone(&self.inner.registry);
        let backoff = self.inner.config.primary_sync.clone();
        let proposed = Some(address);
        self.inner.tasks.submit("set_primary", async move {
            let res = retry_with_backoff(
                &backoff,
                |_| {
                    let registry = Arc::clone(&registry);
                    let user = user.clone();
                    let wallet_id = wallet_id.clone();
                    async move { registry.set_primary(&user, &wallet_id).await }
                },
                "set_primary",
            )
            .await;

            let mut st = this.state();
            match res {
                Ok(()) => {
                    if st
                        .primary
                        .as_mut()
                        .is_some_and(|slot| slot.commit(&proposed, proposed.clone()))
                    {
                        st.primary = None;
                    }
                    Ok(())
                }
                Err(e) => {
                    let restored = st.primary.as_mut().and_then(|slot| {
                        slot.rollback(&proposed).then(|| slot.current().clone())
                    });
                    if let Some(prior) = restored {
                        warn!(error = %format!("{e:#}"), "primary change not saved; rolled back");
                        st.primary = None;
                        st.apply_primary(prior.as_ref());
                    }
                    Err(e)
                }
            }
        });
        Ok(())
    }

    /// A primary change is waiting for the registry.
    pub fn is_primary_pending(&self) -> bool {
        self.state()
            .primary
            .as_ref()
            .is_some_and(Optimistic::is_pending)
    }

    /// Store advisory data (balance, risk score) for a wallet on one network.
    pub fn update_network_snapshot(
        &self,
        address: &str,
        network: &str,
        snapshot: NetworkSnapshot,
    ) -> Result<(), SessionError> {
        let address = normalize(address)?;
        let network = network::resolve_supported(network)?;
        let mut st = self.state();
        let w = st
            .find_mut(&address)
            .ok_or_else(|| SessionError::WalletNotFound(address.to_string()))?;
        w.per_network_cache.insert(network, snapshot);
        Ok(())
    }
}
