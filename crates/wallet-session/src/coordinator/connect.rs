use super::{SessionCoordinator, SwitchOutcome};
use crate::{
    address::{normalize, Address},
    analytics::AnalyticsEvent,
    errors::SessionError,
    events::{Selection, SessionEvent},
    network::{self, NetworkId},
    provider::ProviderEvent,
    registry::{RegistryError, UserId},
    wallet::{sort_registry_order, NewWallet, Wallet},
};
use eyre::Context as _;
use std::{sync::Arc, time::Instant};
use tokio::{runtime::Handle, sync::broadcast::error::RecvError, task::JoinHandle};
use tracing::{debug, info, warn};

impl SessionCoordinator {
    fn require_user(&self) -> Result<UserId, SessionError> {
        self.state().user.clone().ok_or(SessionError::NotAuthenticated)
    }

    /// Ask the provider for an account and make it the active wallet, registering it first
    /// if this user has never connected it.
    pub async fn connect(&self) -> Result<Selection, SessionError> {
        let provider = self
            .inner
            .provider
            .clone()
            .ok_or_else(|| SessionError::ProviderUnavailable("no provider attached".to_owned()))?;
        let user = self.require_user()?;

        let accounts = provider
            .request_accounts()
            .await
            .map_err(|e| SessionError::ProviderUnavailable(e.to_string()))?;
        let first = accounts.first().ok_or(SessionError::NoAccounts)?;
        let address = normalize(first)?;
        let raw_network = provider
            .current_network()
            .await
            .map_err(|e| SessionError::ProviderUnavailable(e.to_string()))?;
        let network = network::to_canonical_network(&raw_network);

        self.connect_address(&user, address, network).await
    }

    async fn connect_address(
        &self,
        user: &UserId,
        address: Address,
        network: NetworkId,
    ) -> Result<Selection, SessionError> {
        let started = Instant::now();

        // Known wallet: record the network and switch in one step.
        let known = {
            let mut st = self.state();
            let is_known = st
                .find_mut(&address)
                .map(|w| w.observe_network(&network))
                .is_some();
            if is_known {
                Some(self.select_locked(&mut st, &address, Some(network.clone()))?)
            } else {
                None
            }
        };
        if let Some(outcome) = known {
            return Ok(self.finish_connect(outcome, false, started));
        }

        let (registered, newly_registered) = self.register(user, &address, &network).await?;

        let outcome = {
            let mut st = self.state();
            if st.user.as_ref() != Some(user) {
                return Err(SessionError::NotAuthenticated);
            }
            // A concurrent connect or provider event may have inserted it already.
            if let Some(w) = st.find_mut(&address) {
                w.observe_network(&network);
            } else {
                let mut w = registered;
                w.observe_network(&network);
                st.wallets.push(w);
                sort_registry_order(&mut st.wallets);
            }
            st.note_added(&address);
            self.select_locked(&mut st, &address, Some(network))?
        };
        Ok(self.finish_connect(outcome, newly_registered, started))
    }

    /// Add the wallet to the registry. A duplicate means another device or tab registered it
    /// already; adopt that record instead.
    async fn register(
        &self,
        user: &UserId,
        address: &Address,
        network: &NetworkId,
    ) -> Result<(Wallet, bool), SessionError> {
        let new = NewWallet {
            address: address.clone(),
            network: network.clone(),
            label: Some(self.inner.config.default_label(address)),
        };
        match self.inner.registry.add(user, new).await {
            Ok(w) => {
                info!(address = %address, wallet_id = %w.id, "wallet registered");
                Ok((w, true))
            }
            Err(RegistryError::DuplicateKey) => {
                debug!(address = %address, "wallet already registered; adopting existing record");
                let listed = self
                    .inner
                    .registry
                    .list(user)
                    .await
                    .map_err(RegistryError::into_write_error)?;
                listed
                    .into_iter()
                    .find(|w| &w.address == address)
                    .map(|w| (w, false))
                    .ok_or_else(|| {
                        SessionError::RegistryWriteFailed(
                            "duplicate reported but wallet not listed".to_owned(),
                        )
                    })
            }
            Err(e) => Err(e.into_write_error()),
        }
    }

    fn finish_connect(
        &self,
        outcome: SwitchOutcome,
        newly_registered: bool,
        started: Instant,
    ) -> Selection {
        let current = outcome.current.clone();
        let address = outcome.address.clone();
        let network = outcome.network.clone();
        self.emit(SessionEvent::WalletConnected {
            previous: outcome.previous.address().cloned(),
            address: address.clone(),
            network: network.clone(),
            newly_registered,
            at: chrono::Utc::now(),
        });
        self.finish_switch(outcome, started);
        self.record(AnalyticsEvent::WalletConnected {
            address: address.clone(),
            network,
            newly_registered,
        });
        self.resolve_name_later(address);
        current
    }

    /// Look up a display name in the background; the wallet is updated in place if one is
    /// found. Lookups never block or fail the connect.
    fn resolve_name_later(&self, address: Address) {
        if !self.inner.config.name_resolution_enabled {
            return;
        }
        let Some(resolver) = self.inner.resolver.clone() else {
            return;
        };
        let timeout = self.inner.config.name_resolution_timeout();
        let this = self.clone();
        self.inner.tasks.submit("resolve_name", async move {
            let lookup = resolver.resolve(&address);
            let name = match timeout {
                Some(limit) => tokio::time::timeout(limit, lookup)
                    .await
                    .context("name lookup timed out")??,
                None => lookup.await?,
            };
            let Some(name) = name.filter(|n| !n.trim().is_empty()) else {
                return Ok(());
            };
            if let Some(w) = this.state().find_mut(&address) {
                debug!(address = %address, name = %name, "resolved wallet name");
                w.resolved_name = Some(name);
            }
            Ok(())
        });
    }

    /// Remove a wallet from the registry and the session. If it was active, the first
    /// remaining wallet takes over on the current network.
    pub async fn disconnect(&self, address: &str) -> Result<Selection, SessionError> {
        let started = Instant::now();
        let address = normalize(address)?;
        let (user, wallet_id) = {
            let st = self.state();
            let user = st.user.clone().ok_or(SessionError::NotAuthenticated)?;
            let id = st
                .find(&address)
                .map(|w| w.id.clone())
                .ok_or_else(|| SessionError::WalletNotFound(address.to_string()))?;
            (user, id)
        };

        match self.inner.registry.remove(&user, &wallet_id).await {
            Ok(()) => {}
            Err(RegistryError::NotFound(_)) => {
                debug!(address = %address, "wallet already gone from registry");
            }
            Err(e) => return Err(e.into_write_error()),
        }

        let (replacement, cleared, remaining) = {
            let mut st = self.state();
            st.wallets.retain(|w| w.address != address);
            st.note_removed(&address);
            st.labels.remove(&address);
            if st
                .primary
                .as_ref()
                .is_some_and(|p| p.current().as_ref() == Some(&address))
            {
                st.primary = None;
            }
            let remaining = st.wallets.len();

            if st.active_address.as_ref() == Some(&address) {
                let next = st.wallets.first().map(|w| w.address.clone());
                match next {
                    Some(next) => (Some(self.select_locked(&mut st, &next, None)?), None, remaining),
                    None => {
                        let previous = st.selection();
                        st.active_address = None;
                        self.inner.cache.clear();
                        (None, Some(previous), remaining)
                    }
                }
            } else {
                (None, None, remaining)
            }
        };

        info!(address = %address, remaining, "wallet disconnected");
        if let Some(outcome) = replacement {
            self.finish_switch(outcome, started);
        }
        if let Some(previous) = cleared {
            self.emit_selection_changed(previous, Selection::None);
        }
        self.record(AnalyticsEvent::WalletDisconnected { address, remaining });
        Ok(self.selection())
    }

    /// Route a provider notification. Account changes switch or auto-register; network
    /// changes outside the catalog are ignored.
    pub async fn handle_provider_event(&self, event: ProviderEvent) -> Result<(), SessionError> {
        match event {
            ProviderEvent::AccountsChanged(accounts) => {
                let Some(first) = accounts.first() else {
                    info!("provider reported no accounts; keeping selection");
                    return Ok(());
                };
                let address = normalize(first)?;
                if self.state().find(&address).is_some() {
                    self.switch_wallet(address.as_str())?;
                    return Ok(());
                }
                let user = self.require_user()?;
                let network = self.detected_network().await;
                self.connect_address(&user, address, network).await?;
                Ok(())
            }
            ProviderEvent::NetworkChanged(raw) => match network::resolve_supported(&raw) {
                Ok(network) => {
                    self.switch_network(network.as_str())?;
                    Ok(())
                }
                Err(_) => {
                    warn!(network = %raw, "provider switched to an unsupported network; ignoring");
                    Ok(())
                }
            },
        }
    }

    /// Provider network if it answers, otherwise the session's active network.
    async fn detected_network(&self) -> NetworkId {
        let reported = match &self.inner.provider {
            Some(p) => p.current_network().await.ok(),
            None => None,
        };
        reported.map_or_else(
            || self.active_network(),
            |raw| network::to_canonical_network(&raw),
        )
    }

    /// Feed provider notifications into [`Self::handle_provider_event`]. The task keeps the
    /// session alive; abort the returned handle on shutdown. `None` without a provider or
    /// outside a Tokio runtime.
    pub fn spawn_provider_listener(&self) -> Option<JoinHandle<()>> {
        let provider = Arc::clone(self.inner.provider.as_ref()?);
        let handle = Handle::try_current().ok()?;
        let mut rx = provider.subscribe();
        let this = self.clone();
        Some(handle.spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if let Err(e) = this.handle_provider_event(event).await {
                            warn!(error = %e, code = e.code(), "provider event rejected");
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "provider listener lagged; events dropped");
                    }
                    Err(RecvError::Closed) => {
                        debug!("provider stream closed");
                        return;
                    }
                }
            }
        }))
    }
}
