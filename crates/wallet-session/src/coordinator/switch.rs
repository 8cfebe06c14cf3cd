use super::{elapsed_ms, SessionCoordinator};
use crate::{
    address::normalize,
    analytics::AnalyticsEvent,
    errors::SessionError,
    events::{Selection, SessionEvent},
    network::{self, NetworkId},
};
use std::time::Instant;
use tracing::{debug, info};

impl SessionCoordinator {
    /// Make a registered wallet active on the current network.
    ///
    /// The selection is accepted even when the wallet does not list the active network; that
    /// shows up as [`super::Availability::is_missing`].
    pub fn switch_wallet(&self, address: &str) -> Result<Selection, SessionError> {
        let started = Instant::now();
        let address = normalize(address)?;
        let outcome = {
            let mut st = self.state();
            self.select_locked(&mut st, &address, None)?
        };
        info!(address = %address, network = %outcome.network, "wallet switched");
        let current = outcome.current.clone();
        self.finish_switch(outcome, started);
        Ok(current)
    }

    /// Switch the active network. Works without an active wallet: the network is remembered
    /// for whichever wallet gets selected next.
    pub fn switch_network(&self, network: &str) -> Result<NetworkId, SessionError> {
        let started = Instant::now();
        let network = network::resolve_supported(network)?;

        let (previous_network, previous, current) = {
            let mut st = self.state();
            let previous = st.selection();
            let previous_network = std::mem::replace(&mut st.active_network, network.clone());
            st.switching_until = Some(started + self.inner.config.switch_cooldown());
            match &st.active_address {
                Some(address) => self.inner.cache.write(address, &network),
                None => self.inner.cache.write_network(&network),
            }
            (previous_network, previous, st.selection())
        };
        if previous_network == network {
            debug!(network = %network, "network re-selected");
        } else {
            info!(from = %previous_network, to = %network, "network switched");
        }

        self.emit(SessionEvent::NetworkSwitched {
            previous: Some(previous_network.clone()),
            network: network.clone(),
            at: chrono::Utc::now(),
        });
        let address = current.address().cloned();
        if let Some(a) = &address {
            self.emit_selection_changed(previous, current);
            self.invalidate_later(a, &network);
        }
        self.record(AnalyticsEvent::NetworkSwitched {
            previous: Some(previous_network),
            next: network.clone(),
            address,
            duration_ms: elapsed_ms(started),
        });
        Ok(network)
    }
}
