use super::{
    state::{InFlightEdits, RestoreGuard},
    AuthState, SessionCoordinator,
};
use crate::{
    address::Address,
    errors::SessionError,
    events::Selection,
    network::NetworkId,
    selection_cache::CachedSelection,
    wallet::{merge_registry, Wallet},
};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Which rule picked the restored selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreBranch {
    LocalCache,
    ServerPrimary,
    DeterministicFirst,
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RestoreOutcome {
    Restored {
        selection: Selection,
        branch: RestoreBranch,
    },
    /// Anonymous input, already restored for this user, or superseded by a newer restore.
    Skipped,
}

/// Outcome of [`choose`], before it is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Choice {
    pick: Option<(Address, NetworkId)>,
    branch: RestoreBranch,
    /// The cached pair was present but unusable.
    heal: bool,
}

/// Pure selection rule over a registry listing and the cached pair. A wallet without any
/// listed network is picked on `fallback`.
fn choose(wallets: &[Wallet], cached: &CachedSelection, fallback: &NetworkId) -> Choice {
    if let (Some(address), Some(network)) = (&cached.address, &cached.network) {
        if wallets
            .iter()
            .any(|w| &w.address == address && w.supports(network))
        {
            return Choice {
                pick: Some((address.clone(), network.clone())),
                branch: RestoreBranch::LocalCache,
                heal: false,
            };
        }
    }
    let heal = !cached.is_empty();

    let first_on_own_network = |w: &Wallet| {
        let network = w.first_network().unwrap_or(fallback);
        (w.address.clone(), network.clone())
    };

    if let Some(pick) = wallets.iter().find(|w| w.is_primary).map(first_on_own_network) {
        return Choice {
            pick: Some(pick),
            branch: RestoreBranch::ServerPrimary,
            heal,
        };
    }
    if let Some(pick) = wallets.first().map(first_on_own_network) {
        return Choice {
            pick: Some(pick),
            branch: RestoreBranch::DeterministicFirst,
            heal,
        };
    }
    Choice {
        pick: None,
        branch: RestoreBranch::Empty,
        heal,
    }
}

impl SessionCoordinator {
    /// Rebuild the selection for an authenticated user from the registry and the device
    /// cache. Runs at most once per user until [`SessionCoordinator::logout`].
    pub async fn restore(&self, auth: AuthState) -> Result<RestoreOutcome, SessionError> {
        let AuthState::Authenticated(user) = auth else {
            debug!("restore skipped: anonymous");
            return Ok(RestoreOutcome::Skipped);
        };

        let (generation, torn_down) = {
            let mut st = self.state();
            if st.guard.covers(&user) {
                debug!(user = %user, "restore skipped: already restored or in flight");
                return Ok(RestoreOutcome::Skipped);
            }
            let torn_down = if st.user.as_ref().is_some_and(|u| u != &user) {
                info!(from = ?st.user, to = %user, "user changed; tearing down previous session");
                Some(st.reset(self.default_network()))
            } else {
                None
            };
            st.generation = st.generation.wrapping_add(1);
            st.guard = RestoreGuard::InFlight {
                user: user.clone(),
                generation: st.generation,
            };
            st.user = Some(user.clone());
            st.in_flight_edits = InFlightEdits::default();
            (st.generation, torn_down)
        };
        if let Some(previous) = torn_down.filter(|p| *p != Selection::None) {
            self.emit_selection_changed(previous, Selection::None);
        }

        let listed = self.inner.registry.list(&user).await;

        let mut st = self.state();
        let still_current = matches!(
            &st.guard,
            RestoreGuard::InFlight { generation: g, .. } if *g == generation
        );
        if !still_current {
            debug!(user = %user, "restore superseded; discarding result");
            return Ok(RestoreOutcome::Skipped);
        }
        let mut fetched = match listed {
            Ok(w) => w,
            Err(e) => {
                warn!(user = %user, error = %e, "registry list failed; restore can be retried");
                st.guard = RestoreGuard::Idle;
                st.user = None;
                st.in_flight_edits = InFlightEdits::default();
                return Err(e.into_read_error());
            }
        };

        // The listing may predate connects and disconnects made while it was outstanding.
        st.replay_in_flight_edits(&mut fetched);
        let fallback = st.active_network.clone();
        st.wallets = merge_registry(&st.wallets, fetched, &fallback);

        let cached = self.inner.cache.read();
        let choice = choose(&st.wallets, &cached, &fallback);
        if choice.heal {
            info!(
                cached_address = ?cached.address,
                cached_network = ?cached.network,
                "cached selection is stale; clearing"
            );
            self.inner.cache.clear();
        }

        let previous = st.selection();
        if let Some((address, network)) = &choice.pick {
            if let Some(w) = st.find_mut(address) {
                w.last_used_at = Some(chrono::Utc::now());
            }
            st.active_address = Some(address.clone());
            st.active_network = network.clone();
            if choice.branch == RestoreBranch::DeterministicFirst {
                self.inner.cache.write(address, network);
            }
        } else {
            st.active_address = None;
        }
        st.guard = RestoreGuard::Done(user.clone());
        let selection = st.selection();
        let wallet_count = st.wallets.len();
        drop(st);

        info!(
            user = %user,
            branch = ?choice.branch,
            wallets = wallet_count,
            "session restored"
        );
        if previous != selection {
            self.emit_selection_changed(previous, selection.clone());
        }
        Ok(RestoreOutcome::Restored {
            selection,
            branch: choice.branch,
        })
    }
}
