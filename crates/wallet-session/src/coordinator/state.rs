use crate::{
    address::Address,
    events::Selection,
    network::NetworkId,
    optimistic::Optimistic,
    registry::UserId,
    wallet::{sort_registry_order, Wallet},
};
use serde::Serialize;
use std::{collections::HashMap, time::Instant};

/// Authentication signal consumed by [`super::SessionCoordinator::restore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Anonymous,
    Authenticated(UserId),
}

/// Whether the active wallet can operate on the active network.
///
/// Derived from state on every read, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Availability {
    pub is_available: bool,
    /// Active wallet is known but does not list the active network.
    pub is_missing: bool,
}

impl Availability {
    pub fn derive(wallet: Option<&Wallet>, network: &NetworkId) -> Self {
        match wallet {
            None => Self::default(),
            Some(w) => {
                let supported = w.supports(network);
                Self {
                    is_available: supported,
                    is_missing: !supported,
                }
            }
        }
    }
}

/// Point-in-time view of the whole session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub user: Option<UserId>,
    pub selection: Selection,
    pub active_network: NetworkId,
    pub availability: Availability,
    pub is_network_switching: bool,
    pub wallets: Vec<Wallet>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum RestoreGuard {
    Idle,
    InFlight { user: UserId, generation: u64 },
    Done(UserId),
}

impl RestoreGuard {
    pub(super) fn covers(&self, user: &UserId) -> bool {
        match self {
            Self::Idle => false,
            Self::InFlight { user: u, .. } | Self::Done(u) => u == user,
        }
    }
}

/// Registry writes this session made while a restore listing was outstanding. The listing
/// may predate them, so restore replays them over it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(super) struct InFlightEdits {
    pub added: Vec<Address>,
    pub removed: Vec<Address>,
}

#[derive(Debug)]
pub(super) struct SessionState {
    pub user: Option<UserId>,
    pub guard: RestoreGuard,
    /// Bumped on every restore start and teardown; stale restores compare against it.
    pub generation: u64,
    /// Registry order, merged with locally observed data.
    pub wallets: Vec<Wallet>,
    pub active_address: Option<Address>,
    /// Survives an empty selection: the next selected wallet operates on it.
    pub active_network: NetworkId,
    pub switching_until: Option<Instant>,
    pub labels: HashMap<Address, Optimistic<Option<String>>>,
    /// Address of the primary wallet while a remote set-primary is in flight.
    pub primary: Option<Optimistic<Option<Address>>>,
    pub in_flight_edits: InFlightEdits,
}

impl SessionState {
    pub(super) fn new(default_network: NetworkId) -> Self {
        Self {
            user: None,
            guard: RestoreGuard::Idle,
            generation: 0,
            wallets: Vec::new(),
            active_address: None,
            active_network: default_network,
            switching_until: None,
            labels: HashMap::new(),
            primary: None,
            in_flight_edits: InFlightEdits::default(),
        }
    }

    fn restore_in_flight(&self) -> bool {
        matches!(self.guard, RestoreGuard::InFlight { .. })
    }

    /// Remember a wallet registered while a restore is listing.
    pub(super) fn note_added(&mut self, address: &Address) {
        if !self.restore_in_flight() {
            return;
        }
        let edits = &mut self.in_flight_edits;
        edits.removed.retain(|a| a != address);
        if !edits.added.contains(address) {
            edits.added.push(address.clone());
        }
    }

    /// Remember a wallet removed while a restore is listing.
    pub(super) fn note_removed(&mut self, address: &Address) {
        if !self.restore_in_flight() {
            return;
        }
        let edits = &mut self.in_flight_edits;
        edits.added.retain(|a| a != address);
        if !edits.removed.contains(address) {
            edits.removed.push(address.clone());
        }
    }

    /// Apply the recorded edits to a registry listing and forget them.
    pub(super) fn replay_in_flight_edits(&mut self, listed: &mut Vec<Wallet>) {
        let edits = std::mem::take(&mut self.in_flight_edits);
        listed.retain(|w| !edits.removed.contains(&w.address));
        for address in &edits.added {
            if listed.iter().any(|w| &w.address == address) {
                continue;
            }
            if let Some(w) = self.find(address) {
                listed.push(w.clone());
            }
        }
    }

    pub(super) fn find(&self, address: &Address) -> Option<&Wallet> {
        self.wallets.iter().find(|w| &w.address == address)
    }

    pub(super) fn find_mut(&mut self, address: &Address) -> Option<&mut Wallet> {
        self.wallets.iter_mut().find(|w| &w.address == address)
    }

    pub(super) fn active_wallet(&self) -> Option<&Wallet> {
        self.active_address.as_ref().and_then(|a| self.find(a))
    }

    pub(super) fn selection(&self) -> Selection {
        match &self.active_address {
            Some(address) => Selection::Active {
                address: address.clone(),
                network: self.active_network.clone(),
            },
            None => Selection::None,
        }
    }

    pub(super) fn availability(&self) -> Availability {
        Availability::derive(self.active_wallet(), &self.active_network)
    }

    pub(super) fn is_switching(&self, now: Instant) -> bool {
        self.switching_until.is_some_and(|until| now < until)
    }

    /// Move the primary flag to `address` (or clear it) and restore registry order.
    pub(super) fn apply_primary(&mut self, address: Option<&Address>) {
        for w in &mut self.wallets {
            w.is_primary = Some(&w.address) == address;
        }
        sort_registry_order(&mut self.wallets);
    }

    pub(super) fn snapshot(&self, now: Instant) -> SessionSnapshot {
        SessionSnapshot {
            user: self.user.clone(),
            selection: self.selection(),
            active_network: self.active_network.clone(),
            availability: self.availability(),
            is_network_switching: self.is_switching(now),
            wallets: self.wallets.clone(),
        }
    }

    /// Drop everything tied to the current user. Returns the selection that was active.
    pub(super) fn reset(&mut self, default_network: NetworkId) -> Selection {
        let previous = self.selection();
        let generation = self.generation.wrapping_add(1);
        *self = Self::new(default_network);
        self.generation = generation;
        previous
    }
}
