use crate::{address::Address, network::NetworkId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current session selection. `Active.network` may be one the wallet does not list (see
/// [`crate::coordinator::Availability`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Selection {
    #[default]
    None,
    Active {
        address: Address,
        network: NetworkId,
    },
}

impl Selection {
    pub const fn address(&self) -> Option<&Address> {
        match self {
            Self::None => None,
            Self::Active { address, .. } => Some(address),
        }
    }

    pub const fn network(&self) -> Option<&NetworkId> {
        match self {
            Self::None => None,
            Self::Active { network, .. } => Some(network),
        }
    }
}

/// Notifications fanned out to subscribers.
///
/// Delivery can be duplicated or arrive after state moved on again; treat every event as a
/// hint to re-read the coordinator, not as the authoritative state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    WalletConnected {
        previous: Option<Address>,
        address: Address,
        network: NetworkId,
        newly_registered: bool,
        at: DateTime<Utc>,
    },
    NetworkSwitched {
        previous: Option<NetworkId>,
        network: NetworkId,
        at: DateTime<Utc>,
    },
    SelectionChanged {
        previous: Selection,
        current: Selection,
        at: DateTime<Utc>,
    },
}

impl SessionEvent {
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            Self::WalletConnected { at, .. }
            | Self::NetworkSwitched { at, .. }
            | Self::SelectionChanged { at, .. } => *at,
        }
    }
}
