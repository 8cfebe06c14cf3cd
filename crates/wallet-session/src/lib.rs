//! Multi-wallet / multi-network session coordination.
//!
//! [`SessionCoordinator`] tracks which registered address is active and which network it
//! operates on, restores that selection across restarts from a device cache and a durable
//! registry, and notifies subscribers through typed [`SessionEvent`]s.

pub mod address;
pub mod analytics;
pub mod cli_output;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod events;
pub mod fsutil;
pub mod invalidation;
pub mod network;
pub mod optimistic;
pub mod paths;
pub mod provider;
pub mod registry;
pub mod retry;
pub mod selection_cache;
pub mod store;
pub mod tasks;
pub mod wallet;

pub use address::{normalize, Address};
pub use coordinator::{
    Availability, AuthState, RestoreBranch, RestoreOutcome, SessionCoordinator,
    SessionCoordinatorBuilder, SessionSnapshot,
};
pub use errors::{ErrorReport, SessionError};
pub use events::{Selection, SessionEvent};
pub use network::NetworkId;
pub use registry::{UserId, WalletRegistry};
pub use wallet::Wallet;
