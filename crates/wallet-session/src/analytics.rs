//! Best-effort analytics. Failures here are logged by the caller and otherwise ignored.

use crate::{address::Address, network::NetworkId};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::{Mutex, PoisonError};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AnalyticsEvent {
    WalletSwitched {
        previous: Option<Address>,
        next: Address,
        wallet_count: usize,
        duration_ms: u64,
    },
    NetworkSwitched {
        previous: Option<NetworkId>,
        next: NetworkId,
        address: Option<Address>,
        duration_ms: u64,
    },
    WalletConnected {
        address: Address,
        network: NetworkId,
        newly_registered: bool,
    },
    WalletDisconnected {
        address: Address,
        remaining: usize,
    },
}

impl AnalyticsEvent {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::WalletSwitched { .. } => "wallet_switched",
            Self::NetworkSwitched { .. } => "network_switched",
            Self::WalletConnected { .. } => "wallet_connected",
            Self::WalletDisconnected { .. } => "wallet_disconnected",
        }
    }
}

#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    async fn record(&self, event: AnalyticsEvent) -> eyre::Result<()>;
}

/// Emits each event as a structured `tracing` record on the `analytics` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAnalytics;

#[async_trait]
impl AnalyticsSink for TracingAnalytics {
    async fn record(&self, event: AnalyticsEvent) -> eyre::Result<()> {
        let payload = serde_json::to_string(&event)?;
        info!(target: "analytics", event = event.name(), payload = %payload, "analytics event");
        Ok(())
    }
}

/// Drops everything. Used when analytics are disabled in config.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAnalytics;

#[async_trait]
impl AnalyticsSink for NoopAnalytics {
    async fn record(&self, _event: AnalyticsEvent) -> eyre::Result<()> {
        Ok(())
    }
}

/// Keeps events in memory; can be told to fail to check isolation.
#[derive(Debug, Default)]
pub struct RecordingAnalytics {
    events: Mutex<Vec<AnalyticsEvent>>,
    fail: bool,
}

impl RecordingAnalytics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            events: Mutex::default(),
            fail: true,
        }
    }

    pub fn events(&self) -> Vec<AnalyticsEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl AnalyticsSink for RecordingAnalytics {
    async fn record(&self, event: AnalyticsEvent) -> eyre::Result<()> {
        if self.fail {
            eyre::bail!("analytics endpoint rejected {}", event.name());
        }
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
        Ok(())
    }
}
