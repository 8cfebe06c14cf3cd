//! Session coordinator: the active (wallet, network) selection for one authenticated user.
//!
//! State lives behind a std mutex that is never held across an `.await`. Anything that talks
//! to a collaborator (registry, provider, resolver, analytics) runs outside the lock, and
//! side effects that must not block the caller go through [`BackgroundTasks`].

#![expect(
    clippy::multiple_inherent_impl,
    reason = "coordinator operations are split by protocol across submodules"
)]

mod connect;
mod edits;
mod restore;
mod state;
mod switch;

pub use restore::{RestoreBranch, RestoreOutcome};
pub use state::{Availability, AuthState, SessionSnapshot};

use crate::{
    address::Address,
    analytics::{AnalyticsEvent, AnalyticsSink, NoopAnalytics, TracingAnalytics},
    config::SessionConfig,
    errors::SessionError,
    events::{Selection, SessionEvent},
    invalidation::{InvalidationSink, QueryKeyProvider, StandardQueryKeys, TracingInvalidationSink},
    network::NetworkId,
    provider::{NameResolver, WalletProvider},
    registry::{UserId, WalletRegistry},
    selection_cache::{KeyValueStore, SelectionCache},
    tasks::BackgroundTasks,
    wallet::Wallet,
};
use state::SessionState;
use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Instant,
};
use tokio::sync::broadcast;
use tracing::trace;

const EVENT_CHANNEL_CAPACITY: usize = 64;

struct Inner {
    state: Mutex<SessionState>,
    registry: Arc<dyn WalletRegistry>,
    cache: SelectionCache,
    provider: Option<Arc<dyn WalletProvider>>,
    resolver: Option<Arc<dyn NameResolver>>,
    analytics: Arc<dyn AnalyticsSink>,
    query_keys: Arc<dyn QueryKeyProvider>,
    invalidation: Arc<dyn InvalidationSink>,
    config: SessionConfig,
    events: broadcast::Sender<SessionEvent>,
    tasks: BackgroundTasks,
}

/// Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct SessionCoordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("selection", &self.selection())
            .field("pending_tasks", &self.inner.tasks.pending())
            .finish_non_exhaustive()
    }
}

pub struct SessionCoordinatorBuilder {
    registry: Arc<dyn WalletRegistry>,
    store: Arc<dyn KeyValueStore>,
    provider: Option<Arc<dyn WalletProvider>>,
    resolver: Option<Arc<dyn NameResolver>>,
    analytics: Option<Arc<dyn AnalyticsSink>>,
    query_keys: Option<Arc<dyn QueryKeyProvider>>,
    invalidation: Option<Arc<dyn InvalidationSink>>,
    config: SessionConfig,
}

impl SessionCoordinatorBuilder {
    #[must_use]
    pub fn provider(mut self, provider: Arc<dyn WalletProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    #[must_use]
    pub fn resolver(mut self, resolver: Arc<dyn NameResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    #[must_use]
    pub fn analytics(mut self, analytics: Arc<dyn AnalyticsSink>) -> Self {
        self.analytics = Some(analytics);
        self
    }

    #[must_use]
    pub fn query_keys(mut self, keys: Arc<dyn QueryKeyProvider>) -> Self {
        self.query_keys = Some(keys);
        self
    }

    #[must_use]
    pub fn invalidation_sink(mut self, sink: Arc<dyn InvalidationSink>) -> Self {
        self.invalidation = Some(sink);
        self
    }

    #[must_use]
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> SessionCoordinator {
        let analytics: Arc<dyn AnalyticsSink> = if self.config.analytics_enabled {
            self.analytics.unwrap_or_else(|| Arc::new(TracingAnalytics))
        } else {
            Arc::new(NoopAnalytics)
        };
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        SessionCoordinator {
            inner: Arc::new(Inner {
                state: Mutex::new(SessionState::new(self.config.default_network_id())),
                registry: self.registry,
                cache: SelectionCache::new(self.store),
                provider: self.provider,
                resolver: self.resolver,
                analytics,
                query_keys: self
                    .query_keys
                    .unwrap_or_else(|| Arc::new(StandardQueryKeys)),
                invalidation: self
                    .invalidation
                    .unwrap_or_else(|| Arc::new(TracingInvalidationSink)),
                config: self.config,
                events,
                tasks: BackgroundTasks::new(),
            }),
        }
    }
}

/// Result of moving the active address inside one critical section.
struct SwitchOutcome {
    previous: Selection,
    current: Selection,
    address: Address,
    network: NetworkId,
    wallet_count: usize,
}

impl SessionCoordinator {
    pub fn builder(
        registry: Arc<dyn WalletRegistry>,
        store: Arc<dyn KeyValueStore>,
    ) -> SessionCoordinatorBuilder {
        SessionCoordinatorBuilder {
            registry,
            store,
            provider: None,
            resolver: None,
            analytics: None,
            query_keys: None,
            invalidation: None,
            config: SessionConfig::default(),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn default_network(&self) -> NetworkId {
        self.inner.config.default_network_id()
    }

    fn emit(&self, event: SessionEvent) {
        if self.inner.events.send(event).is_err() {
            trace!("no session event subscribers");
        }
    }

    fn emit_selection_changed(&self, previous: Selection, current: Selection) {
        self.emit(SessionEvent::SelectionChanged {
            previous,
            current,
            at: chrono::Utc::now(),
        });
    }

    fn record(&self, event: AnalyticsEvent) {
        if !self.inner.config.analytics_enabled {
            return;
        }
        let sink = Arc::clone(&self.inner.analytics);
        self.inner
            .tasks
            .submit("analytics", async move { sink.record(event).await });
    }

    /// Queue invalidation of every query that depends on (`address`, `network`).
    fn invalidate_later(&self, address: &Address, network: &NetworkId) {
        let keys = self.inner.query_keys.keys_for(address, network);
        if keys.is_empty() {
            return;
        }
        let sink = Arc::clone(&self.inner.invalidation);
        self.inner.tasks.submit("invalidate", async move {
            sink.invalidate(&keys);
            Ok(())
        });
    }

    /// Make `address` active. `network`, when given, becomes the active network too. Writes
    /// the device cache before returning so memory and cache move together.
    fn select_locked(
        &self,
        st: &mut SessionState,
        address: &Address,
        network: Option<NetworkId>,
    ) -> Result<SwitchOutcome, SessionError> {
        let previous = st.selection();
        let wallet = st
            .find_mut(address)
            .ok_or_else(|| SessionError::WalletNotFound(address.to_string()))?;
        wallet.last_used_at = Some(chrono::Utc::now());

        if let Some(n) = network {
            st.active_network = n;
        }
        st.active_address = Some(address.clone());
        self.inner.cache.write(address, &st.active_network);

        Ok(SwitchOutcome {
            previous,
            current: st.selection(),
            address: address.clone(),
            network: st.active_network.clone(),
            wallet_count: st.wallets.len(),
        })
    }

    /// Side effects of a wallet switch, after the lock is released.
    fn finish_switch(&self, outcome: SwitchOutcome, started: Instant) {
        let SwitchOutcome {
            previous,
            current,
            address,
            network,
            wallet_count,
        } = outcome;
        let previous_address = previous.address().cloned();
        self.emit_selection_changed(previous, current);
        self.invalidate_later(&address, &network);
        self.record(AnalyticsEvent::WalletSwitched {
            previous: previous_address,
            next: address,
            wallet_count,
            duration_ms: elapsed_ms(started),
        });
    }

    pub fn selection(&self) -> Selection {
        self.state().selection()
    }

    pub fn active_wallet(&self) -> Option<Wallet> {
        self.state().active_wallet().cloned()
    }

    pub fn active_network(&self) -> NetworkId {
        self.state().active_network.clone()
    }

    /// Wallets in registry order.
    pub fn wallets(&self) -> Vec<Wallet> {
        self.state().wallets.clone()
    }

    pub fn wallet(&self, address: &Address) -> Option<Wallet> {
        self.state().find(address).cloned()
    }

    pub fn user(&self) -> Option<UserId> {
        self.state().user.clone()
    }

    pub fn availability(&self) -> Availability {
        self.state().availability()
    }

    /// True for the configured cooldown after a network switch.
    pub fn is_network_switching(&self) -> bool {
        self.state().is_switching(Instant::now())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state().snapshot(Instant::now())
    }

    /// Device cache fell back to memory-only after a storage failure.
    pub fn is_cache_degraded(&self) -> bool {
        self.inner.cache.is_degraded()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// End the session: forget the user, wallets and selection, and allow the next
    /// `restore`. The device cache is kept so the next login can pick the selection back up.
    pub fn logout(&self) {
        let previous = self.state().reset(self.default_network());
        tracing::info!("session logged out");
        if previous != Selection::None {
            self.emit_selection_changed(previous, Selection::None);
        }
    }

    /// Wait for outstanding background work (analytics, name lookups, remote writes).
    pub async fn drain(&self) {
        self.inner.tasks.drain().await;
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
