use async_trait::async_trait;
use chrono::{TimeZone as _, Utc};
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use tokio::sync::{broadcast, Semaphore};
use wallet_session::{
    address::normalize,
    analytics::{AnalyticsEvent, RecordingAnalytics},
    config::SessionConfig,
    invalidation::RecordingSink,
    provider::{ProviderEvent, StaticProvider, StaticResolver},
    registry::{MemoryRegistry, RegistryError, UserId, WalletRegistry},
    retry::BackoffConfig,
    selection_cache::{KeyValueStore as _, MemoryStore, ACTIVE_ADDRESS_KEY, ACTIVE_NETWORK_KEY},
    wallet::{NetworkSnapshot, NewWallet, Wallet},
    AuthState, NetworkId, RestoreBranch, RestoreOutcome, Selection, SessionCoordinator,
    SessionError, SessionEvent,
};

const A: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
const B: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
const C: &str = "0xcccccccccccccccccccccccccccccccccccccccc";

fn user() -> UserId {
    UserId::new("user-1")
}

fn net(id: &str) -> eyre::Result<NetworkId> {
    Ok(NetworkId::parse(id)?)
}

fn wallet(id: &str, addr: &str, nets: &[&str], created: i64, primary: bool) -> eyre::Result<Wallet> {
    Ok(Wallet {
        id: id.to_owned(),
        address: normalize(addr)?,
        label: None,
        resolved_name: None,
        supported_networks: nets.iter().map(|n| net(n)).collect::<eyre::Result<_>>()?,
        per_network_cache: BTreeMap::new(),
        is_primary: primary,
        created_at: Utc
            .timestamp_opt(created, 0)
            .single()
            .ok_or_else(|| eyre::eyre!("bad timestamp"))?,
        last_used_at: None,
    })
}

struct Harness {
    registry: Arc<MemoryRegistry>,
    store: Arc<MemoryStore>,
    analytics: Arc<RecordingAnalytics>,
    sink: Arc<RecordingSink>,
    session: SessionCoordinator,
}

impl Harness {
    fn new() -> Self {
        Self::with(SessionConfig::default(), None, RecordingAnalytics::new())
    }

    fn with(
        config: SessionConfig,
        provider: Option<Arc<StaticProvider>>,
        analytics: RecordingAnalytics,
    ) -> Self {
        let registry = Arc::new(MemoryRegistry::new());
        let store = Arc::new(MemoryStore::new());
        let analytics = Arc::new(analytics);
        let sink = Arc::new(RecordingSink::new());
        let mut builder = SessionCoordinator::builder(Arc::<MemoryRegistry>::clone(&registry), Arc::<MemoryStore>::clone(&store))
            .config(config)
            .analytics(Arc::<RecordingAnalytics>::clone(&analytics))
            .invalidation_sink(Arc::<RecordingSink>::clone(&sink))
            .resolver(Arc::new(StaticResolver::default()));
        if let Some(p) = provider {
            builder = builder.provider(p);
        }
        Self {
            registry,
            store,
            analytics,
            sink,
            session: builder.build(),
        }
    }

    fn seed(&self, wallets: Vec<Wallet>) {
        self.registry.seed(&user(), wallets);
    }

    fn cache_pair(&self, address: &str, network: &str) -> eyre::Result<()> {
        self.store.set(ACTIVE_ADDRESS_KEY, address)?;
        self.store.set(ACTIVE_NETWORK_KEY, network)?;
        Ok(())
    }

    fn cached(&self) -> eyre::Result<(Option<String>, Option<String>)> {
        Ok((
            self.store.get(ACTIVE_ADDRESS_KEY)?,
            self.store.get(ACTIVE_NETWORK_KEY)?,
        ))
    }

    async fn restore(&self) -> Result<RestoreOutcome, SessionError> {
        self.session
            .restore(AuthState::Authenticated(user()))
            .await
    }
}

fn active(addr: &str, network: &str) -> eyre::Result<Selection> {
    Ok(Selection::Active {
        address: normalize(addr)?,
        network: net(network)?,
    })
}

fn drain_events(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        out.push(ev);
    }
    out
}

// ── Restoration ──────────────────────────────────────────────────────

#[tokio::test]
async fn restore_selects_primary_when_cache_is_empty() -> eyre::Result<()> {
    let h = Harness::new();
    h.seed(vec![wallet("1", A, &["eip155:1"], 100, true)?]);

    let out = h.restore().await?;
    assert_eq!(
        out,
        RestoreOutcome::Restored {
            selection: active(A, "eip155:1")?,
            branch: RestoreBranch::ServerPrimary,
        }
    );
    // Only the deterministic-first branch writes back.
    assert_eq!(h.cached()?, (None, None));
    Ok(())
}

#[tokio::test]
async fn restore_heals_stale_cache_and_writes_first_wallet_back() -> eyre::Result<()> {
    let h = Harness::new();
    h.seed(vec![
        wallet("1", A, &["eip155:1"], 200, false)?,
        wallet("2", B, &["eip155:1"], 100, false)?,
    ]);
    h.cache_pair(C, "eip155:1")?;

    let out = h.restore().await?;
    assert_eq!(
        out,
        RestoreOutcome::Restored {
            selection: active(A, "eip155:1")?,
            branch: RestoreBranch::DeterministicFirst,
        }
    );
    assert_eq!(
        h.cached()?,
        (Some(A.to_owned()), Some("eip155:1".to_owned()))
    );
    Ok(())
}

#[tokio::test]
async fn restore_prefers_primary_over_first_when_cache_is_invalid() -> eyre::Result<()> {
    let h = Harness::new();
    h.seed(vec![
        wallet("1", A, &["eip155:1"], 300, false)?,
        wallet("2", B, &["eip155:8453"], 100, true)?,
    ]);
    // B exists but never listed optimism.
    h.cache_pair(B, "eip155:10")?;

    let out = h.restore().await?;
    assert_eq!(
        out,
        RestoreOutcome::Restored {
            selection: active(B, "eip155:8453")?,
            branch: RestoreBranch::ServerPrimary,
        }
    );
    assert_eq!(h.cached()?, (None, None), "invalid pair is cleared");
    Ok(())
}

#[tokio::test]
async fn restore_uses_cached_pair_verbatim() -> eyre::Result<()> {
    let h = Harness::new();
    h.seed(vec![
        wallet("1", A, &["eip155:1"], 200, true)?,
        wallet("2", B, &["eip155:1", "eip155:8453"], 100, false)?,
    ]);
    h.cache_pair(B, "eip155:8453")?;

    let out = h.restore().await?;
    assert_eq!(
        out,
        RestoreOutcome::Restored {
            selection: active(B, "eip155:8453")?,
            branch: RestoreBranch::LocalCache,
        }
    );
    assert!(h.session.availability().is_available);
    Ok(())
}

#[tokio::test]
async fn restore_is_deterministic() -> eyre::Result<()> {
    let mut outcomes = Vec::new();
    for _ in 0..3 {
        let h = Harness::new();
        h.seed(vec![
            wallet("b", B, &["eip155:1"], 100, false)?,
            wallet("a", A, &["eip155:1"], 100, false)?,
        ]);
        h.cache_pair(C, "base")?;
        outcomes.push(h.restore().await?);
    }
    assert!(outcomes.windows(2).all(|w| w.first() == w.last()));
    // Equal timestamps fall back to id order.
    assert_eq!(
        outcomes.first(),
        Some(&RestoreOutcome::Restored {
            selection: active(A, "eip155:1")?,
            branch: RestoreBranch::DeterministicFirst,
        })
    );
    Ok(())
}

#[tokio::test]
async fn restore_with_empty_registry_yields_no_selection() -> eyre::Result<()> {
    let h = Harness::new();
    let out = h.restore().await?;
    assert_eq!(
        out,
        RestoreOutcome::Restored {
            selection: Selection::None,
            branch: RestoreBranch::Empty,
        }
    );
    let a = h.session.availability();
    assert!(!a.is_available && !a.is_missing);
    Ok(())
}

#[tokio::test]
async fn restore_runs_once_per_user() -> eyre::Result<()> {
    let h = Harness::new();
    h.seed(vec![wallet("1", A, &["eip155:1"], 100, false)?]);

    assert_eq!(
        h.session.restore(AuthState::Anonymous).await?,
        RestoreOutcome::Skipped
    );
    assert_eq!(h.registry.list_calls(), 0);

    h.restore().await?;
    assert_eq!(h.restore().await?, RestoreOutcome::Skipped);
    assert_eq!(h.registry.list_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn restore_list_failure_keeps_cache_and_allows_retry() -> eyre::Result<()> {
    let h = Harness::new();
    h.seed(vec![wallet("1", A, &["eip155:1"], 100, false)?]);
    h.cache_pair(A, "eip155:1")?;
    h.registry.set_fail_list(true);

    let err = h.restore().await.err();
    assert!(matches!(err, Some(SessionError::RegistryUnavailable(_))));
    assert_eq!(
        h.cached()?,
        (Some(A.to_owned()), Some("eip155:1".to_owned()))
    );
    assert_eq!(h.session.selection(), Selection::None);

    h.registry.set_fail_list(false);
    let out = h.restore().await?;
    assert!(matches!(
        out,
        RestoreOutcome::Restored {
            branch: RestoreBranch::LocalCache,
            ..
        }
    ));
    Ok(())
}

#[tokio::test]
async fn corrupted_cache_values_are_cleared() -> eyre::Result<()> {
    let h = Harness::new();
    h.seed(vec![wallet("1", A, &["eip155:1"], 100, false)?]);
    h.cache_pair("definitely-not-an-address", "eip155:999999")?;

    let out = h.restore().await?;
    assert!(matches!(
        out,
        RestoreOutcome::Restored {
            branch: RestoreBranch::DeterministicFirst,
            ..
        }
    ));
    assert_eq!(
        h.cached()?,
        (Some(A.to_owned()), Some("eip155:1".to_owned()))
    );
    Ok(())
}

#[tokio::test]
async fn legacy_cached_network_is_translated() -> eyre::Result<()> {
    let h = Harness::new();
    h.seed(vec![wallet("1", B, &["eip155:8453"], 100, false)?]);
    h.cache_pair(&B.to_uppercase().replacen("0X", "0x", 1), "base")?;

    let out = h.restore().await?;
    assert_eq!(
        out,
        RestoreOutcome::Restored {
            selection: active(B, "eip155:8453")?,
            branch: RestoreBranch::LocalCache,
        }
    );
    assert_eq!(h.cached()?.1.as_deref(), Some("eip155:8453"));
    Ok(())
}

#[tokio::test]
async fn case_duplicates_collapse_to_one_wallet() -> eyre::Result<()> {
    let h = Harness::new();
    let upper = "0xABABABABABABABABABABABABABABABABABABABAB";
    let lower = "0xabababababababababababababababababababab";
    assert!(wallet_session::address::equals(upper, lower));
    h.seed(vec![
        wallet("1", upper, &["eip155:1"], 200, false)?,
        wallet("2", lower, &["eip155:1"], 100, false)?,
    ]);

    h.restore().await?;
    let ws = h.session.wallets();
    assert_eq!(ws.len(), 1);
    assert_eq!(ws.first().map(|w| w.id.as_str()), Some("1"));
    Ok(())
}

#[tokio::test]
async fn new_user_tears_down_previous_session() -> eyre::Result<()> {
    let h = Harness::new();
    h.seed(vec![wallet("1", A, &["eip155:1"], 100, false)?]);
    let other = UserId::new("user-2");
    h.registry
        .seed(&other, vec![wallet("9", B, &["eip155:10"], 100, true)?]);

    h.restore().await?;
    let mut rx = h.session.subscribe();
    let out = h
        .session
        .restore(AuthState::Authenticated(other.clone()))
        .await?;

    assert_eq!(
        out,
        RestoreOutcome::Restored {
            selection: active(B, "eip155:10")?,
            branch: RestoreBranch::ServerPrimary,
        }
    );
    assert_eq!(h.session.user(), Some(other));
    assert_eq!(h.session.wallets().len(), 1);
    let events = drain_events(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::SelectionChanged {
            current: Selection::None,
            ..
        }
    )));
    Ok(())
}

/// Registry whose `list` blocks until the test releases it.
#[derive(Debug)]
/// Takes its listing snapshot immediately, then holds the result until a permit is added.
struct GatedRegistry {
    inner: MemoryRegistry,
    gate: Semaphore,
}

impl GatedRegistry {
    fn new() -> Self {
        Self {
            inner: MemoryRegistry::new(),
            gate: Semaphore::new(0),
        }
    }
}

#[async_trait]
impl WalletRegistry for GatedRegistry {
    async fn list(&self, user: &UserId) -> Result<Vec<Wallet>, RegistryError> {
        let listed = self.inner.list(user).await;
        let _permit = self.gate.acquire().await.map_err(RegistryError::backend)?;
        listed
    }

    async fn add(&self, user: &UserId, wallet: NewWallet) -> Result<Wallet, RegistryError> {
        self.inner.add(user, wallet).await
    }

    async fn remove(&self, user: &UserId, wallet_id: &str) -> Result<(), RegistryError> {
        self.inner.remove(user, wallet_id).await
    }

    async fn set_primary(&self, user: &UserId, wallet_id: &str) -> Result<(), RegistryError> {
        self.inner.set_primary(user, wallet_id).await
    }

    async fn update_label(
        &self,
        user: &UserId,
        wallet_id: &str,
        label: Option<&str>,
    ) -> Result<Wallet, RegistryError> {
        self.inner.update_label(user, wallet_id, label).await
    }
}

async fn wait_for_restore_start(session: &SessionCoordinator) -> eyre::Result<()> {
    tokio::time::timeout(Duration::from_secs(5), async {
        while session.user().is_none() {
            tokio::task::yield_now().await;
        }
    })
    .await?;
    Ok(())
}

#[tokio::test]
async fn second_restore_while_listing_is_skipped() -> eyre::Result<()> {
    let registry = Arc::new(GatedRegistry::new());
    registry
        .inner
        .seed(&user(), vec![wallet("1", A, &["eip155:1"], 100, false)?]);
    let session =
        SessionCoordinator::builder(Arc::<GatedRegistry>::clone(&registry), Arc::new(MemoryStore::new())).build();

    let s = session.clone();
    let pending =
        tokio::spawn(async move { s.restore(AuthState::Authenticated(user())).await });
    wait_for_restore_start(&session).await?;

    assert_eq!(
        session.restore(AuthState::Authenticated(user())).await?,
        RestoreOutcome::Skipped
    );
    registry.gate.add_permits(1);

    assert_eq!(
        pending.await??,
        RestoreOutcome::Restored {
            selection: active(A, "eip155:1")?,
            branch: RestoreBranch::DeterministicFirst,
        }
    );
    assert_eq!(registry.inner.list_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn connect_while_listing_survives_restore() -> eyre::Result<()> {
    let registry = Arc::new(GatedRegistry::new());
    registry
        .inner
        .seed(&user(), vec![wallet("1", A, &["eip155:1"], 100, false)?]);
    let store = Arc::new(MemoryStore::new());
    let session = SessionCoordinator::builder(Arc::<GatedRegistry>::clone(&registry), Arc::<MemoryStore>::clone(&store))
        .provider(Arc::new(StaticProvider::new(vec![C.to_owned()], "base")))
        .build();

    let s = session.clone();
    let pending =
        tokio::spawn(async move { s.restore(AuthState::Authenticated(user())).await });
    wait_for_restore_start(&session).await?;

    let connected = session.connect().await?;
    assert_eq!(connected, active(C, "eip155:8453")?);
    registry.gate.add_permits(1);

    assert_eq!(
        pending.await??,
        RestoreOutcome::Restored {
            selection: active(C, "eip155:8453")?,
            branch: RestoreBranch::LocalCache,
        }
    );
    assert_eq!(session.selection(), connected);
    let addresses: Vec<_> = session.wallets().into_iter().map(|w| w.address).collect();
    assert_eq!(addresses, vec![normalize(C)?, normalize(A)?]);
    assert_eq!(registry.inner.wallets(&user()).len(), 2);
    assert_eq!(store.get(ACTIVE_ADDRESS_KEY)?, Some(C.to_owned()));
    Ok(())
}

#[tokio::test]
async fn logout_during_restore_discards_the_result() -> eyre::Result<()> {
    let registry = Arc::new(GatedRegistry::new());
    registry
        .inner
        .seed(&user(), vec![wallet("1", A, &["eip155:1"], 100, true)?]);
    let session =
        SessionCoordinator::builder(Arc::<GatedRegistry>::clone(&registry), Arc::new(MemoryStore::new())).build();

    let s = session.clone();
    let pending =
        tokio::spawn(async move { s.restore(AuthState::Authenticated(user())).await });
    wait_for_restore_start(&session).await?;

    session.logout();
    registry.gate.add_permits(1);

    assert_eq!(pending.await??, RestoreOutcome::Skipped);
    assert_eq!(session.selection(), Selection::None);
    assert!(session.wallets().is_empty());
    Ok(())
}

// ── Switching ────────────────────────────────────────────────────────

#[tokio::test]
async fn switch_wallet_updates_selection_cache_and_side_effects() -> eyre::Result<()> {
    let h = Harness::new();
    h.seed(vec![
        wallet("1", A, &["eip155:1"], 200, false)?,
        wallet("2", B, &["eip155:1"], 100, false)?,
    ]);
    h.restore().await?;
    let mut rx = h.session.subscribe();

    let sel = h.session.switch_wallet(&B.to_uppercase().replacen("0X", "0x", 1))?;
    assert_eq!(sel, active(B, "eip155:1")?);
    assert_eq!(h.session.selection(), sel);
    assert_eq!(
        h.cached()?,
        (Some(B.to_owned()), Some("eip155:1".to_owned()))
    );
    let b = h
        .session
        .active_wallet()
        .ok_or_else(|| eyre::eyre!("no active wallet"))?;
    assert!(b.last_used_at.is_some());

    let events = drain_events(&mut rx);
    assert_eq!(events.len(), 1);
    assert!(matches!(
        events.first(),
        Some(SessionEvent::SelectionChanged { previous, current, .. })
            if previous.address() == Some(&normalize(A)?) && current == &sel
    ));

    h.session.drain().await;
    let batches = h.sink.batches();
    assert!(batches.iter().flatten().any(|k| k.to_string()
        == format!("balances/{B}/eip155:1")));
    assert!(h.analytics.events().iter().any(|e| matches!(
        e,
        AnalyticsEvent::WalletSwitched { wallet_count: 2, next, .. } if next.as_str() == B
    )));
    Ok(())
}

#[tokio::test]
async fn switch_wallet_rejects_unknown_and_malformed_addresses() -> eyre::Result<()> {
    let h = Harness::new();
    h.seed(vec![wallet("1", A, &["eip155:1"], 100, false)?]);
    h.restore().await?;
    let before = (h.session.selection(), h.cached()?);

    assert!(matches!(
        h.session.switch_wallet(C),
        Err(SessionError::WalletNotFound(_))
    ));
    assert!(matches!(
        h.session.switch_wallet("0x123"),
        Err(SessionError::InvalidAddress(_))
    ));
    assert_eq!((h.session.selection(), h.cached()?), before);
    Ok(())
}

#[tokio::test]
async fn availability_tracks_missing_network() -> eyre::Result<()> {
    let h = Harness::new();
    h.seed(vec![wallet("1", A, &["eip155:1"], 100, false)?]);
    h.restore().await?;

    h.session.switch_network("base")?;
    let a = h.session.availability();
    assert!(!a.is_available && a.is_missing);
    // Accepted, not corrected.
    assert_eq!(h.session.selection(), active(A, "eip155:8453")?);

    h.session.switch_network("eip155:1")?;
    let a = h.session.availability();
    assert!(a.is_available && !a.is_missing);
    Ok(())
}

#[tokio::test]
async fn switch_network_validates_and_persists() -> eyre::Result<()> {
    let h = Harness::new();
    h.seed(vec![wallet("1", A, &["eip155:1", "eip155:10"], 100, false)?]);
    h.restore().await?;
    let mut rx = h.session.subscribe();

    assert!(matches!(
        h.session.switch_network("eip155:424242"),
        Err(SessionError::UnsupportedNetwork(_))
    ));
    assert_eq!(h.session.active_network(), net("eip155:1")?);
    assert!(drain_events(&mut rx).is_empty());

    let n = h.session.switch_network("Optimism")?;
    assert_eq!(n, net("eip155:10")?);
    assert_eq!(
        h.cached()?,
        (Some(A.to_owned()), Some("eip155:10".to_owned()))
    );
    assert!(h.session.is_network_switching());

    let events = drain_events(&mut rx);
    assert!(matches!(
        events.first(),
        Some(SessionEvent::NetworkSwitched { previous: Some(p), network, .. })
            if p.as_str() == "eip155:1" && network.as_str() == "eip155:10"
    ));
    assert!(matches!(
        events.get(1),
        Some(SessionEvent::SelectionChanged { .. })
    ));

    h.session.drain().await;
    assert!(h
        .sink
        .batches()
        .iter()
        .flatten()
        .any(|k| k.to_string() == format!("portfolio/{A}/eip155:10")));
    assert!(h.analytics.events().iter().any(|e| matches!(
        e,
        AnalyticsEvent::NetworkSwitched { next, .. } if next.as_str() == "eip155:10"
    )));
    Ok(())
}

#[tokio::test]
async fn switch_network_without_wallet_keeps_network_for_next_selection() -> eyre::Result<()> {
    let h = Harness::with(
        SessionConfig {
            network_switch_cooldown_ms: 0,
            ..SessionConfig::default()
        },
        None,
        RecordingAnalytics::new(),
    );
    h.restore().await?;
    let mut rx = h.session.subscribe();

    h.session.switch_network("arbitrum")?;
    assert_eq!(h.session.selection(), Selection::None);
    assert_eq!(h.session.active_network(), net("eip155:42161")?);
    assert_eq!(h.cached()?, (None, Some("eip155:42161".to_owned())));
    assert!(!h.session.is_network_switching());

    let events = drain_events(&mut rx);
    assert_eq!(events.len(), 1);
    assert!(matches!(
        events.first(),
        Some(SessionEvent::NetworkSwitched { .. })
    ));
    Ok(())
}

// ── Connect / disconnect ─────────────────────────────────────────────

#[tokio::test]
async fn connect_registers_new_wallet_and_resolves_name() -> eyre::Result<()> {
    let provider = Arc::new(StaticProvider::new(
        vec![A.to_uppercase().replacen("0X", "0x", 1)],
        "base",
    ));
    let registry = Arc::new(MemoryRegistry::new());
    let store = Arc::new(MemoryStore::new());
    let session = SessionCoordinator::builder(Arc::<MemoryRegistry>::clone(&registry), Arc::<MemoryStore>::clone(&store))
        .provider(provider)
        .resolver(Arc::new(StaticResolver::new(vec![(
            normalize(A)?,
            "alice.eth".to_owned(),
        )])))
        .build();
    session.restore(AuthState::Authenticated(user())).await?;
    let mut rx = session.subscribe();

    let sel = session.connect().await?;
    assert_eq!(sel, active(A, "eip155:8453")?);

    let stored = registry.wallets(&user());
    assert_eq!(stored.len(), 1);
    assert_eq!(
        stored.first().and_then(|w| w.label.as_deref()),
        Some("Wallet 0xaaaa…aaaa")
    );
    assert!(matches!(
        drain_events(&mut rx).first(),
        Some(SessionEvent::WalletConnected {
            newly_registered: true,
            previous: None,
            ..
        })
    ));
    assert_eq!(
        store.get(ACTIVE_NETWORK_KEY)?.as_deref(),
        Some("eip155:8453")
    );

    session.drain().await;
    let w = session
        .active_wallet()
        .ok_or_else(|| eyre::eyre!("no active wallet"))?;
    assert_eq!(w.resolved_name.as_deref(), Some("alice.eth"));
    assert_eq!(w.display_name(), "Wallet 0xaaaa…aaaa");
    Ok(())
}

#[tokio::test]
async fn connect_error_paths() -> eyre::Result<()> {
    let h = Harness::new();
    h.restore().await?;
    assert!(matches!(
        h.session.connect().await,
        Err(SessionError::ProviderUnavailable(_))
    ));

    let empty = Harness::with(
        SessionConfig::default(),
        Some(Arc::new(StaticProvider::new(vec![], "ethereum"))),
        RecordingAnalytics::new(),
    );
    assert!(matches!(
        empty.session.connect().await,
        Err(SessionError::NotAuthenticated)
    ));
    empty.restore().await?;
    assert!(matches!(
        empty.session.connect().await,
        Err(SessionError::NoAccounts)
    ));

    let bad = Harness::with(
        SessionConfig::default(),
        Some(Arc::new(StaticProvider::new(
            vec!["0xnothex".to_owned()],
            "ethereum",
        ))),
        RecordingAnalytics::new(),
    );
    bad.restore().await?;
    assert!(matches!(
        bad.session.connect().await,
        Err(SessionError::InvalidAddress(_))
    ));
    assert_eq!(bad.session.selection(), Selection::None);
    Ok(())
}

#[tokio::test]
async fn connect_existing_wallet_records_observed_network() -> eyre::Result<()> {
    let provider = Arc::new(StaticProvider::new(vec![A.to_owned()], "arbitrum"));
    let h = Harness::with(
        SessionConfig::default(),
        Some(provider),
        RecordingAnalytics::new(),
    );
    h.seed(vec![wallet("1", A, &["eip155:1"], 100, false)?]);
    h.restore().await?;

    let sel = h.session.connect().await?;
    assert_eq!(sel, active(A, "eip155:42161")?);
    let w = h
        .session
        .active_wallet()
        .ok_or_else(|| eyre::eyre!("no active wallet"))?;
    assert_eq!(w.supported_networks, vec![net("eip155:1")?, net("eip155:42161")?]);
    assert!(h.session.availability().is_available);
    assert_eq!(h.registry.wallets(&user()).len(), 1);

    h.session.drain().await;
    assert!(h.analytics.events().iter().any(|e| matches!(
        e,
        AnalyticsEvent::WalletConnected {
            newly_registered: false,
            ..
        }
    )));
    Ok(())
}

#[tokio::test]
async fn duplicate_registration_is_absorbed() -> eyre::Result<()> {
    let provider = Arc::new(StaticProvider::new(vec![A.to_owned()], "ethereum"));
    let h = Harness::with(
        SessionConfig::default(),
        Some(provider),
        RecordingAnalytics::new(),
    );
    h.restore().await?;
    // Another device registers the wallet after this session restored.
    h.seed(vec![wallet("remote-a", A, &["eip155:1"], 100, false)?]);

    let sel = h.session.connect().await?;
    assert_eq!(sel, active(A, "eip155:1")?);
    let ws = h.session.wallets();
    assert_eq!(ws.len(), 1);
    assert_eq!(ws.first().map(|w| w.id.as_str()), Some("remote-a"));
    assert_eq!(h.registry.wallets(&user()).len(), 1);
    Ok(())
}

#[tokio::test]
async fn disconnect_active_falls_back_then_clears() -> eyre::Result<()> {
    let h = Harness::new();
    h.seed(vec![
        wallet("1", A, &["eip155:1"], 200, false)?,
        wallet("2", B, &["eip155:1"], 100, false)?,
    ]);
    h.restore().await?;
    h.session.switch_network("base")?;

    let sel = h.session.disconnect(A).await?;
    assert_eq!(sel, active(B, "eip155:8453")?, "current network is kept");
    assert_eq!(
        h.cached()?,
        (Some(B.to_owned()), Some("eip155:8453".to_owned()))
    );
    assert_eq!(h.registry.wallets(&user()).len(), 1);

    let mut rx = h.session.subscribe();
    let sel = h.session.disconnect(B).await?;
    assert_eq!(sel, Selection::None);
    assert_eq!(h.cached()?, (None, None));
    assert!(h.session.wallets().is_empty());
    assert!(matches!(
        drain_events(&mut rx).last(),
        Some(SessionEvent::SelectionChanged {
            current: Selection::None,
            ..
        })
    ));
    Ok(())
}

#[tokio::test]
async fn disconnect_failures_leave_state_alone() -> eyre::Result<()> {
    let h = Harness::new();
    h.seed(vec![wallet("1", A, &["eip155:1"], 100, false)?]);
    h.restore().await?;

    assert!(matches!(
        h.session.disconnect(C).await,
        Err(SessionError::WalletNotFound(_))
    ));
    h.registry.set_fail_writes(true);
    assert!(matches!(
        h.session.disconnect(A).await,
        Err(SessionError::RegistryWriteFailed(_))
    ));
    assert_eq!(h.session.selection(), active(A, "eip155:1")?);
    assert_eq!(h.session.wallets().len(), 1);
    Ok(())
}

#[tokio::test]
async fn disconnect_inactive_wallet_keeps_selection() -> eyre::Result<()> {
    let h = Harness::new();
    h.seed(vec![
        wallet("1", A, &["eip155:1"], 200, false)?,
        wallet("2", B, &["eip155:1"], 100, false)?,
    ]);
    h.restore().await?;

    let sel = h.session.disconnect(B).await?;
    assert_eq!(sel, active(A, "eip155:1")?);
    h.session.drain().await;
    assert!(h.analytics.events().iter().any(|e| matches!(
        e,
        AnalyticsEvent::WalletDisconnected { remaining: 1, .. }
    )));
    Ok(())
}

// ── Provider events ──────────────────────────────────────────────────

#[tokio::test]
async fn provider_events_are_routed() -> eyre::Result<()> {
    let provider = Arc::new(StaticProvider::new(vec![], "ethereum"));
    let h = Harness::with(
        SessionConfig::default(),
        Some(Arc::clone(&provider)),
        RecordingAnalytics::new(),
    );
    h.seed(vec![
        wallet("1", A, &["eip155:1"], 200, false)?,
        wallet("2", B, &["eip155:1"], 100, false)?,
    ]);
    h.restore().await?;

    h.session
        .handle_provider_event(ProviderEvent::AccountsChanged(vec![B.to_owned()]))
        .await?;
    assert_eq!(h.session.selection(), active(B, "eip155:1")?);

    h.session
        .handle_provider_event(ProviderEvent::AccountsChanged(vec![]))
        .await?;
    assert_eq!(h.session.selection(), active(B, "eip155:1")?);

    h.session
        .handle_provider_event(ProviderEvent::NetworkChanged("base".to_owned()))
        .await?;
    assert_eq!(h.session.active_network(), net("eip155:8453")?);

    h.session
        .handle_provider_event(ProviderEvent::NetworkChanged("eip155:31337".to_owned()))
        .await?;
    assert_eq!(h.session.active_network(), net("eip155:8453")?);

    provider.set_network("polygon");
    h.session
        .handle_provider_event(ProviderEvent::AccountsChanged(vec![C.to_owned()]))
        .await?;
    assert_eq!(h.session.selection(), active(C, "eip155:137")?);
    assert_eq!(h.registry.wallets(&user()).len(), 3);
    Ok(())
}

#[tokio::test]
async fn provider_listener_follows_network_changes() -> eyre::Result<()> {
    let provider = Arc::new(StaticProvider::new(vec![A.to_owned()], "ethereum"));
    let h = Harness::with(
        SessionConfig::default(),
        Some(Arc::clone(&provider)),
        RecordingAnalytics::new(),
    );
    h.seed(vec![wallet("1", A, &["eip155:1"], 100, false)?]);
    h.restore().await?;

    let listener = h
        .session
        .spawn_provider_listener()
        .ok_or_else(|| eyre::eyre!("listener not started"))?;
    provider.set_network("optimism");

    tokio::time::timeout(Duration::from_secs(5), async {
        while h.session.active_network().as_str() != "eip155:10" {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;
    listener.abort();
    Ok(())
}

// ── Optimistic edits ─────────────────────────────────────────────────

#[tokio::test]
async fn label_update_commits_or_rolls_back() -> eyre::Result<()> {
    let h = Harness::new();
    let mut w = wallet("1", A, &["eip155:1"], 100, false)?;
    w.label = Some("Main".to_owned());
    h.seed(vec![w]);
    h.restore().await?;
    let a = normalize(A)?;

    let saved = h.session.update_label(A, Some("  Savings  ")).await?;
    assert_eq!(saved.label.as_deref(), Some("Savings"));
    assert!(!h.session.is_label_pending(&a));

    h.registry.set_fail_writes(true);
    let err = h.session.update_label(A, Some("Oops")).await.err();
    assert!(matches!(err, Some(SessionError::RegistryWriteFailed(_))));
    assert_eq!(
        h.session.wallet(&a).and_then(|w| w.label),
        Some("Savings".to_owned())
    );
    assert!(!h.session.is_label_pending(&a));
    Ok(())
}

#[tokio::test]
async fn primary_change_is_applied_then_synced() -> eyre::Result<()> {
    let h = Harness::new();
    h.seed(vec![
        wallet("1", A, &["eip155:1"], 100, true)?,
        wallet("2", B, &["eip155:1"], 200, false)?,
    ]);
    h.restore().await?;

    h.session.set_primary(B)?;
    assert_eq!(
        h.session.wallets().first().map(|w| w.address.as_str().to_owned()),
        Some(B.to_owned())
    );
    h.session.drain().await;
    assert!(!h.session.is_primary_pending());
    let stored = h.registry.wallets(&user());
    assert!(stored.iter().any(|w| w.id == "2" && w.is_primary));
    assert!(stored.iter().any(|w| w.id == "1" && !w.is_primary));
    Ok(())
}

#[tokio::test]
async fn primary_change_rolls_back_after_retries() -> eyre::Result<()> {
    let h = Harness::with(
        SessionConfig {
            primary_sync: BackoffConfig::immediate(2),
            ..SessionConfig::default()
        },
        None,
        RecordingAnalytics::new(),
    );
    h.seed(vec![
        wallet("1", A, &["eip155:1"], 100, true)?,
        wallet("2", B, &["eip155:1"], 200, false)?,
    ]);
    h.restore().await?;
    h.registry.set_fail_writes(true);

    h.session.set_primary(B)?;
    assert!(h.session.is_primary_pending());
    assert!(h
        .session
        .wallets()
        .iter()
        .any(|w| w.address.as_str() == B && w.is_primary));

    h.session.drain().await;
    assert!(!h.session.is_primary_pending());
    let ws = h.session.wallets();
    assert_eq!(ws.first().map(|w| (w.id.as_str(), w.is_primary)), Some(("1", true)));
    assert!(ws.iter().filter(|w| w.is_primary).count() == 1);
    Ok(())
}

#[tokio::test]
async fn network_snapshots_are_stored() -> eyre::Result<()> {
    let h = Harness::new();
    h.seed(vec![wallet("1", A, &["eip155:1"], 100, false)?]);
    h.restore().await?;

    let snap = NetworkSnapshot {
        balance_usd: Some(rust_decimal::Decimal::new(12_345, 2)),
        risk_score: Some(7),
        fetched_at: Utc::now(),
    };
    h.session.update_network_snapshot(A, "ethereum", snap.clone())?;
    let w = h
        .session
        .wallet(&normalize(A)?)
        .ok_or_else(|| eyre::eyre!("missing wallet"))?;
    assert_eq!(w.per_network_cache.get(&net("eip155:1")?), Some(&snap));
    assert!(matches!(
        h.session.update_network_snapshot(C, "ethereum", snap),
        Err(SessionError::WalletNotFound(_))
    ));
    Ok(())
}

// ── Degradation & lifecycle ──────────────────────────────────────────

#[tokio::test]
async fn unavailable_storage_degrades_to_memory() -> eyre::Result<()> {
    let h = Harness::new();
    h.seed(vec![
        wallet("1", A, &["eip155:1"], 200, false)?,
        wallet("2", B, &["eip155:1"], 100, false)?,
    ]);
    h.store.set_unavailable(true);

    let out = h.restore().await?;
    assert!(matches!(
        out,
        RestoreOutcome::Restored {
            branch: RestoreBranch::DeterministicFirst,
            ..
        }
    ));
    assert!(h.session.is_cache_degraded());
    h.session.switch_wallet(B)?;
    assert_eq!(h.session.selection(), active(B, "eip155:1")?);
    Ok(())
}

#[tokio::test]
async fn failing_analytics_never_reach_the_caller() -> eyre::Result<()> {
    let h = Harness::with(SessionConfig::default(), None, RecordingAnalytics::failing());
    h.seed(vec![
        wallet("1", A, &["eip155:1"], 200, false)?,
        wallet("2", B, &["eip155:1"], 100, false)?,
    ]);
    h.restore().await?;
    h.session.switch_wallet(B)?;
    h.session.switch_network("base")?;
    h.session.drain().await;
    assert_eq!(h.session.selection(), active(B, "eip155:8453")?);
    Ok(())
}

#[tokio::test]
async fn logout_clears_memory_but_keeps_device_cache() -> eyre::Result<()> {
    let h = Harness::new();
    h.seed(vec![wallet("1", A, &["eip155:1"], 100, false)?]);
    h.restore().await?;
    let mut rx = h.session.subscribe();

    h.session.logout();
    assert_eq!(h.session.selection(), Selection::None);
    assert!(h.session.user().is_none());
    assert!(h.session.wallets().is_empty());
    assert_eq!(
        h.cached()?,
        (Some(A.to_owned()), Some("eip155:1".to_owned()))
    );
    assert!(matches!(
        drain_events(&mut rx).first(),
        Some(SessionEvent::SelectionChanged {
            current: Selection::None,
            ..
        })
    ));

    let out = h.restore().await?;
    assert!(matches!(
        out,
        RestoreOutcome::Restored {
            branch: RestoreBranch::LocalCache,
            ..
        }
    ));
    assert_eq!(h.registry.list_calls(), 2);
    Ok(())
}

#[tokio::test]
async fn snapshot_serializes_session() -> eyre::Result<()> {
    let h = Harness::new();
    h.seed(vec![wallet("1", A, &["eip155:1"], 100, false)?]);
    h.restore().await?;

    let v = serde_json::to_value(h.session.snapshot())?;
    assert_eq!(v["user"], "user-1");
    assert_eq!(v["selection"]["state"], "active");
    assert_eq!(v["selection"]["address"], A);
    assert_eq!(v["availability"]["is_available"], true);
    assert_eq!(v["wallets"].as_array().map(Vec::len), Some(1));
    Ok(())
}
