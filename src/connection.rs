//! Wallet connection lifecycle and reconciliation.
//!
//! `ConnectionManager` owns connect/disconnect, network validation and
//! switching, and keeps the session in line with what the wallet reports.
//!
//! ## Reconciliation
//!
//! The wallet can change accounts or chains on its own. Two paths observe it:
//!
//! ```text
//! wallet events ──┐
//!                 ├──► apply_observed_accounts() ──► SessionStore
//! 2s account poll ┘
//! ```
//!
//! Every observation takes a sequence number when it is issued. An
//! observation older than the last applied one is discarded, so a slow poll
//! or a slow `connect()` cannot overwrite a newer event. Only an explicit
//! `disconnect()` always applies. A `connect()` overlapped by an explicit
//! disconnect is discarded as well, and after an explicit disconnect polls
//! and events are not allowed to reconnect until the next successful
//! `connect()` or reload.
//!
//! A chain change reloads the whole session: listeners are dropped, the
//! session moves to a fresh epoch, the provider is rebound and the bootstrap
//! runs again.

use std::sync::{Arc, Weak};

use alloy::primitives::Address;
use parking_lot::Mutex;
use tokio::{
    sync::{mpsc, Mutex as AsyncMutex},
    task::JoinHandle,
    time::MissedTickBehavior,
};

use crate::{
    ext::{
        ClientConfig, CounterProvider, ListenerId, NetworkStatus, SessionError, SessionStore,
        WalletError, WalletEvent, WalletTransport,
    },
    session::refresh_counter,
};

// ============================================================================
// Observations
// ============================================================================

/// Where an account observation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationSource {
    /// Non-prompting read during bootstrap
    Bootstrap,
    /// Response to an explicit `connect()`
    Connect,
    /// Explicit `disconnect()`
    Disconnect,
    /// `accountsChanged` pushed by the wallet
    Event,
    /// Periodic reconciliation read
    Poll,
}

/// Ticket identifying when an observation was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    seq: u64,
    epoch: u64,
    /// Explicit disconnects seen when the observing operation started
    disconnects: u64,
}

impl Observation {
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

/// Effect of applying an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountTransition {
    Unchanged,
    Connected(Address),
    AccountChanged(Address),
    Disconnected,
    /// Older than an observation already applied, or from a previous session
    Stale,
    /// Reconnect ignored after an explicit user disconnect
    Suppressed,
}

impl AccountTransition {
    pub fn account(&self) -> Option<Address> {
        match self {
            AccountTransition::Connected(a) | AccountTransition::AccountChanged(a) => Some(*a),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct ReconcileClock {
    next_seq: u64,
    applied: u64,
    user_disconnected: bool,
    disconnects: u64,
}

// ============================================================================
// ConnectionManager
// ============================================================================

pub struct ConnectionManager {
    provider: Arc<dyn CounterProvider>,
    store: SessionStore,
    config: ClientConfig,
    events_tx: mpsc::UnboundedSender<WalletEvent>,
    events_rx: Arc<AsyncMutex<mpsc::UnboundedReceiver<WalletEvent>>>,
    listener: Mutex<Option<(Arc<dyn WalletTransport>, ListenerId)>>,
    reconciler: Mutex<Option<JoinHandle<()>>>,
    clock: Mutex<ReconcileClock>,
}

impl ConnectionManager {
    pub fn new(
        provider: Arc<dyn CounterProvider>,
        store: SessionStore,
        config: ClientConfig,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            provider,
            store,
            config,
            events_tx,
            events_rx: Arc::new(AsyncMutex::new(events_rx)),
            listener: Mutex::new(None),
            reconciler: Mutex::new(None),
            clock: Mutex::new(ReconcileClock::default()),
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// True while a wallet event listener is registered.
    pub fn has_listener(&self) -> bool {
        self.listener.lock().is_some()
    }

    fn available_wallet(&self) -> Result<Arc<dyn WalletTransport>, SessionError> {
        match self.provider.wallet() {
            Some(wallet) if self.provider.is_wallet_available() => Ok(wallet),
            _ => Err(SessionError::WalletNotFound),
        }
    }

    // ========================================================================
    // Bootstrap
    // ========================================================================

    /// Bind the provider, pick up an already authorized account without
    /// prompting, read the counter and mark the session initialized.
    pub async fn bootstrap(&self) -> Result<(), SessionError> {
        let epoch = self.store.epoch();
        let _loading = self.store.begin_operation();

        if let Err(e) = self.provider.initialize().await {
            tracing::error!(error = %e, "provider initialization failed");
            self.store.set_error(e.to_string());
            return Err(e);
        }

        if let Ok(wallet) = self.available_wallet() {
            let observation = self.observe();
            match wallet.accounts().await {
                Ok(accounts) => {
                    let transition = self.apply_observed_accounts(
                        observation,
                        &accounts,
                        ObservationSource::Bootstrap,
                    );
                    self.after_transition(transition).await;
                }
                Err(e) => tracing::warn!(error = %e, "failed to read authorized accounts"),
            }
        } else {
            tracing::info!("no wallet available, running read-only");
        }

        refresh_counter(self.provider.as_ref(), &self.store).await;

        if self.store.update_in_epoch(epoch, |s| s.initialized = true) {
            tracing::debug!(epoch, "session initialized");
        }
        Ok(())
    }

    // ========================================================================
    // Connect / Disconnect
    // ========================================================================

    /// Ask the wallet for account access and connect the first account.
    pub async fn connect(&self) -> Result<Address, SessionError> {
        let epoch = self.store.epoch();
        let _loading = self.store.begin_operation();
        self.store.update(|s| {
            s.error = None;
            s.connecting = true;
        });

        let result = self.connect_inner(epoch).await;

        self.store.update_in_epoch(epoch, |s| {
            s.connecting = false;
            match &result {
                // the newer update already decided the session
                Err(SessionError::ConnectSuperseded) | Ok(_) => {}
                Err(e) => s.error = Some(e.to_string()),
            }
        });
        match &result {
            Ok(account) => tracing::info!(%account, "wallet connected"),
            Err(e) => tracing::warn!(error = %e, "wallet connection failed"),
        }
        result
    }

    async fn connect_inner(&self, epoch: u64) -> Result<Address, SessionError> {
        let wallet = self.available_wallet()?;
        let disconnects = self.clock.lock().disconnects;

        let accounts = wallet.request_accounts().await?;
        let observation = Observation {
            disconnects,
            ..self.observe()
        };
        let account = *accounts.first().ok_or(SessionError::NoAccountsReturned)?;

        let network = self.read_network(wallet.as_ref()).await?;
        if self.store.epoch() != epoch {
            return Err(SessionError::SessionReloaded);
        }

        let transition =
            self.apply_observed_accounts(observation, &accounts, ObservationSource::Connect);
        tracing::debug!(?transition, "connect observation applied");

        // a newer event, poll or disconnect took over while we were waiting
        let superseded = transition == AccountTransition::Stale
            && self.store.snapshot().account != Some(account);
        if superseded {
            return Err(SessionError::ConnectSuperseded);
        }

        self.store.update_in_epoch(epoch, |s| {
            if s.account == Some(account) {
                s.network = Some(network);
            }
        });
        self.ensure_listener();

        refresh_counter(self.provider.as_ref(), &self.store).await;
        Ok(account)
    }

    /// Forget the account and stop listening. Never fails.
    pub fn disconnect(&self) {
        let observation = self.observe();
        let transition =
            self.apply_observed_accounts(observation, &[], ObservationSource::Disconnect);
        self.remove_listener();
        tracing::info!(?transition, "wallet disconnected");
    }

    // ========================================================================
    // Network
    // ========================================================================

    async fn read_network(
        &self,
        wallet: &dyn WalletTransport,
    ) -> Result<NetworkStatus, SessionError> {
        let chain_id = wallet.chain_id().await?;
        let chain = &self.config.chain;
        Ok(NetworkStatus {
            is_correct_network: chain.matches(&chain_id),
            chain_id,
            expected_network: chain.chain_name.clone(),
        })
    }

    /// Network currently reported by the wallet, `None` without a wallet or
    /// when the lookup fails.
    pub async fn network_status(&self) -> Option<NetworkStatus> {
        let wallet = self.available_wallet().ok()?;
        match self.read_network(wallet.as_ref()).await {
            Ok(status) => Some(status),
            Err(e) => {
                tracing::warn!(error = %e, "failed to read wallet network");
                None
            }
        }
    }

    /// Re-read the wallet network and publish it for the connected account.
    async fn refresh_network(&self) -> Result<NetworkStatus, SessionError> {
        let epoch = self.store.epoch();
        let wallet = self.available_wallet()?;
        let status = self.read_network(wallet.as_ref()).await?;
        self.store.update_in_epoch(epoch, |s| {
            if s.connected {
                s.network = Some(status.clone());
            }
        });
        Ok(status)
    }

    /// Fail with `WrongNetwork` unless the wallet is on the configured chain.
    pub async fn validate_network(&self) -> Result<(), SessionError> {
        let status = self.refresh_network().await?;
        if status.is_correct_network {
            return Ok(());
        }
        tracing::debug!(
            actual = %status.chain_id,
            expected = %self.config.chain.chain_id_hex(),
            "wallet on wrong network"
        );
        Err(SessionError::WrongNetwork {
            expected: status.expected_network,
            actual: status.chain_id,
        })
    }

    /// Ask the wallet to move to the configured chain, adding it first if
    /// the wallet does not know it.
    pub async fn switch_network(&self) -> Result<(), SessionError> {
        let epoch = self.store.epoch();
        let _loading = self.store.begin_operation();
        self.store.clear_error();

        let result = self.switch_inner().await;
        match &result {
            Ok(()) => {
                if let Err(e) = self.refresh_network().await {
                    tracing::debug!(error = %e, "network refresh after switch failed");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "network switch failed");
                let message = e.to_string();
                self.store.update_in_epoch(epoch, |s| s.error = Some(message));
            }
        }
        result
    }

    async fn switch_inner(&self) -> Result<(), SessionError> {
        let wallet = self.available_wallet()?;
        let chain = &self.config.chain;

        match wallet.switch_chain(&chain.chain_id_hex()).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_unrecognized_chain() => {
                tracing::info!(
                    chain_id = %chain.chain_id_hex(),
                    "chain unknown to wallet, adding it"
                );
                wallet
                    .add_chain(&chain.add_chain_params())
                    .await
                    .map_err(|e| self.switch_error(e))
            }
            Err(e) => Err(self.switch_error(e)),
        }
    }

    fn switch_error(&self, error: WalletError) -> SessionError {
        if error.is_user_rejected() {
            SessionError::SwitchRejected
        } else {
            SessionError::SwitchFailed {
                network: self.config.chain.chain_name.clone(),
                reason: error.message,
            }
        }
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    /// Issue a ticket for an observation about to be made.
    pub fn observe(&self) -> Observation {
        let mut clock = self.clock.lock();
        clock.next_seq += 1;
        Observation {
            seq: clock.next_seq,
            epoch: self.store.epoch(),
            disconnects: clock.disconnects,
        }
    }

    /// The single transition function for account state.
    pub fn apply_observed_accounts(
        &self,
        observation: Observation,
        accounts: &[Address],
        source: ObservationSource,
    ) -> AccountTransition {
        let mut clock = self.clock.lock();

        // an explicit disconnect always wins; everything else must be newer
        // than what was applied and must not predate an explicit disconnect
        let stale = source != ObservationSource::Disconnect
            && (observation.seq < clock.applied || observation.disconnects != clock.disconnects);
        if observation.epoch != self.store.epoch() || stale {
            tracing::debug!(
                seq = observation.seq,
                applied = clock.applied,
                ?source,
                "discarding stale account observation"
            );
            return AccountTransition::Stale;
        }

        let target = match source {
            ObservationSource::Disconnect => {
                clock.user_disconnected = true;
                clock.disconnects += 1;
                None
            }
            ObservationSource::Connect => {
                clock.user_disconnected = false;
                accounts.first().copied()
            }
            _ => accounts.first().copied(),
        };

        if target.is_some() && clock.user_disconnected {
            tracing::debug!(?source, "ignoring reconnect after user disconnect");
            return AccountTransition::Suppressed;
        }
        clock.applied = clock.applied.max(observation.seq);

        let mut transition = AccountTransition::Unchanged;
        self.store.modify(|s| {
            if s.epoch != observation.epoch {
                return false;
            }
            transition = match (target, s.account) {
                (None, None) if !s.connected => return false,
                (None, _) => {
                    s.mark_disconnected();
                    AccountTransition::Disconnected
                }
                (Some(next), Some(current)) if next == current && s.connected => return false,
                (Some(next), Some(_)) => {
                    s.mark_connected(next);
                    s.network = None;
                    AccountTransition::AccountChanged(next)
                }
                (Some(next), None) => {
                    s.mark_connected(next);
                    AccountTransition::Connected(next)
                }
            };
            true
        });

        if transition != AccountTransition::Unchanged {
            tracing::info!(?source, ?transition, "account state changed");
        }
        transition
    }

    async fn after_transition(&self, transition: AccountTransition) {
        match transition {
            AccountTransition::Connected(_) | AccountTransition::AccountChanged(_) => {
                self.ensure_listener();
                if let Err(e) = self.refresh_network().await {
                    tracing::warn!(error = %e, "failed to validate network after account change");
                }
            }
            AccountTransition::Disconnected => self.remove_listener(),
            _ => {}
        }
    }

    /// React to a wallet event.
    pub async fn handle_wallet_event(&self, event: WalletEvent) {
        match event {
            WalletEvent::AccountsChanged(accounts) => {
                let observation = self.observe();
                let transition =
                    self.apply_observed_accounts(observation, &accounts, ObservationSource::Event);
                self.after_transition(transition).await;
            }
            WalletEvent::ChainChanged(chain_id) => {
                tracing::info!(%chain_id, "wallet chain changed, reloading session");
                if let Err(e) = self.reload().await {
                    tracing::error!(error = %e, "session reload failed");
                }
            }
        }
    }

    /// One polling pass: re-read the wallet's accounts and correct drift.
    pub async fn reconcile(&self) -> AccountTransition {
        let Ok(wallet) = self.available_wallet() else {
            return AccountTransition::Unchanged;
        };

        let observation = self.observe();
        match wallet.accounts().await {
            Ok(accounts) => {
                let transition =
                    self.apply_observed_accounts(observation, &accounts, ObservationSource::Poll);
                self.after_transition(transition).await;
                transition
            }
            Err(e) => {
                tracing::debug!(error = %e, "account poll failed");
                AccountTransition::Unchanged
            }
        }
    }

    /// Handle queued wallet events without the background task.
    ///
    /// Returns the number of events handled; zero while the background
    /// reconciliation task owns the queue.
    pub async fn drain_wallet_events(&self) -> usize {
        let mut handled = 0;
        loop {
            let event = match self.events_rx.try_lock() {
                Ok(mut rx) => match rx.try_recv() {
                    Ok(event) => event,
                    Err(_) => break,
                },
                Err(_) => break,
            };
            self.handle_wallet_event(event).await;
            handled += 1;
        }
        handled
    }

    /// Start the background task handling wallet events and the account poll.
    ///
    /// Idempotent. The task holds only a weak reference and ends once the
    /// manager is dropped.
    pub fn start_reconciliation(self: &Arc<Self>) {
        let mut reconciler = self.reconciler.lock();
        if reconciler.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let events = Arc::clone(&self.events_rx);
        let period = self.config.reconcile_interval;

        *reconciler = Some(tokio::spawn(async move {
            let mut events = events.lock_owned().await;
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    event = events.recv() => {
                        let (Some(event), Some(this)) = (event, weak.upgrade()) else {
                            break;
                        };
                        this.handle_wallet_event(event).await;
                    }
                    _ = ticker.tick() => {
                        let Some(this) = weak.upgrade() else {
                            break;
                        };
                        this.reconcile().await;
                    }
                }
            }
            tracing::debug!("reconciliation task stopped");
        }));
        tracing::debug!(interval = ?period, "reconciliation started");
    }

    pub fn stop_reconciliation(&self) {
        if let Some(task) = self.reconciler.lock().take() {
            task.abort();
        }
    }

    /// Stop reconciliation and drop the wallet listener, leaving the session as is.
    pub fn shutdown(&self) {
        self.stop_reconciliation();
        self.remove_listener();
    }

    /// Tear down and rebuild the session after a chain change.
    pub async fn reload(&self) -> Result<(), SessionError> {
        self.remove_listener();
        self.clock.lock().user_disconnected = false;
        self.store.reload();
        self.provider.teardown().await;
        self.bootstrap().await
    }

    // ========================================================================
    // Listener registration
    // ========================================================================

    fn ensure_listener(&self) {
        let mut listener = self.listener.lock();
        if listener.is_some() {
            return;
        }
        if let Ok(wallet) = self.available_wallet() {
            let id = wallet.subscribe(self.events_tx.clone());
            tracing::debug!(listener = id.0, "wallet listener registered");
            *listener = Some((wallet, id));
        }
    }

    fn remove_listener(&self) {
        if let Some((wallet, id)) = self.listener.lock().take() {
            wallet.unsubscribe(id);
            tracing::debug!(listener = id.0, "wallet listener removed");
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
