//! Observable session state.
//!
//! `SessionStore` is the single shared mutable state of a client. It wraps a
//! `tokio::sync::watch` channel: every mutation is applied to the value in
//! place under the channel lock, so a reader never sees a half-updated
//! session, and every subscriber is notified once per mutation.
//!
//! Only the connection manager and the transaction controller write to it;
//! the write surface is crate-private.

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use tokio::sync::watch;

use crate::ext::CounterProvider;

// ============================================================================
// Session
// ============================================================================

/// Network the wallet reported at the last check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkStatus {
    /// Wire-format chain id reported by the wallet
    pub chain_id: String,
    pub is_correct_network: bool,
    /// Display name of the configured network
    pub expected_network: String,
}

/// Connection state derived from a session snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    WrongNetwork,
    CorrectNetwork,
}

/// Snapshot of the client session.
///
/// `connected == false` implies `account == None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub connected: bool,
    pub account: Option<Address>,
    pub network: Option<NetworkStatus>,
    /// Last known counter value, possibly stale
    pub counter_value: U256,
    /// True while at least one operation is in flight
    pub loading: bool,
    /// Last user-facing error
    pub error: Option<String>,
    /// Set once the first bootstrap of this epoch has completed
    pub initialized: bool,
    pub connecting: bool,
    /// Incremented on every reload; work from an older epoch is discarded
    pub epoch: u64,
    pub(crate) in_flight: usize,
}

impl Session {
    pub fn connection_state(&self) -> ConnectionState {
        match (&self.account, &self.network) {
            _ if self.connecting => ConnectionState::Connecting,
            (None, _) => ConnectionState::Disconnected,
            (Some(_), Some(network)) if network.is_correct_network => {
                ConnectionState::CorrectNetwork
            }
            // an account with no network snapshot yet is treated as unverified
            (Some(_), _) => ConnectionState::WrongNetwork,
        }
    }

    pub fn is_correct_network(&self) -> bool {
        self.network
            .as_ref()
            .is_some_and(|network| network.is_correct_network)
    }

    pub(crate) fn mark_connected(&mut self, account: Address) {
        self.connected = true;
        self.account = Some(account);
    }

    pub(crate) fn mark_disconnected(&mut self) {
        self.connected = false;
        self.account = None;
        self.network = None;
        self.connecting = false;
    }
}

// ============================================================================
// SessionStore
// ============================================================================

/// Shared handle to the session. Cloning shares the same state.
#[derive(Debug, Clone)]
pub struct SessionStore {
    inner: Arc<watch::Sender<Session>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Session::default());
        Self {
            inner: Arc::new(tx),
        }
    }

    pub fn snapshot(&self) -> Session {
        self.inner.borrow().clone()
    }

    /// Receiver notified after every mutation.
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.inner.subscribe()
    }

    pub fn epoch(&self) -> u64 {
        self.inner.borrow().epoch
    }

    pub(crate) fn update(&self, f: impl FnOnce(&mut Session)) {
        self.inner.send_modify(f);
    }

    /// Apply `f`, notifying subscribers only if it returns true.
    pub(crate) fn modify(&self, f: impl FnOnce(&mut Session) -> bool) -> bool {
        self.inner.send_if_modified(f)
    }

    /// Apply `f` only if the session is still in `epoch`.
    pub(crate) fn update_in_epoch(&self, epoch: u64, f: impl FnOnce(&mut Session)) -> bool {
        self.inner.send_if_modified(|session| {
            if session.epoch != epoch {
                return false;
            }
            f(session);
            true
        })
    }

    /// Mark an operation as in flight until the guard is dropped.
    pub(crate) fn begin_operation(&self) -> LoadingGuard {
        self.update(|s| {
            s.in_flight += 1;
            s.loading = true;
        });
        LoadingGuard {
            store: self.clone(),
        }
    }

    pub(crate) fn set_error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(error = %message, "session error");
        self.update(|s| s.error = Some(message));
    }

    pub(crate) fn clear_error(&self) {
        self.update(|s| s.error = None);
    }

    /// Replace the session with a fresh one in the next epoch.
    ///
    /// Operations still in flight keep their loading guards; the count is
    /// carried over so `loading` stays accurate until they finish.
    pub(crate) fn reload(&self) -> u64 {
        let mut epoch = 0;
        self.update(|s| {
            let fresh = Session {
                epoch: s.epoch + 1,
                in_flight: s.in_flight,
                loading: s.in_flight > 0,
                ..Session::default()
            };
            epoch = fresh.epoch;
            *s = fresh;
        });
        tracing::info!(epoch, "session reloaded");
        epoch
    }
}

/// Decrements the in-flight count on drop.
#[must_use]
pub(crate) struct LoadingGuard {
    store: SessionStore,
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        self.store.update(|s| {
            s.in_flight = s.in_flight.saturating_sub(1);
            s.loading = s.in_flight > 0;
        });
    }
}

// ============================================================================
// Counter refresh
// ============================================================================

/// Re-read the counter and publish it. Passive: failures are logged, not
/// surfaced, and a result from an older epoch is dropped.
///
/// Within an epoch the published value never goes backwards, so a lagging
/// node cannot undo a confirmed increment.
pub(crate) async fn refresh_counter(
    provider: &dyn CounterProvider,
    store: &SessionStore,
) -> Option<U256> {
    let epoch = store.epoch();
    let _loading = store.begin_operation();

    match provider.read_counter().await {
        Ok(value) => {
            let applied = store.update_in_epoch(epoch, |s| {
                if value < s.counter_value {
                    tracing::debug!(
                        read = %value,
                        known = %s.counter_value,
                        "ignoring stale counter read"
                    );
                } else {
                    s.counter_value = value;
                }
            });
            if !applied {
                tracing::debug!(epoch, "dropping counter read from previous session");
                return None;
            }
            Some(value)
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to refresh counter");
            None
        }
    }
}
