//! Increment transaction state machine.
//!
//! ```text
//! Idle ──increment_counter()──► Pending ──receipt──► Confirmed
//!  ▲                               │                     │
//!  │                               └──failure──► Failed  │
//!  └──────────────────── reset() ◄───────────────────────┘
//! ```
//!
//! There is exactly one transaction slot. It is claimed atomically when an
//! attempt starts, so a second `increment_counter()` while one is Pending is
//! rejected with `TransactionInFlight` instead of interleaving with it.
//!
//! The slot is tagged with the session epoch it was claimed in. A reload
//! (chain change) returns it to Idle, and work still running for the old
//! epoch stops with `SessionReloaded` without touching the new slot.

use std::sync::Arc;

use alloy::primitives::{Address, B256};
use tokio::sync::watch;

use crate::{
    ext::{
        classify_failure, ClientConfig, ConnectionManager, CounterProvider, GasEstimate, GasPlan,
        SessionError, SessionStore, TxReceipt,
    },
    session::refresh_counter,
};

/// Message published when a mined transaction reverted.
pub const RECEIPT_FAILED_MESSAGE: &str = "Transaction failed on blockchain";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TxStatus {
    #[default]
    Idle,
    Pending,
    Confirmed,
    Failed,
}

/// The transaction slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingTransaction {
    /// Set once the transaction is broadcast
    pub hash: Option<B256>,
    pub status: TxStatus,
    pub error: Option<String>,
    /// Set only when Confirmed
    pub gas_used: Option<u64>,
    /// Session epoch the attempt belongs to
    pub epoch: u64,
}

impl PendingTransaction {
    fn idle(epoch: u64) -> Self {
        Self {
            epoch,
            ..Default::default()
        }
    }
}

pub struct TransactionController {
    provider: Arc<dyn CounterProvider>,
    connection: Arc<ConnectionManager>,
    store: SessionStore,
    config: ClientConfig,
    slot: watch::Sender<PendingTransaction>,
}

impl TransactionController {
    pub fn new(
        provider: Arc<dyn CounterProvider>,
        connection: Arc<ConnectionManager>,
        config: ClientConfig,
    ) -> Self {
        let store = connection.store().clone();
        let (slot, _) = watch::channel(PendingTransaction::idle(store.epoch()));
        Self {
            provider,
            connection,
            store,
            config,
            slot,
        }
    }

    /// Current slot.
    pub fn transaction(&self) -> PendingTransaction {
        self.sync_epoch();
        self.slot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PendingTransaction> {
        self.slot.subscribe()
    }

    /// Return to Idle from Confirmed or Failed.
    pub fn reset(&self) -> Result<(), SessionError> {
        self.sync_epoch();
        let mut result = Ok(());
        self.slot.send_if_modified(|tx| match tx.status {
            TxStatus::Pending => {
                result = Err(SessionError::ResetWhilePending);
                false
            }
            TxStatus::Idle => false,
            TxStatus::Confirmed | TxStatus::Failed => {
                *tx = PendingTransaction::idle(tx.epoch);
                true
            }
        });
        result
    }

    /// Drop a slot left over from a previous session epoch.
    fn sync_epoch(&self) {
        let epoch = self.store.epoch();
        self.slot.send_if_modified(|tx| {
            if tx.epoch == epoch {
                return false;
            }
            if tx.status != TxStatus::Idle {
                tracing::debug!(
                    stale_epoch = tx.epoch,
                    epoch,
                    status = ?tx.status,
                    "clearing transaction from previous session"
                );
            }
            *tx = PendingTransaction::idle(epoch);
            true
        });
    }

    fn claim(&self, epoch: u64) -> Result<(), SessionError> {
        self.sync_epoch();
        let mut claimed = false;
        self.slot.send_if_modified(|tx| {
            if tx.status == TxStatus::Pending {
                return false;
            }
            *tx = PendingTransaction {
                status: TxStatus::Pending,
                ..PendingTransaction::idle(epoch)
            };
            claimed = true;
            true
        });
        if claimed {
            Ok(())
        } else {
            Err(SessionError::TransactionInFlight)
        }
    }

    /// Modify the slot only if it still holds the attempt `(epoch, hash)`.
    fn update_attempt(
        &self,
        epoch: u64,
        hash: Option<B256>,
        f: impl FnOnce(&mut PendingTransaction),
    ) -> bool {
        self.slot.send_if_modified(|tx| {
            if tx.epoch != epoch || tx.hash != hash {
                return false;
            }
            f(tx);
            true
        })
    }

    fn fail(&self, epoch: u64, hash: Option<B256>, message: &str) {
        self.update_attempt(epoch, hash, |tx| {
            tx.status = TxStatus::Failed;
            tx.error = Some(message.to_string());
        });
        self.store
            .update_in_epoch(epoch, |s| s.error = Some(message.to_string()));
    }

    // ========================================================================
    // Submission
    // ========================================================================

    /// Validate, plan gas and broadcast one `increment()`.
    ///
    /// On success the slot is Pending with the transaction hash recorded.
    pub async fn increment_counter(&self) -> Result<B256, SessionError> {
        let session = self.store.snapshot();
        let from = match session.account {
            Some(account) if session.connected => account,
            _ => {
                self.store.set_error(SessionError::NotConnected.to_string());
                return Err(SessionError::NotConnected);
            }
        };
        let epoch = session.epoch;

        if let Err(e) = self.claim(epoch) {
            tracing::warn!(%from, "increment rejected, transaction already pending");
            self.store.set_error(e.to_string());
            return Err(e);
        }

        let _loading = self.store.begin_operation();
        self.store.clear_error();

        match self.submit(from, epoch).await {
            Ok(hash) => {
                self.update_attempt(epoch, None, |tx| tx.hash = Some(hash));
                Ok(hash)
            }
            Err(SessionError::SessionReloaded) => {
                tracing::info!(%from, epoch, "increment abandoned after session reload");
                self.sync_epoch();
                Err(SessionError::SessionReloaded)
            }
            Err(e) => {
                let failed = classify_failure(e);
                tracing::warn!(
                    %from,
                    kind = ?failed.failure_kind(),
                    error = %failed,
                    "increment failed"
                );
                self.fail(epoch, None, &failed.to_string());
                Err(failed)
            }
        }
    }

    async fn submit(&self, from: Address, epoch: u64) -> Result<B256, SessionError> {
        self.connection.validate_network().await?;

        let estimate = match self.provider.estimate_increment_gas(from).await {
            Ok(gas) => GasEstimate::Estimated(gas),
            Err(SessionError::GasEstimation(reason)) => {
                let fallback = self.config.gas.fallback_gas_limit;
                tracing::warn!(%from, %reason, fallback, "gas estimation failed, using fallback");
                GasEstimate::Fallback(fallback)
            }
            Err(e) => return Err(e),
        };
        let gas_price = self.provider.gas_price().await;
        let plan = GasPlan::new(estimate, gas_price, &self.config.gas);

        if self.store.epoch() != epoch {
            return Err(SessionError::SessionReloaded);
        }

        self.provider
            .send_increment(from, plan.gas_limit, plan.gas_price)
            .await
    }

    // ========================================================================
    // Receipt
    // ========================================================================

    /// Poll for the receipt of `hash` until it is mined.
    ///
    /// No timeout is applied; drop the future to stop waiting. Lookup errors
    /// are treated as "not yet mined".
    pub async fn await_receipt(&self, hash: B256) -> Result<TxReceipt, SessionError> {
        let epoch = {
            let tx = self.slot.borrow();
            if tx.hash == Some(hash) {
                tx.epoch
            } else {
                self.store.epoch()
            }
        };
        let _loading = self.store.begin_operation();
        let interval = self.config.receipt_poll_interval;

        let receipt = loop {
            if self.store.epoch() != epoch {
                tracing::info!(%hash, "receipt wait abandoned after session reload");
                self.sync_epoch();
                return Err(SessionError::SessionReloaded);
            }
            match self.provider.get_receipt(hash).await {
                Ok(Some(receipt)) => break receipt,
                Ok(None) => tracing::trace!(%hash, "receipt not available yet"),
                Err(e) => tracing::debug!(%hash, error = %e, "receipt lookup failed"),
            }
            tokio::time::sleep(interval).await;
        };

        if self.store.epoch() != epoch {
            self.sync_epoch();
            return Err(SessionError::SessionReloaded);
        }

        if receipt.success {
            tracing::info!(
                %hash,
                gas_used = receipt.gas_used,
                block = ?receipt.block_number,
                "increment confirmed"
            );
            self.update_attempt(epoch, Some(hash), |tx| {
                tx.status = TxStatus::Confirmed;
                tx.gas_used = Some(receipt.gas_used);
                tx.error = None;
            });
            refresh_counter(self.provider.as_ref(), &self.store).await;
            Ok(receipt)
        } else {
            tracing::warn!(%hash, gas_used = receipt.gas_used, "increment reverted on chain");
            self.fail(epoch, Some(hash), RECEIPT_FAILED_MESSAGE);
            Err(SessionError::ReceiptFailedOnChain(hash))
        }
    }
}
