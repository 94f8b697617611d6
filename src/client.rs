//! Entry point for presentation layers.
//!
//! `DappClient` is an explicitly constructed context object: nothing happens
//! at construction, [`DappClient::initialize`] binds the provider and starts
//! reconciliation, [`DappClient::teardown`] stops it. Presentation code reads
//! the session snapshot (or subscribes to it) and calls the entry points.
//!
//! ## Usage
//!
//! ```ignore
//! use dapp_session::ext::*;
//!
//! let wallet = Arc::new(LocalWallet::connect(rpc_url, signer).await?);
//! let config = ClientConfig::default()
//!     .with_contract_address(counter)
//!     .with_expected_wallet(WalletKind::Local);
//!
//! let client = DappClient::new(config, Some(wallet));
//! client.initialize().await?;
//! client.connect().await?;
//! let tx = client.increment_counter().await?;
//! println!("confirmed, gas used {:?}", tx.gas_used);
//! ```

use std::sync::Arc;

use alloy::primitives::{Address, B256, U256};
use tokio::sync::watch;

use crate::{
    ext::{
        ClientConfig, ConnectionManager, CounterProvider, NetworkStatus, PendingTransaction,
        ProviderClient, Session, SessionError, SessionStore, TransactionController, TxReceipt,
        WalletTransport,
    },
    session::refresh_counter,
};

pub struct DappClient {
    config: ClientConfig,
    provider: Arc<dyn CounterProvider>,
    connection: Arc<ConnectionManager>,
    transactions: TransactionController,
    store: SessionStore,
}

impl DappClient {
    /// Client over a [`ProviderClient`] for `wallet`, read-only when `None`.
    pub fn new(config: ClientConfig, wallet: Option<Arc<dyn WalletTransport>>) -> Self {
        let provider = Arc::new(ProviderClient::new(&config, wallet));
        Self::with_provider(config, provider)
    }

    /// Client over any [`CounterProvider`] implementation.
    pub fn with_provider(config: ClientConfig, provider: Arc<dyn CounterProvider>) -> Self {
        let store = SessionStore::new();
        let connection = Arc::new(ConnectionManager::new(
            Arc::clone(&provider),
            store.clone(),
            config.clone(),
        ));
        let transactions = TransactionController::new(
            Arc::clone(&provider),
            Arc::clone(&connection),
            config.clone(),
        );
        Self {
            config,
            provider,
            connection,
            transactions,
            store,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub fn transactions(&self) -> &TransactionController {
        &self.transactions
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Bootstrap the session and start background reconciliation.
    pub async fn initialize(&self) -> Result<(), SessionError> {
        self.connection.bootstrap().await?;
        self.connection.start_reconciliation();
        Ok(())
    }

    /// Stop reconciliation, drop wallet listeners and unbind the provider.
    pub async fn teardown(&self) {
        self.connection.shutdown();
        self.provider.teardown().await;
        tracing::debug!("client torn down");
    }

    // ========================================================================
    // Session
    // ========================================================================

    pub fn session(&self) -> Session {
        self.store.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.store.subscribe()
    }

    pub fn transaction(&self) -> PendingTransaction {
        self.transactions.transaction()
    }

    pub fn subscribe_transaction(&self) -> watch::Receiver<PendingTransaction> {
        self.transactions.subscribe()
    }

    // ========================================================================
    // Entry points
    // ========================================================================

    pub async fn connect(&self) -> Result<Address, SessionError> {
        self.connection.connect().await
    }

    pub fn disconnect(&self) {
        self.connection.disconnect();
    }

    pub async fn switch_network(&self) -> Result<(), SessionError> {
        self.connection.switch_network().await
    }

    pub async fn network_status(&self) -> Option<NetworkStatus> {
        self.connection.network_status().await
    }

    /// Re-read the counter. Failures are logged; the last known value is
    /// returned either way.
    pub async fn refresh_counter(&self) -> U256 {
        refresh_counter(self.provider.as_ref(), &self.store).await;
        self.store.snapshot().counter_value
    }

    /// Submit an increment and wait for its receipt.
    pub async fn increment_counter(&self) -> Result<PendingTransaction, SessionError> {
        let hash = self.transactions.increment_counter().await?;
        self.transactions.await_receipt(hash).await?;
        Ok(self.transactions.transaction())
    }

    pub fn reset_transaction(&self) -> Result<(), SessionError> {
        self.transactions.reset()
    }

    // ========================================================================
    // Passive reads
    // ========================================================================

    /// Balance of `address` (default: the connected account) in display
    /// units. `"0"` when unknown.
    pub async fn get_balance(&self, address: Option<Address>) -> String {
        let Some(address) = address.or(self.store.snapshot().account) else {
            return "0".to_string();
        };
        match self.provider.get_balance(address).await {
            Ok(balance) => balance,
            Err(e) => {
                tracing::warn!(%address, error = %e, "failed to get balance");
                "0".to_string()
            }
        }
    }

    pub async fn get_transaction_receipt(&self, hash: B256) -> Option<TxReceipt> {
        match self.provider.get_receipt(hash).await {
            Ok(receipt) => receipt,
            Err(e) => {
                tracing::warn!(%hash, error = %e, "failed to get transaction receipt");
                None
            }
        }
    }

    // ========================================================================
    // Links
    // ========================================================================

    pub fn transaction_url(&self, hash: B256) -> String {
        self.config.chain.transaction_url(hash)
    }

    pub fn address_url(&self, address: Address) -> String {
        self.config.chain.address_url(address)
    }
}

impl Drop for DappClient {
    fn drop(&mut self) {
        self.connection.shutdown();
    }
}

// ============================================================================
// Display helpers
// ============================================================================

/// Shorten an address for display: `0x1234...abcd`.
pub fn format_address(address: Address) -> String {
    let full = address.to_string();
    format!("{}...{}", &full[..6], &full[full.len() - 4..])
}

/// Shorten a transaction hash for display: `0x12345678...12345678`.
pub fn format_tx_hash(hash: B256) -> String {
    let full = hash.to_string();
    format!("{}...{}", &full[..10], &full[full.len() - 8..])
}
