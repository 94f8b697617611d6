//! Typed chain access for the counter dapp.
//!
//! `ProviderClient` owns the live provider and the counter contract binding.
//! It translates wallet and RPC primitives into typed operations and contains
//! no business policy: no retries, no state, no classification.
//!
//! ## Architecture
//!
//! ```text
//! ProviderClient
//! ├── Wallet:   provider routed through the wallet transport (can sign)
//! └── ReadOnly: primary RPC url from ChainConfig (writes refused)
//! ```
//!
//! The rest of the crate only sees the [`CounterProvider`] trait, so the
//! connection and transaction state machines can be driven by an in-memory
//! implementation in tests.

use std::sync::Arc;

use alloy::{
    primitives::{utils::format_units, Address, B256, U256},
    providers::{DynProvider, Provider, ProviderBuilder},
};
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    counter::Counter,
    ext::{ChainConfig, ClientConfig, SessionError, WalletKind, WalletTransport},
};

/// Counter binding over an erased provider.
pub type CounterContract = Counter::CounterInstance<DynProvider>;

// ============================================================================
// CounterProvider
// ============================================================================

/// Outcome of a mined transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxReceipt {
    pub transaction_hash: B256,
    pub success: bool,
    pub gas_used: u64,
    pub block_number: Option<u64>,
}

/// Raw operations the session core performs against the chain.
#[async_trait]
pub trait CounterProvider: Send + Sync {
    /// Bind to the wallet transport or the read-only RPC. Idempotent.
    async fn initialize(&self) -> Result<(), SessionError>;

    /// Drop the binding. A later `initialize` binds again.
    async fn teardown(&self);

    /// Wallet transport, if one is present in the environment.
    fn wallet(&self) -> Option<Arc<dyn WalletTransport>>;

    /// True iff a wallet is present and identifies as the expected kind.
    fn is_wallet_available(&self) -> bool;

    async fn read_counter(&self) -> Result<U256, SessionError>;

    /// Dry-run `increment()` from `from`, then estimate its gas.
    ///
    /// Fails with `SimulationFailed` if the dry run reverts and with
    /// `GasEstimation` if only the estimate fails.
    async fn estimate_increment_gas(&self, from: Address) -> Result<u64, SessionError>;

    /// Current gas price, or the configured fallback when the lookup fails.
    async fn gas_price(&self) -> u128;

    /// Broadcast `increment()` and return the transaction hash.
    async fn send_increment(
        &self,
        from: Address,
        gas_limit: u64,
        gas_price: u128,
    ) -> Result<B256, SessionError>;

    /// Single receipt lookup, `None` while the transaction is not mined.
    async fn get_receipt(&self, hash: B256) -> Result<Option<TxReceipt>, SessionError>;

    /// Balance of `address` in the native currency's display unit.
    async fn get_balance(&self, address: Address) -> Result<String, SessionError>;
}

// ============================================================================
// ProviderClient
// ============================================================================

/// How the provider was bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderMode {
    /// Through the wallet transport
    Wallet,
    /// Through the primary RPC url, no signer
    ReadOnly,
}

#[derive(Clone)]
struct Binding {
    mode: ProviderMode,
    provider: DynProvider,
    counter: Option<CounterContract>,
}

/// Live provider and contract binding.
///
/// Constructed unbound; nothing touches the network until [`initialize`].
///
/// [`initialize`]: CounterProvider::initialize
pub struct ProviderClient {
    chain: ChainConfig,
    contract_address: Option<Address>,
    expected_wallet: WalletKind,
    fallback_gas_price: u128,
    wallet: Option<Arc<dyn WalletTransport>>,
    binding: RwLock<Option<Binding>>,
}

impl ProviderClient {
    pub fn new(config: &ClientConfig, wallet: Option<Arc<dyn WalletTransport>>) -> Self {
        Self {
            chain: config.chain.clone(),
            contract_address: config.contract_address,
            expected_wallet: config.expected_wallet.clone(),
            fallback_gas_price: config.gas.fallback_gas_price,
            wallet,
            binding: RwLock::new(None),
        }
    }

    /// Binding mode, `None` before initialization.
    pub async fn mode(&self) -> Option<ProviderMode> {
        self.binding.read().await.as_ref().map(|b| b.mode)
    }

    /// Erased provider, `None` before initialization.
    pub async fn provider(&self) -> Option<DynProvider> {
        self.binding.read().await.as_ref().map(|b| b.provider.clone())
    }

    async fn bound(&self) -> Result<Binding, SessionError> {
        self.binding
            .read()
            .await
            .clone()
            .ok_or(SessionError::ContractNotInitialized)
    }

    async fn bound_counter(&self) -> Result<(Binding, CounterContract), SessionError> {
        let binding = self.bound().await?;
        let counter = binding
            .counter
            .clone()
            .ok_or(SessionError::ContractNotInitialized)?;
        Ok((binding, counter))
    }

    fn connect_read_only(&self) -> Result<DynProvider, SessionError> {
        let url = self.chain.primary_rpc_url().ok_or_else(|| {
            SessionError::Initialization(format!(
                "no RPC url configured for {}",
                self.chain.chain_name
            ))
        })?;
        let url: reqwest::Url = url
            .parse()
            .map_err(|e| SessionError::Initialization(format!("invalid RPC url {url}: {e}")))?;
        Ok(ProviderBuilder::new().connect_http(url).erased())
    }

    /// Whether bytecode is deployed at `address`. `None` if the lookup failed.
    async fn has_code(provider: &DynProvider, address: Address) -> Option<bool> {
        match provider.get_code_at(address).await {
            Ok(code) => Some(!code.is_empty()),
            Err(e) => {
                tracing::warn!(%address, error = %e, "failed to verify contract code");
                None
            }
        }
    }
}

#[async_trait]
impl CounterProvider for ProviderClient {
    async fn initialize(&self) -> Result<(), SessionError> {
        let mut slot = self.binding.write().await;
        if slot.is_some() {
            return Ok(());
        }

        let wallet_provider = match &self.wallet {
            Some(wallet) if self.is_wallet_available() => wallet.provider(),
            _ => None,
        };
        let (mode, provider) = match wallet_provider {
            Some(provider) => (ProviderMode::Wallet, provider),
            None => (ProviderMode::ReadOnly, self.connect_read_only()?),
        };

        let counter = match self.contract_address {
            Some(address) => {
                if Self::has_code(&provider, address).await == Some(false) {
                    tracing::warn!(%address, "no contract code at configured address");
                }
                Some(Counter::new(address, provider.clone()))
            }
            None => {
                tracing::warn!("no counter contract address configured");
                None
            }
        };

        tracing::info!(?mode, chain = %self.chain.chain_name, "provider initialized");

        *slot = Some(Binding {
            mode,
            provider,
            counter,
        });
        Ok(())
    }

    async fn teardown(&self) {
        if self.binding.write().await.take().is_some() {
            tracing::debug!("provider torn down");
        }
    }

    fn wallet(&self) -> Option<Arc<dyn WalletTransport>> {
        self.wallet.clone()
    }

    fn is_wallet_available(&self) -> bool {
        self.wallet
            .as_ref()
            .is_some_and(|w| w.kind() == self.expected_wallet)
    }

    async fn read_counter(&self) -> Result<U256, SessionError> {
        let (binding, counter) = self.bound_counter().await?;

        match counter.getCount().call().await {
            Ok(value) => Ok(value),
            Err(e) => {
                let address = *counter.address();
                if Self::has_code(&binding.provider, address).await == Some(false) {
                    return Err(SessionError::ContractNotFound(address));
                }
                Err(SessionError::ContractReadError(e.to_string()))
            }
        }
    }

    async fn estimate_increment_gas(&self, from: Address) -> Result<u64, SessionError> {
        let (_, counter) = self.bound_counter().await?;
        let call = counter.increment().from(from);

        call.call()
            .await
            .map_err(|e| SessionError::SimulationFailed(e.to_string()))?;

        let gas = call
            .estimate_gas()
            .await
            .map_err(|e| SessionError::GasEstimation(e.to_string()))?;

        tracing::debug!(%from, gas, "estimated increment gas");
        Ok(gas)
    }

    async fn gas_price(&self) -> u128 {
        let provider = match self.bound().await {
            Ok(binding) => binding.provider,
            Err(_) => return self.fallback_gas_price,
        };
        match provider.get_gas_price().await {
            Ok(price) => price,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    fallback = self.fallback_gas_price,
                    "gas price lookup failed, using fallback"
                );
                self.fallback_gas_price
            }
        }
    }

    async fn send_increment(
        &self,
        from: Address,
        gas_limit: u64,
        gas_price: u128,
    ) -> Result<B256, SessionError> {
        let (binding, counter) = self.bound_counter().await?;
        if binding.mode == ProviderMode::ReadOnly {
            return Err(SessionError::Submission(
                "cannot send transaction without a wallet signer".to_string(),
            ));
        }

        let pending = counter
            .increment()
            .from(from)
            .gas(gas_limit)
            .gas_price(gas_price)
            .send()
            .await
            .map_err(|e| SessionError::Submission(e.to_string()))?;

        let hash = *pending.tx_hash();
        tracing::info!(%from, %hash, gas_limit, gas_price, "increment submitted");
        Ok(hash)
    }

    async fn get_receipt(&self, hash: B256) -> Result<Option<TxReceipt>, SessionError> {
        let binding = self.bound().await?;
        let receipt = binding
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;

        Ok(receipt.map(|r| TxReceipt {
            transaction_hash: r.transaction_hash,
            success: r.status(),
            gas_used: r.gas_used,
            block_number: r.block_number,
        }))
    }

    async fn get_balance(&self, address: Address) -> Result<String, SessionError> {
        let binding = self.bound().await?;
        let balance = binding
            .provider
            .get_balance(address)
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;

        format_units(balance, self.chain.native_currency.decimals)
            .map_err(|e| SessionError::Transport(e.to_string()))
    }
}
