//! Client configuration.

use std::time::Duration;

use alloy::primitives::Address;

use crate::ext::{ChainConfig, GasConfig, WalletKind};

/// Interval of the account reconciliation poll.
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(2);

/// Interval between receipt lookups while a transaction is pending.
pub const DEFAULT_RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Configuration for a [`DappClient`](crate::ext::DappClient) and its components.
///
/// ```
/// use std::time::Duration;
/// use dapp_session::ext::{ClientConfig, GasConfig};
///
/// let config = ClientConfig::default()
///     .with_reconcile_interval(Duration::from_millis(500))
///     .with_gas(GasConfig::default().with_fallback_gas_limit(120_000));
/// assert_eq!(config.chain.chain_id, 80002);
/// assert!(config.contract_address.is_none());
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Expected network (default: Polygon Amoy)
    pub chain: ChainConfig,
    /// Deployed counter contract, `None` until configured
    pub contract_address: Option<Address>,
    /// Wallet brand the dapp asks for; any other brand counts as absent
    pub expected_wallet: WalletKind,
    /// Account reconciliation poll interval (default: 2 seconds)
    pub reconcile_interval: Duration,
    /// Receipt poll interval (default: 1 second)
    pub receipt_poll_interval: Duration,
    /// Gas policy for the increment transaction
    pub gas: GasConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            chain: ChainConfig::default(),
            contract_address: None,
            expected_wallet: WalletKind::MetaMask,
            reconcile_interval: DEFAULT_RECONCILE_INTERVAL,
            receipt_poll_interval: DEFAULT_RECEIPT_POLL_INTERVAL,
            gas: GasConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(chain: ChainConfig) -> Self {
        Self {
            chain,
            ..Default::default()
        }
    }

    pub fn with_chain(mut self, chain: ChainConfig) -> Self {
        self.chain = chain;
        self
    }

    pub fn with_contract_address(mut self, address: Address) -> Self {
        self.contract_address = Some(address);
        self
    }

    pub fn with_expected_wallet(mut self, kind: WalletKind) -> Self {
        self.expected_wallet = kind;
        self
    }

    pub fn with_reconcile_interval(mut self, interval: Duration) -> Self {
        self.reconcile_interval = interval;
        self
    }

    pub fn with_receipt_poll_interval(mut self, interval: Duration) -> Self {
        self.receipt_poll_interval = interval;
        self
    }

    pub fn with_gas(mut self, gas: GasConfig) -> Self {
        self.gas = gas;
        self
    }
}
