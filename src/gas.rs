//! Gas planning for the increment transaction.
//!
//! Gas estimation and gas price lookups are allowed to fail: each has a fixed
//! fallback so the write path only aborts on failures that would also abort
//! the transaction itself (simulation revert, submission error).

/// Gas limit used when estimation fails.
pub const DEFAULT_FALLBACK_GAS_LIMIT: u64 = 100_000;

/// Gas price used when the network price cannot be fetched (20 gwei).
pub const DEFAULT_FALLBACK_GAS_PRICE: u128 = 20_000_000_000;

/// Gas limit multiplier applied to the estimate, in percent.
pub const DEFAULT_GAS_LIMIT_MULTIPLIER: u64 = 150;

/// Gas policy for write transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GasConfig {
    /// Gas used in place of a failed estimate (default: 100 000)
    pub fallback_gas_limit: u64,
    /// Gas price used in place of a failed lookup (default: 20 gwei)
    pub fallback_gas_price: u128,
    /// Percentage applied to the estimate to get the gas limit (default: 150)
    pub gas_limit_multiplier: u64,
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            fallback_gas_limit: DEFAULT_FALLBACK_GAS_LIMIT,
            fallback_gas_price: DEFAULT_FALLBACK_GAS_PRICE,
            gas_limit_multiplier: DEFAULT_GAS_LIMIT_MULTIPLIER,
        }
    }
}

impl GasConfig {
    pub fn with_fallback_gas_limit(mut self, gas: u64) -> Self {
        self.fallback_gas_limit = gas;
        self
    }

    pub fn with_fallback_gas_price(mut self, price: u128) -> Self {
        self.fallback_gas_price = price;
        self
    }

    pub fn with_gas_limit_multiplier(mut self, percent: u64) -> Self {
        self.gas_limit_multiplier = percent;
        self
    }
}

/// Where the gas quantity for a transaction came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasEstimate {
    /// Returned by the node
    Estimated(u64),
    /// Estimation failed, fixed fallback substituted
    Fallback(u64),
}

impl GasEstimate {
    pub fn units(&self) -> u64 {
        match self {
            GasEstimate::Estimated(gas) | GasEstimate::Fallback(gas) => *gas,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, GasEstimate::Fallback(_))
    }
}

/// Fully resolved gas parameters for one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasPlan {
    pub estimate: GasEstimate,
    pub gas_limit: u64,
    pub gas_price: u128,
}

impl GasPlan {
    pub fn new(estimate: GasEstimate, gas_price: u128, config: &GasConfig) -> Self {
        let gas_limit = buffered_gas_limit(estimate.units(), config.gas_limit_multiplier);

        tracing::debug!(
            estimated = estimate.units(),
            fallback = estimate.is_fallback(),
            gas_limit,
            gas_price,
            multiplier = config.gas_limit_multiplier,
            "planned gas"
        );

        Self {
            estimate,
            gas_limit,
            gas_price,
        }
    }
}

/// Apply a percentage buffer to a gas quantity, rounding down.
///
/// ```
/// use dapp_session::ext::buffered_gas_limit;
///
/// assert_eq!(buffered_gas_limit(50_000, 150), 75_000);
/// assert_eq!(buffered_gas_limit(33_333, 150), 49_999);
/// ```
pub fn buffered_gas_limit(gas: u64, multiplier_percent: u64) -> u64 {
    let scaled = gas as u128 * multiplier_percent as u128 / 100;
    scaled.min(u64::MAX as u128) as u64
}
