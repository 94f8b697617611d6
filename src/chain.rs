//! Static description of the target network.
//!
//! `ChainConfig` carries everything the session needs to know about the chain
//! it is supposed to talk to: the chain id (integer, with the `0x`-prefixed
//! wire form derived from it), RPC endpoints, block explorers and the native
//! currency. It has no behavior beyond encoding helpers and explorer links.

use alloy::primitives::{Address, B256};
use serde::{Deserialize, Serialize};

// ============================================================================
// Chain id encoding
// ============================================================================

/// Encode a chain id in the wire format wallets use (`0x`-prefixed lowercase hex).
pub fn format_chain_id(chain_id: u64) -> String {
    format!("{chain_id:#x}")
}

/// Parse a wire-format chain id. Accepts upper or lower case hex digits.
pub fn parse_chain_id(wire: &str) -> Option<u64> {
    let digits = wire
        .strip_prefix("0x")
        .or_else(|| wire.strip_prefix("0X"))?;
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

// ============================================================================
// ChainConfig
// ============================================================================

/// Native currency descriptor, as understood by `wallet_addEthereumChain`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

/// Immutable description of the expected network.
///
/// The integer chain id is the single source of truth; the wire form is always
/// derived from it so both encodings can never disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainConfig {
    pub chain_id: u64,
    pub chain_name: String,
    /// RPC endpoints, the first one is primary
    pub rpc_urls: Vec<String>,
    /// Block explorer base URLs, the first one is primary
    pub block_explorer_urls: Vec<String>,
    pub native_currency: NativeCurrency,
}

impl ChainConfig {
    /// Polygon Amoy testnet (chain 80002).
    pub fn polygon_amoy() -> Self {
        Self {
            chain_id: 80002,
            chain_name: "Polygon Amoy Testnet".to_string(),
            rpc_urls: vec!["https://rpc-amoy.polygon.technology".to_string()],
            block_explorer_urls: vec!["https://amoy.polygonscan.com/".to_string()],
            native_currency: NativeCurrency {
                name: "MATIC".to_string(),
                symbol: "MATIC".to_string(),
                decimals: 18,
            },
        }
    }

    /// Wire form of the chain id, e.g. `0x13882`.
    pub fn chain_id_hex(&self) -> String {
        format_chain_id(self.chain_id)
    }

    /// True if a wallet-reported wire chain id designates this chain.
    pub fn matches(&self, wire_chain_id: &str) -> bool {
        parse_chain_id(wire_chain_id) == Some(self.chain_id)
    }

    pub fn primary_rpc_url(&self) -> Option<&str> {
        self.rpc_urls.first().map(String::as_str)
    }

    pub fn primary_explorer_url(&self) -> Option<&str> {
        self.block_explorer_urls.first().map(String::as_str)
    }

    /// Explorer link for a transaction, empty if no explorer is configured.
    pub fn transaction_url(&self, hash: B256) -> String {
        self.explorer_link("tx", &hash.to_string())
    }

    /// Explorer link for an address, empty if no explorer is configured.
    pub fn address_url(&self, address: Address) -> String {
        self.explorer_link("address", &address.to_string())
    }

    fn explorer_link(&self, kind: &str, id: &str) -> String {
        match self.primary_explorer_url() {
            Some(base) => format!("{}/{kind}/{id}", base.trim_end_matches('/')),
            None => String::new(),
        }
    }

    /// Descriptor passed to `wallet_addEthereumChain`.
    pub fn add_chain_params(&self) -> AddChainParams {
        AddChainParams {
            chain_id: self.chain_id_hex(),
            chain_name: self.chain_name.clone(),
            rpc_urls: self.rpc_urls.clone(),
            block_explorer_urls: self.block_explorer_urls.clone(),
            native_currency: self.native_currency.clone(),
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self::polygon_amoy()
    }
}

/// Wire descriptor for `wallet_addEthereumChain` (EIP-3085).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddChainParams {
    pub chain_id: String,
    pub chain_name: String,
    pub rpc_urls: Vec<String>,
    pub block_explorer_urls: Vec<String>,
    pub native_currency: NativeCurrency,
}
