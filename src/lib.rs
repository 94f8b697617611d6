//! # dapp-session
//!
//! Wallet, network and transaction lifecycle management for a counter dapp,
//! built on Alloy.
//!
//! ## Core Features
//!
//! - **Session Store**: single observable session snapshot (account, network, counter, error, loading)
//! - **Connection Management**: connect/disconnect, network validation and switching (with add-chain fallback)
//! - **Reconciliation**: wallet events and a periodic account poll written through one transition function
//! - **Transaction Lifecycle**: Idle → Pending → Confirmed/Failed with gas fallbacks and receipt polling
//! - **Failure Classification**: one place that maps wallet/node failures to user-facing messages
//!
//! ## Usage
//!
//! ```ignore
//! use dapp_session::ext::*;
//!
//! let client = DappClient::new(ClientConfig::default().with_contract_address(counter), Some(wallet));
//! client.initialize().await?;
//! client.connect().await?;
//! client.increment_counter().await?;
//! ```

// ============================================================================
// Internal Module Declarations
// ============================================================================

/// Target network description and chain id encoding
mod chain;

/// DappClient facade exposed to presentation layers
mod client;

/// Client configuration with builder-style setters
mod config;

/// Wallet connection, network switching and reconciliation
mod connection;

/// Counter contract binding
mod counter;

/// Session error taxonomy and failure classification
mod error;

/// Gas planning with estimation and price fallbacks
mod gas;

/// Provider and contract binding behind the CounterProvider trait
mod provider;

/// Observable session state
mod session;

/// Increment transaction state machine
mod transaction;

/// Wallet transport trait and local signer wallet
mod wallet;


// ============================================================================
// Public Exports
// ============================================================================

/// Re-export all public APIs from the alloy crate.
pub use alloy::*;

/// Extension module containing the session API:
///
/// - `DappClient` - Entry points and session snapshot
/// - `ConnectionManager` - Connection lifecycle and reconciliation
/// - `TransactionController` - Increment state machine
/// - `ProviderClient` - Provider and contract binding
/// - `WalletTransport` - Wallet seam, with `LocalWallet`
/// - `SessionError` - Error taxonomy
pub mod ext {
    pub use super::chain::*;
    pub use super::client::*;
    pub use super::config::*;
    pub use super::connection::*;
    pub use super::counter::*;
    pub use super::error::*;
    pub use super::gas::*;
    pub use super::provider::*;
    pub use super::session::{ConnectionState, NetworkStatus, Session, SessionStore};
    pub use super::transaction::*;
    pub use super::wallet::*;
}
