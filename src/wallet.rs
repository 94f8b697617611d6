//! Wallet transport abstraction.
//!
//! A wallet is anything that holds the user's accounts and signs on their
//! behalf: a browser extension reached through EIP-1193, or a local key for
//! scripts and tests. The session core only talks to it through
//! [`WalletTransport`]; events are delivered into an `mpsc` channel handed over
//! at subscription time.
//!
//! ## Architecture
//!
//! ```text
//! WalletTransport (trait)
//! ├── LocalWallet: private key + HTTP RPC, fixed chain
//! └── (host adapters): EIP-1193 bridges implemented outside this crate
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use alloy::{
    network::EthereumWallet,
    primitives::Address,
    providers::{DynProvider, Provider, ProviderBuilder},
    signers::local::PrivateKeySigner,
};
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::ext::{format_chain_id, parse_chain_id, AddChainParams, WalletError};

// ============================================================================
// Wallet Types
// ============================================================================

/// Brand of the injected wallet.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WalletKind {
    MetaMask,
    /// Key held by this process
    Local,
    Other(String),
}

/// Notification pushed by the wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    /// Authorized account list changed; empty means the user disconnected
    AccountsChanged(Vec<Address>),
    /// Wallet moved to another chain (wire-format chain id)
    ChainChanged(String),
}

/// Handle returned by [`WalletTransport::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

// ============================================================================
// WalletTransport
// ============================================================================

/// Request/response and event surface of a wallet.
#[async_trait]
pub trait WalletTransport: Send + Sync {
    fn kind(&self) -> WalletKind;

    /// RPC provider routed through the wallet, able to sign for its accounts.
    ///
    /// `None` for wallets that only expose account and chain management.
    fn provider(&self) -> Option<DynProvider>;

    /// Ask the user to authorize accounts (`eth_requestAccounts`). May prompt.
    async fn request_accounts(&self) -> Result<Vec<Address>, WalletError>;

    /// Currently authorized accounts (`eth_accounts`). Never prompts.
    async fn accounts(&self) -> Result<Vec<Address>, WalletError>;

    /// Current chain in wire format (`eth_chainId`).
    async fn chain_id(&self) -> Result<String, WalletError>;

    /// `wallet_switchEthereumChain`
    async fn switch_chain(&self, chain_id: &str) -> Result<(), WalletError>;

    /// `wallet_addEthereumChain`
    async fn add_chain(&self, params: &AddChainParams) -> Result<(), WalletError>;

    /// Register an event sink. Every call returns a distinct id.
    fn subscribe(&self, sink: mpsc::UnboundedSender<WalletEvent>) -> ListenerId;

    /// Remove a sink. Returns false if the id was unknown.
    fn unsubscribe(&self, id: ListenerId) -> bool;
}

/// Sink registry shared by wallet implementations.
#[derive(Debug, Default)]
pub struct ListenerSet {
    next_id: AtomicU64,
    sinks: DashMap<ListenerId, mpsc::UnboundedSender<WalletEvent>>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, sink: mpsc::UnboundedSender<WalletEvent>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.sinks.insert(id, sink);
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        self.sinks.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Deliver an event to every sink, dropping sinks whose receiver is gone.
    pub fn emit(&self, event: WalletEvent) {
        self.sinks.retain(|id, sink| {
            let delivered = sink.send(event.clone()).is_ok();
            if !delivered {
                tracing::debug!(listener = id.0, "dropping closed wallet listener");
            }
            delivered
        });
    }
}

// ============================================================================
// LocalWallet
// ============================================================================

/// Wallet backed by a local private key and a single HTTP endpoint.
///
/// The chain is fixed at connect time: switching to it succeeds, switching
/// anywhere else reports an unrecognized chain.
pub struct LocalWallet {
    signer: PrivateKeySigner,
    provider: DynProvider,
    chain_id: u64,
    authorized: AtomicBool,
    listeners: ListenerSet,
}

impl LocalWallet {
    /// Connect to `rpc_url` and sign with `signer`. Starts unauthorized.
    pub async fn connect(rpc_url: &str, signer: PrivateKeySigner) -> anyhow::Result<Self> {
        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::new(signer.clone()))
            .connect_http(rpc_url.parse()?);
        let chain_id = provider.get_chain_id().await?;

        tracing::debug!(address = %signer.address(), chain_id, "local wallet connected");

        Ok(Self {
            signer,
            provider: provider.erased(),
            chain_id,
            authorized: AtomicBool::new(false),
            listeners: ListenerSet::new(),
        })
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn is_authorized(&self) -> bool {
        self.authorized.load(Ordering::Acquire)
    }

    /// Withdraw authorization, as a user disconnecting from the extension would.
    pub fn revoke(&self) {
        if self.authorized.swap(false, Ordering::AcqRel) {
            self.listeners.emit(WalletEvent::AccountsChanged(Vec::new()));
        }
    }

    fn authorized_accounts(&self) -> Vec<Address> {
        if self.is_authorized() {
            vec![self.address()]
        } else {
            Vec::new()
        }
    }
}

#[async_trait]
impl WalletTransport for LocalWallet {
    fn kind(&self) -> WalletKind {
        WalletKind::Local
    }

    fn provider(&self) -> Option<DynProvider> {
        Some(self.provider.clone())
    }

    async fn request_accounts(&self) -> Result<Vec<Address>, WalletError> {
        if !self.authorized.swap(true, Ordering::AcqRel) {
            self.listeners
                .emit(WalletEvent::AccountsChanged(vec![self.address()]));
        }
        Ok(self.authorized_accounts())
    }

    async fn accounts(&self) -> Result<Vec<Address>, WalletError> {
        Ok(self.authorized_accounts())
    }

    async fn chain_id(&self) -> Result<String, WalletError> {
        Ok(format_chain_id(self.chain_id))
    }

    async fn switch_chain(&self, chain_id: &str) -> Result<(), WalletError> {
        if parse_chain_id(chain_id) == Some(self.chain_id) {
            Ok(())
        } else {
            Err(WalletError::unrecognized_chain(chain_id))
        }
    }

    async fn add_chain(&self, params: &AddChainParams) -> Result<(), WalletError> {
        if parse_chain_id(&params.chain_id) == Some(self.chain_id) {
            return Ok(());
        }
        Err(WalletError::internal(format!(
            "local wallet is bound to chain {}",
            format_chain_id(self.chain_id)
        )))
    }

    fn subscribe(&self, sink: mpsc::UnboundedSender<WalletEvent>) -> ListenerId {
        self.listeners.insert(sink)
    }

    fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }
}
