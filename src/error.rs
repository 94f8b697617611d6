//! Error taxonomy and failure classification.
//!
//! `SessionError` is the single error type returned by every entry point.
//! Failures of the increment write path are additionally classified into a
//! `FailureKind` by matching the underlying cause text. The matching rules
//! all live in [`classify_message`], so they can be replaced by structured
//! error codes once the wallet transport provides them.

use alloy::primitives::{Address, B256};

// ============================================================================
// Wallet Errors
// ============================================================================

/// Error returned by a wallet transport request (EIP-1193 style).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} (code {code})")]
pub struct WalletError {
    pub code: i64,
    pub message: String,
}

impl WalletError {
    /// The user rejected the request
    pub const USER_REJECTED: i64 = 4001;
    /// The requested method or account is not authorized
    pub const UNAUTHORIZED: i64 = 4100;
    /// The wallet does not know the requested chain
    pub const UNRECOGNIZED_CHAIN: i64 = 4902;
    /// Generic internal error
    pub const INTERNAL: i64 = -32603;

    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn user_rejected(message: impl Into<String>) -> Self {
        Self::new(Self::USER_REJECTED, message)
    }

    pub fn unrecognized_chain(chain_id: &str) -> Self {
        Self::new(
            Self::UNRECOGNIZED_CHAIN,
            format!("Unrecognized chain ID \"{chain_id}\""),
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Self::INTERNAL, message)
    }

    pub fn is_user_rejected(&self) -> bool {
        self.code == Self::USER_REJECTED
    }

    pub fn is_unrecognized_chain(&self) -> bool {
        self.code == Self::UNRECOGNIZED_CHAIN
    }
}

// ============================================================================
// Session Errors
// ============================================================================

/// Every failure the session core can report.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Wallet extension is not installed. Please install MetaMask to continue.")]
    WalletNotFound,

    #[error("No accounts found")]
    NoAccountsReturned,

    #[error("Wrong network. Please switch to {expected}.")]
    WrongNetwork { expected: String, actual: String },

    #[error("Network switch was rejected by user")]
    SwitchRejected,

    #[error("Failed to switch to {network}: {reason}")]
    SwitchFailed { network: String, reason: String },

    #[error("Contract not initialized")]
    ContractNotInitialized,

    #[error("No contract found at {0}. Please check the contract deployment.")]
    ContractNotFound(Address),

    #[error("Failed to read counter value from contract: {0}")]
    ContractReadError(String),

    #[error("Contract call failed: {0}")]
    SimulationFailed(String),

    #[error("Gas estimation failed: {0}")]
    GasEstimation(String),

    #[error("{0}")]
    Submission(String),

    #[error("Transaction {0} failed on blockchain")]
    ReceiptFailedOnChain(B256),

    #[error("Failed to initialize Web3 provider: {0}")]
    Initialization(String),

    #[error("Please connect your wallet first")]
    NotConnected,

    #[error("An increment transaction is already pending")]
    TransactionInFlight,

    #[error("A pending transaction cannot be reset")]
    ResetWhilePending,

    #[error("Session was reloaded after a chain change")]
    SessionReloaded,

    #[error("Wallet connection was superseded by a newer wallet update")]
    ConnectSuperseded,

    #[error("{message}")]
    IncrementFailed { kind: FailureKind, message: String },

    #[error("RPC request failed: {0}")]
    Transport(String),

    #[error(transparent)]
    Wallet(#[from] WalletError),
}

impl SessionError {
    /// The classified kind if this is an increment failure.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            SessionError::IncrementFailed { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

// ============================================================================
// Failure Classification
// ============================================================================

/// Best-effort classification of a failed increment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Balance cannot cover gas * price + value
    InsufficientFunds,
    /// User declined the signing prompt
    UserRejected,
    /// Gas estimation, gas limit or gas price problem
    Gas,
    /// Transport or node problem
    Network,
    /// Wallet is on a different chain than configured
    WrongNetwork,
    /// Dry run reverted
    Simulation,
    /// Anything else, underlying message kept
    Other,
}

impl FailureKind {
    /// Message shown to the user for this kind, if it replaces the cause.
    pub fn user_message(&self) -> Option<&'static str> {
        match self {
            FailureKind::InsufficientFunds => Some(
                "Insufficient funds to pay for transaction fees. Please add more funds to your wallet.",
            ),
            FailureKind::UserRejected => Some("Transaction was rejected by user"),
            FailureKind::Gas => Some("Transaction failed due to gas issues. Please try again."),
            FailureKind::Network => {
                Some("Network error occurred. Please check your connection and try again.")
            }
            FailureKind::WrongNetwork | FailureKind::Simulation | FailureKind::Other => None,
        }
    }
}

/// Classify a cause string by pattern matching.
///
/// Wallets and nodes word the same failure differently, so each kind checks
/// several patterns. Order matters: a message mentioning both funds and gas
/// ("insufficient funds for gas * price + value") is a funds problem.
pub fn classify_message(cause: &str) -> FailureKind {
    let cause = cause.to_lowercase();

    if cause.contains("insufficient funds")
        || cause.contains("insufficient balance")
        || cause.contains("exceeds balance")
    {
        return FailureKind::InsufficientFunds;
    }

    if cause.contains("user denied")
        || cause.contains("user rejected")
        || cause.contains("rejected by user")
    {
        return FailureKind::UserRejected;
    }

    if cause.contains("gas") {
        return FailureKind::Gas;
    }

    if cause.contains("internal json-rpc error")
        || cause.contains("network")
        || cause.contains("connection")
        || cause.contains("timeout")
        || cause.contains("timed out")
    {
        return FailureKind::Network;
    }

    FailureKind::Other
}

/// Turn any write-path failure into a classified `IncrementFailed`.
///
/// Structural information is used first (wrong network, wallet rejection
/// code); only then does the cause text decide.
pub fn classify_failure(error: SessionError) -> SessionError {
    let kind = match &error {
        SessionError::IncrementFailed { .. } => return error,
        SessionError::WrongNetwork { .. } => FailureKind::WrongNetwork,
        SessionError::Wallet(e) if e.is_user_rejected() => FailureKind::UserRejected,
        SessionError::SimulationFailed(reason) => match classify_message(reason) {
            FailureKind::Other => FailureKind::Simulation,
            kind => kind,
        },
        other => classify_message(&other.to_string()),
    };

    let message = kind
        .user_message()
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string());

    SessionError::IncrementFailed { kind, message }
}
