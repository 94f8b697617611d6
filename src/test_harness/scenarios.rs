//! Session state machine scenarios over the in-memory wallet and provider.

use std::{sync::Arc, time::Duration};

use alloy::primitives::{address, Address, U256};

use super::mock::{MockProvider, MockWallet, ReceiptScript};
use crate::ext::{
    AccountTransition, ClientConfig, ConnectionState, DappClient, FailureKind, ObservationSource,
    SessionError, TxStatus, WalletError, WalletEvent, WalletKind, RECEIPT_FAILED_MESSAGE,
};

const AMOY: &str = "0x13882";
const MAINNET: &str = "0x1";
const ALICE: Address = address!("0xAAAA000000000000000000000000000000001111");
const BOB: Address = address!("0xBBBB000000000000000000000000000000002222");
const COUNTER: Address = address!("0xC0C0000000000000000000000000000000000001");

struct Fixture {
    wallet: Arc<MockWallet>,
    provider: Arc<MockProvider>,
    client: DappClient,
}

fn fixture_with(wallet: Option<MockWallet>) -> Fixture {
    let wallet = wallet.map(Arc::new);
    let provider = Arc::new(MockProvider::new(wallet.clone()));
    let config = ClientConfig::default()
        .with_contract_address(COUNTER)
        .with_receipt_poll_interval(Duration::from_millis(5));
    let client = DappClient::with_provider(config, provider.clone());
    Fixture {
        wallet: wallet.unwrap_or_else(|| Arc::new(MockWallet::new(AMOY))),
        provider,
        client,
    }
}

/// Bootstrapped client whose wallet approves `ALICE` on `chain`.
async fn fixture(chain: &str) -> Fixture {
    let f = fixture_with(Some(MockWallet::new(chain).with_accounts(vec![ALICE])));
    f.client.connection().bootstrap().await.unwrap();
    f
}

// ============================================================================
// Connection
// ============================================================================

#[test_log::test(tokio::test)]
async fn test_connect_then_disconnect() {
    let f = fixture(AMOY).await;
    assert!(f.client.session().initialized);

    for _ in 0..3 {
        let account = f.client.connect().await.unwrap();
        assert_eq!(account, ALICE);

        let session = f.client.session();
        assert!(session.connected);
        assert_eq!(session.account, Some(ALICE));
        assert!(session.is_correct_network());
        assert_eq!(session.connection_state(), ConnectionState::CorrectNetwork);
        assert!(!session.loading);
        assert_eq!(f.wallet.listener_count(), 1);

        f.client.disconnect();

        let session = f.client.session();
        assert!(!session.connected);
        assert_eq!(session.account, None);
        assert!(session.network.is_none());
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
        assert_eq!(f.wallet.listener_count(), 0);
    }
}

#[tokio::test]
async fn test_listener_registration_is_idempotent() {
    let f = fixture(AMOY).await;
    f.client.connect().await.unwrap();
    f.client.connect().await.unwrap();
    assert_eq!(f.wallet.listener_count(), 1);
    assert!(f.client.connection().has_listener());
}

#[tokio::test]
async fn test_connect_without_wallet() {
    let f = fixture_with(None);
    f.client.connection().bootstrap().await.unwrap();

    let err = f.client.connect().await.unwrap_err();
    assert_eq!(err, SessionError::WalletNotFound);

    let session = f.client.session();
    assert!(!session.connected);
    assert!(!session.connecting);
    assert_eq!(session.error, Some(err.to_string()));
}

#[tokio::test]
async fn test_connect_with_unexpected_wallet_kind() {
    let wallet = MockWallet::new(AMOY)
        .with_accounts(vec![ALICE])
        .with_kind(WalletKind::Other("Coinbase".into()));
    let f = fixture_with(Some(wallet));

    assert_eq!(f.client.connect().await, Err(SessionError::WalletNotFound));
}

#[tokio::test]
async fn test_connect_with_no_accounts() {
    let f = fixture_with(Some(MockWallet::new(AMOY)));
    f.client.connection().bootstrap().await.unwrap();

    assert_eq!(f.client.connect().await, Err(SessionError::NoAccountsReturned));
    assert!(!f.client.session().connected);
}

#[tokio::test]
async fn test_connect_rejected_by_user() {
    let f = fixture(AMOY).await;
    f.wallet
        .fail_request_with(WalletError::user_rejected("User rejected the request."));

    let err = f.client.connect().await.unwrap_err();
    assert!(matches!(&err, SessionError::Wallet(e) if e.is_user_rejected()));
    assert!(f.client.session().error.is_some());
    assert_eq!(f.wallet.listener_count(), 0);
}

#[tokio::test]
async fn test_bootstrap_picks_up_authorized_account() {
    let wallet = MockWallet::new(AMOY).with_accounts(vec![ALICE]);
    wallet.set_authorized(vec![BOB]);
    let f = fixture_with(Some(wallet));
    f.provider.set_counter(7);

    f.client.connection().bootstrap().await.unwrap();

    let session = f.client.session();
    assert!(session.initialized);
    assert_eq!(session.account, Some(BOB));
    assert!(session.is_correct_network());
    assert_eq!(session.counter_value, U256::from(7));
    assert_eq!(f.wallet.listener_count(), 1);
}

// ============================================================================
// Network
// ============================================================================

#[tokio::test]
async fn test_network_mismatch_detection() {
    let matching = fixture(AMOY).await;
    matching.client.connect().await.unwrap();
    assert!(matching.client.session().is_correct_network());
    assert!(matching.client.connection().validate_network().await.is_ok());

    let mismatched = fixture(MAINNET).await;
    mismatched.client.connect().await.unwrap();
    let session = mismatched.client.session();
    assert!(session.connected);
    assert!(!session.is_correct_network());
    assert_eq!(session.connection_state(), ConnectionState::WrongNetwork);

    let status = mismatched.client.network_status().await.unwrap();
    assert_eq!(status.chain_id, MAINNET);
    assert_eq!(status.expected_network, "Polygon Amoy Testnet");

    assert_eq!(
        mismatched.client.connection().validate_network().await,
        Err(SessionError::WrongNetwork {
            expected: "Polygon Amoy Testnet".into(),
            actual: MAINNET.into(),
        })
    );
}

#[tokio::test]
async fn test_network_comparison_is_numeric() {
    let f = fixture("0x013882").await;
    f.client.connect().await.unwrap();
    assert!(f.client.session().is_correct_network());
}

#[test_log::test(tokio::test)]
async fn test_switch_adds_unrecognized_chain() {
    let f = fixture(MAINNET).await;
    f.wallet
        .fail_switch_with(WalletError::unrecognized_chain(AMOY));

    f.client.switch_network().await.unwrap();

    assert_eq!(f.wallet.switch_requests(), vec![AMOY.to_string()]);
    let added = f.wallet.added_chains();
    assert_eq!(added.len(), 1);
    assert_eq!(added[0].chain_id, AMOY);
    assert_eq!(added[0].chain_name, "Polygon Amoy Testnet");
    assert_eq!(f.wallet.current_chain(), AMOY);
    assert!(f.client.network_status().await.unwrap().is_correct_network);
    assert!(f.client.session().error.is_none());
}

#[tokio::test]
async fn test_switch_rejected() {
    let f = fixture(MAINNET).await;
    f.wallet
        .fail_switch_with(WalletError::user_rejected("User rejected the request."));

    assert_eq!(f.client.switch_network().await, Err(SessionError::SwitchRejected));
    assert_eq!(
        f.client.session().error.as_deref(),
        Some("Network switch was rejected by user")
    );
    assert!(f.wallet.added_chains().is_empty());
}

#[tokio::test]
async fn test_add_chain_rejected() {
    let f = fixture(MAINNET).await;
    f.wallet
        .fail_switch_with(WalletError::unrecognized_chain(AMOY));
    f.wallet
        .fail_add_with(WalletError::user_rejected("User rejected the request."));

    assert_eq!(f.client.switch_network().await, Err(SessionError::SwitchRejected));
    assert_eq!(f.wallet.added_chains().len(), 1);
}

#[tokio::test]
async fn test_switch_failed() {
    let f = fixture(MAINNET).await;
    f.wallet
        .fail_switch_with(WalletError::internal("Request already pending"));

    let err = f.client.switch_network().await.unwrap_err();
    assert_eq!(
        err,
        SessionError::SwitchFailed {
            network: "Polygon Amoy Testnet".into(),
            reason: "Request already pending".into(),
        }
    );
}

// ============================================================================
// Reconciliation
// ============================================================================

#[test_log::test(tokio::test)]
async fn test_external_accounts_changed_empty_disconnects() {
    let f = fixture(AMOY).await;
    f.client.connect().await.unwrap();
    assert_eq!(f.wallet.listener_count(), 1);

    f.wallet.revoke_all();
    assert_eq!(f.client.connection().drain_wallet_events().await, 1);

    let session = f.client.session();
    assert!(!session.connected);
    assert_eq!(session.account, None);
    assert_eq!(f.wallet.listener_count(), 0);
}

#[tokio::test]
async fn test_external_account_switch() {
    let f = fixture(AMOY).await;
    f.client.connect().await.unwrap();

    f.wallet.set_authorized(vec![BOB]);
    f.wallet.emit(WalletEvent::AccountsChanged(vec![BOB]));
    f.client.connection().drain_wallet_events().await;

    let session = f.client.session();
    assert_eq!(session.account, Some(BOB));
    // network re-validated for the new account
    assert!(session.is_correct_network());
}

#[tokio::test]
async fn test_poll_corrects_drift() {
    let f = fixture(AMOY).await;
    let connection = f.client.connection();

    // authorized without any event reaching us
    f.wallet.set_authorized(vec![ALICE]);
    assert_eq!(connection.reconcile().await, AccountTransition::Connected(ALICE));
    let session = f.client.session();
    assert!(session.connected);
    assert!(session.is_correct_network());

    assert_eq!(connection.reconcile().await, AccountTransition::Unchanged);

    f.wallet.set_authorized(vec![]);
    assert_eq!(connection.reconcile().await, AccountTransition::Disconnected);
    assert!(!f.client.session().connected);
}

#[tokio::test]
async fn test_stale_poll_is_discarded() {
    let f = fixture(AMOY).await;
    f.client.connect().await.unwrap();
    let connection = f.client.connection();

    // poll issued before the wallet reported the disconnect
    let poll = connection.observe();
    connection
        .handle_wallet_event(WalletEvent::AccountsChanged(vec![]))
        .await;
    assert!(!f.client.session().connected);

    let transition = connection.apply_observed_accounts(poll, &[ALICE], ObservationSource::Poll);
    assert_eq!(transition, AccountTransition::Stale);
    assert!(!f.client.session().connected);
    assert_eq!(f.client.session().account, None);
}

#[tokio::test]
async fn test_poll_does_not_resurrect_after_user_disconnect() {
    let f = fixture(AMOY).await;
    let connection = f.client.connection();
    f.client.connect().await.unwrap();

    f.client.disconnect();
    // the wallet still has the dapp authorized
    assert_eq!(connection.reconcile().await, AccountTransition::Suppressed);
    assert!(!f.client.session().connected);

    f.client.connect().await.unwrap();
    assert_eq!(connection.reconcile().await, AccountTransition::Unchanged);
    assert!(f.client.session().connected);
}

#[test_log::test(tokio::test)]
async fn test_connect_yields_to_newer_disconnect_event() {
    let f = fixture(AMOY).await;
    f.client.connect().await.unwrap();

    f.wallet.hold_chain_id();
    let interleave = async {
        f.wallet.chain_id_requested().await;
        // the user disconnects in the wallet while connect() reads the network
        f.wallet.revoke_all();
        assert_eq!(f.client.connection().drain_wallet_events().await, 1);
        assert!(!f.client.session().connected);
        f.wallet.release_chain_id();
    };
    let (result, ()) = tokio::join!(f.client.connect(), interleave);

    assert_eq!(result, Err(SessionError::ConnectSuperseded));
    let session = f.client.session();
    assert!(!session.connected);
    assert_eq!(session.account, None);
    assert!(!session.connecting);
    assert!(session.error.is_none());
    assert_eq!(f.wallet.listener_count(), 0);
}

#[tokio::test]
async fn test_disconnect_during_connect_wins() {
    let f = fixture(AMOY).await;
    let connection = f.client.connection();
    f.client.connect().await.unwrap();

    f.wallet.hold_chain_id();
    let interleave = async {
        f.wallet.chain_id_requested().await;
        f.client.disconnect();
        f.wallet.release_chain_id();
    };
    let (result, ()) = tokio::join!(f.client.connect(), interleave);

    assert_eq!(result, Err(SessionError::ConnectSuperseded));
    assert!(!f.client.session().connected);
    assert_eq!(f.wallet.listener_count(), 0);

    // still authorized in the wallet, but the last user action was disconnect
    assert_eq!(connection.reconcile().await, AccountTransition::Suppressed);
    assert!(!f.client.session().connected);

    f.client.connect().await.unwrap();
    assert!(f.client.session().connected);
}

#[tokio::test]
async fn test_connect_accepts_newer_matching_event() {
    let f = fixture(AMOY).await;
    f.client.connect().await.unwrap();

    f.wallet.hold_chain_id();
    let interleave = async {
        f.wallet.chain_id_requested().await;
        f.wallet.emit(WalletEvent::AccountsChanged(vec![ALICE]));
        f.client.connection().drain_wallet_events().await;
        f.wallet.release_chain_id();
    };
    let (result, ()) = tokio::join!(f.client.connect(), interleave);

    assert_eq!(result, Ok(ALICE));
    let session = f.client.session();
    assert_eq!(session.account, Some(ALICE));
    assert!(session.is_correct_network());
}

#[test_log::test(tokio::test)]
async fn test_chain_change_reloads_session() {
    let f = fixture(AMOY).await;
    f.provider.set_counter(3);
    f.client.connect().await.unwrap();
    assert_eq!(f.client.session().epoch, 0);

    f.wallet.set_chain(MAINNET);
    assert_eq!(f.client.connection().drain_wallet_events().await, 1);

    let session = f.client.session();
    assert_eq!(session.epoch, 1);
    assert!(session.initialized);
    assert_eq!(f.provider.teardown_count(), 1);
    assert_eq!(f.provider.init_count(), 2);
    // bootstrap picks the still-authorized account back up on the new chain
    assert_eq!(session.account, Some(ALICE));
    assert!(!session.is_correct_network());
    assert_eq!(session.counter_value, U256::from(3));
    assert_eq!(f.wallet.listener_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_background_reconciliation() {
    let f = fixture_with(Some(MockWallet::new(AMOY).with_accounts(vec![ALICE])));
    f.client.initialize().await.unwrap();
    assert!(!f.client.session().connected);

    f.wallet.set_authorized(vec![ALICE]);
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(f.client.session().account, Some(ALICE));
    assert_eq!(f.wallet.listener_count(), 1);

    f.wallet.revoke_all();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!f.client.session().connected);

    f.client.teardown().await;
    assert_eq!(f.wallet.listener_count(), 0);
}

// ============================================================================
// Transactions
// ============================================================================

#[tokio::test]
async fn test_increment_requires_connection() {
    let f = fixture(AMOY).await;

    let err = f.client.increment_counter().await.unwrap_err();
    assert_eq!(err, SessionError::NotConnected);
    assert!(f.provider.sends().is_empty());
    assert_eq!(
        f.client.session().error.as_deref(),
        Some("Please connect your wallet first")
    );
    assert_eq!(f.client.transaction().status, TxStatus::Idle);
}

#[test_log::test(tokio::test)]
async fn test_successful_increment() {
    let f = fixture(AMOY).await;
    f.provider.set_counter(41);
    f.provider.set_estimate(Ok(50_000));
    f.provider.set_receipt(ReceiptScript::Success { gas_used: 52_000 });
    f.provider.set_receipt_delay(2);

    f.client.connect().await.unwrap();
    let before = f.client.refresh_counter().await;
    assert_eq!(before, U256::from(41));

    let tx = f.client.increment_counter().await.unwrap();
    assert_eq!(tx.status, TxStatus::Confirmed);
    assert_eq!(tx.gas_used, Some(52_000));
    assert!(tx.error.is_none());

    let sends = f.provider.sends();
    assert_eq!(sends.len(), 1);
    assert_eq!(sends[0].from, ALICE);
    assert_eq!(sends[0].gas_limit, 75_000);
    assert_eq!(tx.hash, Some(sends[0].hash));

    let after = f.client.refresh_counter().await;
    assert!(after >= before);
    assert_eq!(f.client.session().counter_value, U256::from(42));
    assert!(!f.client.session().loading);
}

#[tokio::test]
async fn test_receipt_failure() {
    let f = fixture(AMOY).await;
    f.provider.set_receipt(ReceiptScript::Failure { gas_used: 30_000 });
    f.client.connect().await.unwrap();
    let reads = f.provider.reads();

    let err = f.client.increment_counter().await.unwrap_err();
    let hash = f.provider.sends()[0].hash;
    assert_eq!(err, SessionError::ReceiptFailedOnChain(hash));

    let tx = f.client.transaction();
    assert_eq!(tx.status, TxStatus::Failed);
    assert_eq!(tx.error.as_deref(), Some(RECEIPT_FAILED_MESSAGE));
    assert_eq!(tx.gas_used, None);
    assert_eq!(f.client.session().error.as_deref(), Some(RECEIPT_FAILED_MESSAGE));
    // no automatic counter refresh
    assert_eq!(f.provider.reads(), reads);
}

#[tokio::test]
async fn test_wrong_network_increment_fails_before_broadcast() {
    let f = fixture(MAINNET).await;
    f.client.connect().await.unwrap();
    assert!(!f.client.session().is_correct_network());

    let err = f.client.increment_counter().await.unwrap_err();
    assert_eq!(err.failure_kind(), Some(FailureKind::WrongNetwork));
    assert!(err.to_string().starts_with("Wrong network"));
    assert!(f.provider.sends().is_empty());
    assert_eq!(f.client.transaction().status, TxStatus::Failed);
    assert_eq!(f.client.session().error, Some(err.to_string()));
}

#[tokio::test]
async fn test_gas_estimation_fallback() {
    let f = fixture(AMOY).await;
    f.provider.set_estimate(Err("header not found"));
    f.client.connect().await.unwrap();

    f.client.increment_counter().await.unwrap();
    assert_eq!(f.provider.sends()[0].gas_limit, 150_000);
}

#[tokio::test]
async fn test_simulation_failure_is_fatal() {
    let f = fixture(AMOY).await;
    f.provider.fail_simulation("execution reverted");
    f.client.connect().await.unwrap();

    let err = f.client.increment_counter().await.unwrap_err();
    assert_eq!(err.failure_kind(), Some(FailureKind::Simulation));
    assert!(f.provider.sends().is_empty());
}

#[tokio::test]
async fn test_submission_failures_are_classified() {
    let cases = [
        (
            "insufficient funds for gas * price + value",
            FailureKind::InsufficientFunds,
            "Insufficient funds to pay for transaction fees. Please add more funds to your wallet.",
        ),
        (
            "MetaMask Tx Signature: User denied transaction signature.",
            FailureKind::UserRejected,
            "Transaction was rejected by user",
        ),
        (
            "replacement transaction underpriced: gas price too low",
            FailureKind::Gas,
            "Transaction failed due to gas issues. Please try again.",
        ),
        (
            "Internal JSON-RPC error.",
            FailureKind::Network,
            "Network error occurred. Please check your connection and try again.",
        ),
    ];

    for (cause, kind, message) in cases {
        let f = fixture(AMOY).await;
        f.provider.fail_send(cause);
        f.client.connect().await.unwrap();

        let err = f.client.transactions().increment_counter().await.unwrap_err();
        assert_eq!(err.failure_kind(), Some(kind), "cause: {cause}");
        assert_eq!(err.to_string(), message);
        assert_eq!(f.client.session().error.as_deref(), Some(message));
        assert_eq!(f.client.transaction().status, TxStatus::Failed);
    }
}

#[tokio::test]
async fn test_concurrent_increment_rejected() {
    let f = fixture(AMOY).await;
    f.provider.set_receipt(ReceiptScript::Never);
    f.client.connect().await.unwrap();
    let transactions = f.client.transactions();

    let hash = transactions.increment_counter().await.unwrap();
    let pending = transactions.transaction();
    assert_eq!(pending.status, TxStatus::Pending);
    assert_eq!(pending.hash, Some(hash));

    assert_eq!(
        transactions.increment_counter().await,
        Err(SessionError::TransactionInFlight)
    );
    assert_eq!(transactions.reset(), Err(SessionError::ResetWhilePending));
    assert_eq!(f.provider.sends().len(), 1);
    assert_eq!(transactions.transaction().hash, Some(hash));
}

#[tokio::test]
async fn test_reset_after_completion() {
    let f = fixture(AMOY).await;
    f.client.connect().await.unwrap();

    f.client.increment_counter().await.unwrap();
    assert_eq!(f.client.transaction().status, TxStatus::Confirmed);

    f.client.reset_transaction().unwrap();
    let tx = f.client.transaction();
    assert_eq!(tx.status, TxStatus::Idle);
    assert_eq!(tx.hash, None);

    // a new attempt can start
    f.client.increment_counter().await.unwrap();
    assert_eq!(f.provider.sends().len(), 2);
}

#[tokio::test]
async fn test_reload_abandons_pending_transaction() {
    let f = fixture(AMOY).await;
    f.provider.set_receipt(ReceiptScript::Never);
    f.client.connect().await.unwrap();

    let hash = f.client.transactions().increment_counter().await.unwrap();
    f.client.connection().reload().await.unwrap();

    assert_eq!(
        f.client.transactions().await_receipt(hash).await,
        Err(SessionError::SessionReloaded)
    );
    assert_eq!(f.client.transaction().status, TxStatus::Idle);
}

// ============================================================================
// Passive reads
// ============================================================================

#[tokio::test]
async fn test_passive_read_failures_are_swallowed() {
    let f = fixture(AMOY).await;
    f.provider.set_counter(5);
    assert_eq!(f.client.refresh_counter().await, U256::from(5));

    f.provider.fail_reads(true);
    assert_eq!(f.client.refresh_counter().await, U256::from(5));
    assert!(f.client.session().error.is_none());

    f.client.connect().await.unwrap();
    assert_eq!(f.client.get_balance(None).await, "1.5");
    assert_eq!(
        f.client
            .get_transaction_receipt(alloy::primitives::B256::ZERO)
            .await,
        None
    );
}
