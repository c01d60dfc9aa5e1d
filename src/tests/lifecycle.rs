//! Relay lifecycle scenarios against the fake ledger

use super::fixtures::TestRelay;
use crate::chain::Ledger;
use crate::error::RelayerError;
use crate::events::{parse_logs, RelayEvent};
use crate::relay::{RelayServer, UpdateOutcome};
use crate::tests::fixtures;

use ethers::types::U256;
use tokio_test::{assert_err, assert_ok};

/// Run update passes the way the scheduler does, until one leaves the head in place
async fn drain(server: &RelayServer) -> Vec<UpdateOutcome> {
    let mut outcomes = Vec::new();
    loop {
        let outcome = server.update_outcome().await.unwrap();
        let settled = matches!(
            outcome,
            UpdateOutcome::Confirmed { .. } | UpdateOutcome::Superseded { .. }
        );
        outcomes.push(outcome);
        if !settled {
            return outcomes;
        }
    }
}

#[tokio::test]
async fn test_relayed_transaction_emits_logs_in_order() {
    let relay = TestRelay::ready().await;
    let tx = relay
        .server
        .create_relay_transaction(relay.request(0).await)
        .await
        .unwrap();

    let receipt = relay.ledger.receipt_now(tx.hash).unwrap();
    let events = parse_logs(&receipt.logs).unwrap();
    let names: Vec<_> = events.iter().map(RelayEvent::name).collect();
    assert_eq!(
        names,
        vec![
            "recipient_pre_call",
            "recipient_emitted",
            "recipient_post_call",
            "transaction_relayed"
        ]
    );

    match &events[1] {
        RelayEvent::RecipientEmitted { message, real_sender, .. } => {
            assert_eq!(message, "hello world");
            assert_eq!(*real_sender, fixtures::gasless_address());
        }
        other => panic!("unexpected event {:?}", other),
    }
    match &events[3] {
        RelayEvent::TransactionRelayed(relayed) => {
            assert_eq!(relayed.from, fixtures::gasless_address());
            assert_eq!(relayed.to, fixtures::recipient());
            assert_eq!(relayed.selector, [0x2a, 0xc0, 0xdf, 0x26]);
            assert!(relayed.status.is_ok());
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_rolled_back_transaction_is_resent_after_interval() {
    let relay = TestRelay::ready().await;
    let request = relay.request(1).await;

    let snapshot = relay.ledger.snapshot();
    let original = relay.server.create_relay_transaction(request).await.unwrap();
    relay.ledger.revert(snapshot);
    assert!(relay.ledger.receipt_now(original.hash).is_none());

    // Within the resend interval nothing happens
    relay.clock.advance_secs(299);
    assert!(relay
        .server
        .update_unconfirmed_transactions()
        .await
        .unwrap()
        .is_none());
    let head = relay.server.first_pending().await.unwrap().unwrap();
    assert_eq!(head.hash, original.hash);

    relay.clock.advance_secs(1);
    let resent = relay
        .server
        .update_unconfirmed_transactions()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(resent.nonce, original.nonce);
    assert_eq!(resent.gas_price, U256::from(2400));
    assert_eq!(resent.data, original.data);
    assert!(relay.ledger.receipt_now(resent.hash).is_some());

    // Exactly one resend: the replacement is mined and not yet stale
    assert!(relay
        .server
        .update_unconfirmed_transactions()
        .await
        .unwrap()
        .is_none());

    relay.ledger.mine_blocks(12);
    assert_eq!(
        relay.server.update_outcome().await.unwrap(),
        UpdateOutcome::Confirmed {
            nonce: original.nonce,
            hash: resent.hash
        }
    );
    assert!(relay.server.first_pending().await.unwrap().is_none());
}

#[tokio::test]
async fn test_confirmation_requires_depth() {
    let relay = TestRelay::ready().await;
    let tx = relay
        .server
        .create_relay_transaction(relay.request(0).await)
        .await
        .unwrap();

    relay.ledger.mine_blocks(11);
    assert_eq!(
        relay.server.update_outcome().await.unwrap(),
        UpdateOutcome::Waiting { nonce: tx.nonce }
    );

    relay.ledger.mine_blocks(1);
    assert!(relay
        .server
        .update_unconfirmed_transactions()
        .await
        .unwrap()
        .is_none());
    assert!(relay.server.first_pending().await.unwrap().is_none());
}

#[tokio::test]
async fn test_update_is_idempotent_without_ledger_change() {
    let relay = TestRelay::ready().await;
    relay
        .server
        .create_relay_transaction(relay.request(0).await)
        .await
        .unwrap();
    let before = relay.server.pending().await.unwrap();

    for _ in 0..3 {
        assert!(relay
            .server
            .update_unconfirmed_transactions()
            .await
            .unwrap()
            .is_none());
    }
    assert_eq!(relay.server.pending().await.unwrap(), before);
    assert_eq!(relay.ledger.sent().len(), 1);
}

#[tokio::test]
async fn test_draining_confirms_oldest_first() {
    let relay = TestRelay::ready().await;
    let mut hashes = Vec::new();
    for recipient_nonce in 0..3 {
        let tx = relay
            .server
            .create_relay_transaction(relay.request(recipient_nonce).await)
            .await
            .unwrap();
        hashes.push(tx.hash);
    }
    relay.ledger.mine_blocks(12);

    let mut confirmed = Vec::new();
    loop {
        match relay.server.update_outcome().await.unwrap() {
            UpdateOutcome::Confirmed { hash, .. } => confirmed.push(hash),
            UpdateOutcome::Idle => break,
            other => panic!("unexpected outcome {:?}", other),
        }
    }
    assert_eq!(confirmed, hashes);
}

#[tokio::test]
async fn test_dev_mode_recovers_from_rollback() {
    let relay = TestRelay::ready().await;
    let base = relay.ledger.account_nonce_now();

    let snapshot = relay.ledger.snapshot();
    let rolled_back = relay
        .server
        .create_relay_transaction(relay.request(0).await)
        .await
        .unwrap();
    relay.ledger.revert(snapshot);

    // The cache still points past the rolled back nonce
    let err = assert_err!(
        relay
            .server
            .create_relay_transaction(relay.request(1).await)
            .await
    );
    assert!(matches!(err, RelayerError::Submission { nonce, .. } if nonce == base + 1));

    relay.server.set_dev_mode(true).await;
    let recovered = relay
        .server
        .create_relay_transaction(relay.request(1).await)
        .await
        .unwrap();
    assert_eq!(recovered.nonce, base);

    let pending = relay.server.pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].hash, recovered.hash);
    assert_ne!(pending[0].hash, rolled_back.hash);
}

#[tokio::test]
async fn test_receipt_failure_leaves_entry_for_next_tick() {
    let relay = TestRelay::ready().await;
    let tx = relay
        .server
        .create_relay_transaction(relay.request(0).await)
        .await
        .unwrap();
    relay.ledger.mine_blocks(12);

    relay.ledger.fail_receipts(true);
    let err = assert_err!(relay.server.update_outcome().await);
    assert!(matches!(err, RelayerError::ConfirmationQuery { .. }));
    assert!(err.is_retryable());
    assert_eq!(
        relay.server.first_pending().await.unwrap().map(|p| p.hash),
        Some(tx.hash)
    );

    relay.ledger.fail_receipts(false);
    assert!(matches!(
        relay.server.update_outcome().await.unwrap(),
        UpdateOutcome::Confirmed { .. }
    ));
}

#[tokio::test]
async fn test_unmined_transaction_is_replaced_in_mempool() {
    let relay = TestRelay::ready().await;
    relay.ledger.set_auto_mine(false);

    let original = relay
        .server
        .create_relay_transaction(relay.request(0).await)
        .await
        .unwrap();
    relay.clock.advance_secs(300);

    let resent = relay
        .server
        .update_unconfirmed_transactions()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(resent.nonce, original.nonce);

    // Mines the replacement, then 12 blocks on top
    relay.ledger.mine_blocks(13);
    assert!(relay.ledger.receipt_now(original.hash).is_none());
    assert_eq!(
        relay.server.update_outcome().await.unwrap(),
        UpdateOutcome::Confirmed {
            nonce: original.nonce,
            hash: resent.hash
        }
    );
}

#[tokio::test]
async fn test_clear_pending_reseeds_nonce() {
    let relay = TestRelay::ready().await;
    let snapshot = relay.ledger.snapshot();
    relay
        .server
        .create_relay_transaction(relay.request(0).await)
        .await
        .unwrap();
    relay.ledger.revert(snapshot);

    assert_ok!(relay.server.clear_pending().await);
    assert!(relay.server.first_pending().await.unwrap().is_none());

    let tx = relay
        .server
        .create_relay_transaction(relay.request(0).await)
        .await
        .unwrap();
    assert_eq!(tx.nonce, relay.ledger.account_nonce_now() - 1);
}

#[tokio::test]
async fn test_multiple_transactions_after_partial_rollback() {
    let relay = TestRelay::ready().await;
    let base = relay.ledger.account_nonce_now();

    let tx1 = relay
        .server
        .create_relay_transaction(relay.request(0).await)
        .await
        .unwrap();
    let snapshot = relay.ledger.snapshot();
    let tx2 = relay
        .server
        .create_relay_transaction(relay.request(1).await)
        .await
        .unwrap();
    let tx3 = relay
        .server
        .create_relay_transaction(relay.request(2).await)
        .await
        .unwrap();
    assert_eq!((tx2.nonce, tx3.nonce), (base + 1, base + 2));

    // tx1 stays mined but shallow, tx2 and tx3 disappear
    relay.ledger.revert(snapshot);
    assert!(relay.ledger.receipt_now(tx1.hash).is_some());
    assert!(relay.ledger.receipt_now(tx2.hash).is_none());

    // Nothing is resent while the head is mined but shallow
    relay.clock.advance_secs(300);
    assert_eq!(
        drain(&relay.server).await,
        vec![UpdateOutcome::Waiting { nonce: base }]
    );
    assert_eq!(relay.ledger.sent().len(), 3);

    // Once tx1 is final it is confirmed and tx2 goes out again
    relay.ledger.mine_blocks(12);
    let outcomes = drain(&relay.server).await;
    assert_eq!(outcomes.len(), 2);
    assert_eq!(
        outcomes[0],
        UpdateOutcome::Confirmed {
            nonce: base,
            hash: tx1.hash
        }
    );
    let resent = match &outcomes[1] {
        UpdateOutcome::Resent(tx) => tx.clone(),
        other => panic!("unexpected outcome {:?}", other),
    };
    assert_eq!(resent.nonce, tx2.nonce);
    assert_eq!(resent.gas_price, U256::from(2400));

    // The original tx3 is broadcast again by someone else and must not be resent
    assert_eq!(
        relay.ledger.send_raw_transaction(&tx3).await.unwrap(),
        tx3.hash
    );
    relay.ledger.mine_blocks(12);
    assert_eq!(
        drain(&relay.server).await,
        vec![
            UpdateOutcome::Confirmed {
                nonce: tx2.nonce,
                hash: resent.hash
            },
            UpdateOutcome::Confirmed {
                nonce: tx3.nonce,
                hash: tx3.hash
            },
            UpdateOutcome::Idle,
        ]
    );

    assert_eq!(relay.ledger.sent().len(), 5);
    assert!(relay.server.pending().await.unwrap().is_empty());
}
