//! Broadcast outcome classification: duplicates, lost confirmations,
//! transient failures and semantic rejections

use super::test_helpers::Fixture;
use crate::coordinator::sign_partial;
use crate::errors::{CosignError, RejectReason, SubmissionError};
use crate::ledger::LedgerError;
use crate::submit::broadcast;
use crate::tx_builder::{AnchorMode, PendingTransaction, TransferIntent, TxBuilder, TxState};
use solana_sdk::signature::Signer;

async fn fully_signed(fx: &Fixture, amount: &str) -> PendingTransaction {
    fully_signed_with(fx, amount, AnchorMode::Checkpoint).await
}

async fn fully_signed_with(fx: &Fixture, amount: &str, mode: AnchorMode) -> PendingTransaction {
    let intent = TransferIntent::token(fx.sender.pubkey(), fx.recipient, fx.mint, amount);
    let mut pending = TxBuilder::new(fx.client())
        .build(&intent, &fx.fee_payer.pubkey(), mode)
        .await
        .unwrap();
    sign_partial(&mut pending, &fx.sender).unwrap();
    sign_partial(&mut pending, &fx.fee_payer).unwrap();
    assert_eq!(pending.state(), TxState::FullySigned);
    pending
}

fn transport_error() -> LedgerError {
    LedgerError::Transport {
        endpoint: "memory".to_string(),
        message: "connection reset".to_string(),
    }
}

#[tokio::test]
async fn test_duplicate_broadcast_reports_already_finalized() {
    let fx = Fixture::new(1_000);
    let mut first = fully_signed(&fx, "4").await;
    let mut second = first.clone();

    let outcome = broadcast(fx.ledger.as_ref(), &mut first).await.unwrap();
    assert!(!outcome.already_finalized);

    let again = broadcast(fx.ledger.as_ref(), &mut second).await.unwrap();
    assert!(again.already_finalized);
    assert_eq!(again.signature, outcome.signature);
    assert_eq!(second.state(), TxState::Confirmed);

    // Applied exactly once
    assert_eq!(fx.sender_units(), Some(600));
    assert_eq!(fx.recipient_units(), Some(400));
    assert_eq!(fx.ledger.submission_count(), 2);
}

#[tokio::test]
async fn test_confirmed_transaction_is_not_resent() {
    let fx = Fixture::new(1_000);
    let mut pending = fully_signed(&fx, "1").await;

    broadcast(fx.ledger.as_ref(), &mut pending).await.unwrap();
    let again = broadcast(fx.ledger.as_ref(), &mut pending).await.unwrap();

    assert!(again.already_finalized);
    assert_eq!(fx.ledger.submission_count(), 1);
}

#[tokio::test]
async fn test_lost_confirmation_resolves_from_status() {
    let fx = Fixture::new(1_000);
    let mut pending = fully_signed(&fx, "1").await;
    fx.ledger.drop_next_confirmation(LedgerError::Timeout {
        endpoint: "memory".to_string(),
    });

    let outcome = broadcast(fx.ledger.as_ref(), &mut pending).await.unwrap();
    assert!(outcome.already_finalized);
    assert_eq!(pending.state(), TxState::Confirmed);
    assert_eq!(fx.recipient_units(), Some(100));
}

#[tokio::test]
async fn test_transient_failure_keeps_bytes_broadcastable() {
    let fx = Fixture::new(1_000);
    let mut pending = fully_signed(&fx, "1").await;
    let before = pending.transaction().clone();
    fx.ledger.fail_next_submit(transport_error());

    let err = broadcast(fx.ledger.as_ref(), &mut pending).await.unwrap_err();
    assert!(matches!(
        err,
        CosignError::Submission(SubmissionError::Transient(_))
    ));
    assert!(err.is_retryable());
    assert_eq!(pending.state(), TxState::FullySigned);
    assert_eq!(pending.transaction(), &before);
    assert_eq!(fx.recipient_units(), None);

    let outcome = broadcast(fx.ledger.as_ref(), &mut pending).await.unwrap();
    assert!(!outcome.already_finalized);
    assert_eq!(fx.recipient_units(), Some(100));
}

#[tokio::test]
async fn test_partially_signed_is_never_submitted() {
    let fx = Fixture::new(1_000);
    let intent = TransferIntent::token(fx.sender.pubkey(), fx.recipient, fx.mint, "1");
    let mut pending = TxBuilder::new(fx.client())
        .build(&intent, &fx.fee_payer.pubkey(), AnchorMode::Checkpoint)
        .await
        .unwrap();
    sign_partial(&mut pending, &fx.sender).unwrap();

    match broadcast(fx.ledger.as_ref(), &mut pending).await {
        Err(CosignError::IncompleteSignature { missing }) => {
            assert_eq!(missing, vec![fx.fee_payer.pubkey()])
        }
        other => panic!("expected IncompleteSignature, got {other:?}"),
    }
    assert_eq!(fx.ledger.submission_count(), 0);
}

#[tokio::test]
async fn test_drained_source_is_rejected_and_final() {
    let fx = Fixture::new(1_000);
    let mut pending = fully_signed(&fx, "5").await;

    // Balance disappears between build and submit
    fx.ledger.set_holding(&fx.sender.pubkey(), &fx.mint, 100);

    let err = broadcast(fx.ledger.as_ref(), &mut pending).await.unwrap_err();
    assert!(matches!(
        err,
        CosignError::Submission(SubmissionError::Rejected {
            reason: RejectReason::InsufficientFunds,
            ..
        })
    ));
    assert!(err.requires_rebuild());
    assert_eq!(pending.state(), TxState::Rejected);

    assert!(matches!(
        broadcast(fx.ledger.as_ref(), &mut pending).await,
        Err(CosignError::InvalidState {
            state: TxState::Rejected,
            ..
        })
    ));
    assert_eq!(fx.sender_units(), Some(100));
}

#[tokio::test]
async fn test_non_transient_rpc_error_is_rejection() {
    let fx = Fixture::new(1_000);
    let mut pending = fully_signed(&fx, "1").await;
    fx.ledger.fail_next_submit(LedgerError::RpcResponse {
        endpoint: "memory".to_string(),
        message: "invalid params".to_string(),
        code: Some(-32602),
    });

    let err = broadcast(fx.ledger.as_ref(), &mut pending).await.unwrap_err();
    assert!(matches!(
        err,
        CosignError::Submission(SubmissionError::Rejected {
            reason: RejectReason::Program,
            ..
        })
    ));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_stale_checkpoint_broadcast_is_rejected() {
    let fx = Fixture::new(1_000);
    let mut pending = fully_signed(&fx, "3").await;
    let lamports_before = fx.fee_payer_lamports();

    fx.ledger.expire_checkpoints();

    let err = broadcast(fx.ledger.as_ref(), &mut pending).await.unwrap_err();
    assert!(matches!(err, CosignError::StaleAnchor { .. }), "{err:?}");
    assert!(err.requires_rebuild());
    assert!(!err.is_retryable());
    assert_eq!(pending.state(), TxState::Rejected);

    assert_eq!(fx.sender_units(), Some(1_000));
    assert_eq!(fx.recipient_units(), None);
    assert_eq!(fx.fee_payer_lamports(), lamports_before);
}

#[tokio::test]
async fn test_unconfirmed_checkpoint_is_stale() {
    let fx = Fixture::new(1_000);
    let mut pending = fully_signed(&fx, "1").await;
    fx.ledger.fail_next_submit(LedgerError::Unconfirmed {
        endpoint: "memory".to_string(),
    });

    match broadcast(fx.ledger.as_ref(), &mut pending).await {
        Err(CosignError::StaleAnchor { blockhash }) => {
            assert_eq!(blockhash, pending.message().recent_blockhash)
        }
        other => panic!("expected StaleAnchor, got {other:?}"),
    }
    assert_eq!(pending.state(), TxState::Rejected);
    assert_eq!(fx.recipient_units(), None);
}

#[tokio::test]
async fn test_unconfirmed_nonce_transfer_stays_broadcastable() {
    let fx = Fixture::new(1_000);
    let handle = fx.ledger.add_nonce(&fx.sender.pubkey());
    let mut pending = fully_signed_with(&fx, "1", AnchorMode::Nonce(handle)).await;
    fx.ledger.fail_next_submit(LedgerError::Unconfirmed {
        endpoint: "memory".to_string(),
    });

    let err = broadcast(fx.ledger.as_ref(), &mut pending).await.unwrap_err();
    assert!(matches!(
        err,
        CosignError::Submission(SubmissionError::Transient(_))
    ));
    assert_eq!(pending.state(), TxState::FullySigned);

    broadcast(fx.ledger.as_ref(), &mut pending).await.unwrap();
    assert_eq!(fx.recipient_units(), Some(100));
}
