//! End-to-end sender / fee payer handshake against the in-memory ledger

use super::test_helpers::{Fixture, MINT_DECIMALS};
use crate::coordinator::SerializedEnvelope;
use crate::errors::{CosignError, MissingAccountReason, RejectReason, SubmissionError};
use crate::nonce::{NonceHandle, NonceManager};
use crate::test_utils::{rent_for, FEE_PER_SIGNATURE};
use crate::tx_builder::{AnchorMode, TransferIntent, TxState};
use solana_sdk::{
    hash::Hash,
    native_token::LAMPORTS_PER_SOL,
    program_pack::Pack,
    signature::{Keypair, Signer},
};
use spl_token::instruction::TokenInstruction;

fn token_intent(fx: &Fixture, amount: &str) -> TransferIntent {
    TransferIntent::token(fx.sender.pubkey(), fx.recipient, fx.mint, amount)
}

#[tokio::test]
async fn test_checkpoint_handshake_moves_tokens() {
    let fx = Fixture::new(1_000);
    let payer_before = fx.fee_payer_lamports();

    let prepared = fx
        .sender_session()
        .prepare(
            &token_intent(&fx, "10"),
            &fx.sender,
            &fx.fee_payer.pubkey(),
            AnchorMode::Checkpoint,
        )
        .await
        .unwrap();

    let pending = prepared.pending();
    assert_eq!(pending.fee_payer(), fx.fee_payer.pubkey());
    assert_eq!(pending.instructions().len(), 2);
    assert_eq!(pending.state(), TxState::PartiallySigned(1));
    assert_eq!(pending.missing_signers(), vec![fx.fee_payer.pubkey()]);
    match TokenInstruction::unpack(&pending.instructions()[1].data).unwrap() {
        TokenInstruction::TransferChecked { amount, decimals } => {
            assert_eq!(amount, 1_000);
            assert_eq!(decimals, MINT_DECIMALS);
        }
        other => panic!("expected TransferChecked, got {other:?}"),
    }

    let summary = prepared.summary();
    assert!(!summary.durable);
    assert_eq!(summary.missing, vec![fx.fee_payer.pubkey().to_string()]);
    assert_eq!(summary.signed, vec![fx.sender.pubkey().to_string()]);

    let outcome = fx
        .fee_payer_session()
        .complete(&prepared.payload(), &fx.fee_payer)
        .await
        .unwrap();
    assert!(!outcome.already_finalized);
    assert!(fx.ledger.is_processed(&outcome.signature));

    // 10 whole units at scale 2
    assert_eq!(fx.sender_units(), Some(0));
    assert_eq!(fx.recipient_units(), Some(10 * 10u64.pow(MINT_DECIMALS as u32)));

    // Fee payer covered both signatures and the recipient's holding account
    let expected_cost = 2 * FEE_PER_SIGNATURE + rent_for(spl_token::state::Account::LEN);
    assert_eq!(fx.fee_payer_lamports(), payer_before - expected_cost);
    assert_eq!(fx.ledger.lamports(&fx.sender.pubkey()), 0);
}

#[tokio::test]
async fn test_existing_destination_skips_creation() {
    let fx = Fixture::new(1_000);
    fx.ledger.set_holding(&fx.recipient, &fx.mint, 5);
    let payer_before = fx.fee_payer_lamports();

    let prepared = fx
        .sender_session()
        .prepare(
            &token_intent(&fx, "2.5"),
            &fx.sender,
            &fx.fee_payer.pubkey(),
            AnchorMode::Checkpoint,
        )
        .await
        .unwrap();
    assert_eq!(prepared.pending().instructions().len(), 1);

    fx.fee_payer_session()
        .complete(&prepared.payload(), &fx.fee_payer)
        .await
        .unwrap();

    assert_eq!(fx.sender_units(), Some(750));
    assert_eq!(fx.recipient_units(), Some(255));
    assert_eq!(fx.fee_payer_lamports(), payer_before - 2 * FEE_PER_SIGNATURE);
}

#[tokio::test]
async fn test_native_transfer_fee_paid_by_cosigner() {
    let fx = Fixture::new(0);
    fx.ledger.fund(&fx.sender.pubkey(), LAMPORTS_PER_SOL);

    let intent = TransferIntent::native(fx.sender.pubkey(), fx.recipient, "0.25");
    let prepared = fx
        .sender_session()
        .prepare(&intent, &fx.sender, &fx.fee_payer.pubkey(), AnchorMode::Checkpoint)
        .await
        .unwrap();

    fx.fee_payer_session()
        .complete(&prepared.payload(), &fx.fee_payer)
        .await
        .unwrap();

    assert_eq!(fx.ledger.lamports(&fx.recipient), LAMPORTS_PER_SOL / 4);
    assert_eq!(
        fx.ledger.lamports(&fx.sender.pubkey()),
        LAMPORTS_PER_SOL - LAMPORTS_PER_SOL / 4
    );
}

#[tokio::test]
async fn test_memo_is_appended_last() {
    let fx = Fixture::new(1_000);
    let intent = token_intent(&fx, "1").with_memo("invoice 42");

    let prepared = fx
        .sender_session()
        .prepare(&intent, &fx.sender, &fx.fee_payer.pubkey(), AnchorMode::Checkpoint)
        .await
        .unwrap();
    let programs = prepared.pending().program_ids();
    assert_eq!(programs.len(), 3);
    assert_eq!(programs[2], crate::tx_builder::MEMO_PROGRAM_ID);

    fx.fee_payer_session()
        .complete(&prepared.payload(), &fx.fee_payer)
        .await
        .unwrap();
    assert_eq!(fx.recipient_units(), Some(100));
}

#[tokio::test]
async fn test_nonce_handshake_survives_checkpoint_expiry() {
    let fx = Fixture::new(1_000);
    let nonce = fx.ledger.add_nonce(&fx.sender.pubkey());

    let prepared = fx
        .sender_session()
        .prepare(
            &token_intent(&fx, "10"),
            &fx.sender,
            &fx.fee_payer.pubkey(),
            AnchorMode::Nonce(nonce),
        )
        .await
        .unwrap();
    assert_eq!(prepared.pending().instructions().len(), 3);
    assert_eq!(prepared.pending().message().recent_blockhash, nonce.token);
    assert!(prepared.summary().durable);

    // Far longer than any checkpoint stays valid
    fx.ledger.expire_checkpoints();

    fx.fee_payer_session()
        .complete(&prepared.payload(), &fx.fee_payer)
        .await
        .unwrap();

    assert_eq!(fx.recipient_units(), Some(1_000));
    let advanced = fx.ledger.nonce_state(&nonce.account).unwrap();
    assert_ne!(advanced.token, nonce.token);
}

#[tokio::test]
async fn test_stale_checkpoint_is_refused_before_submission() {
    let fx = Fixture::new(1_000);
    let prepared = fx
        .sender_session()
        .prepare(
            &token_intent(&fx, "10"),
            &fx.sender,
            &fx.fee_payer.pubkey(),
            AnchorMode::Checkpoint,
        )
        .await
        .unwrap();
    let payer_before = fx.fee_payer_lamports();

    fx.ledger.expire_checkpoints();

    let err = fx
        .fee_payer_session()
        .complete(&prepared.payload(), &fx.fee_payer)
        .await
        .unwrap_err();
    assert!(matches!(err, CosignError::StaleAnchor { .. }));
    assert!(err.requires_rebuild());

    assert_eq!(fx.ledger.submission_count(), 0);
    assert_eq!(fx.sender_units(), Some(1_000));
    assert_eq!(fx.recipient_units(), None);
    assert_eq!(fx.fee_payer_lamports(), payer_before);
}

#[tokio::test]
async fn test_revoked_nonce_payload_is_rejected() {
    let fx = Fixture::new(1_000);
    let nonce = fx.ledger.add_nonce(&fx.sender.pubkey());

    let prepared = fx
        .sender_session()
        .prepare(
            &token_intent(&fx, "10"),
            &fx.sender,
            &fx.fee_payer.pubkey(),
            AnchorMode::Nonce(nonce),
        )
        .await
        .unwrap();

    // Sender revokes the outstanding payload by advancing the nonce
    let revoker = Keypair::new();
    fx.ledger.fund(&revoker.pubkey(), LAMPORTS_PER_SOL);
    NonceManager::new(fx.client())
        .advance(&nonce, &fx.sender, &revoker)
        .await
        .unwrap();

    let err = fx
        .fee_payer_session()
        .complete(&prepared.payload(), &fx.fee_payer)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CosignError::Submission(SubmissionError::Rejected {
            reason: RejectReason::NonceConsumed,
            ..
        })
    ));
    assert_eq!(fx.sender_units(), Some(1_000));
}

#[tokio::test]
async fn test_wrong_fee_payer_is_refused() {
    let fx = Fixture::new(1_000);
    let prepared = fx
        .sender_session()
        .prepare(
            &token_intent(&fx, "1"),
            &fx.sender,
            &fx.fee_payer.pubkey(),
            AnchorMode::Checkpoint,
        )
        .await
        .unwrap();

    let impostor = Keypair::new();
    let err = fx
        .fee_payer_session()
        .complete(&prepared.payload(), &impostor)
        .await
        .unwrap_err();
    assert!(matches!(err, CosignError::Configuration(_)));
    assert_eq!(fx.ledger.submission_count(), 0);
}

#[tokio::test]
async fn test_tampered_payload_is_refused() {
    let fx = Fixture::new(1_000);
    let prepared = fx
        .sender_session()
        .prepare(
            &token_intent(&fx, "1"),
            &fx.sender,
            &fx.fee_payer.pubkey(),
            AnchorMode::Checkpoint,
        )
        .await
        .unwrap();

    // Last byte is the decimals argument of the transfer
    let mut bytes = prepared.envelope().as_bytes().to_vec();
    let last = bytes.len() - 1;
    bytes[last] ^= 1;
    let tampered = SerializedEnvelope::from_bytes(bytes).to_base64();

    let err = fx.fee_payer_session().inspect(&tampered).unwrap_err();
    assert!(matches!(err, CosignError::MalformedEnvelope(_)));
}

#[tokio::test]
async fn test_prepare_checks_sender_and_balance() {
    let fx = Fixture::new(1_000);
    let session = fx.sender_session();

    let stranger = Keypair::new();
    let err = session
        .prepare(
            &token_intent(&fx, "1"),
            &stranger,
            &fx.fee_payer.pubkey(),
            AnchorMode::Checkpoint,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CosignError::Configuration(_)));

    let err = session
        .prepare(
            &token_intent(&fx, "10.01"),
            &fx.sender,
            &fx.fee_payer.pubkey(),
            AnchorMode::Checkpoint,
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CosignError::MissingAccount {
            reason: MissingAccountReason::InsufficientBalance {
                required: 1_001,
                available: 1_000
            },
            ..
        }
    ));

    let foreign_nonce = fx.ledger.add_nonce(&stranger.pubkey());
    let err = session
        .prepare(
            &token_intent(&fx, "1"),
            &fx.sender,
            &fx.fee_payer.pubkey(),
            AnchorMode::Nonce(foreign_nonce),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CosignError::Configuration(_)));
}

#[tokio::test]
async fn test_fee_payer_without_funds_is_rejected() {
    let fx = Fixture::new(1_000);
    fx.ledger.set_holding(&fx.recipient, &fx.mint, 0);
    let broke = Keypair::new();
    fx.ledger.fund(&broke.pubkey(), FEE_PER_SIGNATURE);

    let prepared = fx
        .sender_session()
        .prepare(
            &token_intent(&fx, "1"),
            &fx.sender,
            &broke.pubkey(),
            AnchorMode::Checkpoint,
        )
        .await
        .unwrap();

    let err = fx
        .fee_payer_session()
        .complete(&prepared.payload(), &broke)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CosignError::Submission(SubmissionError::Rejected {
            reason: RejectReason::InsufficientFunds,
            ..
        })
    ));
    assert_eq!(fx.sender_units(), Some(1_000));
}

#[tokio::test]
async fn test_uninitialized_nonce_anchor_is_refused_at_cosign() {
    let fx = Fixture::new(1_000);
    let account = fx.ledger.add_uninitialized_nonce();
    let handle = NonceHandle {
        account,
        authority: fx.sender.pubkey(),
        token: Hash::new_unique(),
    };

    let prepared = fx
        .sender_session()
        .prepare(
            &token_intent(&fx, "1"),
            &fx.sender,
            &fx.fee_payer.pubkey(),
            AnchorMode::Nonce(handle),
        )
        .await
        .unwrap();
    let payload = prepared.envelope().to_base64();

    let session = fx.fee_payer_session();
    let inspected = session.inspect(&payload).unwrap();
    assert_eq!(inspected.missing_signers(), vec![fx.fee_payer.pubkey()]);

    match session.cosign(&payload, &fx.fee_payer).await {
        Err(CosignError::MissingAccount { account: missing, reason }) => {
            assert_eq!(missing, account);
            assert_eq!(reason, MissingAccountReason::NotInitialized);
        }
        other => panic!("expected NotInitialized, got {other:?}"),
    }
    assert_eq!(fx.ledger.submission_count(), 0);
}
