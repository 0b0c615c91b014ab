//! Instruction ordering of built transfers
//!
//! - nonce advance first, and only for durable anchors
//! - destination holding creation before the transfer, only when missing
//! - memo last

use super::test_helpers::Fixture;
use crate::tx_builder::anchor::durable_nonce_accounts;
use crate::tx_builder::instructions::is_advance_nonce_data;
use crate::tx_builder::{AnchorMode, PendingTransaction, TransferIntent, TxBuilder, MEMO_PROGRAM_ID};
use solana_sdk::{native_token::LAMPORTS_PER_SOL, signature::Signer, system_program};

async fn build(fx: &Fixture, intent: TransferIntent, mode: AnchorMode) -> PendingTransaction {
    TxBuilder::new(fx.client())
        .build(&intent, &fx.fee_payer.pubkey(), mode)
        .await
        .unwrap()
}

fn advance_positions(pending: &PendingTransaction) -> Vec<usize> {
    let keys = &pending.message().account_keys;
    pending
        .instructions()
        .iter()
        .enumerate()
        .filter(|(_, ix)| is_advance_nonce_data(ix.program_id(keys), &ix.data))
        .map(|(idx, _)| idx)
        .collect()
}

#[tokio::test]
async fn test_existing_destination_single_instruction() {
    let fx = Fixture::new(1_000);
    fx.ledger.set_holding(&fx.recipient, &fx.mint, 0);

    let intent = TransferIntent::token(fx.sender.pubkey(), fx.recipient, fx.mint, "1");
    let pending = build(&fx, intent, AnchorMode::Checkpoint).await;

    assert_eq!(pending.program_ids(), vec![spl_token::id()]);
    assert!(advance_positions(&pending).is_empty());
}

#[tokio::test]
async fn test_missing_destination_is_created_first() {
    let fx = Fixture::new(1_000);

    let intent = TransferIntent::token(fx.sender.pubkey(), fx.recipient, fx.mint, "1");
    let pending = build(&fx, intent, AnchorMode::Checkpoint).await;

    assert_eq!(
        pending.program_ids(),
        vec![spl_associated_token_account::id(), spl_token::id()]
    );
    // The fee payer funds the new holding account
    let create = &pending.instructions()[0];
    let payer_index = usize::from(create.accounts[0]);
    assert_eq!(pending.message().account_keys[payer_index], fx.fee_payer.pubkey());
}

#[tokio::test]
async fn test_durable_transfer_starts_with_advance() {
    let fx = Fixture::new(1_000);
    let nonce = fx.ledger.add_nonce(&fx.sender.pubkey());

    let intent =
        TransferIntent::token(fx.sender.pubkey(), fx.recipient, fx.mint, "1").with_memo("rent");
    let pending = build(&fx, intent, AnchorMode::Nonce(nonce)).await;

    assert_eq!(
        pending.program_ids(),
        vec![
            system_program::id(),
            spl_associated_token_account::id(),
            spl_token::id(),
            MEMO_PROGRAM_ID,
        ]
    );
    assert_eq!(advance_positions(&pending), vec![0]);
    assert_eq!(
        durable_nonce_accounts(pending.message()),
        Some((nonce.account, fx.sender.pubkey()))
    );
}

#[tokio::test]
async fn test_native_transfer_layout() {
    let fx = Fixture::new(0);
    fx.ledger.fund(&fx.sender.pubkey(), LAMPORTS_PER_SOL);
    let nonce = fx.ledger.add_nonce(&fx.sender.pubkey());

    let intent = TransferIntent::native(fx.sender.pubkey(), fx.recipient, "0.1");
    let checkpoint = build(&fx, intent.clone(), AnchorMode::Checkpoint).await;
    assert_eq!(checkpoint.program_ids(), vec![system_program::id()]);
    assert!(advance_positions(&checkpoint).is_empty());

    let durable = build(&fx, intent, AnchorMode::Nonce(nonce)).await;
    assert_eq!(
        durable.program_ids(),
        vec![system_program::id(), system_program::id()]
    );
    assert_eq!(advance_positions(&durable), vec![0]);
    assert_eq!(
        durable.required_signers(),
        &[fx.fee_payer.pubkey(), fx.sender.pubkey()]
    );
}
