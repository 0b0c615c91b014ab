//! Envelope transport between the two parties

use super::test_helpers::Fixture;
use crate::coordinator::{self, SerializedEnvelope};
use crate::errors::CosignError;
use crate::submit::broadcast;
use crate::tx_builder::{assemble, AnchorMode, FreshnessAnchor, TransferIntent, TxBuilder, TxState};
use proptest::prelude::*;
use solana_sdk::{
    hash::Hash,
    pubkey::Pubkey,
    signature::{Keypair, Signer},
    system_instruction,
};

#[tokio::test]
async fn test_decoded_envelope_preserves_message_and_anchor() {
    let fx = Fixture::new(1_000);
    let nonce = fx.ledger.add_nonce(&fx.sender.pubkey());
    let builder = TxBuilder::new(fx.client());
    let intent = TransferIntent::token(fx.sender.pubkey(), fx.recipient, fx.mint, "3");

    let mut pending = builder
        .build(&intent, &fx.fee_payer.pubkey(), AnchorMode::Nonce(nonce))
        .await
        .unwrap();
    coordinator::sign_partial(&mut pending, &fx.sender).unwrap();

    let envelope = coordinator::serialize(&pending, false).unwrap();
    let decoded = coordinator::deserialize(envelope.as_bytes()).unwrap();

    assert_eq!(decoded.message_bytes(), pending.message_bytes());
    assert_eq!(decoded.signatures(), pending.signatures());
    assert_eq!(decoded.anchor(), &FreshnessAnchor::Nonce(nonce));
    assert_eq!(decoded.state(), TxState::PartiallySigned(1));
}

#[tokio::test]
async fn test_signing_twice_is_idempotent() {
    let fx = Fixture::new(1_000);
    let builder = TxBuilder::new(fx.client());
    let intent = TransferIntent::token(fx.sender.pubkey(), fx.recipient, fx.mint, "1");

    let mut pending = builder
        .build(&intent, &fx.fee_payer.pubkey(), AnchorMode::Checkpoint)
        .await
        .unwrap();
    coordinator::sign_partial(&mut pending, &fx.sender).unwrap();
    let once = coordinator::serialize(&pending, false).unwrap();

    coordinator::sign_partial(&mut pending, &fx.sender).unwrap();
    let twice = coordinator::serialize(&pending, false).unwrap();

    assert_eq!(once, twice);
    assert_eq!(pending.state(), TxState::PartiallySigned(1));
}

#[tokio::test]
async fn test_signing_order_does_not_matter() {
    let fx = Fixture::new(1_000);
    let builder = TxBuilder::new(fx.client());
    let intent = TransferIntent::token(fx.sender.pubkey(), fx.recipient, fx.mint, "1");
    let pending = builder
        .build(&intent, &fx.fee_payer.pubkey(), AnchorMode::Checkpoint)
        .await
        .unwrap();

    let mut sender_first = pending.clone();
    coordinator::sign_partial(&mut sender_first, &fx.sender).unwrap();
    coordinator::sign_partial(&mut sender_first, &fx.fee_payer).unwrap();

    let mut payer_first = pending;
    coordinator::sign_partial(&mut payer_first, &fx.fee_payer).unwrap();
    coordinator::sign_partial(&mut payer_first, &fx.sender).unwrap();

    assert_eq!(
        coordinator::serialize(&sender_first, true).unwrap(),
        coordinator::serialize(&payer_first, true).unwrap()
    );
}

#[tokio::test]
async fn test_confirmed_transaction_cannot_be_resigned() {
    let fx = Fixture::new(1_000);
    let builder = TxBuilder::new(fx.client());
    let intent = TransferIntent::token(fx.sender.pubkey(), fx.recipient, fx.mint, "1");
    let mut pending = builder
        .build(&intent, &fx.fee_payer.pubkey(), AnchorMode::Checkpoint)
        .await
        .unwrap();
    coordinator::sign_partial(&mut pending, &fx.sender).unwrap();
    coordinator::sign_partial(&mut pending, &fx.fee_payer).unwrap();

    broadcast(fx.ledger.as_ref(), &mut pending).await.unwrap();
    assert_eq!(pending.state(), TxState::Confirmed);

    assert!(matches!(
        coordinator::sign_partial(&mut pending, &fx.fee_payer),
        Err(CosignError::InvalidState { state: TxState::Confirmed, .. })
    ));
}

fn partially_signed_bytes() -> (Vec<u8>, Keypair) {
    let sender = Keypair::new();
    let fee_payer = Keypair::new();
    let ix = system_instruction::transfer(&sender.pubkey(), &Pubkey::new_unique(), 42);
    let mut pending = assemble(
        vec![ix],
        &fee_payer.pubkey(),
        FreshnessAnchor::Checkpoint {
            blockhash: Hash::new_unique(),
        },
    )
    .unwrap();
    coordinator::sign_partial(&mut pending, &sender).unwrap();
    let bytes = coordinator::serialize(&pending, false).unwrap().into_bytes();
    (bytes, fee_payer)
}

proptest! {
    #[test]
    fn prop_arbitrary_bytes_never_panic(bytes in proptest::collection::vec(any::<u8>(), 0..1400)) {
        let _ = coordinator::deserialize(&bytes);
        let _ = SerializedEnvelope::from_bytes(bytes).to_base64();
    }

    #[test]
    fn prop_any_flipped_byte_is_detected(position in any::<prop::sample::Index>(), mask in 1u8..=255) {
        let (mut bytes, _) = partially_signed_bytes();
        let index = position.index(bytes.len());
        bytes[index] ^= mask;

        let accepted = coordinator::deserialize(&bytes)
            .and_then(|pending| coordinator::verify_present_signatures(&pending));
        prop_assert!(accepted.is_err());
    }
}
