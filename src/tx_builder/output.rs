//! Built transaction awaiting signatures
//!
//! [`PendingTransaction`] owns the legacy `Transaction` produced by the builder
//! together with the anchor it was built against. The message (instructions,
//! fee payer, anchor) is frozen at construction: the type exposes no way to
//! change it, so signatures collected from different parties keep verifying.
//! Only the positional signature slots are mutable, and only inside the crate.

use crate::tx_builder::anchor::FreshnessAnchor;
use solana_sdk::{
    instruction::{CompiledInstruction, Instruction},
    message::Message,
    pubkey::Pubkey,
    signature::Signature,
    transaction::Transaction,
};
use std::fmt;

/// Signing lifecycle of a transaction
///
/// `Built → PartiallySigned(n) → FullySigned → Submitted → Confirmed | Rejected`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// No signer slot filled yet
    Built,
    /// `n` of the required slots hold a signature
    PartiallySigned(usize),
    /// Every required slot holds a signature
    FullySigned,
    /// Handed to the ledger, outcome pending
    Submitted,
    Confirmed,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Signing,
    Submitted,
    Confirmed,
    Rejected,
}

#[derive(Clone, PartialEq)]
pub struct PendingTransaction {
    tx: Transaction,
    anchor: FreshnessAnchor,
    phase: Phase,
}

impl PendingTransaction {
    /// Compile the message and allocate one empty slot per required signer
    pub(crate) fn new(
        instructions: &[Instruction],
        fee_payer: &Pubkey,
        anchor: FreshnessAnchor,
    ) -> Self {
        let message = Message::new_with_blockhash(instructions, Some(fee_payer), &anchor.token());
        Self {
            tx: Transaction::new_unsigned(message),
            anchor,
            phase: Phase::Signing,
        }
    }

    /// Wrap a decoded transaction; the caller has already validated its shape
    pub(crate) fn from_parts(tx: Transaction, anchor: FreshnessAnchor) -> Self {
        Self {
            tx,
            anchor,
            phase: Phase::Signing,
        }
    }

    pub fn transaction(&self) -> &Transaction {
        &self.tx
    }

    /// Consume self and extract the transaction
    pub fn into_transaction(self) -> Transaction {
        self.tx
    }

    pub fn message(&self) -> &Message {
        &self.tx.message
    }

    /// Exact bytes every signature is computed over
    pub fn message_bytes(&self) -> Vec<u8> {
        self.tx.message_data()
    }

    pub fn fee_payer(&self) -> Pubkey {
        self.tx.message.account_keys[0]
    }

    pub fn anchor(&self) -> &FreshnessAnchor {
        &self.anchor
    }

    pub fn instructions(&self) -> &[CompiledInstruction] {
        &self.tx.message.instructions
    }

    /// Program invoked by each instruction, in order
    pub fn program_ids(&self) -> Vec<Pubkey> {
        let keys = &self.tx.message.account_keys;
        self.tx
            .message
            .instructions
            .iter()
            .map(|ix| *ix.program_id(keys))
            .collect()
    }

    /// Keys that must sign, in slot order (fee payer first)
    pub fn required_signers(&self) -> &[Pubkey] {
        let count = usize::from(self.tx.message.header.num_required_signatures);
        &self.tx.message.account_keys[..count]
    }

    pub fn signatures(&self) -> &[Signature] {
        &self.tx.signatures
    }

    /// Signers whose slot is non-empty (validity is not checked)
    pub fn present_signers(&self) -> Vec<Pubkey> {
        self.slots()
            .filter(|(_, sig)| **sig != Signature::default())
            .map(|(key, _)| *key)
            .collect()
    }

    /// Signers whose slot is empty
    pub fn missing_signers(&self) -> Vec<Pubkey> {
        self.slots()
            .filter(|(_, sig)| **sig == Signature::default())
            .map(|(key, _)| *key)
            .collect()
    }

    pub fn signed_count(&self) -> usize {
        self.tx
            .signatures
            .iter()
            .filter(|sig| **sig != Signature::default())
            .count()
    }

    pub fn state(&self) -> TxState {
        match self.phase {
            Phase::Submitted => TxState::Submitted,
            Phase::Confirmed => TxState::Confirmed,
            Phase::Rejected => TxState::Rejected,
            Phase::Signing => {
                let signed = self.signed_count();
                if signed == 0 {
                    TxState::Built
                } else if signed == self.required_signers().len() {
                    TxState::FullySigned
                } else {
                    TxState::PartiallySigned(signed)
                }
            }
        }
    }

    /// Transaction id: the fee payer's signature, once present
    pub fn signature(&self) -> Option<Signature> {
        self.tx
            .signatures
            .first()
            .copied()
            .filter(|sig| *sig != Signature::default())
    }

    fn slots(&self) -> impl Iterator<Item = (&Pubkey, &Signature)> {
        self.required_signers().iter().zip(self.tx.signatures.iter())
    }

    pub(crate) fn set_signature(&mut self, index: usize, signature: Signature) {
        self.tx.signatures[index] = signature;
    }

    pub(crate) fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }
}

impl fmt::Debug for PendingTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingTransaction")
            .field("fee_payer", &self.fee_payer())
            .field("anchor", &self.anchor)
            .field("instructions", &self.tx.message.instructions.len())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::{
        hash::Hash,
        signature::{Keypair, Signer},
        system_instruction,
    };

    #[test]
    fn test_new_allocates_empty_slots() {
        let sender = Pubkey::new_unique();
        let fee_payer = Pubkey::new_unique();
        let blockhash = Hash::new_unique();
        let ix = system_instruction::transfer(&sender, &Pubkey::new_unique(), 10);

        let pending = PendingTransaction::new(
            &[ix],
            &fee_payer,
            FreshnessAnchor::Checkpoint { blockhash },
        );

        assert_eq!(pending.fee_payer(), fee_payer);
        assert_eq!(pending.required_signers(), &[fee_payer, sender]);
        assert_eq!(pending.signatures().len(), 2);
        assert_eq!(pending.state(), TxState::Built);
        assert_eq!(pending.missing_signers(), vec![fee_payer, sender]);
        assert!(pending.signature().is_none());
        assert_eq!(pending.message().recent_blockhash, blockhash);
    }

    #[test]
    fn test_state_follows_slots_and_phase() {
        let sender = Keypair::new();
        let fee_payer = Pubkey::new_unique();
        let ix = system_instruction::transfer(&sender.pubkey(), &Pubkey::new_unique(), 10);
        let mut pending = PendingTransaction::new(
            &[ix],
            &fee_payer,
            FreshnessAnchor::Checkpoint {
                blockhash: Hash::new_unique(),
            },
        );

        let sig = sender.sign_message(&pending.message_bytes());
        pending.set_signature(1, sig);
        assert_eq!(pending.state(), TxState::PartiallySigned(1));
        assert_eq!(pending.present_signers(), vec![sender.pubkey()]);

        pending.set_signature(0, sig);
        assert_eq!(pending.state(), TxState::FullySigned);

        pending.set_phase(Phase::Submitted);
        assert_eq!(pending.state(), TxState::Submitted);
        pending.set_phase(Phase::Rejected);
        assert_eq!(pending.state(), TxState::Rejected);
    }

    #[test]
    fn test_debug_is_compact() {
        let fee_payer = Pubkey::new_unique();
        let ix = system_instruction::transfer(&fee_payer, &Pubkey::new_unique(), 10);
        let pending = PendingTransaction::new(
            &[ix],
            &fee_payer,
            FreshnessAnchor::Checkpoint {
                blockhash: Hash::new_unique(),
            },
        );
        let rendered = format!("{pending:?}");
        assert!(rendered.contains("PendingTransaction"));
        assert!(rendered.contains("Built"));
    }
}
