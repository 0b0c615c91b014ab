//! Partial-signing coordinator
//!
//! Signatures are placed positionally: the slot of an identity is its index
//! among the message's required signers. Nothing here touches the message, so
//! signatures collected in different processes stay valid for the same bytes.
//!
//! The envelope wire format is the bincode encoding of the legacy transaction
//! (short-vec signatures followed by the message), with empty slots carried as
//! all-zero signatures. Text transport uses standard base64.

use crate::errors::CosignError;
use crate::metrics::metrics;
use crate::tx_builder::{FreshnessAnchor, PendingTransaction, TxState};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bincode::Options;
use solana_sdk::{
    packet::PACKET_DATA_SIZE,
    pubkey::Pubkey,
    sanitize::Sanitize,
    signature::{Signature, Signer},
    transaction::Transaction,
};
use std::fmt;
use tracing::debug;

/// Serialized transaction with every signer slot present
#[derive(Clone, PartialEq, Eq)]
pub struct SerializedEnvelope(Vec<u8>);

impl SerializedEnvelope {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Decode the base64 text form; whitespace around the payload is ignored
    pub fn from_base64(text: &str) -> Result<Self, CosignError> {
        STANDARD
            .decode(text.trim())
            .map(Self)
            .map_err(|e| CosignError::malformed(format!("invalid base64 payload: {}", e)))
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SerializedEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl fmt::Debug for SerializedEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SerializedEnvelope({} bytes)", self.0.len())
    }
}

/// Sign the exact current message bytes and store the signature in the
/// identity's slot
///
/// Re-signing with the same identity replaces the slot; the signer set and the
/// slot count never change.
pub fn sign_partial(tx: &mut PendingTransaction, identity: &dyn Signer) -> Result<(), CosignError> {
    match tx.state() {
        TxState::Built | TxState::PartiallySigned(_) | TxState::FullySigned => {}
        state => {
            return Err(CosignError::InvalidState {
                state,
                operation: "sign",
            })
        }
    }

    let pubkey = identity
        .try_pubkey()
        .map_err(|e| CosignError::Signing(e.to_string()))?;
    let index = tx
        .required_signers()
        .iter()
        .position(|key| *key == pubkey)
        .ok_or(CosignError::NotASigner(pubkey))?;

    let signature = identity
        .try_sign_message(&tx.message_bytes())
        .map_err(|e| CosignError::Signing(e.to_string()))?;
    tx.set_signature(index, signature);

    metrics().signatures_applied.inc();
    debug!(signer = %pubkey, slot = index, state = ?tx.state(), "signature applied");
    Ok(())
}

/// Signers whose slot is empty or holds a signature that does not verify
pub fn unverified_signers(tx: &PendingTransaction) -> Vec<Pubkey> {
    let message = tx.message_bytes();
    tx.required_signers()
        .iter()
        .zip(tx.signatures())
        .filter(|(key, sig)| !sig.verify(key.as_ref(), &message))
        .map(|(key, _)| *key)
        .collect()
}

/// Check every non-empty slot against the message
///
/// Empty slots are allowed; a filled slot that does not verify means the
/// envelope was tampered with or signed over different bytes.
pub fn verify_present_signatures(tx: &PendingTransaction) -> Result<(), CosignError> {
    let message = tx.message_bytes();
    for (key, sig) in tx.required_signers().iter().zip(tx.signatures()) {
        if *sig != Signature::default() && !sig.verify(key.as_ref(), &message) {
            return Err(CosignError::malformed(format!(
                "signature in the slot of {} does not match the message",
                key
            )));
        }
    }
    Ok(())
}

/// Export the transaction as wire bytes
///
/// With `require_complete` every slot must hold a valid signature, otherwise
/// `IncompleteSignature` lists the offending signers.
pub fn serialize(
    tx: &PendingTransaction,
    require_complete: bool,
) -> Result<SerializedEnvelope, CosignError> {
    if require_complete {
        let missing = unverified_signers(tx);
        if !missing.is_empty() {
            return Err(CosignError::IncompleteSignature { missing });
        }
    }

    let bytes = bincode::serialize(tx.transaction())
        .map_err(|e| CosignError::malformed(format!("failed to encode transaction: {}", e)))?;
    if bytes.len() > PACKET_DATA_SIZE {
        return Err(CosignError::malformed(format!(
            "encoded transaction is {} bytes, limit is {}",
            bytes.len(),
            PACKET_DATA_SIZE
        )));
    }
    Ok(SerializedEnvelope(bytes))
}

/// Reconstruct a pending transaction from wire bytes
///
/// Rejects empty, truncated, oversized or trailing-byte input, messages that
/// fail sanitization, signature counts that differ from the header, and
/// misplaced nonce advances.
pub fn deserialize(bytes: &[u8]) -> Result<PendingTransaction, CosignError> {
    if bytes.is_empty() {
        return Err(CosignError::malformed("envelope is empty"));
    }
    if bytes.len() > PACKET_DATA_SIZE {
        return Err(CosignError::malformed(format!(
            "envelope is {} bytes, limit is {}",
            bytes.len(),
            PACKET_DATA_SIZE
        )));
    }

    let tx: Transaction = bincode::options()
        .with_limit(PACKET_DATA_SIZE as u64)
        .with_fixint_encoding()
        .reject_trailing_bytes()
        .deserialize(bytes)
        .map_err(|e| CosignError::malformed(format!("failed to decode transaction: {}", e)))?;

    tx.sanitize()
        .map_err(|e| CosignError::malformed(format!("transaction failed sanitization: {}", e)))?;

    let required = usize::from(tx.message.header.num_required_signatures);
    if tx.signatures.len() != required {
        return Err(CosignError::malformed(format!(
            "{} signature slots for {} required signers",
            tx.signatures.len(),
            required
        )));
    }

    let anchor = FreshnessAnchor::from_message(&tx.message)?;
    metrics().envelopes_received.inc();
    Ok(PendingTransaction::from_parts(tx, anchor))
}
