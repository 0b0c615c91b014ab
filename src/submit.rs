//! Submission of fully signed transactions
//!
//! [`broadcast`] hands the transaction to the ledger and turns failures into
//! outcome classes: duplicates of an already confirmed transaction count as
//! success, semantic rejections require a rebuild, transport failures leave the
//! transaction `FullySigned` so the same bytes can be sent again.

use crate::coordinator::{sign_partial, unverified_signers};
use crate::errors::{CosignError, RejectReason, SubmissionError};
use crate::ledger::{LedgerClient, LedgerError};
use crate::metrics::{metrics, Timer};
use crate::tx_builder::{assemble, output::Phase, AnchorMode, FreshnessAnchor, PendingTransaction, TxState};
use solana_sdk::{
    instruction::{Instruction, InstructionError},
    pubkey::Pubkey,
    signature::{Signature, Signer},
    transaction::TransactionError,
};
use tracing::{info, instrument, warn};

/// Result of a successful broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub signature: Signature,
    /// The ledger had already processed this transaction before this call
    pub already_finalized: bool,
}

/// Broadcast a fully signed transaction and wait for its outcome
///
/// Confirmed transactions are not sent again; their outcome is reported with
/// `already_finalized = true`.
#[instrument(skip_all, fields(fee_payer = %tx.fee_payer(), durable = tx.anchor().is_durable()))]
pub async fn broadcast(
    ledger: &dyn LedgerClient,
    tx: &mut PendingTransaction,
) -> Result<SubmitOutcome, CosignError> {
    match tx.state() {
        TxState::FullySigned => {}
        TxState::Confirmed => {
            if let Some(signature) = tx.signature() {
                return Ok(SubmitOutcome {
                    signature,
                    already_finalized: true,
                });
            }
        }
        TxState::Built | TxState::PartiallySigned(_) => {
            return Err(CosignError::IncompleteSignature {
                missing: tx.missing_signers(),
            });
        }
        state => {
            return Err(CosignError::InvalidState {
                state,
                operation: "broadcast",
            });
        }
    }

    let missing = unverified_signers(tx);
    if !missing.is_empty() {
        return Err(CosignError::IncompleteSignature { missing });
    }
    let signature = tx.signature().ok_or_else(|| CosignError::IncompleteSignature {
        missing: vec![tx.fee_payer()],
    })?;

    let timer = Timer::new();
    tx.set_phase(Phase::Submitted);
    metrics().submissions_total.inc();

    match ledger.submit(tx.transaction()).await {
        Ok(confirmed) => {
            tx.set_phase(Phase::Confirmed);
            metrics().submissions_confirmed.inc();
            timer.observe_duration(&metrics().submit_latency);
            info!(signature = %confirmed, latency_ms = timer.elapsed_ms(), "transaction confirmed");
            Ok(SubmitOutcome {
                signature: confirmed,
                already_finalized: false,
            })
        }
        Err(err) => resolve_failure(ledger, tx, signature, err).await,
    }
}

/// Decide the outcome of a failed submit, consulting the signature status first
async fn resolve_failure(
    ledger: &dyn LedgerClient,
    tx: &mut PendingTransaction,
    signature: Signature,
    err: LedgerError,
) -> Result<SubmitOutcome, CosignError> {
    match ledger.signature_status(&signature).await {
        Ok(Some(Ok(()))) => {
            tx.set_phase(Phase::Confirmed);
            metrics().submissions_duplicate.inc();
            warn!(
                signature = %signature,
                error = %err,
                "submit reported an error but the transaction is already confirmed"
            );
            return Ok(SubmitOutcome {
                signature,
                already_finalized: true,
            });
        }
        Ok(Some(Err(landed))) => {
            // The transaction landed and failed; that outcome is authoritative
            let classified = classify_transaction_error(&landed, tx.anchor(), signature);
            return Err(reject(tx, classified));
        }
        Ok(None) => {}
        Err(status_err) => {
            warn!(signature = %signature, error = %status_err, "signature status lookup failed");
        }
    }

    match err {
        LedgerError::Transaction(tx_err) => {
            let classified = classify_transaction_error(&tx_err, tx.anchor(), signature);
            Err(reject(tx, classified))
        }
        // Confirmation polling gave up once the checkpoint expired and the
        // ledger has no record of the signature
        LedgerError::Unconfirmed { .. } => {
            let expired = match tx.anchor() {
                FreshnessAnchor::Checkpoint { blockhash } => Some(*blockhash),
                FreshnessAnchor::Nonce(_) => None,
            };
            match expired {
                Some(blockhash) => Err(reject(tx, CosignError::StaleAnchor { blockhash })),
                None => Err(retry_later(tx, signature, err)),
            }
        }
        other if other.is_transient() => Err(retry_later(tx, signature, other)),
        other => Err(reject(
            tx,
            CosignError::rejected(RejectReason::Program, other.to_string()),
        )),
    }
}

/// Leave the bytes broadcastable for another attempt
fn retry_later(tx: &mut PendingTransaction, signature: Signature, err: LedgerError) -> CosignError {
    tx.set_phase(Phase::Signing);
    metrics().submissions_transient.inc();
    warn!(signature = %signature, error = %err, "transient submission failure");
    SubmissionError::Transient(err.to_string()).into()
}

fn reject(tx: &mut PendingTransaction, err: CosignError) -> CosignError {
    match &err {
        // Nothing was executed; the bytes stay broadcastable until the outcome is known
        CosignError::Submission(SubmissionError::Duplicate { .. }) => {
            tx.set_phase(Phase::Signing);
            metrics().submissions_duplicate.inc();
        }
        CosignError::StaleAnchor { .. } => {
            tx.set_phase(Phase::Rejected);
            metrics().stale_anchors.inc();
            metrics().submissions_rejected.inc();
        }
        _ => {
            tx.set_phase(Phase::Rejected);
            metrics().submissions_rejected.inc();
        }
    }
    warn!(error = %err, category = err.category(), "submission failed");
    err
}

/// Map a ledger transaction error onto the submission outcome classes
///
/// An unknown blockhash means the checkpoint expired for checkpoint anchors and
/// that the nonce no longer holds the embedded token for nonce anchors.
pub fn classify_transaction_error(
    err: &TransactionError,
    anchor: &FreshnessAnchor,
    signature: Signature,
) -> CosignError {
    match err {
        TransactionError::BlockhashNotFound => match anchor {
            FreshnessAnchor::Checkpoint { blockhash } => CosignError::StaleAnchor {
                blockhash: *blockhash,
            },
            FreshnessAnchor::Nonce(handle) => CosignError::rejected(
                RejectReason::NonceConsumed,
                format!("nonce {} no longer holds {}", handle.account, handle.token),
            ),
        },
        TransactionError::AlreadyProcessed => {
            SubmissionError::Duplicate { signature }.into()
        }
        TransactionError::InsufficientFundsForFee
        | TransactionError::InsufficientFundsForRent { .. }
        | TransactionError::AccountNotFound => {
            CosignError::rejected(RejectReason::InsufficientFunds, err.to_string())
        }
        // Nonce program error 1 (not expired) on the leading advance
        TransactionError::InstructionError(0, InstructionError::Custom(1))
            if anchor.is_durable() =>
        {
            CosignError::rejected(RejectReason::NonceConsumed, err.to_string())
        }
        // Token and system programs both use custom code 1 for insufficient funds
        TransactionError::InstructionError(_, InstructionError::Custom(1)) => {
            CosignError::rejected(RejectReason::InsufficientFunds, err.to_string())
        }
        TransactionError::SignatureFailure => {
            CosignError::rejected(RejectReason::InvalidSignature, err.to_string())
        }
        other => CosignError::rejected(RejectReason::Program, other.to_string()),
    }
}

/// Build, sign and broadcast an administrative transaction
///
/// The first signer pays the fee. Duplicate signers are signed once.
pub async fn send_with_signers(
    ledger: &dyn LedgerClient,
    instructions: Vec<Instruction>,
    signers: &[&dyn Signer],
) -> Result<SubmitOutcome, CosignError> {
    let anchor = AnchorMode::Checkpoint.resolve(ledger).await?;
    send_anchored(ledger, anchor, instructions, signers).await
}

/// Like [`send_with_signers`] but against an explicit anchor
///
/// With a nonce anchor the advance is prepended, so an empty body consumes
/// the nonce and does nothing else.
pub async fn send_anchored(
    ledger: &dyn LedgerClient,
    anchor: FreshnessAnchor,
    instructions: Vec<Instruction>,
    signers: &[&dyn Signer],
) -> Result<SubmitOutcome, CosignError> {
    let fee_payer = signers
        .first()
        .ok_or_else(|| CosignError::configuration("at least one signer is required"))?
        .pubkey();

    let mut pending = assemble(instructions, &fee_payer, anchor)?;

    let mut signed: Vec<Pubkey> = Vec::with_capacity(signers.len());
    for signer in signers {
        let key = signer.pubkey();
        if signed.contains(&key) {
            continue;
        }
        sign_partial(&mut pending, *signer)?;
        signed.push(key);
    }

    broadcast(ledger, &mut pending).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nonce::NonceHandle;
    use solana_sdk::hash::Hash;

    fn checkpoint() -> FreshnessAnchor {
        FreshnessAnchor::Checkpoint {
            blockhash: Hash::new_unique(),
        }
    }

    fn nonce() -> FreshnessAnchor {
        FreshnessAnchor::Nonce(NonceHandle {
            account: Pubkey::new_unique(),
            authority: Pubkey::new_unique(),
            token: Hash::new_unique(),
        })
    }

    #[test]
    fn test_blockhash_not_found_depends_on_anchor() {
        let sig = Signature::default();
        let err = classify_transaction_error(&TransactionError::BlockhashNotFound, &checkpoint(), sig);
        assert!(matches!(err, CosignError::StaleAnchor { .. }));
        assert!(err.requires_rebuild());

        let err = classify_transaction_error(&TransactionError::BlockhashNotFound, &nonce(), sig);
        assert!(matches!(
            err,
            CosignError::Submission(SubmissionError::Rejected {
                reason: RejectReason::NonceConsumed,
                ..
            })
        ));
    }

    #[test]
    fn test_funds_errors() {
        let sig = Signature::default();
        for tx_err in [
            TransactionError::InsufficientFundsForFee,
            TransactionError::AccountNotFound,
            TransactionError::InstructionError(1, InstructionError::Custom(1)),
        ] {
            let err = classify_transaction_error(&tx_err, &checkpoint(), sig);
            assert!(
                matches!(
                    err,
                    CosignError::Submission(SubmissionError::Rejected {
                        reason: RejectReason::InsufficientFunds,
                        ..
                    })
                ),
                "{tx_err:?} classified as {err:?}"
            );
        }
    }

    #[test]
    fn test_duplicate_and_program_errors() {
        let sig = Signature::default();
        let err = classify_transaction_error(&TransactionError::AlreadyProcessed, &checkpoint(), sig);
        assert!(matches!(
            err,
            CosignError::Submission(SubmissionError::Duplicate { .. })
        ));
        assert!(!err.requires_rebuild());

        let err = classify_transaction_error(
            &TransactionError::InstructionError(0, InstructionError::InvalidAccountData),
            &checkpoint(),
            sig,
        );
        assert!(matches!(
            err,
            CosignError::Submission(SubmissionError::Rejected {
                reason: RejectReason::Program,
                ..
            })
        ));
    }

    #[test]
    fn test_advance_not_expired_is_nonce_consumed() {
        let err = classify_transaction_error(
            &TransactionError::InstructionError(0, InstructionError::Custom(1)),
            &nonce(),
            Signature::default(),
        );
        assert!(matches!(
            err,
            CosignError::Submission(SubmissionError::Rejected {
                reason: RejectReason::NonceConsumed,
                ..
            })
        ));
    }
}
