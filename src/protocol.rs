//! Delegated-fee-payer handshake
//!
//! 1. The sender [`SenderSession::prepare`]s: build, sign its own slot, export
//!    the still-incomplete envelope as base64.
//! 2. The payload travels out of band to the fee payer.
//! 3. The fee payer [`FeePayerSession::complete`]s: decode, check its own
//!    identity and every signature already present, check the anchor is still
//!    usable, sign, re-export as complete and submit.
//!
//! The sender takes no part in step 3.

use crate::coordinator::{self, SerializedEnvelope};
use crate::errors::{CosignError, RejectReason};
use crate::ledger::LedgerClient;
use crate::metrics::{metrics, Timer};
use crate::structured_logging::StructuredLogger;
use crate::submit::{self, SubmitOutcome};
use crate::tx_builder::{AnchorMode, FreshnessAnchor, PendingTransaction, TransferIntent, TxBuilder};
use serde::Serialize;
use solana_sdk::{pubkey::Pubkey, signature::Signer};
use std::sync::Arc;
use tracing::instrument;

/// Sender-side output of the handshake
#[derive(Debug, Clone)]
pub struct PreparedTransfer {
    pending: PendingTransaction,
    envelope: SerializedEnvelope,
    context_id: String,
}

/// Printable description of a prepared or received envelope
#[derive(Debug, Clone, Serialize)]
pub struct TransferSummary {
    pub context_id: String,
    pub fee_payer: String,
    pub anchor: String,
    pub durable: bool,
    pub nonce_account: Option<String>,
    pub signed: Vec<String>,
    pub missing: Vec<String>,
    pub payload: String,
}

impl PreparedTransfer {
    /// Base64 text to hand to the fee payer
    pub fn payload(&self) -> String {
        self.envelope.to_base64()
    }

    pub fn envelope(&self) -> &SerializedEnvelope {
        &self.envelope
    }

    pub fn pending(&self) -> &PendingTransaction {
        &self.pending
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    pub fn summary(&self) -> TransferSummary {
        let to_strings = |keys: Vec<Pubkey>| keys.iter().map(ToString::to_string).collect();
        let anchor = self.pending.anchor();
        TransferSummary {
            context_id: self.context_id.clone(),
            fee_payer: self.pending.fee_payer().to_string(),
            anchor: anchor.token().to_string(),
            durable: anchor.is_durable(),
            nonce_account: anchor.nonce_handle().map(|h| h.account.to_string()),
            signed: to_strings(self.pending.present_signers()),
            missing: to_strings(self.pending.missing_signers()),
            payload: self.payload(),
        }
    }
}

pub struct SenderSession {
    builder: TxBuilder,
    logger: StructuredLogger,
}

impl SenderSession {
    pub fn new(ledger: Arc<dyn LedgerClient>) -> Self {
        Self {
            builder: TxBuilder::new(ledger),
            logger: StructuredLogger::generate(),
        }
    }

    /// Build the transfer, sign the sender's slot and export it incomplete
    ///
    /// For nonce anchors the sender must be the nonce authority, so the payload
    /// needs no signature beyond the sender's and the fee payer's.
    #[instrument(skip_all, fields(sender = %sender.pubkey(), fee_payer = %fee_payer, context_id = %self.logger.context_id()))]
    pub async fn prepare(
        &self,
        intent: &TransferIntent,
        sender: &dyn Signer,
        fee_payer: &Pubkey,
        mode: AnchorMode,
    ) -> Result<PreparedTransfer, CosignError> {
        let sender_key = sender.pubkey();
        if intent.source != sender_key {
            return Err(CosignError::configuration(format!(
                "transfer source {} does not match sender {}",
                intent.source, sender_key
            )));
        }
        if let AnchorMode::Nonce(handle) = &mode {
            if handle.authority != sender_key {
                return Err(CosignError::configuration(format!(
                    "nonce {} is controlled by {}, not the sender",
                    handle.account, handle.authority
                )));
            }
        }

        let mut pending = self.builder.build(intent, fee_payer, mode).await?;
        coordinator::sign_partial(&mut pending, sender)?;
        let envelope = coordinator::serialize(&pending, false)?;

        self.logger.log_envelope_prepared(
            &sender_key.to_string(),
            &fee_payer.to_string(),
            pending.anchor().is_durable(),
            pending.instructions().len(),
            envelope.len(),
        );
        Ok(PreparedTransfer {
            pending,
            envelope,
            context_id: self.logger.context_id().to_string(),
        })
    }
}

pub struct FeePayerSession {
    ledger: Arc<dyn LedgerClient>,
    logger: StructuredLogger,
}

impl FeePayerSession {
    pub fn new(ledger: Arc<dyn LedgerClient>) -> Self {
        Self {
            ledger,
            logger: StructuredLogger::generate(),
        }
    }

    /// Decode a payload and check the signatures it already carries
    pub fn inspect(&self, payload: &str) -> Result<PendingTransaction, CosignError> {
        let envelope = SerializedEnvelope::from_base64(payload)?;
        let pending = coordinator::deserialize(envelope.as_bytes())?;
        coordinator::verify_present_signatures(&pending)?;
        self.logger.log_envelope_received(
            &pending.fee_payer().to_string(),
            pending.signed_count(),
            pending.required_signers().len(),
        );
        Ok(pending)
    }

    /// Add the fee payer's signature without submitting
    ///
    /// Returns the fully signed transaction and its complete envelope, e.g.
    /// for relaying to a separate submitter.
    pub async fn cosign(
        &self,
        payload: &str,
        fee_payer: &dyn Signer,
    ) -> Result<(PendingTransaction, SerializedEnvelope), CosignError> {
        let mut pending = self.inspect(payload)?;

        let fee_payer_key = fee_payer.pubkey();
        if pending.fee_payer() != fee_payer_key {
            return Err(CosignError::configuration(format!(
                "envelope names {} as fee payer, not {}",
                pending.fee_payer(),
                fee_payer_key
            )));
        }

        self.ensure_anchor_fresh(pending.anchor()).await?;
        coordinator::sign_partial(&mut pending, fee_payer)?;
        let envelope = coordinator::serialize(&pending, true)?;
        Ok((pending, envelope))
    }

    /// Co-sign and submit
    #[instrument(skip_all, fields(fee_payer = %fee_payer.pubkey(), context_id = %self.logger.context_id()))]
    pub async fn complete(
        &self,
        payload: &str,
        fee_payer: &dyn Signer,
    ) -> Result<SubmitOutcome, CosignError> {
        let timer = Timer::new();
        let result = match self.cosign(payload, fee_payer).await {
            Ok((mut pending, _)) => submit::broadcast(self.ledger.as_ref(), &mut pending).await,
            Err(err) => Err(err),
        };

        match &result {
            Ok(outcome) => self.logger.log_submission_success(
                &outcome.signature.to_string(),
                outcome.already_finalized,
                timer.elapsed_ms(),
            ),
            Err(err) => {
                self.logger
                    .log_submission_failure(&err.to_string(), err.category(), timer.elapsed_ms())
            }
        }
        result
    }

    async fn ensure_anchor_fresh(&self, anchor: &FreshnessAnchor) -> Result<(), CosignError> {
        match anchor {
            FreshnessAnchor::Checkpoint { blockhash } => {
                let fresh = self.ledger.is_checkpoint_valid(blockhash).await?;
                self.logger
                    .log_anchor_check(&blockhash.to_string(), false, fresh);
                if !fresh {
                    metrics().stale_anchors.inc();
                    return Err(CosignError::StaleAnchor {
                        blockhash: *blockhash,
                    });
                }
            }
            FreshnessAnchor::Nonce(handle) => {
                let current = self
                    .ledger
                    .nonce(&handle.account)
                    .await?
                    .ok_or_else(|| CosignError::not_found(handle.account))?;
                let fresh = current.token == handle.token;
                self.logger.log_anchor_check(&handle.token.to_string(), true, fresh);
                if !fresh {
                    return Err(CosignError::rejected(
                        RejectReason::NonceConsumed,
                        format!(
                            "nonce {} advanced from {} to {}",
                            handle.account, handle.token, current.token
                        ),
                    ));
                }
            }
        }
        Ok(())
    }
}
