//! Freshness anchors: recent blockhash or durable nonce

use crate::errors::CosignError;
use crate::ledger::LedgerClient;
use crate::nonce::NonceHandle;
use crate::tx_builder::instructions::is_advance_nonce_data;
use solana_sdk::{hash::Hash, message::Message, pubkey::Pubkey};

/// How the builder should anchor a new transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnchorMode {
    /// Latest blockhash at build time; valid for a short window only
    Checkpoint,
    /// Current token of a durable nonce account the sender controls
    Nonce(NonceHandle),
}

impl AnchorMode {
    pub fn is_durable(&self) -> bool {
        matches!(self, AnchorMode::Nonce(_))
    }

    /// Turn the mode into a concrete anchor, querying the ledger for checkpoints
    pub async fn resolve(self, ledger: &dyn LedgerClient) -> Result<FreshnessAnchor, CosignError> {
        match self {
            AnchorMode::Checkpoint => {
                let checkpoint = ledger.latest_checkpoint().await?;
                Ok(FreshnessAnchor::Checkpoint {
                    blockhash: checkpoint.blockhash,
                })
            }
            AnchorMode::Nonce(handle) => Ok(FreshnessAnchor::Nonce(handle)),
        }
    }
}

/// Anchor embedded in a built message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreshnessAnchor {
    Checkpoint { blockhash: Hash },
    Nonce(NonceHandle),
}

impl FreshnessAnchor {
    /// Value placed in the message's `recent_blockhash` field
    pub fn token(&self) -> Hash {
        match self {
            FreshnessAnchor::Checkpoint { blockhash } => *blockhash,
            FreshnessAnchor::Nonce(handle) => handle.token,
        }
    }

    pub fn is_durable(&self) -> bool {
        matches!(self, FreshnessAnchor::Nonce(_))
    }

    pub fn nonce_handle(&self) -> Option<&NonceHandle> {
        match self {
            FreshnessAnchor::Nonce(handle) => Some(handle),
            FreshnessAnchor::Checkpoint { .. } => None,
        }
    }

    /// Recover the anchor from a compiled message
    ///
    /// A message whose first instruction advances a nonce is nonce-anchored; the
    /// advance instruction anywhere else is rejected as malformed.
    pub fn from_message(message: &Message) -> Result<Self, CosignError> {
        let keys = &message.account_keys;
        for (idx, ix) in message.instructions.iter().enumerate().skip(1) {
            let program = keys.get(ix.program_id_index as usize);
            if program.is_some_and(|p| is_advance_nonce_data(p, &ix.data)) {
                return Err(CosignError::malformed(format!(
                    "nonce advance at instruction {} instead of 0",
                    idx
                )));
            }
        }

        match durable_nonce_accounts(message) {
            Some((account, authority)) => Ok(FreshnessAnchor::Nonce(NonceHandle {
                account,
                authority,
                token: message.recent_blockhash,
            })),
            None => Ok(FreshnessAnchor::Checkpoint {
                blockhash: message.recent_blockhash,
            }),
        }
    }
}

/// `(nonce account, nonce authority)` when the first instruction advances a nonce
///
/// Advance account layout: `[nonce, recent_blockhashes sysvar, authority]`.
pub fn durable_nonce_accounts(message: &Message) -> Option<(Pubkey, Pubkey)> {
    let keys = &message.account_keys;
    let first = message.instructions.first()?;
    let program = keys.get(first.program_id_index as usize)?;
    if !is_advance_nonce_data(program, &first.data) {
        return None;
    }
    let account = keys.get(*first.accounts.first()? as usize)?;
    let authority = keys.get(*first.accounts.get(2)? as usize)?;
    Some((*account, *authority))
}
