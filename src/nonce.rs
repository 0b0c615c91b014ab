//! Durable nonce lifecycle
//!
//! A durable nonce account stores a single-use token that can stand in for a
//! recent blockhash. Transactions anchored to it stay valid until the token is
//! consumed by an advance, which lets the fee payer complete a payload long
//! after the sender signed it, and lets the sender revoke outstanding payloads
//! by advancing the nonce explicitly.

use crate::errors::{CosignError, MissingAccountReason};
use crate::ledger::LedgerClient;
use crate::submit::{send_anchored, send_with_signers, SubmitOutcome};
use crate::tx_builder::FreshnessAnchor;
use solana_sdk::{
    hash::Hash,
    instruction::Instruction,
    pubkey::Pubkey,
    signature::{Keypair, Signer},
    system_instruction,
};
use std::sync::Arc;
use tracing::{info, instrument};

/// Size of an initialized nonce account
pub const NONCE_ACCOUNT_LENGTH: usize = 80;

/// Reference to a durable nonce and the token it currently holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NonceHandle {
    pub account: Pubkey,
    pub authority: Pubkey,
    pub token: Hash,
}

impl NonceHandle {
    /// Advance instruction that consumes the current token
    pub fn advance_instruction(&self) -> Instruction {
        system_instruction::advance_nonce_account(&self.account, &self.authority)
    }
}

pub struct NonceManager {
    ledger: Arc<dyn LedgerClient>,
}

impl NonceManager {
    pub fn new(ledger: Arc<dyn LedgerClient>) -> Self {
        Self { ledger }
    }

    /// Create and fund a new nonce account controlled by `authority`
    ///
    /// `payer` funds the rent-exempt minimum and the fee. The nonce keypair is
    /// generated here and only used to sign the creation.
    #[instrument(skip(self, payer), fields(payer = %payer.pubkey()))]
    pub async fn create(
        &self,
        payer: &dyn Signer,
        authority: &Pubkey,
    ) -> Result<NonceHandle, CosignError> {
        let nonce_keypair = Keypair::new();
        let lamports = self.ledger.rent_exempt_minimum(NONCE_ACCOUNT_LENGTH).await?;
        let instructions = system_instruction::create_nonce_account(
            &payer.pubkey(),
            &nonce_keypair.pubkey(),
            authority,
            lamports,
        );

        let outcome =
            send_with_signers(self.ledger.as_ref(), instructions, &[payer, &nonce_keypair]).await?;
        let handle = self.fetch(&nonce_keypair.pubkey()).await?;
        info!(
            nonce_account = %handle.account,
            token = %handle.token,
            rent_lamports = lamports,
            signature = %outcome.signature,
            "nonce account created"
        );
        Ok(handle)
    }

    /// Reuse `existing` when given, otherwise create a fresh nonce account
    pub async fn acquire(
        &self,
        existing: Option<&Pubkey>,
        payer: &dyn Signer,
        authority: &Pubkey,
    ) -> Result<NonceHandle, CosignError> {
        match existing {
            Some(account) => {
                let handle = self.fetch(account).await?;
                if handle.authority != *authority {
                    return Err(CosignError::configuration(format!(
                        "nonce {} is controlled by {}, not {}",
                        account, handle.authority, authority
                    )));
                }
                Ok(handle)
            }
            None => self.create(payer, authority).await,
        }
    }

    /// Current handle of a nonce account
    pub async fn fetch(&self, account: &Pubkey) -> Result<NonceHandle, CosignError> {
        self.ledger
            .nonce(account)
            .await?
            .ok_or(CosignError::MissingAccount {
                account: *account,
                reason: MissingAccountReason::NotFound,
            })
    }

    /// Consume the current token, invalidating every payload anchored to it
    ///
    /// The advance is itself anchored to the token it consumes, read fresh from
    /// the ledger so a stale `handle` still works.
    #[instrument(skip(self, authority, payer), fields(nonce_account = %handle.account))]
    pub async fn advance(
        &self,
        handle: &NonceHandle,
        authority: &dyn Signer,
        payer: &dyn Signer,
    ) -> Result<NonceHandle, CosignError> {
        if authority.pubkey() != handle.authority {
            return Err(CosignError::NotASigner(authority.pubkey()));
        }
        let current = self.fetch(&handle.account).await?;
        send_anchored(
            self.ledger.as_ref(),
            FreshnessAnchor::Nonce(current),
            Vec::new(),
            &[payer, authority],
        )
        .await?;

        let refreshed = self.fetch(&handle.account).await?;
        info!(
            previous = %current.token,
            token = %refreshed.token,
            "nonce advanced"
        );
        Ok(refreshed)
    }

    /// Move lamports out of the nonce account; withdrawing everything closes it
    #[instrument(skip(self, authority), fields(nonce_account = %handle.account))]
    pub async fn withdraw(
        &self,
        handle: &NonceHandle,
        authority: &dyn Signer,
        to: &Pubkey,
        lamports: u64,
    ) -> Result<SubmitOutcome, CosignError> {
        if authority.pubkey() != handle.authority {
            return Err(CosignError::NotASigner(authority.pubkey()));
        }
        let ix = system_instruction::withdraw_nonce_account(
            &handle.account,
            &handle.authority,
            to,
            lamports,
        );
        let outcome = send_with_signers(self.ledger.as_ref(), vec![ix], &[authority]).await?;
        info!(to = %to, lamports, "nonce lamports withdrawn");
        Ok(outcome)
    }
}
