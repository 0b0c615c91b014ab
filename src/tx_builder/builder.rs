//! Core TxBuilder implementation
//!
//! Turns a [`TransferIntent`] into an unsigned [`PendingTransaction`]:
//! - queries the ledger for decimals, source balance and destination holding
//! - plans the instruction list in the fixed order
//! - resolves the freshness anchor (latest blockhash or nonce token)
//! - compiles the message with the designated fee payer

use crate::errors::CosignError;
use crate::ledger::LedgerClient;
use crate::metrics::{metrics, Timer};
use crate::tx_builder::amount::{parse_ui_amount, NATIVE_DECIMALS};
use crate::tx_builder::anchor::{AnchorMode, FreshnessAnchor};
use crate::tx_builder::instructions::{
    memo_instruction, plan_instructions, plan_transfer_instructions, sanity_check_ix_order,
};
use crate::tx_builder::intent::{Asset, TransferIntent};
use crate::tx_builder::output::PendingTransaction;
use solana_sdk::{instruction::Instruction, pubkey::Pubkey, system_instruction};
use spl_associated_token_account::{
    get_associated_token_address, instruction::create_associated_token_account,
};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Transfer instruction plus the optional destination holding creation
struct TransferParts {
    create_destination: Option<Instruction>,
    transfer: Instruction,
}

#[derive(Clone)]
pub struct TxBuilder {
    ledger: Arc<dyn LedgerClient>,
}

impl TxBuilder {
    pub fn new(ledger: Arc<dyn LedgerClient>) -> Self {
        Self { ledger }
    }

    /// Build an unsigned transfer paid by `fee_payer`
    ///
    /// # Errors
    ///
    /// - `InvalidAmount` for quantities that do not scale to a positive `u64`
    /// - `MissingAccount` when the mint or source holding is absent or the
    ///   source balance does not cover the amount
    /// - `Ledger` when a lookup fails
    #[instrument(
        skip(self, intent, mode),
        fields(
            source = %intent.source,
            destination = %intent.destination,
            fee_payer = %fee_payer,
            durable = mode.is_durable(),
        )
    )]
    pub async fn build(
        &self,
        intent: &TransferIntent,
        fee_payer: &Pubkey,
        mode: AnchorMode,
    ) -> Result<PendingTransaction, CosignError> {
        let timer = Timer::new();

        let parts = match intent.asset {
            Asset::Native => self.plan_native(intent).await?,
            Asset::Token { mint } => self.plan_token(intent, &mint, fee_payer).await?,
        };
        let memo_ix = intent
            .memo
            .as_deref()
            .map(|text| memo_instruction(&intent.source, text))
            .transpose()?;

        let anchor = mode.resolve(self.ledger.as_ref()).await?;
        let plan = plan_transfer_instructions(
            anchor.nonce_handle(),
            parts.create_destination,
            parts.transfer,
            memo_ix,
        )?;
        sanity_check_ix_order(&plan.instructions, plan.is_durable)?;

        let pending = PendingTransaction::new(&plan.instructions, fee_payer, anchor);

        metrics().envelopes_built.inc();
        timer.observe_duration(&metrics().build_latency);
        debug!(
            instructions = plan.instructions.len(),
            anchor = %pending.anchor().token(),
            signers = pending.required_signers().len(),
            "transfer transaction built"
        );
        Ok(pending)
    }

    async fn plan_native(&self, intent: &TransferIntent) -> Result<TransferParts, CosignError> {
        let lamports = parse_ui_amount(&intent.amount, NATIVE_DECIMALS)?;
        let available = self.ledger.balance(&intent.source).await?;
        if available < lamports {
            return Err(CosignError::insufficient(intent.source, lamports, available));
        }
        Ok(TransferParts {
            create_destination: None,
            transfer: system_instruction::transfer(&intent.source, &intent.destination, lamports),
        })
    }

    async fn plan_token(
        &self,
        intent: &TransferIntent,
        mint: &Pubkey,
        fee_payer: &Pubkey,
    ) -> Result<TransferParts, CosignError> {
        let mint_info = self
            .ledger
            .mint(mint)
            .await?
            .ok_or_else(|| CosignError::not_found(*mint))?;
        let amount = parse_ui_amount(&intent.amount, mint_info.decimals)?;

        let source_holding = get_associated_token_address(&intent.source, mint);
        let holding = self
            .ledger
            .token_holding(&source_holding)
            .await?
            .ok_or_else(|| CosignError::not_found(source_holding))?;
        if holding.amount < amount {
            return Err(CosignError::insufficient(source_holding, amount, holding.amount));
        }

        let destination_holding = get_associated_token_address(&intent.destination, mint);
        let create_destination = match self.ledger.token_holding(&destination_holding).await? {
            Some(_) => None,
            None => {
                info!(
                    holding = %destination_holding,
                    owner = %intent.destination,
                    "destination holding account missing, prepending creation"
                );
                Some(create_associated_token_account(
                    fee_payer,
                    &intent.destination,
                    mint,
                    &spl_token::id(),
                ))
            }
        };

        let transfer = spl_token::instruction::transfer_checked(
            &spl_token::id(),
            &source_holding,
            mint,
            &destination_holding,
            &intent.source,
            &[],
            amount,
            mint_info.decimals,
        )
        .map_err(|e| CosignError::instruction_failed("spl-token", e.to_string()))?;

        Ok(TransferParts {
            create_destination,
            transfer,
        })
    }
}

/// Assemble arbitrary instructions into a pending transaction
///
/// Used by the administrative helpers (nonce and token management) that do not
/// go through a transfer intent. Durable anchors get the advance prepended.
pub fn assemble(
    body: Vec<Instruction>,
    fee_payer: &Pubkey,
    anchor: FreshnessAnchor,
) -> Result<PendingTransaction, CosignError> {
    let plan = plan_instructions(anchor.nonce_handle(), body)?;
    sanity_check_ix_order(&plan.instructions, plan.is_durable)?;
    metrics().envelopes_built.inc();
    Ok(PendingTransaction::new(&plan.instructions, fee_payer, anchor))
}
