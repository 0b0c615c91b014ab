//! Token administration helpers
//!
//! Mint creation, minting, holding-account management and the non-delegated
//! transfer path. Each operation is a single self-paid transaction built and
//! submitted through the same builder/coordinator/submit pipeline as the
//! delegated flow. Multisig mint authorities live in [`multisig`], metadata
//! records in [`metadata`].

pub mod metadata;
pub mod multisig;

pub use metadata::MetadataFields;

use crate::coordinator::sign_partial;
use crate::errors::CosignError;
use crate::ledger::{LedgerClient, MintInfo, TokenHolding};
use crate::submit::{broadcast, send_with_signers, SubmitOutcome};
use crate::tx_builder::{parse_ui_amount, AnchorMode, TransferIntent, TxBuilder};
use solana_sdk::{
    instruction::Instruction,
    program_pack::Pack,
    pubkey::Pubkey,
    signature::{Keypair, Signer},
    system_instruction,
};
use spl_associated_token_account::{
    get_associated_token_address, instruction::create_associated_token_account_idempotent,
};
use std::sync::Arc;
use tracing::{debug, info, instrument};

pub struct TokenAdmin {
    ledger: Arc<dyn LedgerClient>,
    builder: TxBuilder,
}

impl TokenAdmin {
    pub fn new(ledger: Arc<dyn LedgerClient>) -> Self {
        Self {
            builder: TxBuilder::new(Arc::clone(&ledger)),
            ledger,
        }
    }

    /// Create a mint with the given authority and decimal scale
    #[instrument(skip(self, payer), fields(payer = %payer.pubkey()))]
    pub async fn create_mint(
        &self,
        payer: &dyn Signer,
        mint_authority: &Pubkey,
        decimals: u8,
    ) -> Result<MintInfo, CosignError> {
        let mint = Keypair::new();
        let space = spl_token::state::Mint::LEN;
        let rent = self.ledger.rent_exempt_minimum(space).await?;

        let instructions = vec![
            system_instruction::create_account(
                &payer.pubkey(),
                &mint.pubkey(),
                rent,
                space as u64,
                &spl_token::id(),
            ),
            spl_token::instruction::initialize_mint2(
                &spl_token::id(),
                &mint.pubkey(),
                mint_authority,
                None,
                decimals,
            )
            .map_err(|e| CosignError::instruction_failed("spl-token", e.to_string()))?,
        ];
        send_with_signers(self.ledger.as_ref(), instructions, &[payer, &mint]).await?;

        let info = self
            .ledger
            .mint(&mint.pubkey())
            .await?
            .ok_or_else(|| CosignError::not_found(mint.pubkey()))?;
        info!(mint = %info.address, decimals = info.decimals, "mint created");
        Ok(info)
    }

    /// Holding account of `owner` for `mint`, if it exists
    pub async fn holding(
        &self,
        mint: &Pubkey,
        owner: &Pubkey,
    ) -> Result<Option<TokenHolding>, CosignError> {
        let address = get_associated_token_address(owner, mint);
        Ok(self.ledger.token_holding(&address).await?)
    }

    /// Derive the owner's holding account, creating it when absent
    #[instrument(skip(self, payer), fields(payer = %payer.pubkey()))]
    pub async fn get_or_create_holding_account(
        &self,
        mint: &Pubkey,
        owner: &Pubkey,
        payer: &dyn Signer,
    ) -> Result<Pubkey, CosignError> {
        let address = get_associated_token_address(owner, mint);
        if self.ledger.token_holding(&address).await?.is_some() {
            return Ok(address);
        }

        let ix = create_associated_token_account_idempotent(
            &payer.pubkey(),
            owner,
            mint,
            &spl_token::id(),
        );
        send_with_signers(self.ledger.as_ref(), vec![ix], &[payer]).await?;
        info!(holding = %address, "holding account created");
        Ok(address)
    }

    /// Mint `amount` whole units to the owner's holding account
    ///
    /// The amount is scaled with the decimals read from the mint, and the
    /// holding account is created in the same transaction when missing.
    #[instrument(skip(self, authority, payer))]
    pub async fn mint_to(
        &self,
        mint: &Pubkey,
        owner: &Pubkey,
        amount: &str,
        authority: &dyn Signer,
        payer: &dyn Signer,
    ) -> Result<SubmitOutcome, CosignError> {
        let info = self.existing_mint(mint).await?;
        if info.mint_authority != Some(authority.pubkey()) {
            return Err(CosignError::NotASigner(authority.pubkey()));
        }
        let (holding, instructions) = self
            .mint_instructions(&info, owner, amount, &authority.pubkey(), &[], &payer.pubkey())
            .await?;

        let outcome =
            send_with_signers(self.ledger.as_ref(), instructions, &[payer, authority]).await?;
        info!(holding = %holding, "tokens minted");
        Ok(outcome)
    }

    async fn existing_mint(&self, mint: &Pubkey) -> Result<MintInfo, CosignError> {
        self.ledger
            .mint(mint)
            .await?
            .ok_or_else(|| CosignError::not_found(*mint))
    }

    /// Holding-account creation (when missing) followed by a checked mint
    async fn mint_instructions(
        &self,
        info: &MintInfo,
        owner: &Pubkey,
        amount: &str,
        authority: &Pubkey,
        multisig_signers: &[&Pubkey],
        payer: &Pubkey,
    ) -> Result<(Pubkey, Vec<Instruction>), CosignError> {
        let base_units = parse_ui_amount(amount, info.decimals)?;
        let holding = get_associated_token_address(owner, &info.address);

        let mut instructions = Vec::with_capacity(2);
        if self.ledger.token_holding(&holding).await?.is_none() {
            instructions.push(create_associated_token_account_idempotent(
                payer,
                owner,
                &info.address,
                &spl_token::id(),
            ));
        }
        instructions.push(
            spl_token::instruction::mint_to_checked(
                &spl_token::id(),
                &info.address,
                &holding,
                authority,
                multisig_signers,
                base_units,
                info.decimals,
            )
            .map_err(|e| CosignError::instruction_failed("spl-token", e.to_string()))?,
        );
        debug!(holding = %holding, base_units, "mint instructions built");
        Ok((holding, instructions))
    }

    /// Close the owner's empty holding account, returning its rent to the owner
    #[instrument(skip(self, owner, payer), fields(owner = %owner.pubkey()))]
    pub async fn close_holding_account(
        &self,
        mint: &Pubkey,
        owner: &dyn Signer,
        payer: &dyn Signer,
    ) -> Result<SubmitOutcome, CosignError> {
        let owner_key = owner.pubkey();
        let address = get_associated_token_address(&owner_key, mint);
        let holding = self
            .ledger
            .token_holding(&address)
            .await?
            .ok_or_else(|| CosignError::not_found(address))?;
        if holding.amount > 0 {
            return Err(CosignError::configuration(format!(
                "holding account {} still holds {} base units",
                address, holding.amount
            )));
        }

        let ix = spl_token::instruction::close_account(
            &spl_token::id(),
            &address,
            &owner_key,
            &owner_key,
            &[],
        )
        .map_err(|e| CosignError::instruction_failed("spl-token", e.to_string()))?;
        let outcome = send_with_signers(self.ledger.as_ref(), vec![ix], &[payer, owner]).await?;
        info!(holding = %address, "holding account closed");
        Ok(outcome)
    }

    /// Transfer where the sender pays its own fee
    pub async fn transfer_direct(
        &self,
        intent: &TransferIntent,
        sender: &dyn Signer,
    ) -> Result<SubmitOutcome, CosignError> {
        let sender_key = sender.pubkey();
        let mut pending = self
            .builder
            .build(intent, &sender_key, AnchorMode::Checkpoint)
            .await?;
        sign_partial(&mut pending, sender)?;
        broadcast(self.ledger.as_ref(), &mut pending).await
    }

    /// Native balance in lamports
    pub async fn balance(&self, owner: &Pubkey) -> Result<u64, CosignError> {
        Ok(self.ledger.balance(owner).await?)
    }

    /// Request test funds from the ledger's faucet
    #[instrument(skip(self))]
    pub async fn airdrop(&self, owner: &Pubkey, lamports: u64) -> Result<u64, CosignError> {
        let signature = self.ledger.request_airdrop(owner, lamports).await?;
        let balance = self.ledger.balance(owner).await?;
        info!(signature = %signature, balance, "airdrop received");
        Ok(balance)
    }
}
