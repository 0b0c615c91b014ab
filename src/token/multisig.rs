//! M-of-N multisig accounts as mint authorities

use super::TokenAdmin;
use crate::errors::CosignError;
use crate::ledger::MultisigInfo;
use crate::submit::{send_with_signers, SubmitOutcome};
use solana_sdk::{
    program_pack::Pack,
    pubkey::Pubkey,
    signature::{Keypair, Signer},
    system_instruction,
};
use spl_token::instruction::MAX_SIGNERS;
use std::collections::HashSet;
use tracing::{info, instrument};

/// Check the member list and threshold before anything is sent
pub fn validate_multisig(signers: &[Pubkey], threshold: u8) -> Result<(), CosignError> {
    if signers.is_empty() || signers.len() > MAX_SIGNERS {
        return Err(CosignError::configuration(format!(
            "a multisig needs between 1 and {} members, got {}",
            MAX_SIGNERS,
            signers.len()
        )));
    }
    if threshold == 0 || usize::from(threshold) > signers.len() {
        return Err(CosignError::configuration(format!(
            "threshold {} is outside 1..={}",
            threshold,
            signers.len()
        )));
    }
    let distinct: HashSet<&Pubkey> = signers.iter().collect();
    if distinct.len() != signers.len() {
        return Err(CosignError::configuration("multisig members must be distinct"));
    }
    Ok(())
}

impl TokenAdmin {
    /// Create a multisig account requiring `threshold` of `signers`
    #[instrument(skip(self, payer, signers), fields(payer = %payer.pubkey(), members = signers.len()))]
    pub async fn create_multisig(
        &self,
        payer: &dyn Signer,
        signers: &[Pubkey],
        threshold: u8,
    ) -> Result<MultisigInfo, CosignError> {
        validate_multisig(signers, threshold)?;

        let multisig = Keypair::new();
        let space = spl_token::state::Multisig::LEN;
        let rent = self.ledger.rent_exempt_minimum(space).await?;
        let members: Vec<&Pubkey> = signers.iter().collect();

        let instructions = vec![
            system_instruction::create_account(
                &payer.pubkey(),
                &multisig.pubkey(),
                rent,
                space as u64,
                &spl_token::id(),
            ),
            spl_token::instruction::initialize_multisig2(
                &spl_token::id(),
                &multisig.pubkey(),
                &members,
                threshold,
            )
            .map_err(|e| CosignError::instruction_failed("spl-token", e.to_string()))?,
        ];
        send_with_signers(self.ledger.as_ref(), instructions, &[payer, &multisig]).await?;

        let info = self
            .ledger
            .multisig(&multisig.pubkey())
            .await?
            .ok_or_else(|| CosignError::not_found(multisig.pubkey()))?;
        info!(multisig = %info.address, threshold, "multisig created");
        Ok(info)
    }

    /// Mint under a multisig mint authority
    ///
    /// Every supplied signer must be a member and at least `threshold` of
    /// them are required; they all sign the transaction next to the payer.
    #[instrument(skip(self, signers, payer), fields(signers = signers.len()))]
    pub async fn mint_to_multisig(
        &self,
        mint: &Pubkey,
        owner: &Pubkey,
        amount: &str,
        multisig: &Pubkey,
        signers: &[&dyn Signer],
        payer: &dyn Signer,
    ) -> Result<SubmitOutcome, CosignError> {
        let info = self.existing_mint(mint).await?;
        if info.mint_authority != Some(*multisig) {
            return Err(CosignError::configuration(format!(
                "mint {} is not controlled by multisig {}",
                mint, multisig
            )));
        }
        let account = self
            .ledger
            .multisig(multisig)
            .await?
            .ok_or_else(|| CosignError::not_found(*multisig))?;

        let mut keys: Vec<Pubkey> = Vec::with_capacity(signers.len());
        for signer in signers {
            let key = signer.pubkey();
            if !account.signers.contains(&key) {
                return Err(CosignError::NotASigner(key));
            }
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        if keys.len() < usize::from(account.threshold) {
            return Err(CosignError::configuration(format!(
                "multisig {} needs {} signatures, {} supplied",
                multisig,
                account.threshold,
                keys.len()
            )));
        }

        let key_refs: Vec<&Pubkey> = keys.iter().collect();
        let (holding, instructions) = self
            .mint_instructions(&info, owner, amount, multisig, &key_refs, &payer.pubkey())
            .await?;

        let mut all_signers: Vec<&dyn Signer> = Vec::with_capacity(signers.len() + 1);
        all_signers.push(payer);
        all_signers.extend_from_slice(signers);
        let outcome = send_with_signers(self.ledger.as_ref(), instructions, &all_signers).await?;
        info!(holding = %holding, multisig = %multisig, "tokens minted under multisig");
        Ok(outcome)
    }
}
