//! Instruction planning and ordering validation
//!
//! Transfer transactions follow a fixed layout:
//! 1. advance_nonce_account (iff nonce-anchored, always index 0)
//! 2. associated holding account creation (optional, funded by the fee payer)
//! 3. the transfer itself
//! 4. memo (optional)
//!
//! Planning is stateless; the ordering check is compiled in debug/test builds only.

use crate::errors::CosignError;
use crate::nonce::NonceHandle;
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    system_program,
};

/// SPL memo program (v2)
pub const MEMO_PROGRAM_ID: Pubkey = solana_sdk::pubkey!("MemoSq4gqABAXKb96qnH8TysNcWxMyWCqXgDLGmfcHr");

/// Largest memo accepted by the builder, in bytes
pub const MAX_MEMO_LEN: usize = 566;

/// Plan of instructions with ordering metadata
#[derive(Debug, Clone)]
pub struct InstructionPlan {
    /// The ordered list of instructions for the transaction
    pub instructions: Vec<Instruction>,

    /// Whether this plan uses durable nonce
    /// - `true`: First instruction must be advance_nonce_account
    /// - `false`: Standard blockhash-based transaction
    pub is_durable: bool,
}

impl InstructionPlan {
    pub fn new(instructions: Vec<Instruction>, is_durable: bool) -> Self {
        Self {
            instructions,
            is_durable,
        }
    }
}

/// System program `AdvanceNonceAccount` carries discriminator 4 as a little-endian u32
pub fn is_advance_nonce_data(program_id: &Pubkey, data: &[u8]) -> bool {
    *program_id == system_program::id() && data.len() >= 4 && data[..4] == [4, 0, 0, 0]
}

pub fn is_advance_nonce(ix: &Instruction) -> bool {
    is_advance_nonce_data(&ix.program_id, &ix.data)
}

/// Memo signed by `signer`, so the note is attributable on chain
pub fn memo_instruction(signer: &Pubkey, text: &str) -> Result<Instruction, CosignError> {
    if text.len() > MAX_MEMO_LEN {
        return Err(CosignError::instruction_failed(
            "memo",
            format!("memo is {} bytes, limit is {}", text.len(), MAX_MEMO_LEN),
        ));
    }
    Ok(Instruction::new_with_bytes(
        MEMO_PROGRAM_ID,
        text.as_bytes(),
        vec![AccountMeta::new_readonly(*signer, true)],
    ))
}

/// Plan transfer instructions in the fixed order
///
/// # Arguments
///
/// * `nonce` - Durable nonce handle when the transaction is nonce-anchored
/// * `create_destination` - Holding account creation, when the destination lacks one
/// * `transfer_ix` - The transfer instruction
/// * `memo_ix` - Optional memo appended last
///
/// # Errors
///
/// Returns `CosignError::Configuration` if the transfer instruction has no accounts
pub fn plan_transfer_instructions(
    nonce: Option<&NonceHandle>,
    create_destination: Option<Instruction>,
    transfer_ix: Instruction,
    memo_ix: Option<Instruction>,
) -> Result<InstructionPlan, CosignError> {
    if transfer_ix.accounts.is_empty() {
        return Err(CosignError::configuration("Transfer instruction has no accounts"));
    }

    // Maximum: advance_nonce (1) + create (1) + transfer (1) + memo (1) = 4
    let mut instructions = Vec::with_capacity(4);

    let is_durable = nonce.is_some();
    if let Some(handle) = nonce {
        instructions.push(handle.advance_instruction());
    }

    instructions.extend(create_destination);
    instructions.push(transfer_ix);
    instructions.extend(memo_ix);

    Ok(InstructionPlan::new(instructions, is_durable))
}

/// Prefix arbitrary instructions with the nonce advance when durable
pub fn plan_instructions(
    nonce: Option<&NonceHandle>,
    body: Vec<Instruction>,
) -> Result<InstructionPlan, CosignError> {
    if body.is_empty() && nonce.is_none() {
        return Err(CosignError::configuration("Transaction has no instructions"));
    }
    let mut instructions = Vec::with_capacity(body.len() + 1);
    if let Some(handle) = nonce {
        instructions.push(handle.advance_instruction());
    }
    instructions.extend(body);
    Ok(InstructionPlan::new(instructions, nonce.is_some()))
}

/// Validate instruction ordering for durable nonce transactions (debug/test only)
///
/// # Errors
///
/// Returns `CosignError::InvalidInstructionOrder` if:
/// - Instruction list is empty
/// - Durable transaction doesn't start with advance_nonce
/// - Multiple advance_nonce instructions found
/// - advance_nonce found in non-durable transaction
#[cfg(debug_assertions)]
pub fn sanity_check_ix_order(
    instructions: &[Instruction],
    is_durable: bool,
) -> Result<(), CosignError> {
    if instructions.is_empty() {
        return Err(CosignError::invalid_order("Instruction list is empty"));
    }

    let first_is_advance_nonce = is_advance_nonce(&instructions[0]);

    if is_durable {
        if !first_is_advance_nonce {
            return Err(CosignError::invalid_order(format!(
                "Durable nonce transaction must start with advance_nonce_account, got program_id: {}",
                instructions[0].program_id
            )));
        }

        for (idx, ix) in instructions.iter().enumerate().skip(1) {
            if is_advance_nonce(ix) {
                return Err(CosignError::invalid_order(format!(
                    "Multiple advance_nonce_account instructions found (at position {}). Only one allowed at position 0",
                    idx
                )));
            }
        }
    } else if let Some(idx) = instructions.iter().position(is_advance_nonce) {
        return Err(CosignError::invalid_order(format!(
            "Non-durable transaction should not have advance_nonce_account (found at position {})",
            idx
        )));
    }

    Ok(())
}

/// No-op version of sanity_check_ix_order for release builds
#[cfg(not(debug_assertions))]
#[inline]
pub fn sanity_check_ix_order(
    _instructions: &[Instruction],
    _is_durable: bool,
) -> Result<(), CosignError> {
    Ok(())
}
