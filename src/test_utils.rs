//! Test Utilities Module
//!
//! [`MemoryLedger`] is an in-memory [`LedgerClient`] that executes the subset
//! of system, token, associated-account, nonce, memo and token-metadata
//! instructions this crate produces, with real signature verification, fee
//! charging, a sliding blockhash validity window and durable nonce tokens.
//!
//! These utilities are only compiled when running tests or when the
//! `test_utils` feature is enabled.

#![cfg(any(test, feature = "test_utils"))]

use crate::ledger::{
    Checkpoint, LedgerClient, LedgerError, LedgerResult, MintInfo, MultisigInfo, TokenHolding,
    TokenMetadata,
};
use crate::nonce::{NonceHandle, NONCE_ACCOUNT_LENGTH};
use crate::token::metadata::{
    metadata_address, wire, CREATE_METADATA_V3, MAX_NAME_LENGTH, MAX_SYMBOL_LENGTH,
    MAX_URI_LENGTH, METADATA_ACCOUNT_LEN, METADATA_PROGRAM_ID, UPDATE_METADATA_V2,
};
use crate::tx_builder::anchor::durable_nonce_accounts;
use crate::tx_builder::instructions::MEMO_PROGRAM_ID;
use async_trait::async_trait;
use borsh::BorshDeserialize;
use solana_sdk::{
    hash::{hashv, Hash},
    instruction::{CompiledInstruction, InstructionError},
    message::Message,
    program_pack::Pack,
    pubkey::Pubkey,
    sanitize::Sanitize,
    signature::{Keypair, Signature, Signer},
    system_instruction::SystemInstruction,
    system_program,
    transaction::{Transaction, TransactionError},
};
use spl_associated_token_account::get_associated_token_address;
use spl_token::instruction::{TokenInstruction, MAX_SIGNERS};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

/// Fee charged to the fee payer per required signature
pub const FEE_PER_SIGNATURE: u64 = 5_000;

/// Number of recent blockhashes accepted as anchors
pub const DEFAULT_VALID_WINDOW: usize = 150;

// Token program error codes
const TOKEN_INSUFFICIENT_FUNDS: u32 = 1;
const TOKEN_MINT_MISMATCH: u32 = 3;
const TOKEN_OWNER_MISMATCH: u32 = 4;
const TOKEN_ALREADY_IN_USE: u32 = 6;
const TOKEN_INVALID_SIGNER_COUNT: u32 = 7;
const TOKEN_INVALID_THRESHOLD: u32 = 8;
const TOKEN_NON_NATIVE_HAS_BALANCE: u32 = 11;
const TOKEN_DECIMALS_MISMATCH: u32 = 18;

// Token metadata program error codes
const METADATA_ALREADY_INITIALIZED: u32 = 3;
const METADATA_INVALID_KEY: u32 = 5;
const METADATA_UPDATE_AUTHORITY_INCORRECT: u32 = 7;
const METADATA_INVALID_MINT_AUTHORITY: u32 = 10;
const METADATA_NAME_TOO_LONG: u32 = 11;
const METADATA_SYMBOL_TOO_LONG: u32 = 12;
const METADATA_URI_TOO_LONG: u32 = 13;
const METADATA_DATA_IS_IMMUTABLE: u32 = 59;

// System program error codes
const SYSTEM_ACCOUNT_ALREADY_IN_USE: u32 = 0;
const SYSTEM_INSUFFICIENT_LAMPORTS: u32 = 1;
const NONCE_NOT_EXPIRED: u32 = 1;

/// Rent-exempt minimum for `len` data bytes (mainnet parameters)
pub fn rent_for(len: usize) -> u64 {
    (len as u64 + 128) * 6_960
}

fn durable_token(blockhash: &Hash) -> Hash {
    hashv(&[b"DURABLE_NONCE", blockhash.as_ref()])
}

#[derive(Debug, Clone, Default)]
struct Bank {
    lamports: HashMap<Pubkey, u64>,
    allocations: HashMap<Pubkey, (Pubkey, u64)>,
    mints: HashMap<Pubkey, MintInfo>,
    holdings: HashMap<Pubkey, TokenHolding>,
    multisigs: HashMap<Pubkey, MultisigInfo>,
    nonces: HashMap<Pubkey, NonceHandle>,
    /// Keyed by metadata address
    metadata: HashMap<Pubkey, TokenMetadata>,
}

impl Bank {
    fn balance(&self, account: &Pubkey) -> u64 {
        self.lamports.get(account).copied().unwrap_or(0)
    }

    fn exists(&self, account: &Pubkey) -> bool {
        self.balance(account) > 0 || self.allocations.contains_key(account)
    }

    fn debit(&mut self, account: &Pubkey, lamports: u64) -> Result<(), InstructionError> {
        let balance = self.lamports.entry(*account).or_default();
        if *balance < lamports {
            return Err(InstructionError::Custom(SYSTEM_INSUFFICIENT_LAMPORTS));
        }
        *balance -= lamports;
        Ok(())
    }

    fn credit(&mut self, account: &Pubkey, lamports: u64) {
        let balance = self.lamports.entry(*account).or_default();
        *balance = balance.saturating_add(lamports);
    }
}

/// One compiled instruction in the context of its message
struct Invocation<'a> {
    message: &'a Message,
    ix: &'a CompiledInstruction,
    /// Blockhash of the block the transaction lands in
    landing: Hash,
}

impl Invocation<'_> {
    fn account(&self, position: usize) -> Result<Pubkey, InstructionError> {
        self.ix
            .accounts
            .get(position)
            .and_then(|index| self.message.account_keys.get(*index as usize))
            .copied()
            .ok_or(InstructionError::NotEnoughAccountKeys)
    }

    fn signed(&self, key: &Pubkey) -> bool {
        self.message
            .account_keys
            .iter()
            .position(|k| k == key)
            .is_some_and(|index| self.message.is_signer(index))
    }

    fn require_signer(&self, key: &Pubkey) -> Result<(), InstructionError> {
        if self.signed(key) {
            Ok(())
        } else {
            Err(InstructionError::MissingRequiredSignature)
        }
    }

    fn execute(&self, bank: &mut Bank) -> Result<(), InstructionError> {
        let program = *self.ix.program_id(&self.message.account_keys);
        if program == system_program::id() {
            self.execute_system(bank)
        } else if program == spl_token::id() {
            self.execute_token(bank)
        } else if program == spl_associated_token_account::id() {
            self.execute_associated(bank)
        } else if program == MEMO_PROGRAM_ID {
            self.execute_memo()
        } else if program == METADATA_PROGRAM_ID {
            self.execute_metadata(bank)
        } else {
            Err(InstructionError::IncorrectProgramId)
        }
    }

    fn execute_system(&self, bank: &mut Bank) -> Result<(), InstructionError> {
        let instruction: SystemInstruction = bincode::deserialize(&self.ix.data)
            .map_err(|_| InstructionError::InvalidInstructionData)?;
        match instruction {
            SystemInstruction::Transfer { lamports } => {
                let from = self.account(0)?;
                let to = self.account(1)?;
                self.require_signer(&from)?;
                bank.debit(&from, lamports)?;
                bank.credit(&to, lamports);
            }
            SystemInstruction::CreateAccount {
                lamports,
                space,
                owner,
            } => {
                let from = self.account(0)?;
                let created = self.account(1)?;
                self.require_signer(&from)?;
                self.require_signer(&created)?;
                if bank.exists(&created) {
                    return Err(InstructionError::Custom(SYSTEM_ACCOUNT_ALREADY_IN_USE));
                }
                bank.debit(&from, lamports)?;
                bank.credit(&created, lamports);
                bank.allocations.insert(created, (owner, space));
            }
            SystemInstruction::InitializeNonceAccount(authority) => {
                let account = self.account(0)?;
                let allocated = bank.allocations.get(&account).copied();
                if allocated != Some((system_program::id(), NONCE_ACCOUNT_LENGTH as u64))
                    || bank.nonces.contains_key(&account)
                {
                    return Err(InstructionError::InvalidAccountData);
                }
                if bank.balance(&account) < rent_for(NONCE_ACCOUNT_LENGTH) {
                    return Err(InstructionError::InsufficientFunds);
                }
                bank.nonces.insert(
                    account,
                    NonceHandle {
                        account,
                        authority,
                        token: durable_token(&self.landing),
                    },
                );
            }
            SystemInstruction::AdvanceNonceAccount => {
                let account = self.account(0)?;
                let authority = self.account(2)?;
                let next = durable_token(&self.landing);
                let handle = bank
                    .nonces
                    .get_mut(&account)
                    .ok_or(InstructionError::InvalidAccountData)?;
                if handle.authority != authority || !self.signed(&authority) {
                    return Err(InstructionError::MissingRequiredSignature);
                }
                if handle.token == next {
                    return Err(InstructionError::Custom(NONCE_NOT_EXPIRED));
                }
                handle.token = next;
            }
            SystemInstruction::WithdrawNonceAccount(lamports) => {
                let account = self.account(0)?;
                let to = self.account(1)?;
                let authority = self.account(4)?;
                let handle = bank
                    .nonces
                    .get(&account)
                    .ok_or(InstructionError::InvalidAccountData)?;
                if handle.authority != authority || !self.signed(&authority) {
                    return Err(InstructionError::MissingRequiredSignature);
                }
                bank.debit(&account, lamports)?;
                bank.credit(&to, lamports);
                if bank.balance(&account) == 0 {
                    bank.nonces.remove(&account);
                    bank.allocations.remove(&account);
                }
            }
            _ => return Err(InstructionError::InvalidInstructionData),
        }
        Ok(())
    }

    fn execute_token(&self, bank: &mut Bank) -> Result<(), InstructionError> {
        let instruction = TokenInstruction::unpack(&self.ix.data)
            .map_err(|_| InstructionError::InvalidInstructionData)?;
        match instruction {
            TokenInstruction::InitializeMint {
                decimals,
                mint_authority,
                ..
            }
            | TokenInstruction::InitializeMint2 {
                decimals,
                mint_authority,
                ..
            } => {
                let mint = self.account(0)?;
                let allocated = bank.allocations.get(&mint).copied();
                if allocated != Some((spl_token::id(), spl_token::state::Mint::LEN as u64)) {
                    return Err(InstructionError::InvalidAccountData);
                }
                if bank.mints.contains_key(&mint) {
                    return Err(InstructionError::Custom(TOKEN_ALREADY_IN_USE));
                }
                bank.mints.insert(
                    mint,
                    MintInfo {
                        address: mint,
                        decimals,
                        supply: 0,
                        mint_authority: Some(mint_authority),
                    },
                );
            }
            TokenInstruction::InitializeMultisig { m } => self.initialize_multisig(bank, m, 2)?,
            TokenInstruction::InitializeMultisig2 { m } => self.initialize_multisig(bank, m, 1)?,
            TokenInstruction::Transfer { amount } => {
                let source = self.account(0)?;
                let destination = self.account(1)?;
                let authority = self.account(2)?;
                self.move_tokens(bank, &source, &destination, &authority, amount, None)?;
            }
            TokenInstruction::TransferChecked { amount, decimals } => {
                let source = self.account(0)?;
                let mint = self.account(1)?;
                let destination = self.account(2)?;
                let authority = self.account(3)?;
                self.move_tokens(
                    bank,
                    &source,
                    &destination,
                    &authority,
                    amount,
                    Some((mint, decimals)),
                )?;
            }
            TokenInstruction::MintTo { amount } => {
                self.mint_tokens(bank, amount, None)?;
            }
            TokenInstruction::MintToChecked { amount, decimals } => {
                self.mint_tokens(bank, amount, Some(decimals))?;
            }
            TokenInstruction::CloseAccount => {
                let account = self.account(0)?;
                let destination = self.account(1)?;
                let owner = self.account(2)?;
                let holding = bank
                    .holdings
                    .get(&account)
                    .ok_or(InstructionError::InvalidAccountData)?;
                if holding.owner != owner {
                    return Err(InstructionError::Custom(TOKEN_OWNER_MISMATCH));
                }
                self.require_signer(&owner)?;
                if holding.amount != 0 {
                    return Err(InstructionError::Custom(TOKEN_NON_NATIVE_HAS_BALANCE));
                }
                bank.holdings.remove(&account);
                let rent = bank.balance(&account);
                bank.debit(&account, rent)?;
                bank.credit(&destination, rent);
            }
            _ => return Err(InstructionError::InvalidInstructionData),
        }
        Ok(())
    }

    fn move_tokens(
        &self,
        bank: &mut Bank,
        source: &Pubkey,
        destination: &Pubkey,
        authority: &Pubkey,
        amount: u64,
        checked: Option<(Pubkey, u8)>,
    ) -> Result<(), InstructionError> {
        let from = bank
            .holdings
            .get(source)
            .cloned()
            .ok_or(InstructionError::InvalidAccountData)?;
        let to_mint = bank
            .holdings
            .get(destination)
            .map(|h| h.mint)
            .ok_or(InstructionError::InvalidAccountData)?;
        if from.owner != *authority {
            return Err(InstructionError::Custom(TOKEN_OWNER_MISMATCH));
        }
        self.require_signer(authority)?;
        if to_mint != from.mint {
            return Err(InstructionError::Custom(TOKEN_MINT_MISMATCH));
        }
        if let Some((mint, decimals)) = checked {
            if mint != from.mint {
                return Err(InstructionError::Custom(TOKEN_MINT_MISMATCH));
            }
            let info = bank
                .mints
                .get(&mint)
                .ok_or(InstructionError::InvalidAccountData)?;
            if info.decimals != decimals {
                return Err(InstructionError::Custom(TOKEN_DECIMALS_MISMATCH));
            }
        }
        if from.amount < amount {
            return Err(InstructionError::Custom(TOKEN_INSUFFICIENT_FUNDS));
        }
        if source == destination {
            return Ok(());
        }
        if let Some(h) = bank.holdings.get_mut(source) {
            h.amount -= amount;
        }
        if let Some(h) = bank.holdings.get_mut(destination) {
            h.amount = h
                .amount
                .checked_add(amount)
                .ok_or(InstructionError::ArithmeticOverflow)?;
        }
        Ok(())
    }

    fn mint_tokens(
        &self,
        bank: &mut Bank,
        amount: u64,
        decimals: Option<u8>,
    ) -> Result<(), InstructionError> {
        let mint = self.account(0)?;
        let destination = self.account(1)?;
        let authority = self.account(2)?;

        let controlled_by = bank
            .mints
            .get(&mint)
            .ok_or(InstructionError::InvalidAccountData)?
            .mint_authority;
        if controlled_by != Some(authority) {
            return Err(InstructionError::Custom(TOKEN_OWNER_MISMATCH));
        }
        match bank.multisigs.get(&authority) {
            Some(multisig) => self.require_multisig(multisig, 3)?,
            None => self.require_signer(&authority)?,
        }

        let info = bank
            .mints
            .get_mut(&mint)
            .ok_or(InstructionError::InvalidAccountData)?;
        if decimals.is_some_and(|d| d != info.decimals) {
            return Err(InstructionError::Custom(TOKEN_DECIMALS_MISMATCH));
        }
        info.supply = info
            .supply
            .checked_add(amount)
            .ok_or(InstructionError::ArithmeticOverflow)?;

        let holding = bank
            .holdings
            .get_mut(&destination)
            .ok_or(InstructionError::InvalidAccountData)?;
        if holding.mint != mint {
            return Err(InstructionError::Custom(TOKEN_MINT_MISMATCH));
        }
        holding.amount = holding
            .amount
            .checked_add(amount)
            .ok_or(InstructionError::ArithmeticOverflow)?;
        Ok(())
    }

    /// Members follow the multisig account from position `first_signer`
    fn initialize_multisig(
        &self,
        bank: &mut Bank,
        threshold: u8,
        first_signer: usize,
    ) -> Result<(), InstructionError> {
        let multisig = self.account(0)?;
        let allocated = bank.allocations.get(&multisig).copied();
        if allocated != Some((spl_token::id(), spl_token::state::Multisig::LEN as u64)) {
            return Err(InstructionError::InvalidAccountData);
        }
        if bank.multisigs.contains_key(&multisig) {
            return Err(InstructionError::Custom(TOKEN_ALREADY_IN_USE));
        }
        let signers = (first_signer..self.ix.accounts.len())
            .map(|position| self.account(position))
            .collect::<Result<Vec<_>, _>>()?;
        if signers.is_empty() || signers.len() > MAX_SIGNERS {
            return Err(InstructionError::Custom(TOKEN_INVALID_SIGNER_COUNT));
        }
        if threshold == 0 || usize::from(threshold) > signers.len() {
            return Err(InstructionError::Custom(TOKEN_INVALID_THRESHOLD));
        }
        bank.multisigs.insert(
            multisig,
            MultisigInfo {
                address: multisig,
                threshold,
                signers,
            },
        );
        Ok(())
    }

    /// Count distinct members among the signing accounts from `first_signer` on
    fn require_multisig(
        &self,
        multisig: &MultisigInfo,
        first_signer: usize,
    ) -> Result<(), InstructionError> {
        let mut approvals = HashSet::new();
        for position in first_signer..self.ix.accounts.len() {
            let key = self.account(position)?;
            if multisig.signers.contains(&key) && self.signed(&key) {
                approvals.insert(key);
            }
        }
        if approvals.len() < usize::from(multisig.threshold) {
            return Err(InstructionError::MissingRequiredSignature);
        }
        Ok(())
    }

    fn execute_metadata(&self, bank: &mut Bank) -> Result<(), InstructionError> {
        let (discriminator, args) = self
            .ix
            .data
            .split_first()
            .ok_or(InstructionError::InvalidInstructionData)?;
        match *discriminator {
            CREATE_METADATA_V3 => {
                let args = wire::CreateMetadataArgs::try_from_slice(args)
                    .map_err(|_| InstructionError::InvalidInstructionData)?;
                self.create_metadata(bank, args)
            }
            UPDATE_METADATA_V2 => {
                let args = wire::UpdateMetadataArgs::try_from_slice(args)
                    .map_err(|_| InstructionError::InvalidInstructionData)?;
                self.update_metadata(bank, args)
            }
            _ => Err(InstructionError::InvalidInstructionData),
        }
    }

    fn create_metadata(
        &self,
        bank: &mut Bank,
        args: wire::CreateMetadataArgs,
    ) -> Result<(), InstructionError> {
        let metadata = self.account(0)?;
        let mint = self.account(1)?;
        let mint_authority = self.account(2)?;
        let payer = self.account(3)?;
        let update_authority = self.account(4)?;

        if metadata_address(&mint) != metadata {
            return Err(InstructionError::Custom(METADATA_INVALID_KEY));
        }
        let info = bank.mints.get(&mint).ok_or(InstructionError::InvalidAccountData)?;
        if info.mint_authority != Some(mint_authority) {
            return Err(InstructionError::Custom(METADATA_INVALID_MINT_AUTHORITY));
        }
        self.require_signer(&mint_authority)?;
        self.require_signer(&payer)?;
        if bank.metadata.contains_key(&metadata) {
            return Err(InstructionError::Custom(METADATA_ALREADY_INITIALIZED));
        }
        check_metadata_lengths(&args.data)?;

        let rent = rent_for(METADATA_ACCOUNT_LEN);
        bank.debit(&payer, rent)?;
        bank.credit(&metadata, rent);
        bank.allocations
            .insert(metadata, (METADATA_PROGRAM_ID, METADATA_ACCOUNT_LEN as u64));
        bank.metadata.insert(
            metadata,
            TokenMetadata {
                address: metadata,
                mint,
                update_authority,
                name: args.data.name,
                symbol: args.data.symbol,
                uri: args.data.uri,
                seller_fee_basis_points: args.data.seller_fee_basis_points,
                is_mutable: args.is_mutable,
            },
        );
        Ok(())
    }

    fn update_metadata(
        &self,
        bank: &mut Bank,
        args: wire::UpdateMetadataArgs,
    ) -> Result<(), InstructionError> {
        let metadata = self.account(0)?;
        let update_authority = self.account(1)?;
        let record = bank
            .metadata
            .get_mut(&metadata)
            .ok_or(InstructionError::UninitializedAccount)?;
        if record.update_authority != update_authority {
            return Err(InstructionError::Custom(METADATA_UPDATE_AUTHORITY_INCORRECT));
        }
        self.require_signer(&update_authority)?;
        if !record.is_mutable {
            return Err(InstructionError::Custom(METADATA_DATA_IS_IMMUTABLE));
        }

        if let Some(data) = args.data {
            check_metadata_lengths(&data)?;
            record.name = data.name;
            record.symbol = data.symbol;
            record.uri = data.uri;
            record.seller_fee_basis_points = data.seller_fee_basis_points;
        }
        if let Some(authority) = args.new_update_authority {
            record.update_authority = Pubkey::new_from_array(authority);
        }
        if let Some(is_mutable) = args.is_mutable {
            record.is_mutable = is_mutable;
        }
        Ok(())
    }

    fn execute_associated(&self, bank: &mut Bank) -> Result<(), InstructionError> {
        let payer = self.account(0)?;
        let holding = self.account(1)?;
        let wallet = self.account(2)?;
        let mint = self.account(3)?;
        let idempotent = self.ix.data.first() == Some(&1);

        if get_associated_token_address(&wallet, &mint) != holding {
            return Err(InstructionError::InvalidSeeds);
        }
        if !bank.mints.contains_key(&mint) {
            return Err(InstructionError::InvalidAccountData);
        }
        if bank.holdings.contains_key(&holding) {
            return if idempotent {
                Ok(())
            } else {
                Err(InstructionError::Custom(SYSTEM_ACCOUNT_ALREADY_IN_USE))
            };
        }
        self.require_signer(&payer)?;

        let rent = rent_for(spl_token::state::Account::LEN);
        bank.debit(&payer, rent)?;
        bank.credit(&holding, rent);
        bank.holdings.insert(
            holding,
            TokenHolding {
                address: holding,
                mint,
                owner: wallet,
                amount: 0,
            },
        );
        Ok(())
    }

    fn execute_memo(&self) -> Result<(), InstructionError> {
        std::str::from_utf8(&self.ix.data).map_err(|_| InstructionError::InvalidInstructionData)?;
        for position in 0..self.ix.accounts.len() {
            self.require_signer(&self.account(position)?)?;
        }
        Ok(())
    }
}

fn check_metadata_lengths(data: &wire::DataV2) -> Result<(), InstructionError> {
    if data.name.len() > MAX_NAME_LENGTH {
        return Err(InstructionError::Custom(METADATA_NAME_TOO_LONG));
    }
    if data.symbol.len() > MAX_SYMBOL_LENGTH {
        return Err(InstructionError::Custom(METADATA_SYMBOL_TOO_LONG));
    }
    if data.uri.len() > MAX_URI_LENGTH {
        return Err(InstructionError::Custom(METADATA_URI_TOO_LONG));
    }
    Ok(())
}

enum Injection {
    /// Fail before anything is executed
    Before(LedgerError),
    /// Execute and commit, then report the failure (lost confirmation)
    After(LedgerError),
}

struct State {
    bank: Bank,
    checkpoints: VecDeque<Hash>,
    valid_window: usize,
    block_height: u64,
    statuses: HashMap<Signature, Result<(), TransactionError>>,
    injected: VecDeque<Injection>,
    submissions: usize,
}

impl State {
    fn latest(&self) -> Hash {
        self.checkpoints.back().copied().unwrap_or_default()
    }

    fn produce_block(&mut self) {
        self.push_block(Hash::new_unique());
    }

    fn push_block(&mut self, blockhash: Hash) {
        self.checkpoints.push_back(blockhash);
        while self.checkpoints.len() > self.valid_window {
            self.checkpoints.pop_front();
        }
        self.block_height += 1;
    }

    fn process(&mut self, tx: &Transaction) -> Result<(), TransactionError> {
        tx.sanitize()?;
        tx.verify()?;

        let message = &tx.message;
        if !self.checkpoints.contains(&message.recent_blockhash) {
            let (account, _) =
                durable_nonce_accounts(message).ok_or(TransactionError::BlockhashNotFound)?;
            let current = self
                .bank
                .nonces
                .get(&account)
                .ok_or(TransactionError::BlockhashNotFound)?;
            if current.token != message.recent_blockhash {
                return Err(TransactionError::BlockhashNotFound);
            }
        }

        let fee_payer = message
            .account_keys
            .first()
            .copied()
            .ok_or(TransactionError::AccountNotFound)?;
        let fee = FEE_PER_SIGNATURE * u64::from(message.header.num_required_signatures);
        let mut bank = self.bank.clone();
        if bank.balance(&fee_payer) == 0 {
            return Err(TransactionError::AccountNotFound);
        }
        bank.debit(&fee_payer, fee)
            .map_err(|_| TransactionError::InsufficientFundsForFee)?;

        let landing = Hash::new_unique();
        for (index, ix) in message.instructions.iter().enumerate() {
            Invocation {
                message,
                ix,
                landing,
            }
            .execute(&mut bank)
            .map_err(|err| TransactionError::InstructionError(index as u8, err))?;
        }

        self.bank = bank;
        self.push_block(landing);
        Ok(())
    }
}

/// In-memory ledger for deterministic tests
pub struct MemoryLedger {
    state: Mutex<State>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::with_valid_window(DEFAULT_VALID_WINDOW)
    }

    /// Ledger accepting only the `window` most recent blockhashes
    pub fn with_valid_window(window: usize) -> Self {
        let mut state = State {
            bank: Bank::default(),
            checkpoints: VecDeque::new(),
            valid_window: window.max(1),
            block_height: 0,
            statuses: HashMap::new(),
            injected: VecDeque::new(),
            submissions: 0,
        };
        state.produce_block();
        Self {
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn fund(&self, owner: &Pubkey, lamports: u64) {
        self.lock().bank.credit(owner, lamports);
    }

    pub fn lamports(&self, owner: &Pubkey) -> u64 {
        self.lock().bank.balance(owner)
    }

    /// Register an initialized mint and return its address
    pub fn add_mint(&self, decimals: u8, authority: &Pubkey) -> Pubkey {
        let mint = Pubkey::new_unique();
        let mut state = self.lock();
        state.bank.credit(&mint, rent_for(spl_token::state::Mint::LEN));
        state
            .bank
            .allocations
            .insert(mint, (spl_token::id(), spl_token::state::Mint::LEN as u64));
        state.bank.mints.insert(
            mint,
            MintInfo {
                address: mint,
                decimals,
                supply: 0,
                mint_authority: Some(*authority),
            },
        );
        mint
    }

    pub fn mint_info(&self, mint: &Pubkey) -> Option<MintInfo> {
        self.lock().bank.mints.get(mint).cloned()
    }

    /// Create (or overwrite) the owner's holding account with `amount` base units
    pub fn set_holding(&self, owner: &Pubkey, mint: &Pubkey, amount: u64) -> Pubkey {
        let address = get_associated_token_address(owner, mint);
        let mut state = self.lock();
        let previous = state
            .bank
            .holdings
            .insert(
                address,
                TokenHolding {
                    address,
                    mint: *mint,
                    owner: *owner,
                    amount,
                },
            )
            .map(|h| h.amount)
            .unwrap_or(0);
        if previous == 0 {
            state.bank.credit(&address, rent_for(spl_token::state::Account::LEN));
        }
        if let Some(info) = state.bank.mints.get_mut(mint) {
            info.supply = info.supply.saturating_sub(previous).saturating_add(amount);
        }
        address
    }

    /// Token balance of the owner's holding account, `None` when it does not exist
    pub fn token_balance(&self, owner: &Pubkey, mint: &Pubkey) -> Option<u64> {
        let address = get_associated_token_address(owner, mint);
        self.lock().bank.holdings.get(&address).map(|h| h.amount)
    }

    /// Register an initialized nonce account controlled by `authority`
    pub fn add_nonce(&self, authority: &Pubkey) -> NonceHandle {
        let account = Pubkey::new_unique();
        let mut state = self.lock();
        let handle = NonceHandle {
            account,
            authority: *authority,
            token: durable_token(&state.latest()),
        };
        state.bank.credit(&account, rent_for(NONCE_ACCOUNT_LENGTH));
        state
            .bank
            .allocations
            .insert(account, (system_program::id(), NONCE_ACCOUNT_LENGTH as u64));
        state.bank.nonces.insert(account, handle);
        handle
    }

    /// Register a system account of nonce size that was never initialized
    pub fn add_uninitialized_nonce(&self) -> Pubkey {
        let account = Pubkey::new_unique();
        let mut state = self.lock();
        state.bank.credit(&account, rent_for(NONCE_ACCOUNT_LENGTH));
        state
            .bank
            .allocations
            .insert(account, (system_program::id(), NONCE_ACCOUNT_LENGTH as u64));
        account
    }

    pub fn nonce_state(&self, account: &Pubkey) -> Option<NonceHandle> {
        self.lock().bank.nonces.get(account).copied()
    }

    pub fn multisig_info(&self, address: &Pubkey) -> Option<MultisigInfo> {
        self.lock().bank.multisigs.get(address).cloned()
    }

    pub fn metadata_record(&self, mint: &Pubkey) -> Option<TokenMetadata> {
        self.lock().bank.metadata.get(&metadata_address(mint)).cloned()
    }

    pub fn produce_blocks(&self, count: usize) {
        let mut state = self.lock();
        for _ in 0..count {
            state.produce_block();
        }
    }

    /// Push every current blockhash out of the validity window
    pub fn expire_checkpoints(&self) {
        let mut state = self.lock();
        for _ in 0..state.valid_window {
            state.produce_block();
        }
    }

    /// Make the next submit fail with `err` without executing anything
    pub fn fail_next_submit(&self, err: LedgerError) {
        self.lock().injected.push_back(Injection::Before(err));
    }

    /// Make the next submit execute and commit, then report `err`
    pub fn drop_next_confirmation(&self, err: LedgerError) {
        self.lock().injected.push_back(Injection::After(err));
    }

    /// Number of submit calls received, including failed ones
    pub fn submission_count(&self) -> usize {
        self.lock().submissions
    }

    pub fn is_processed(&self, signature: &Signature) -> bool {
        self.lock().statuses.contains_key(signature)
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerClient for MemoryLedger {
    async fn balance(&self, owner: &Pubkey) -> LedgerResult<u64> {
        Ok(self.lamports(owner))
    }

    async fn mint(&self, mint: &Pubkey) -> LedgerResult<Option<MintInfo>> {
        Ok(self.mint_info(mint))
    }

    async fn token_holding(&self, address: &Pubkey) -> LedgerResult<Option<TokenHolding>> {
        Ok(self.lock().bank.holdings.get(address).cloned())
    }

    async fn latest_checkpoint(&self) -> LedgerResult<Checkpoint> {
        let state = self.lock();
        Ok(Checkpoint {
            blockhash: state.latest(),
            last_valid_block_height: state.block_height + state.valid_window as u64,
        })
    }

    async fn is_checkpoint_valid(&self, blockhash: &Hash) -> LedgerResult<bool> {
        Ok(self.lock().checkpoints.contains(blockhash))
    }

    async fn multisig(&self, address: &Pubkey) -> LedgerResult<Option<MultisigInfo>> {
        Ok(self.multisig_info(address))
    }

    async fn token_metadata(&self, mint: &Pubkey) -> LedgerResult<Option<TokenMetadata>> {
        Ok(self.metadata_record(mint))
    }

    async fn nonce(&self, account: &Pubkey) -> LedgerResult<Option<NonceHandle>> {
        let state = self.lock();
        if let Some(handle) = state.bank.nonces.get(account) {
            return Ok(Some(*handle));
        }
        match state.bank.allocations.get(account) {
            Some((owner, _)) if *owner == system_program::id() => {
                Err(LedgerError::Uninitialized { account: *account })
            }
            Some(_) => Err(LedgerError::decode(*account, "not owned by the system program")),
            None => Ok(None),
        }
    }

    async fn rent_exempt_minimum(&self, data_len: usize) -> LedgerResult<u64> {
        Ok(rent_for(data_len))
    }

    async fn submit(&self, transaction: &Transaction) -> LedgerResult<Signature> {
        let mut state = self.lock();
        state.submissions += 1;

        let after = match state.injected.pop_front() {
            Some(Injection::Before(err)) => return Err(err),
            Some(Injection::After(err)) => Some(err),
            None => None,
        };

        let signature = transaction.signatures.first().copied().unwrap_or_default();
        if state.statuses.contains_key(&signature) {
            return Err(LedgerError::Transaction(TransactionError::AlreadyProcessed));
        }

        state.process(transaction).map_err(LedgerError::Transaction)?;
        state.statuses.insert(signature, Ok(()));

        match after {
            Some(err) => Err(err),
            None => Ok(signature),
        }
    }

    async fn signature_status(
        &self,
        signature: &Signature,
    ) -> LedgerResult<Option<Result<(), TransactionError>>> {
        Ok(self.lock().statuses.get(signature).cloned())
    }

    async fn request_airdrop(&self, to: &Pubkey, lamports: u64) -> LedgerResult<Signature> {
        self.fund(to, lamports);
        self.produce_blocks(1);
        Ok(Keypair::new().sign_message(to.as_ref()))
    }
}
