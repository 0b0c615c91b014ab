//! Ledger access seam
//!
//! Everything the workflow needs from the network goes through [`LedgerClient`]:
//! account lookups, freshness anchors, fee/rent parameters and submission.
//! [`RpcLedger`] implements it over the nonblocking `solana-client` RPC client;
//! tests use the in-memory ledger from `test_utils`.

pub mod errors;
pub mod rpc;

pub use errors::{LedgerError, LedgerResult, RetryPolicy};
pub use rpc::RpcLedger;

use crate::nonce::NonceHandle;
use async_trait::async_trait;
use solana_sdk::{
    hash::Hash,
    pubkey::Pubkey,
    signature::Signature,
    transaction::{Transaction, TransactionError},
};

/// A recent blockhash together with the last block height it stays valid for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    pub blockhash: Hash,
    pub last_valid_block_height: u64,
}

/// Token mint as read from the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintInfo {
    pub address: Pubkey,
    pub decimals: u8,
    pub supply: u64,
    pub mint_authority: Option<Pubkey>,
}

/// Token holding account as read from the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenHolding {
    pub address: Pubkey,
    pub mint: Pubkey,
    pub owner: Pubkey,
    pub amount: u64,
}

/// M-of-N token multisig account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultisigInfo {
    pub address: Pubkey,
    pub threshold: u8,
    pub signers: Vec<Pubkey>,
}

/// Metadata record attached to a mint by the token metadata program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMetadata {
    pub address: Pubkey,
    pub mint: Pubkey,
    pub update_authority: Pubkey,
    pub name: String,
    pub symbol: String,
    pub uri: String,
    pub seller_fee_basis_points: u16,
    pub is_mutable: bool,
}

/// Abstraction over the ledger node
///
/// Lookups return `Ok(None)` for accounts that do not exist,
/// [`LedgerError::AccountDecode`] for accounts owned by an unexpected program
/// and [`LedgerError::Uninitialized`] for allocated accounts with no state yet.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Native balance in lamports (0 for unknown accounts)
    async fn balance(&self, owner: &Pubkey) -> LedgerResult<u64>;

    async fn mint(&self, mint: &Pubkey) -> LedgerResult<Option<MintInfo>>;

    async fn token_holding(&self, address: &Pubkey) -> LedgerResult<Option<TokenHolding>>;

    async fn multisig(&self, address: &Pubkey) -> LedgerResult<Option<MultisigInfo>>;

    /// Metadata record for `mint`, looked up at its derived address
    async fn token_metadata(&self, mint: &Pubkey) -> LedgerResult<Option<TokenMetadata>>;

    async fn latest_checkpoint(&self) -> LedgerResult<Checkpoint>;

    /// Whether the blockhash is still inside the validity window
    async fn is_checkpoint_valid(&self, blockhash: &Hash) -> LedgerResult<bool>;

    /// Current state of a durable nonce account
    async fn nonce(&self, account: &Pubkey) -> LedgerResult<Option<NonceHandle>>;

    async fn rent_exempt_minimum(&self, data_len: usize) -> LedgerResult<u64>;

    /// Send a fully signed transaction and wait for confirmation
    async fn submit(&self, transaction: &Transaction) -> LedgerResult<Signature>;

    /// `None` when the ledger has no record of the signature
    async fn signature_status(
        &self,
        signature: &Signature,
    ) -> LedgerResult<Option<Result<(), TransactionError>>>;

    async fn request_airdrop(&self, to: &Pubkey, lamports: u64) -> LedgerResult<Signature>;
}
