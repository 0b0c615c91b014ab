//! [`LedgerClient`] over the nonblocking JSON-RPC client

use super::{
    Checkpoint, LedgerClient, LedgerError, LedgerResult, MintInfo, MultisigInfo, RetryPolicy,
    TokenHolding, TokenMetadata,
};
use crate::config::Config;
use crate::nonce::NonceHandle;
use crate::token::metadata::{decode_metadata, metadata_address};
use async_trait::async_trait;
use solana_client::{client_error::ClientError, nonblocking::rpc_client::RpcClient};
use solana_rpc_client_nonce_utils::Error as NonceError;
use solana_sdk::{
    account::Account,
    commitment_config::CommitmentConfig,
    hash::Hash,
    program_pack::Pack,
    pubkey::Pubkey,
    signature::Signature,
    transaction::{Transaction, TransactionError},
};
use std::time::Duration;
use tokio_retry::RetryIf;
use tracing::{debug, instrument, warn};

pub struct RpcLedger {
    client: RpcClient,
    endpoint: String,
    commitment: CommitmentConfig,
    retry: RetryPolicy,
}

impl RpcLedger {
    pub fn new(url: impl Into<String>, commitment: CommitmentConfig) -> Self {
        let endpoint = url.into();
        Self {
            client: RpcClient::new_with_commitment(endpoint.clone(), commitment),
            endpoint,
            commitment,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_timeout(
        url: impl Into<String>,
        commitment: CommitmentConfig,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        let endpoint = url.into();
        Self {
            client: RpcClient::new_with_timeout_and_commitment(endpoint.clone(), timeout, commitment),
            endpoint,
            commitment,
            retry,
        }
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self::with_timeout(
            config.rpc.url.clone(),
            config.commitment()?,
            config.rpc_timeout(),
            config.retry_policy(),
        ))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn classify(&self, err: ClientError) -> LedgerError {
        LedgerError::from_client_error(err, &self.endpoint)
    }

    async fn fetch_account_once(&self, address: &Pubkey) -> LedgerResult<Option<Account>> {
        self.client
            .get_account_with_commitment(address, self.commitment)
            .await
            .map(|response| response.value)
            .map_err(|e| self.classify(e))
    }

    /// Account lookup with retries on transient failures
    async fn fetch_account(&self, address: &Pubkey) -> LedgerResult<Option<Account>> {
        RetryIf::spawn(
            self.retry.strategy(),
            || self.fetch_account_once(address),
            |err: &LedgerError| {
                let transient = err.is_transient();
                if transient {
                    warn!(account = %address, error = %err, "account lookup failed, retrying");
                }
                transient
            },
        )
        .await
    }

    async fn latest_checkpoint_once(&self) -> LedgerResult<Checkpoint> {
        let (blockhash, last_valid_block_height) = self
            .client
            .get_latest_blockhash_with_commitment(self.commitment)
            .await
            .map_err(|e| self.classify(e))?;
        Ok(Checkpoint {
            blockhash,
            last_valid_block_height,
        })
    }
}

/// Decode a mint account owned by the token program
pub(crate) fn decode_mint(address: &Pubkey, account: &Account) -> LedgerResult<MintInfo> {
    if account.owner != spl_token::id() {
        return Err(LedgerError::decode(
            *address,
            format!("owned by {}, not the token program", account.owner),
        ));
    }
    let mint = spl_token::state::Mint::unpack(&account.data)
        .map_err(|e| LedgerError::decode(*address, e.to_string()))?;
    Ok(MintInfo {
        address: *address,
        decimals: mint.decimals,
        supply: mint.supply,
        mint_authority: mint.mint_authority.into(),
    })
}

/// Decode a token holding account owned by the token program
pub(crate) fn decode_holding(address: &Pubkey, account: &Account) -> LedgerResult<TokenHolding> {
    if account.owner != spl_token::id() {
        return Err(LedgerError::decode(
            *address,
            format!("owned by {}, not the token program", account.owner),
        ));
    }
    let holding = spl_token::state::Account::unpack(&account.data)
        .map_err(|e| LedgerError::decode(*address, e.to_string()))?;
    Ok(TokenHolding {
        address: *address,
        mint: holding.mint,
        owner: holding.owner,
        amount: holding.amount,
    })
}

/// Decode a token multisig account
pub(crate) fn decode_multisig(address: &Pubkey, account: &Account) -> LedgerResult<MultisigInfo> {
    if account.owner != spl_token::id() {
        return Err(LedgerError::decode(
            *address,
            format!("owned by {}, not the token program", account.owner),
        ));
    }
    let multisig = spl_token::state::Multisig::unpack(&account.data)
        .map_err(|e| LedgerError::decode(*address, e.to_string()))?;
    Ok(MultisigInfo {
        address: *address,
        threshold: multisig.m,
        signers: multisig.signers[..usize::from(multisig.n)].to_vec(),
    })
}

/// Decode a durable nonce account
///
/// System accounts with no nonce state yet (zeroed or empty data) are
/// reported as uninitialized rather than undecodable.
pub(crate) fn decode_nonce(address: &Pubkey, account: &Account) -> LedgerResult<NonceHandle> {
    let data = solana_rpc_client_nonce_utils::data_from_account(account).map_err(|e| match e {
        NonceError::InvalidStateForOperation | NonceError::UnexpectedDataSize => {
            LedgerError::Uninitialized { account: *address }
        }
        other => LedgerError::decode(*address, other.to_string()),
    })?;
    Ok(NonceHandle {
        account: *address,
        authority: data.authority,
        token: data.blockhash(),
    })
}

#[async_trait]
impl LedgerClient for RpcLedger {
    async fn balance(&self, owner: &Pubkey) -> LedgerResult<u64> {
        self.client
            .get_balance_with_commitment(owner, self.commitment)
            .await
            .map(|response| response.value)
            .map_err(|e| self.classify(e))
    }

    async fn mint(&self, mint: &Pubkey) -> LedgerResult<Option<MintInfo>> {
        match self.fetch_account(mint).await? {
            Some(account) => decode_mint(mint, &account).map(Some),
            None => Ok(None),
        }
    }

    async fn token_holding(&self, address: &Pubkey) -> LedgerResult<Option<TokenHolding>> {
        match self.fetch_account(address).await? {
            Some(account) => decode_holding(address, &account).map(Some),
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn latest_checkpoint(&self) -> LedgerResult<Checkpoint> {
        let checkpoint = RetryIf::spawn(
            self.retry.strategy(),
            || self.latest_checkpoint_once(),
            |err: &LedgerError| err.is_transient(),
        )
        .await?;
        debug!(
            blockhash = %checkpoint.blockhash,
            last_valid_block_height = checkpoint.last_valid_block_height,
            "fetched latest blockhash"
        );
        Ok(checkpoint)
    }

    async fn is_checkpoint_valid(&self, blockhash: &Hash) -> LedgerResult<bool> {
        self.client
            .is_blockhash_valid(blockhash, self.commitment)
            .await
            .map_err(|e| self.classify(e))
    }

    async fn multisig(&self, address: &Pubkey) -> LedgerResult<Option<MultisigInfo>> {
        match self.fetch_account(address).await? {
            Some(account) => decode_multisig(address, &account).map(Some),
            None => Ok(None),
        }
    }

    async fn token_metadata(&self, mint: &Pubkey) -> LedgerResult<Option<TokenMetadata>> {
        let address = metadata_address(mint);
        match self.fetch_account(&address).await? {
            Some(account) => decode_metadata(&address, &account).map(Some),
            None => Ok(None),
        }
    }

    async fn nonce(&self, account: &Pubkey) -> LedgerResult<Option<NonceHandle>> {
        match self.fetch_account(account).await? {
            Some(raw) => decode_nonce(account, &raw).map(Some),
            None => Ok(None),
        }
    }

    async fn rent_exempt_minimum(&self, data_len: usize) -> LedgerResult<u64> {
        self.client
            .get_minimum_balance_for_rent_exemption(data_len)
            .await
            .map_err(|e| self.classify(e))
    }

    #[instrument(skip(self, transaction), fields(endpoint = %self.endpoint))]
    async fn submit(&self, transaction: &Transaction) -> LedgerResult<Signature> {
        self.client
            .send_and_confirm_transaction(transaction)
            .await
            .map_err(|e| self.classify(e))
    }

    async fn signature_status(
        &self,
        signature: &Signature,
    ) -> LedgerResult<Option<Result<(), TransactionError>>> {
        self.client
            .get_signature_status_with_commitment(signature, self.commitment)
            .await
            .map_err(|e| self.classify(e))
    }

    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn request_airdrop(&self, to: &Pubkey, lamports: u64) -> LedgerResult<Signature> {
        let signature = self
            .client
            .request_airdrop(to, lamports)
            .await
            .map_err(|e| self.classify(e))?;
        self.client
            .poll_for_signature_with_commitment(&signature, self.commitment)
            .await
            .map_err(|e| self.classify(e))?;
        Ok(signature)
    }
}
