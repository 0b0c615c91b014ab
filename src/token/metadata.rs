//! Token metadata records
//!
//! Name, symbol and URI of a mint live in an account of the token metadata
//! program at an address derived from the mint. Instruction arguments and the
//! account layout are borsh-encoded exactly as that program reads them; the
//! `wire` types mirror its structs field for field.

use super::TokenAdmin;
use crate::errors::CosignError;
use crate::ledger::{LedgerError, LedgerResult, TokenMetadata};
use crate::submit::{send_with_signers, SubmitOutcome};
use borsh::{BorshDeserialize, BorshSerialize};
use solana_sdk::{
    account::Account,
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    signature::Signer,
    system_program,
};
use tracing::{info, instrument};

pub const METADATA_PROGRAM_ID: Pubkey =
    solana_sdk::pubkey!("metaqbxxUerdq28cj1RbAWkYQm3ybzjb6a8bt518x1s");

pub const MAX_NAME_LENGTH: usize = 32;
pub const MAX_SYMBOL_LENGTH: usize = 10;
pub const MAX_URI_LENGTH: usize = 200;
pub const MAX_SELLER_FEE_BASIS_POINTS: u16 = 10_000;

/// Allocated size of a metadata account
pub const METADATA_ACCOUNT_LEN: usize = 679;

pub const CREATE_METADATA_V3: u8 = 33;
pub const UPDATE_METADATA_V2: u8 = 15;

/// Account discriminator of a metadata record
const METADATA_V1_KEY: u8 = 4;

/// Address of the metadata record for `mint`
pub fn metadata_address(mint: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(
        &[b"metadata", METADATA_PROGRAM_ID.as_ref(), mint.as_ref()],
        &METADATA_PROGRAM_ID,
    )
    .0
}

/// Descriptive fields written to a metadata record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataFields {
    pub name: String,
    pub symbol: String,
    pub uri: String,
    /// Royalty on secondary sales, in basis points
    pub seller_fee_basis_points: u16,
}

impl MetadataFields {
    pub fn new(name: impl Into<String>, symbol: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            symbol: symbol.into(),
            uri: uri.into(),
            seller_fee_basis_points: 0,
        }
    }

    pub fn with_seller_fee(mut self, basis_points: u16) -> Self {
        self.seller_fee_basis_points = basis_points;
        self
    }

    pub fn validate(&self) -> Result<(), CosignError> {
        let limits = [
            ("name", self.name.len(), MAX_NAME_LENGTH),
            ("symbol", self.symbol.len(), MAX_SYMBOL_LENGTH),
            ("uri", self.uri.len(), MAX_URI_LENGTH),
        ];
        for (field, len, max) in limits {
            if len > max {
                return Err(CosignError::configuration(format!(
                    "metadata {} is {} bytes, limit is {}",
                    field, len, max
                )));
            }
        }
        if self.seller_fee_basis_points > MAX_SELLER_FEE_BASIS_POINTS {
            return Err(CosignError::configuration(format!(
                "seller fee {} exceeds {} basis points",
                self.seller_fee_basis_points, MAX_SELLER_FEE_BASIS_POINTS
            )));
        }
        Ok(())
    }

    /// Program-side data with `creator` as the sole, verified creator
    fn to_wire(&self, creator: &Pubkey) -> wire::DataV2 {
        wire::DataV2 {
            name: self.name.clone(),
            symbol: self.symbol.clone(),
            uri: self.uri.clone(),
            seller_fee_basis_points: self.seller_fee_basis_points,
            creators: Some(vec![wire::Creator {
                address: creator.to_bytes(),
                verified: true,
                share: 100,
            }]),
            collection: None,
            uses: None,
        }
    }
}

/// Borsh layouts of the metadata program
pub mod wire {
    use super::*;

    #[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
    pub struct Creator {
        pub address: [u8; 32],
        pub verified: bool,
        pub share: u8,
    }

    #[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
    pub struct Collection {
        pub verified: bool,
        pub key: [u8; 32],
    }

    #[derive(BorshSerialize, BorshDeserialize, Debug, Clone, Copy, PartialEq, Eq)]
    pub enum UseMethod {
        Burn,
        Multiple,
        Single,
    }

    #[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
    pub struct Uses {
        pub use_method: UseMethod,
        pub remaining: u64,
        pub total: u64,
    }

    #[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
    pub enum CollectionDetails {
        V1 { size: u64 },
        V2 { padding: [u8; 8] },
    }

    #[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
    pub struct DataV2 {
        pub name: String,
        pub symbol: String,
        pub uri: String,
        pub seller_fee_basis_points: u16,
        pub creators: Option<Vec<Creator>>,
        pub collection: Option<Collection>,
        pub uses: Option<Uses>,
    }

    #[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
    pub struct CreateMetadataArgs {
        pub data: DataV2,
        pub is_mutable: bool,
        pub collection_details: Option<CollectionDetails>,
    }

    #[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
    pub struct UpdateMetadataArgs {
        pub data: Option<DataV2>,
        pub new_update_authority: Option<[u8; 32]>,
        pub primary_sale_happened: Option<bool>,
        pub is_mutable: Option<bool>,
    }

    /// Leading fields of a metadata account; the remainder is not read
    #[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
    pub struct MetadataHeader {
        pub key: u8,
        pub update_authority: [u8; 32],
        pub mint: [u8; 32],
        pub name: String,
        pub symbol: String,
        pub uri: String,
        pub seller_fee_basis_points: u16,
        pub creators: Option<Vec<Creator>>,
        pub primary_sale_happened: bool,
        pub is_mutable: bool,
    }
}

fn encode(discriminator: u8, args: &impl BorshSerialize) -> Result<Vec<u8>, CosignError> {
    let mut data = vec![discriminator];
    args.serialize(&mut data)
        .map_err(|e| CosignError::instruction_failed("token-metadata", e.to_string()))?;
    Ok(data)
}

/// CreateMetadataAccountV3 with the mint authority as update authority and creator
pub fn create_metadata_instruction(
    mint: &Pubkey,
    mint_authority: &Pubkey,
    payer: &Pubkey,
    fields: &MetadataFields,
    is_mutable: bool,
) -> Result<Instruction, CosignError> {
    fields.validate()?;
    let args = wire::CreateMetadataArgs {
        data: fields.to_wire(mint_authority),
        is_mutable,
        collection_details: None,
    };
    Ok(Instruction {
        program_id: METADATA_PROGRAM_ID,
        accounts: vec![
            AccountMeta::new(metadata_address(mint), false),
            AccountMeta::new_readonly(*mint, false),
            AccountMeta::new_readonly(*mint_authority, true),
            AccountMeta::new(*payer, true),
            AccountMeta::new_readonly(*mint_authority, true),
            AccountMeta::new_readonly(system_program::id(), false),
        ],
        data: encode(CREATE_METADATA_V3, &args)?,
    })
}

/// UpdateMetadataAccountV2 replacing the descriptive fields only
pub fn update_metadata_instruction(
    mint: &Pubkey,
    update_authority: &Pubkey,
    fields: &MetadataFields,
) -> Result<Instruction, CosignError> {
    fields.validate()?;
    let args = wire::UpdateMetadataArgs {
        data: Some(fields.to_wire(update_authority)),
        new_update_authority: None,
        primary_sale_happened: None,
        is_mutable: None,
    };
    Ok(Instruction {
        program_id: METADATA_PROGRAM_ID,
        accounts: vec![
            AccountMeta::new(metadata_address(mint), false),
            AccountMeta::new_readonly(*update_authority, true),
        ],
        data: encode(UPDATE_METADATA_V2, &args)?,
    })
}

/// Decode a metadata account owned by the metadata program
///
/// Strings are stored NUL-padded to their maximum length; the padding is removed.
pub(crate) fn decode_metadata(address: &Pubkey, account: &Account) -> LedgerResult<TokenMetadata> {
    if account.owner != METADATA_PROGRAM_ID {
        return Err(LedgerError::decode(
            *address,
            format!("owned by {}, not the metadata program", account.owner),
        ));
    }
    match account.data.first() {
        None | Some(0) => return Err(LedgerError::Uninitialized { account: *address }),
        Some(&METADATA_V1_KEY) => {}
        Some(other) => {
            return Err(LedgerError::decode(
                *address,
                format!("account key {} is not a metadata record", other),
            ))
        }
    }
    let header = wire::MetadataHeader::deserialize(&mut account.data.as_slice())
        .map_err(|e| LedgerError::decode(*address, e.to_string()))?;
    Ok(TokenMetadata {
        address: *address,
        mint: Pubkey::new_from_array(header.mint),
        update_authority: Pubkey::new_from_array(header.update_authority),
        name: header.name.replace('\0', ""),
        symbol: header.symbol.replace('\0', ""),
        uri: header.uri.replace('\0', ""),
        seller_fee_basis_points: header.seller_fee_basis_points,
        is_mutable: header.is_mutable,
    })
}

impl TokenAdmin {
    /// Attach a metadata record to `mint`
    ///
    /// The mint authority signs and becomes update authority and sole
    /// creator. The record stays mutable.
    #[instrument(skip_all, fields(mint = %mint))]
    pub async fn create_metadata(
        &self,
        mint: &Pubkey,
        fields: &MetadataFields,
        mint_authority: &dyn Signer,
        payer: &dyn Signer,
    ) -> Result<TokenMetadata, CosignError> {
        let info = self.existing_mint(mint).await?;
        if info.mint_authority != Some(mint_authority.pubkey()) {
            return Err(CosignError::NotASigner(mint_authority.pubkey()));
        }
        if self.ledger.token_metadata(mint).await?.is_some() {
            return Err(CosignError::configuration(format!(
                "mint {} already has a metadata record",
                mint
            )));
        }

        let ix = create_metadata_instruction(
            mint,
            &mint_authority.pubkey(),
            &payer.pubkey(),
            fields,
            true,
        )?;
        send_with_signers(self.ledger.as_ref(), vec![ix], &[payer, mint_authority]).await?;

        let record = self
            .ledger
            .token_metadata(mint)
            .await?
            .ok_or_else(|| CosignError::not_found(metadata_address(mint)))?;
        info!(metadata = %record.address, symbol = %record.symbol, "metadata created");
        Ok(record)
    }

    /// Replace name, symbol, URI and seller fee of an existing record
    #[instrument(skip_all, fields(mint = %mint))]
    pub async fn update_metadata(
        &self,
        mint: &Pubkey,
        fields: &MetadataFields,
        update_authority: &dyn Signer,
        payer: &dyn Signer,
    ) -> Result<SubmitOutcome, CosignError> {
        let record = self
            .ledger
            .token_metadata(mint)
            .await?
            .ok_or_else(|| CosignError::not_found(metadata_address(mint)))?;
        if record.update_authority != update_authority.pubkey() {
            return Err(CosignError::NotASigner(update_authority.pubkey()));
        }
        if !record.is_mutable {
            return Err(CosignError::configuration(format!(
                "metadata {} is immutable",
                record.address
            )));
        }

        let ix = update_metadata_instruction(mint, &update_authority.pubkey(), fields)?;
        let outcome =
            send_with_signers(self.ledger.as_ref(), vec![ix], &[payer, update_authority]).await?;
        info!(metadata = %record.address, "metadata updated");
        Ok(outcome)
    }

    pub async fn metadata(&self, mint: &Pubkey) -> Result<Option<TokenMetadata>, CosignError> {
        Ok(self.ledger.token_metadata(mint).await?)
    }
}
