use solana_sdk::pubkey::Pubkey;

/// What is being moved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Asset {
    /// Native coin, 9 decimals
    Native,
    /// Fungible token held in associated holding accounts
    Token { mint: Pubkey },
}

/// A request to move `amount` of `asset` from `source` to `destination`
///
/// `amount` is a decimal string in whole units; it is scaled with the decimals
/// the ledger reports for the asset at build time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferIntent {
    pub source: Pubkey,
    pub destination: Pubkey,
    pub asset: Asset,
    pub amount: String,
    pub memo: Option<String>,
}

impl TransferIntent {
    pub fn native(source: Pubkey, destination: Pubkey, amount: impl Into<String>) -> Self {
        Self {
            source,
            destination,
            asset: Asset::Native,
            amount: amount.into(),
            memo: None,
        }
    }

    pub fn token(
        source: Pubkey,
        destination: Pubkey,
        mint: Pubkey,
        amount: impl Into<String>,
    ) -> Self {
        Self {
            source,
            destination,
            asset: Asset::Token { mint },
            amount: amount.into(),
            memo: None,
        }
    }

    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = Some(memo.into());
        self
    }
}
