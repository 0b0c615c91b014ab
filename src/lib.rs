//! Delegated-fee-payer transfers for Solana
//!
//! A sender builds a native or SPL token transfer naming a different account
//! as fee payer, signs only its own slot and exports the partially-signed
//! transaction as base64. The fee payer later decodes it, checks what it is
//! about to pay for, adds its signature and submits. Transactions can be
//! anchored to a recent blockhash or to a durable nonce when the two
//! signatures may be far apart in time.
//!
//! The main entry points are [`SenderSession`] and [`FeePayerSession`]; the
//! pieces they are made of ([`tx_builder`], [`coordinator`], [`submit`]) are
//! public for callers that need finer control.

pub mod config;
pub mod coordinator;
pub mod errors;
pub mod ledger;
pub mod metrics;
pub mod nonce;
pub mod protocol;
pub mod structured_logging;
pub mod submit;
pub mod token;
pub mod tx_builder;
pub mod wallet;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

pub use config::Config;
pub use coordinator::SerializedEnvelope;
pub use errors::{CosignError, CosignResult, MissingAccountReason, RejectReason, SubmissionError};
pub use ledger::{LedgerClient, LedgerError, RpcLedger};
pub use nonce::{NonceHandle, NonceManager};
pub use protocol::{FeePayerSession, PreparedTransfer, SenderSession, TransferSummary};
pub use submit::SubmitOutcome;
pub use token::TokenAdmin;
pub use tx_builder::{AnchorMode, Asset, FreshnessAnchor, PendingTransaction, TransferIntent, TxState};
pub use wallet::WalletManager;

// Re-export commonly used types
pub use solana_sdk::{pubkey::Pubkey, signature::Signature};
