//! Transaction builder for delegated-fee transfers
//!
//! ## Architecture
//!
//! - **intent**: what the sender wants to move
//! - **amount**: exact decimal-string scaling to base units
//! - **anchor**: checkpoint vs durable nonce freshness anchors
//! - **instructions**: instruction planning and ordering validation
//! - **output**: the built, frozen message with its signature slots
//! - **builder**: ledger-backed assembly of the above
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use delegated_transfer::tx_builder::{AnchorMode, TransferIntent, TxBuilder};
//! # use delegated_transfer::ledger::LedgerClient;
//! # use solana_sdk::pubkey::Pubkey;
//! # use std::sync::Arc;
//!
//! # async fn example(ledger: Arc<dyn LedgerClient>, sender: Pubkey, recipient: Pubkey, mint: Pubkey)
//! #     -> Result<(), delegated_transfer::CosignError> {
//! let builder = TxBuilder::new(ledger);
//! let intent = TransferIntent::token(sender, recipient, mint, "10");
//!
//! // The recipient pays the fee
//! let pending = builder.build(&intent, &recipient, AnchorMode::Checkpoint).await?;
//! assert_eq!(pending.fee_payer(), recipient);
//! # Ok(())
//! # }
//! ```

pub mod amount;
pub mod anchor;
pub mod builder;
pub mod instructions;
pub mod intent;
pub mod output;

pub use amount::{format_ui_amount, parse_ui_amount, NATIVE_DECIMALS};
pub use anchor::{AnchorMode, FreshnessAnchor};
pub use builder::{assemble, TxBuilder};
pub use instructions::{
    plan_transfer_instructions, sanity_check_ix_order, InstructionPlan, MEMO_PROGRAM_ID,
};
pub use intent::{Asset, TransferIntent};
pub use output::{PendingTransaction, TxState};
