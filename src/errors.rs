//! Error taxonomy for the delegated-fee transfer workflow
//!
//! Every fallible operation in the crate (building, partial signing, envelope
//! transport, submission and the nonce/token administration helpers) returns a
//! [`CosignError`]. Ledger access failures are carried as [`LedgerError`] and
//! classified further once a submission outcome is known.

use crate::ledger::LedgerError;
use crate::tx_builder::TxState;
use solana_sdk::{hash::Hash, pubkey::Pubkey, signature::Signature};
use std::fmt;
use thiserror::Error;

/// Why a ledger lookup made an account unusable for the requested operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissingAccountReason {
    /// The account does not exist on the ledger
    NotFound,
    /// The account exists but is not initialized for the expected program
    NotInitialized,
    /// The account exists but holds less than the operation needs
    InsufficientBalance { required: u64, available: u64 },
}

impl fmt::Display for MissingAccountReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "account not found"),
            Self::NotInitialized => write!(f, "account not initialized"),
            Self::InsufficientBalance {
                required,
                available,
            } => write!(
                f,
                "insufficient balance (required {}, available {})",
                required, available
            ),
        }
    }
}

/// Semantic reason the network refused a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The durable nonce was advanced after the payload was signed
    NonceConsumed,
    /// Fee payer or source cannot cover the fee, rent or transfer
    InsufficientFunds,
    /// A signature did not verify against the message
    InvalidSignature,
    /// Any other program or runtime failure
    Program,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::NonceConsumed => "nonce consumed",
            Self::InsufficientFunds => "insufficient funds",
            Self::InvalidSignature => "invalid signature",
            Self::Program => "program error",
        };
        f.write_str(label)
    }
}

/// Outcome classes of a failed broadcast
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmissionError {
    /// The ledger refused the transaction; it must be rebuilt
    #[error("rejected ({reason}): {detail}")]
    Rejected { reason: RejectReason, detail: String },

    /// The ledger reports the transaction as already processed, but no
    /// successful status could be observed for it
    #[error("already processed without a confirmed status (signature={signature})")]
    Duplicate { signature: Signature },

    /// Transport-level failure; the same bytes may be broadcast again
    #[error("transient failure: {0}")]
    Transient(String),
}

/// Error type for every operation of the delegated-fee workflow
#[derive(Error, Debug)]
pub enum CosignError {
    /// Quantity is empty, malformed, non-positive, too precise or overflows
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Mint, holding or nonce account is absent or unusable
    #[error("Missing account {account}: {reason}")]
    MissingAccount {
        account: Pubkey,
        reason: MissingAccountReason,
    },

    /// The checkpoint anchor fell out of the ledger's validity window
    #[error("Stale anchor: blockhash {blockhash} is no longer valid")]
    StaleAnchor { blockhash: Hash },

    /// One or more required signer slots are empty or hold an invalid signature
    #[error("Incomplete signatures: {} signer(s) missing", .missing.len())]
    IncompleteSignature { missing: Vec<Pubkey> },

    /// Envelope bytes could not be decoded into a sane transaction
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Broadcast failed; see [`SubmissionError`] for the class
    #[error("Submission failed: {0}")]
    Submission(#[from] SubmissionError),

    /// The identity is not a required signer of the message
    #[error("{0} is not a required signer of this transaction")]
    NotASigner(Pubkey),

    /// The signer backend failed to produce a signature
    #[error("Signing failed: {0}")]
    Signing(String),

    /// Failed to build an instruction for a specific program
    #[error("Instruction build error (program={program}): {reason}")]
    InstructionBuild { program: String, reason: String },

    /// Nonce-advance placement violates the ordering contract
    #[error("Invalid instruction order: {0}")]
    InvalidInstructionOrder(String),

    /// Operation is not allowed in the transaction's current signing state
    #[error("Cannot {operation} a transaction in state {state:?}")]
    InvalidState {
        state: TxState,
        operation: &'static str,
    },

    /// Ledger lookup failed before any submission took place
    #[error("Ledger error: {0}")]
    Ledger(LedgerError),

    /// Configuration or caller-supplied parameters are inconsistent
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Wrapped error from an external collaborator
    #[error("External error: {0}")]
    External(#[from] anyhow::Error),
}

impl CosignError {
    /// Whether the same transaction bytes may be submitted again
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Submission(SubmissionError::Transient(_)) => true,
            Self::Ledger(err) => err.is_transient(),
            _ => false,
        }
    }

    /// Whether the caller has to build (and re-sign) a new transaction
    pub fn requires_rebuild(&self) -> bool {
        matches!(
            self,
            Self::StaleAnchor { .. } | Self::Submission(SubmissionError::Rejected { .. })
        )
    }

    /// Short label used for metrics and log fields
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidAmount(_) => "invalid_amount",
            Self::MissingAccount { .. } => "missing_account",
            Self::StaleAnchor { .. } => "stale_anchor",
            Self::IncompleteSignature { .. } => "incomplete_signature",
            Self::MalformedEnvelope(_) => "malformed_envelope",
            Self::Submission(SubmissionError::Rejected { .. }) => "rejected",
            Self::Submission(SubmissionError::Duplicate { .. }) => "duplicate",
            Self::Submission(SubmissionError::Transient(_)) => "transient",
            Self::NotASigner(_) => "not_a_signer",
            Self::Signing(_) => "signing",
            Self::InstructionBuild { .. } => "instruction_build",
            Self::InvalidInstructionOrder(_) => "instruction_order",
            Self::InvalidState { .. } => "invalid_state",
            Self::Ledger(_) => "ledger",
            Self::Configuration(_) => "configuration",
            Self::External(_) => "external",
        }
    }

    pub fn invalid_amount(reason: impl Into<String>) -> Self {
        Self::InvalidAmount(reason.into())
    }

    pub fn not_found(account: Pubkey) -> Self {
        Self::MissingAccount {
            account,
            reason: MissingAccountReason::NotFound,
        }
    }

    pub fn not_initialized(account: Pubkey) -> Self {
        Self::MissingAccount {
            account,
            reason: MissingAccountReason::NotInitialized,
        }
    }

    pub fn insufficient(account: Pubkey, required: u64, available: u64) -> Self {
        Self::MissingAccount {
            account,
            reason: MissingAccountReason::InsufficientBalance {
                required,
                available,
            },
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedEnvelope(reason.into())
    }

    pub fn instruction_failed(program: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InstructionBuild {
            program: program.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_order(reason: impl Into<String>) -> Self {
        Self::InvalidInstructionOrder(reason.into())
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration(reason.into())
    }

    pub fn rejected(reason: RejectReason, detail: impl Into<String>) -> Self {
        Self::Submission(SubmissionError::Rejected {
            reason,
            detail: detail.into(),
        })
    }
}

/// Allocated accounts without program state surface as missing accounts
impl From<LedgerError> for CosignError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Uninitialized { account } => Self::not_initialized(account),
            other => Self::Ledger(other),
        }
    }
}

/// Result alias used across the crate
pub type CosignResult<T> = Result<T, CosignError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let account = Pubkey::new_unique();
        let err = CosignError::insufficient(account, 1000, 10);
        let rendered = err.to_string();
        assert!(rendered.contains(&account.to_string()));
        assert!(rendered.contains("required 1000"));

        let err = CosignError::IncompleteSignature {
            missing: vec![Pubkey::new_unique(), Pubkey::new_unique()],
        };
        assert_eq!(err.to_string(), "Incomplete signatures: 2 signer(s) missing");

        let err = CosignError::rejected(RejectReason::NonceConsumed, "advanced");
        assert_eq!(
            err.to_string(),
            "Submission failed: rejected (nonce consumed): advanced"
        );
    }

    #[test]
    fn test_error_retryability() {
        assert!(CosignError::Submission(SubmissionError::Transient("reset".into())).is_retryable());
        assert!(CosignError::Ledger(LedgerError::Timeout {
            endpoint: "http://localhost:8899".into()
        })
        .is_retryable());

        assert!(!CosignError::invalid_amount("zero").is_retryable());
        assert!(!CosignError::StaleAnchor {
            blockhash: Hash::default()
        }
        .is_retryable());
        assert!(!CosignError::rejected(RejectReason::InsufficientFunds, "fee").is_retryable());
    }

    #[test]
    fn test_requires_rebuild() {
        assert!(CosignError::StaleAnchor {
            blockhash: Hash::default()
        }
        .requires_rebuild());
        assert!(CosignError::rejected(RejectReason::NonceConsumed, "nonce").requires_rebuild());

        assert!(!CosignError::Submission(SubmissionError::Transient("io".into())).requires_rebuild());
        assert!(!CosignError::Submission(SubmissionError::Duplicate {
            signature: Signature::default()
        })
        .requires_rebuild());
        assert!(!CosignError::NotASigner(Pubkey::new_unique()).requires_rebuild());
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(CosignError::invalid_amount("x").category(), "invalid_amount");
        assert_eq!(CosignError::not_found(Pubkey::new_unique()).category(), "missing_account");
        assert_eq!(CosignError::malformed("x").category(), "malformed_envelope");
        assert_eq!(
            CosignError::rejected(RejectReason::Program, "x").category(),
            "rejected"
        );
        assert_eq!(CosignError::invalid_order("x").category(), "instruction_order");
    }

    #[test]
    fn test_convenience_constructors() {
        let account = Pubkey::new_unique();
        match CosignError::not_found(account) {
            CosignError::MissingAccount { account: a, reason } => {
                assert_eq!(a, account);
                assert_eq!(reason, MissingAccountReason::NotFound);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        match CosignError::instruction_failed("spl-token", "bad decimals") {
            CosignError::InstructionBuild { program, reason } => {
                assert_eq!(program, "spl-token");
                assert_eq!(reason, "bad decimals");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_uninitialized_account_converts_to_missing() {
        let account = Pubkey::new_unique();
        let err: CosignError = LedgerError::Uninitialized { account }.into();
        match err {
            CosignError::MissingAccount { account: a, reason } => {
                assert_eq!(a, account);
                assert_eq!(reason, MissingAccountReason::NotInitialized);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err: CosignError = LedgerError::Internal("boom".into()).into();
        assert!(matches!(err, CosignError::Ledger(LedgerError::Internal(_))));
    }

    #[test]
    fn test_external_conversion() {
        let err: CosignError = anyhow::anyhow!("disk full").into();
        assert_eq!(err.category(), "external");
        assert!(err.to_string().contains("disk full"));
    }
}
