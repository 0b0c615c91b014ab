use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_rpc_client_api::request::RpcError;
use solana_sdk::{pubkey::Pubkey, transaction::TransactionError};
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};

/// JSON-RPC codes the node returns while it is behind or restarting
const NODE_UNHEALTHY_CODES: &[i64] = &[-32004, -32005, -32014, -32016];

/// Prefix of the client-side error raised when confirmation polling outlives the blockhash
const UNCONFIRMED_PREFIX: &str = "unable to confirm transaction";

/// Ledger access error types
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LedgerError {
    /// Transport-level errors (network, connection)
    #[error("Transport error: {message} (endpoint: {endpoint})")]
    Transport { endpoint: String, message: String },

    /// Request did not complete in time
    #[error("Timeout (endpoint: {endpoint})")]
    Timeout { endpoint: String },

    /// RPC response errors (from the RPC server)
    #[error("RPC response error: {message} (endpoint: {endpoint}, code: {code:?})")]
    RpcResponse {
        endpoint: String,
        message: String,
        code: Option<i64>,
    },

    /// The node evaluated the transaction and refused it
    #[error("Transaction error: {0}")]
    Transaction(TransactionError),

    /// Account data does not match the expected program layout
    #[error("Failed to decode account {account}: {reason}")]
    AccountDecode { account: Pubkey, reason: String },

    /// Account is allocated but its program state was never initialized
    #[error("Account {account} is not initialized")]
    Uninitialized { account: Pubkey },

    /// The client stopped polling because the blockhash it sent under expired
    #[error("Transaction not confirmed before its blockhash expired (endpoint: {endpoint})")]
    Unconfirmed { endpoint: String },

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

impl LedgerError {
    /// Whether the request may succeed when repeated unchanged
    pub fn is_transient(&self) -> bool {
        match self {
            LedgerError::Transport { .. } => true,
            LedgerError::Timeout { .. } => true,
            LedgerError::RpcResponse { code, .. } => match code {
                Some(c) => (500..600).contains(c) || NODE_UNHEALTHY_CODES.contains(c),
                None => false,
            },
            LedgerError::Transaction(_) => false,
            LedgerError::AccountDecode { .. } => false,
            LedgerError::Uninitialized { .. } => false,
            LedgerError::Unconfirmed { .. } => false,
            LedgerError::Internal(_) => false,
        }
    }

    /// Get the endpoint associated with this error, if any
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            LedgerError::Transport { endpoint, .. } => Some(endpoint),
            LedgerError::Timeout { endpoint } => Some(endpoint),
            LedgerError::RpcResponse { endpoint, .. } => Some(endpoint),
            LedgerError::Unconfirmed { endpoint } => Some(endpoint),
            _ => None,
        }
    }

    pub fn decode(account: Pubkey, reason: impl Into<String>) -> Self {
        LedgerError::AccountDecode {
            account,
            reason: reason.into(),
        }
    }

    /// Create from ClientError with context
    ///
    /// Structured error kinds are preferred; the message text is only consulted
    /// for kinds that carry no structure (custom and middleware errors).
    pub fn from_client_error(err: ClientError, endpoint: &str) -> Self {
        if let Some(tx_err) = err.get_transaction_error() {
            return LedgerError::Transaction(tx_err);
        }

        match err.kind() {
            ClientErrorKind::TransactionError(tx_err) => {
                return LedgerError::Transaction(tx_err.clone());
            }
            ClientErrorKind::Io(io_err) => {
                return LedgerError::Transport {
                    endpoint: endpoint.to_string(),
                    message: io_err.to_string(),
                };
            }
            ClientErrorKind::Reqwest(http_err) => {
                if http_err.is_timeout() {
                    return LedgerError::Timeout {
                        endpoint: endpoint.to_string(),
                    };
                }
                let code = http_err.status().map(|s| i64::from(s.as_u16()));
                if code.is_some() {
                    return LedgerError::RpcResponse {
                        endpoint: endpoint.to_string(),
                        message: http_err.to_string(),
                        code,
                    };
                }
                return LedgerError::Transport {
                    endpoint: endpoint.to_string(),
                    message: http_err.to_string(),
                };
            }
            ClientErrorKind::RpcError(RpcError::RpcResponseError { code, message, .. }) => {
                return LedgerError::RpcResponse {
                    endpoint: endpoint.to_string(),
                    message: message.clone(),
                    code: Some(*code),
                };
            }
            ClientErrorKind::RpcError(RpcError::ForUser(message))
                if message.starts_with(UNCONFIRMED_PREFIX) =>
            {
                return LedgerError::Unconfirmed {
                    endpoint: endpoint.to_string(),
                };
            }
            _ => {}
        }

        let err_str = err.to_string().to_lowercase();
        if err_str.contains("timeout") || err_str.contains("timed out") {
            LedgerError::Timeout {
                endpoint: endpoint.to_string(),
            }
        } else if err_str.contains("connection") || err_str.contains("broken pipe") {
            LedgerError::Transport {
                endpoint: endpoint.to_string(),
                message: err.to_string(),
            }
        } else {
            LedgerError::Internal(err.to_string())
        }
    }
}

/// Retry policy for idempotent ledger reads
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt
    pub max_retries: usize,

    /// Base delay in milliseconds
    pub base_delay_ms: u64,

    /// Maximum delay in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    /// Create a policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Backoff delays fed to `tokio_retry::RetryIf`
    pub fn strategy(&self) -> impl Iterator<Item = Duration> {
        ExponentialBackoff::from_millis(self.base_delay_ms.max(1))
            .max_delay(Duration::from_millis(self.max_delay_ms))
            .map(jitter)
            .take(self.max_retries)
    }
}
