//! Structured logging and handshake context

use uuid::Uuid;

/// Structured logger for handshake events
///
/// Every event carries the correlation id of one prepare/complete exchange so
/// the two parties' logs can be joined.
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    context_id: String,
}

impl StructuredLogger {
    pub fn new(context_id: String) -> Self {
        Self { context_id }
    }

    /// Logger with a fresh random correlation id
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    pub fn log_envelope_prepared(
        &self,
        sender: &str,
        fee_payer: &str,
        durable: bool,
        instructions: usize,
        bytes: usize,
    ) {
        tracing::info!(
            context_id = %self.context_id,
            sender = %sender,
            fee_payer = %fee_payer,
            durable = %durable,
            instructions = %instructions,
            bytes = %bytes,
            "Envelope prepared"
        );
    }

    pub fn log_envelope_received(&self, fee_payer: &str, signed: usize, required: usize) {
        tracing::info!(
            context_id = %self.context_id,
            fee_payer = %fee_payer,
            signed = %signed,
            required = %required,
            "Envelope received"
        );
    }

    pub fn log_anchor_check(&self, anchor: &str, durable: bool, fresh: bool) {
        tracing::debug!(
            context_id = %self.context_id,
            anchor = %anchor,
            durable = %durable,
            fresh = %fresh,
            "Anchor freshness checked"
        );
    }

    pub fn log_submission_success(&self, sig: &str, already_finalized: bool, latency_ms: u64) {
        tracing::info!(
            context_id = %self.context_id,
            signature = %sig,
            already_finalized = %already_finalized,
            latency_ms = %latency_ms,
            "Transfer submitted"
        );
    }

    pub fn log_submission_failure(&self, error: &str, category: &str, latency_ms: u64) {
        tracing::warn!(
            context_id = %self.context_id,
            error = %error,
            category = %category,
            latency_ms = %latency_ms,
            "Transfer submission failed"
        );
    }
}

impl Default for StructuredLogger {
    fn default() -> Self {
        Self::generate()
    }
}
