//! Error types for the payments crate

use thiserror::Error;

/// Errors produced by the payment completion and reminder subsystem.
#[derive(Debug, Error)]
pub enum PaymentsError {
    /// Request rejected before any side effect ran.
    #[error("validation error: {0}")]
    Validation(String),

    /// Webhook signature missing, malformed, stale, or mismatched.
    #[error("webhook signature invalid")]
    WebhookSignatureInvalid,

    /// Referenced invoice does not exist and the operation cannot create it.
    #[error("invoice not found: {0}")]
    InvoiceNotFound(String),

    /// Referenced client does not exist.
    #[error("client not found: {0}")]
    ClientNotFound(String),

    /// Attempted state change the invoice state machine forbids.
    #[error("invalid invoice transition: {from} -> {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    /// Mail transport failed or is misconfigured.
    #[error("mail transport error: {0}")]
    Mail(String),

    /// Document generator call failed.
    #[error("document generator error: {0}")]
    Documents(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type PaymentsResult<T> = Result<T, PaymentsError>;
