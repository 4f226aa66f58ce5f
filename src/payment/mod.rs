//! Payment processor integration.
//!
//! Every charge carries an idempotency key, so resending the same
//! [`ChargeRequest`] after a transient failure (see
//! [`PaymentError::is_retryable`]) cannot charge the donor twice.

mod stripe;

pub use stripe::StripeClient;

use async_trait::async_trait;
use serde_derive::Deserialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub struct ChargeRequest {
    /// Amount in minor units (cents).
    pub amount_minor: i64,
    pub currency: String,
    pub description: String,
    /// Single-use token from client-side tokenization.
    pub source_token: String,
    /// Sent as `Idempotency-Key`; one per submission, reused on retries.
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChargeReceipt {
    pub id: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RefundReceipt {
    pub id: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("card declined ({code}): {message}")]
    Declined { code: String, message: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("processor rejected credentials")]
    Unauthorized,

    #[error("rate limited by processor")]
    RateLimited,

    #[error("processor unavailable (status {status})")]
    Unavailable { status: u16 },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to parse processor response: {0}")]
    Parse(String),
}

impl PaymentError {
    /// Whether the failure is transient. Declines and invalid requests are final.
    /// A transport error may hide a charge that went through, so a retry must
    /// reuse the request's idempotency key.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PaymentError::RateLimited | PaymentError::Unavailable { .. } | PaymentError::Http(_)
        )
    }
}

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeReceipt, PaymentError>;

    async fn refund(&self, charge_id: &str) -> Result<RefundReceipt, PaymentError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(PaymentError::RateLimited.is_retryable());
        assert!(PaymentError::Unavailable { status: 503 }.is_retryable());
        assert!(!PaymentError::Unauthorized.is_retryable());
        assert!(
            !PaymentError::Declined {
                code: "card_declined".into(),
                message: "no".into()
            }
            .is_retryable()
        );
        assert!(!PaymentError::InvalidRequest("bad token".into()).is_retryable());
    }
}
