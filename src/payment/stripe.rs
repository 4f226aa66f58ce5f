use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_derive::Deserialize;
use tracing::{debug, info, warn};

use super::{ChargeReceipt, ChargeRequest, PaymentError, PaymentProcessor, RefundReceipt};
use crate::config::StripeConfig;

const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

pub struct StripeClient {
    client: Client,
    api_base: String,
    secret_key: String,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Default, Deserialize)]
struct StripeErrorDetail {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    decline_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl StripeClient {
    pub fn new(config: &StripeConfig) -> Result<Self, PaymentError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
        })
    }

    async fn post_form<T>(
        &self,
        path: &str,
        idempotency_key: &str,
        form: &[(&str, String)],
    ) -> Result<T, PaymentError>
    where
        T: serde::de::DeserializeOwned,
    {
        let url = format!("{}{}", self.api_base, path);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.secret_key)
            .header(IDEMPOTENCY_KEY_HEADER, idempotency_key)
            .form(form)
            .send()
            .await?;

        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| PaymentError::Parse(e.to_string()))
    }
}

async fn check_status(response: Response) -> Result<Response, PaymentError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<StripeErrorBody>(&body)
        .map(|b| b.error)
        .unwrap_or_default();
    let message = detail.message.unwrap_or(body);

    Err(match status {
        StatusCode::PAYMENT_REQUIRED => PaymentError::Declined {
            code: detail
                .decline_code
                .or(detail.code)
                .unwrap_or_else(|| "card_declined".to_string()),
            message,
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PaymentError::Unauthorized,
        StatusCode::TOO_MANY_REQUESTS => PaymentError::RateLimited,
        s if s.is_server_error() => PaymentError::Unavailable {
            status: s.as_u16(),
        },
        _ => PaymentError::InvalidRequest(message),
    })
}

#[async_trait]
impl PaymentProcessor for StripeClient {
    #[tracing::instrument(skip(self, request), fields(amount = request.amount_minor, currency = %request.currency))]
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeReceipt, PaymentError> {
        debug!("Creating charge");
        let form = [
            ("amount", request.amount_minor.to_string()),
            ("currency", request.currency.clone()),
            ("description", request.description.clone()),
            ("source", request.source_token.clone()),
        ];

        match self
            .post_form::<ChargeReceipt>("/v1/charges", &request.idempotency_key, &form)
            .await {
            Ok(receipt) => {
                info!(charge_id = %receipt.id, status = %receipt.status, "Charge created");
                Ok(receipt)
            }
            Err(e) => {
                warn!(retryable = e.is_retryable(), "Charge failed: {e}");
                Err(e)
            }
        }
    }

    #[tracing::instrument(skip(self))]
    async fn refund(&self, charge_id: &str) -> Result<RefundReceipt, PaymentError> {
        let form = [("charge", charge_id.to_string())];
        // A charge is refunded at most once, so its id makes a stable key.
        let key = format!("refund-{charge_id}");
        let receipt: RefundReceipt = self.post_form("/v1/refunds", &key, &form).await?;
        info!(refund_id = %receipt.id, status = %receipt.status, "Charge refunded");
        Ok(receipt)
    }
}
