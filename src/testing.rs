//! Mocks and helpers shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::extract::Request;
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::crm::{ConstituentMatch, Crm, CrmError, NewConstituent, NewGift, SearchResponse};
use crate::donation::Donation;
use crate::payment::{ChargeReceipt, ChargeRequest, PaymentError, PaymentProcessor, RefundReceipt};

pub fn donation(email: &str, amount: &str) -> Donation {
    Donation {
        first_name: "Ada".into(),
        last_name: "Lovelace".into(),
        email: email.into(),
        token: "tok_visa".into(),
        amount: amount.parse::<Decimal>().unwrap(),
    }
}

/// Serves `app` on an ephemeral local port and returns its base URL.
pub async fn spawn_mock_server(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// A request as seen by a mock server.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: String,
    pub path: String,
    pub query: String,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl CapturedRequest {
    pub async fn read(req: Request) -> Self {
        let (parts, body) = req.into_parts();
        let body = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        Self {
            method: parts.method.to_string(),
            path: parts.uri.path().to_string(),
            query: parts.uri.query().unwrap_or_default().to_string(),
            headers: parts
                .headers
                .iter()
                .map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap_or_default().to_string()))
                .collect(),
            body: String::from_utf8_lossy(&body).into_owned(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap()
    }
}

#[derive(Debug, Clone)]
pub enum RecordedCrmCall {
    Search(String),
    CreateConstituent(NewConstituent),
    CreateGift(NewGift),
}

/// In-memory CRM. Searches return the configured matches; failures are one-shot.
#[derive(Default)]
pub struct MockCrm {
    matches: Mutex<Vec<ConstituentMatch>>,
    constituent_id: Mutex<Option<String>>,
    gift_id: Mutex<Option<String>>,
    calls: Mutex<Vec<RecordedCrmCall>>,
    search_error: Mutex<Option<CrmError>>,
    create_constituent_error: Mutex<Option<CrmError>>,
    create_gift_error: Mutex<Option<CrmError>>,
}

impl MockCrm {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_matches(&self, matches: Vec<ConstituentMatch>) {
        *self.matches.lock().await = matches;
    }

    pub async fn set_constituent_id(&self, id: &str) {
        *self.constituent_id.lock().await = Some(id.to_string());
    }

    pub async fn set_gift_id(&self, id: &str) {
        *self.gift_id.lock().await = Some(id.to_string());
    }

    pub async fn fail_search(&self, error: CrmError) {
        *self.search_error.lock().await = Some(error);
    }

    pub async fn fail_create_constituent(&self, error: CrmError) {
        *self.create_constituent_error.lock().await = Some(error);
    }

    pub async fn fail_create_gift(&self, error: CrmError) {
        *self.create_gift_error.lock().await = Some(error);
    }

    pub async fn calls(&self) -> Vec<RecordedCrmCall> {
        self.calls.lock().await.clone()
    }

    pub async fn create_constituent_count(&self) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|c| matches!(c, RecordedCrmCall::CreateConstituent(_)))
            .count()
    }

    pub async fn gifts(&self) -> Vec<NewGift> {
        self.calls
            .lock()
            .await
            .iter()
            .filter_map(|c| match c {
                RecordedCrmCall::CreateGift(g) => Some(g.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Crm for MockCrm {
    async fn search_constituents(&self, search_text: &str) -> Result<SearchResponse, CrmError> {
        self.calls
            .lock()
            .await
            .push(RecordedCrmCall::Search(search_text.to_string()));
        if let Some(e) = self.search_error.lock().await.take() {
            return Err(e);
        }
        let value = self.matches.lock().await.clone();
        Ok(SearchResponse {
            count: value.len() as u64,
            value,
        })
    }

    async fn create_constituent(&self, constituent: &NewConstituent) -> Result<String, CrmError> {
        self.calls
            .lock()
            .await
            .push(RecordedCrmCall::CreateConstituent(constituent.clone()));
        if let Some(e) = self.create_constituent_error.lock().await.take() {
            return Err(e);
        }
        Ok(self
            .constituent_id
            .lock()
            .await
            .clone()
            .unwrap_or_else(|| "mock-constituent".to_string()))
    }

    async fn create_gift(&self, gift: &NewGift) -> Result<String, CrmError> {
        self.calls
            .lock()
            .await
            .push(RecordedCrmCall::CreateGift(gift.clone()));
        if let Some(e) = self.create_gift_error.lock().await.take() {
            return Err(e);
        }
        Ok(self
            .gift_id
            .lock()
            .await
            .clone()
            .unwrap_or_else(|| "mock-gift".to_string()))
    }
}

/// In-memory payment processor recording charges and refunds. Charge failures
/// are consumed in the order they were injected.
#[derive(Default)]
pub struct MockPaymentProcessor {
    charges: Mutex<Vec<ChargeRequest>>,
    refunds: Mutex<Vec<String>>,
    charge_errors: Mutex<VecDeque<PaymentError>>,
    refund_error: Mutex<Option<PaymentError>>,
}

impl MockPaymentProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fail_charge(&self, error: PaymentError) {
        self.charge_errors.lock().await.push_back(error);
    }

    pub async fn fail_refund(&self, error: PaymentError) {
        *self.refund_error.lock().await = Some(error);
    }

    pub async fn charges(&self) -> Vec<ChargeRequest> {
        self.charges.lock().await.clone()
    }

    pub async fn refunds(&self) -> Vec<String> {
        self.refunds.lock().await.clone()
    }
}

#[async_trait]
impl PaymentProcessor for MockPaymentProcessor {
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeReceipt, PaymentError> {
        let mut charges = self.charges.lock().await;
        charges.push(request.clone());
        if let Some(e) = self.charge_errors.lock().await.pop_front() {
            return Err(e);
        }
        Ok(ChargeReceipt {
            id: format!("ch_{}", charges.len()),
            status: "succeeded".to_string(),
        })
    }

    async fn refund(&self, charge_id: &str) -> Result<RefundReceipt, PaymentError> {
        self.refunds.lock().await.push(charge_id.to_string());
        if let Some(e) = self.refund_error.lock().await.take() {
            return Err(e);
        }
        Ok(RefundReceipt {
            id: format!("re_{charge_id}"),
            status: "succeeded".to_string(),
        })
    }
}

/// Every span and event field recorded while the returned guard is alive, as
/// `name=value` strings. Scoped to the current thread.
pub fn capture_telemetry() -> (tracing::subscriber::DefaultGuard, Arc<std::sync::Mutex<Vec<String>>>) {
    use tracing_subscriber::layer::SubscriberExt;

    let fields: Arc<std::sync::Mutex<Vec<String>>> = Arc::default();
    let subscriber = tracing_subscriber::registry().with(FieldCapture(fields.clone()));
    (tracing::subscriber::set_default(subscriber), fields)
}

struct FieldCapture(Arc<std::sync::Mutex<Vec<String>>>);

struct FieldVisitor<'a>(&'a mut Vec<String>);

impl tracing::field::Visit for FieldVisitor<'_> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.0.push(format!("{}={:?}", field.name(), value));
    }
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for FieldCapture {
    fn on_new_span(
        &self,
        attrs: &tracing::span::Attributes<'_>,
        _id: &tracing::span::Id,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        attrs.record(&mut FieldVisitor(&mut self.0.lock().unwrap()));
    }

    fn on_record(
        &self,
        _id: &tracing::span::Id,
        values: &tracing::span::Record<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        values.record(&mut FieldVisitor(&mut self.0.lock().unwrap()));
    }

    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        event.record(&mut FieldVisitor(&mut self.0.lock().unwrap()));
    }
}
