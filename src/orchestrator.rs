use std::sync::Arc;
use std::time::Duration;

use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use crate::config::WorkflowMode;
use crate::crm::{CrmError, CrmReceipt, CrmRecorder};
use crate::donation::{Donation, DonationError};
use crate::payment::{ChargeReceipt, ChargeRequest, PaymentError, PaymentProcessor};
use crate::reconciler::{Reconciliation, ReconciliationQueue};

#[derive(Debug)]
pub enum PaymentOutcome {
    Charged(ChargeReceipt),
    Failed(PaymentError),
    NotAttempted,
}

#[derive(Debug)]
pub enum CrmOutcome {
    Recorded(CrmReceipt),
    Failed(CrmError),
    NotAttempted,
}

#[derive(Debug)]
pub struct DonationReport {
    pub payment: PaymentOutcome,
    pub crm: CrmOutcome,
}

impl DonationReport {
    pub fn succeeded(&self) -> bool {
        matches!(self.payment, PaymentOutcome::Charged(_))
            && matches!(self.crm, CrmOutcome::Recorded(_))
    }
}

const CHARGE_ATTEMPTS: usize = 2;
const CHARGE_RETRY_DELAY: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct ChargeSettings {
    pub currency: String,
    pub description: String,
}

/// Charges the donor and records the gift, one of each per donation.
///
/// Each submission gets a fresh idempotency key. Transient charge failures are
/// retried under that key; a replayed form is a new submission and charges
/// and records again.
pub struct DonationOrchestrator {
    payments: Arc<dyn PaymentProcessor>,
    recorder: CrmRecorder,
    mode: WorkflowMode,
    charge: ChargeSettings,
    reconciliation: ReconciliationQueue,
}

impl DonationOrchestrator {
    pub fn new(
        payments: Arc<dyn PaymentProcessor>,
        recorder: CrmRecorder,
        mode: WorkflowMode,
        charge: ChargeSettings,
        reconciliation: ReconciliationQueue,
    ) -> Self {
        Self {
            payments,
            recorder,
            mode,
            charge,
            reconciliation,
        }
    }

    pub async fn process(&self, donation: Donation) -> Result<DonationReport, DonationError> {
        donation.validate()?;
        let request = ChargeRequest {
            amount_minor: donation.minor_units()?,
            currency: self.charge.currency.clone(),
            description: self.charge.description.clone(),
            source_token: donation.token.clone(),
            idempotency_key: Uuid::new_v4().to_string(),
        };

        let span = info_span!(
            "donation",
            submission = %request.idempotency_key,
            amount = %donation.amount,
            mode = ?self.mode
        );
        let report = match self.mode {
            WorkflowMode::Saga => self.run_saga(&donation, &request).instrument(span).await,
            WorkflowMode::Concurrent => {
                self.run_concurrent(&donation, &request)
                    .instrument(span)
                    .await
            }
        };

        if let Some(item) = divergence(&donation, &request, &report) {
            self.reconciliation.submit(item).await;
        }
        if let CrmOutcome::Recorded(receipt) = &report.crm {
            info!(
                gift_id = %receipt.gift_id,
                new_constituent = receipt.created_constituent,
                "Gift attached to constituent"
            );
        }
        info!(succeeded = report.succeeded(), "Donation processed");
        Ok(report)
    }

    async fn run_saga(&self, donation: &Donation, request: &ChargeRequest) -> DonationReport {
        let payment = self.charge(request).await;
        let crm = match payment {
            PaymentOutcome::Charged(_) => self.record(donation).await,
            _ => CrmOutcome::NotAttempted,
        };
        DonationReport { payment, crm }
    }

    /// Both steps run regardless of each other; a declined card still
    /// produces a CRM gift.
    async fn run_concurrent(&self, donation: &Donation, request: &ChargeRequest) -> DonationReport {
        let (payment, crm) = futures::join!(self.charge(request), self.record(donation));
        DonationReport { payment, crm }
    }

    async fn charge(&self, request: &ChargeRequest) -> PaymentOutcome {
        let mut attempt = 1;
        loop {
            match self.payments.charge(request).await {
                Ok(receipt) => return PaymentOutcome::Charged(receipt),
                Err(e) if e.is_retryable() && attempt < CHARGE_ATTEMPTS => {
                    warn!(attempt, "Payment step failed, retrying: {e}");
                    tokio::time::sleep(CHARGE_RETRY_DELAY).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(retryable = e.is_retryable(), "Payment step failed: {e}");
                    return PaymentOutcome::Failed(e);
                }
            }
        }
    }

    async fn record(&self, donation: &Donation) -> CrmOutcome {
        match self.recorder.record_donation(donation).await {
            Ok(receipt) => CrmOutcome::Recorded(receipt),
            Err(e) => {
                warn!("CRM step failed: {e}");
                CrmOutcome::Failed(e)
            }
        }
    }
}

fn divergence(
    donation: &Donation,
    request: &ChargeRequest,
    report: &DonationReport,
) -> Option<Reconciliation> {
    match (&report.payment, &report.crm) {
        (PaymentOutcome::Charged(charge), CrmOutcome::Failed(e)) => {
            Some(Reconciliation::UnrecordedCharge {
                charge_id: charge.id.clone(),
                email: donation.email.clone(),
                amount: donation.amount,
                reason: e.to_string(),
            })
        }
        (PaymentOutcome::Failed(e), CrmOutcome::Recorded(receipt)) => {
            Some(Reconciliation::UnpaidGift {
                gift_id: receipt.gift_id.clone(),
                constituent_id: receipt.constituent_id.clone(),
                email: donation.email.clone(),
                reason: e.to_string(),
            })
        }
        // The processor may have taken the money before the failure.
        (PaymentOutcome::Failed(e), _) if e.is_retryable() => {
            Some(Reconciliation::UnconfirmedCharge {
                idempotency_key: request.idempotency_key.clone(),
                email: donation.email.clone(),
                amount: donation.amount,
                reason: e.to_string(),
            })
        }
        _ => None,
    }
}
