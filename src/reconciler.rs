//! Follow-up work for donations whose two writes diverged.
//!
//! The orchestrator hands over a [`Reconciliation`] whenever money was taken
//! without a CRM record, a CRM record exists for a charge that failed, or a
//! charge ended in a transient failure and may have gone through.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_derive::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tracing::{error, info, warn};

use crate::config::CompensationPolicy;
use crate::payment::PaymentProcessor;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reconciliation {
    /// The charge succeeded but no gift was recorded.
    UnrecordedCharge {
        charge_id: String,
        email: String,
        amount: Decimal,
        reason: String,
    },
    /// A gift was recorded but the charge failed.
    UnpaidGift {
        gift_id: String,
        constituent_id: String,
        email: String,
        reason: String,
    },
    /// The charge failed in transit; the processor knows it by this key.
    UnconfirmedCharge {
        idempotency_key: String,
        email: String,
        amount: Decimal,
        reason: String,
    },
}

impl Reconciliation {
    pub fn kind(&self) -> &'static str {
        match self {
            Reconciliation::UnrecordedCharge { .. } => "unrecorded_charge",
            Reconciliation::UnpaidGift { .. } => "unpaid_gift",
            Reconciliation::UnconfirmedCharge { .. } => "unconfirmed_charge",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Refunded { refund_id: String },
    Flagged,
}

#[derive(Debug, Serialize)]
struct ReviewEntry<'a> {
    flagged_at: DateTime<Utc>,
    note: &'a str,
    item: &'a Reconciliation,
}

/// Sending half handed to the orchestrator.
///
/// Submitting never waits on the reconciler: when the queue is full or
/// closed the item goes straight to the review log.
#[derive(Clone)]
pub struct ReconciliationQueue {
    tx: Sender<Reconciliation>,
    review_log: PathBuf,
}

impl ReconciliationQueue {
    pub async fn submit(&self, item: Reconciliation) {
        let (item, note) = match self.tx.try_send(item) {
            Ok(()) => return,
            Err(TrySendError::Full(item)) => (item, "reconciliation queue full"),
            Err(TrySendError::Closed(item)) => (item, "reconciler stopped"),
        };
        warn!(kind = item.kind(), note, "Reconciliation item not queued, writing it for review");
        if let Err(e) = append_review(&self.review_log, note, &item).await {
            error!(kind = item.kind(), path = %self.review_log.display(), "Failed to write review log: {e}");
        }
    }
}

pub struct Reconciler {
    payments: Arc<dyn PaymentProcessor>,
    policy: CompensationPolicy,
    review_log: PathBuf,
    rx: Receiver<Reconciliation>,
}

impl Reconciler {
    pub fn new(
        payments: Arc<dyn PaymentProcessor>,
        policy: CompensationPolicy,
        review_log: PathBuf,
        queue_size: usize,
    ) -> (Self, ReconciliationQueue) {
        let (tx, rx) = mpsc::channel(queue_size);
        let queue = ReconciliationQueue {
            tx,
            review_log: review_log.clone(),
        };
        let reconciler = Self {
            payments,
            policy,
            review_log,
            rx,
        };
        (reconciler, queue)
    }

    /// Runs until every queue handle is dropped.
    pub async fn run(mut self) {
        while let Some(item) = self.rx.recv().await {
            self.handle(item).await;
        }
        info!("Reconciliation queue closed, reconciler stopped");
    }

    #[cfg(test)]
    pub(crate) fn receiver_mut(&mut self) -> &mut Receiver<Reconciliation> {
        &mut self.rx
    }

    #[tracing::instrument(skip_all, fields(kind = item.kind()))]
    pub async fn handle(&self, item: Reconciliation) -> Resolution {
        match (&item, self.policy) {
            (Reconciliation::UnrecordedCharge { charge_id, .. }, CompensationPolicy::Refund) => {
                match self.payments.refund(charge_id).await {
                    Ok(refund) => {
                        info!(charge_id = %charge_id, refund_id = %refund.id, "Compensated unrecorded charge");
                        Resolution::Refunded {
                            refund_id: refund.id,
                        }
                    }
                    Err(e) => {
                        error!(charge_id = %charge_id, "Refund failed: {e}");
                        self.flag(&item, &format!("refund failed: {e}")).await
                    }
                }
            }
            (Reconciliation::UnrecordedCharge { .. }, CompensationPolicy::ManualReview) => {
                self.flag(&item, "charge has no CRM gift").await
            }
            (Reconciliation::UnpaidGift { .. }, _) => {
                self.flag(&item, "gift has no successful charge").await
            }
            (Reconciliation::UnconfirmedCharge { .. }, _) => {
                self.flag(&item, "charge outcome unknown").await
            }
        }
    }

    async fn flag(&self, item: &Reconciliation, note: &str) -> Resolution {
        // Donor details stay in the review log, out of telemetry.
        warn!(kind = item.kind(), note, "Flagged for manual review");
        if let Err(e) = append_review(&self.review_log, note, item).await {
            error!(path = %self.review_log.display(), "Failed to write review log: {e}");
        }
        Resolution::Flagged
    }
}

async fn append_review(path: &Path, note: &str, item: &Reconciliation) -> Result<(), eyre::Report> {
    let entry = ReviewEntry {
        flagged_at: Utc::now(),
        note,
        item,
    };
    let mut line = serde_json::to_string(&entry)?;
    line.push('\n');
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}
