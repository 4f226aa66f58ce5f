use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_derive::{Deserialize, Serialize};

use crate::config::GiftConfig;
use crate::donation::Donation;

const SKY_TIMESTAMP: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub value: Vec<ConstituentMatch>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConstituentMatch {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatedResponse {
    #[serde(default)]
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewConstituent {
    #[serde(rename = "type")]
    pub kind: String,
    pub first: String,
    pub last: String,
    pub email: ConstituentEmail,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConstituentEmail {
    pub address: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub primary: bool,
}

impl NewConstituent {
    pub fn individual(donation: &Donation) -> Self {
        Self {
            kind: "Individual".to_string(),
            first: donation.first_name.clone(),
            last: donation.last_name.clone(),
            email: ConstituentEmail {
                address: donation.email.clone(),
                kind: "Email".to_string(),
                primary: true,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GiftAmount {
    #[serde(with = "rust_decimal::serde::float")]
    pub value: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GiftSplit {
    pub amount: GiftAmount,
    pub appeal_id: String,
    pub campaign_id: String,
    pub fund_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GiftPayment {
    pub payment_method: String,
}

/// Gift payload. The payment method is an offline designation and carries no
/// reference to the processor charge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewGift {
    pub constituent_id: String,
    #[serde(rename = "type")]
    pub gift_type: String,
    pub date: String,
    pub post_date: String,
    pub post_status: String,
    pub amount: GiftAmount,
    pub gift_splits: Vec<GiftSplit>,
    pub payments: Vec<GiftPayment>,
}

impl NewGift {
    pub fn new(
        constituent_id: &str,
        amount: Decimal,
        config: &GiftConfig,
        now: DateTime<Utc>,
    ) -> Self {
        let timestamp = now.format(SKY_TIMESTAMP).to_string();
        let amount = GiftAmount { value: amount };

        Self {
            constituent_id: constituent_id.to_string(),
            gift_type: config.gift_type.clone(),
            date: timestamp.clone(),
            post_date: timestamp,
            post_status: config.post_status.clone(),
            amount,
            gift_splits: vec![GiftSplit {
                amount,
                appeal_id: config.appeal_id.clone(),
                campaign_id: config.campaign_id.clone(),
                fund_id: config.fund_id.clone(),
            }],
            payments: vec![GiftPayment {
                payment_method: config.payment_method.clone(),
            }],
        }
    }
}
