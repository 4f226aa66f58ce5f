use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use super::{ConstituentResolver, Crm, CrmError, NewGift};
use crate::config::{GiftConfig, MatchPolicy};
use crate::donation::Donation;

#[derive(Debug, Clone, PartialEq)]
pub struct CrmReceipt {
    pub constituent_id: String,
    pub created_constituent: bool,
    pub gift_id: String,
}

/// Records a donation as a gift: one lookup-or-create, then one gift.
pub struct CrmRecorder {
    crm: Arc<dyn Crm>,
    resolver: ConstituentResolver,
    gift: GiftConfig,
}

impl CrmRecorder {
    pub fn new(crm: Arc<dyn Crm>, policy: MatchPolicy, gift: GiftConfig) -> Self {
        Self {
            resolver: ConstituentResolver::new(crm.clone(), policy),
            crm,
            gift,
        }
    }

    #[tracing::instrument(skip_all)]
    pub async fn record_donation(&self, donation: &Donation) -> Result<CrmReceipt, CrmError> {
        let constituent = self.resolver.resolve(donation).await?;

        let gift = NewGift::new(&constituent.id, donation.amount, &self.gift, Utc::now());
        let gift_id = self.crm.create_gift(&gift).await?;
        info!(gift_id = %gift_id, constituent_id = %constituent.id, "Gift recorded");

        Ok(CrmReceipt {
            constituent_id: constituent.id,
            created_constituent: constituent.created,
            gift_id,
        })
    }
}
