use std::sync::Arc;

use tracing::{info, warn};

use super::{ConstituentMatch, Crm, CrmError, NewConstituent, SearchResponse};
use crate::config::MatchPolicy;
use crate::donation::Donation;

/// Result of searching for a donor. Search failures are `Err`, never `NotFound`.
#[derive(Debug, Clone, PartialEq)]
pub enum LookupOutcome {
    Found(String),
    NotFound,
    Ambiguous(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConstituent {
    pub id: String,
    pub created: bool,
}

pub struct ConstituentResolver {
    crm: Arc<dyn Crm>,
    policy: MatchPolicy,
}

impl ConstituentResolver {
    pub fn new(crm: Arc<dyn Crm>, policy: MatchPolicy) -> Self {
        Self { crm, policy }
    }

    pub async fn lookup(&self, email: &str) -> Result<LookupOutcome, CrmError> {
        let response = self.crm.search_constituents(email).await?;
        Ok(self.select(email, response))
    }

    fn select(&self, email: &str, response: SearchResponse) -> LookupOutcome {
        match self.policy {
            MatchPolicy::FirstResult => match response.value.into_iter().next() {
                Some(first) => LookupOutcome::Found(first.id),
                None => LookupOutcome::NotFound,
            },
            MatchPolicy::ExactEmail => {
                let mut exact: Vec<ConstituentMatch> = response
                    .value
                    .into_iter()
                    .filter(|m| {
                        m.email
                            .as_deref()
                            .is_some_and(|e| e.trim().eq_ignore_ascii_case(email.trim()))
                    })
                    .collect();
                match exact.len() {
                    0 => LookupOutcome::NotFound,
                    1 => LookupOutcome::Found(exact.remove(0).id),
                    n => LookupOutcome::Ambiguous(n),
                }
            }
        }
    }

    /// Finds the donor by email, creating a constituent only when the search
    /// returns no usable match.
    #[tracing::instrument(skip_all)]
    pub async fn resolve(&self, donation: &Donation) -> Result<ResolvedConstituent, CrmError> {
        match self.lookup(&donation.email).await? {
            LookupOutcome::Found(id) => {
                info!(constituent_id = %id, "Found constituent");
                Ok(ResolvedConstituent { id, created: false })
            }
            LookupOutcome::Ambiguous(count) => {
                warn!(count, "Ambiguous constituent match, needs operator review");
                Err(CrmError::AmbiguousMatch {
                    email: donation.email.clone(),
                    count,
                })
            }
            LookupOutcome::NotFound => {
                let id = self
                    .crm
                    .create_constituent(&NewConstituent::individual(donation))
                    .await?;
                info!(constituent_id = %id, "Created constituent");
                Ok(ResolvedConstituent { id, created: true })
            }
        }
    }
}
