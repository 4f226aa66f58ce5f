//! CRM integration (Blackbaud SKY API).
//!
//! A donation is recorded as a gift on a constituent. The constituent is
//! found by email or created when the search comes back empty.

mod credentials;
mod recorder;
mod resolve;
mod sky;
mod types;

pub use credentials::{CredentialProvider, RefreshingToken, StaticToken};
pub use recorder::{CrmReceipt, CrmRecorder};
pub use resolve::ConstituentResolver;
pub use sky::SkyClient;
pub use types::*;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CrmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("CRM returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to parse CRM response: {0}")]
    Parse(String),

    #[error("could not obtain access token: {0}")]
    Auth(String),

    #[error("{count} constituents match {email}")]
    AmbiguousMatch { email: String, count: usize },
}

#[async_trait]
pub trait Crm: Send + Sync {
    async fn search_constituents(&self, search_text: &str) -> Result<SearchResponse, CrmError>;

    /// Returns the id of the new constituent.
    async fn create_constituent(&self, constituent: &NewConstituent) -> Result<String, CrmError>;

    /// Returns the id of the new gift.
    async fn create_gift(&self, gift: &NewGift) -> Result<String, CrmError>;
}
