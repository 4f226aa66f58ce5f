use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, HeaderValue};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, error};
use url::Url;

use super::{
    CreatedResponse, CredentialProvider, Crm, CrmError, NewConstituent, NewGift, SearchResponse,
};

const SUBSCRIPTION_KEY_HEADER: &str = "bb-api-subscription-key";

pub struct SkyClient {
    client: Client,
    api_base: Url,
    subscription_key: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl SkyClient {
    pub fn new(
        api_base: &str,
        subscription_key: impl Into<String>,
        timeout: Duration,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, CrmError> {
        let client = Client::builder().timeout(timeout).build()?;
        // A trailing slash keeps `Url::join` from dropping the last path segment.
        let mut base = api_base.trim_end_matches('/').to_string();
        base.push('/');
        let api_base = Url::parse(&base).map_err(|e| CrmError::Parse(e.to_string()))?;

        Ok(Self {
            client,
            api_base,
            subscription_key: subscription_key.into(),
            credentials,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, CrmError> {
        self.api_base
            .join(path)
            .map_err(|e| CrmError::Parse(e.to_string()))
    }

    async fn request(&self, method: Method, url: Url) -> Result<RequestBuilder, CrmError> {
        let token = self.credentials.access_token().await?;
        Ok(self
            .client
            .request(method, url)
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .bearer_auth(token)
            .header(SUBSCRIPTION_KEY_HEADER, &self.subscription_key))
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, CrmError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), "CRM request failed: {}", body);
            return Err(CrmError::Status {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json()
            .await
            .map_err(|e| CrmError::Parse(e.to_string()))
    }

    async fn create(&self, path: &str, body: &impl serde::Serialize) -> Result<String, CrmError> {
        let url = self.endpoint(path)?;
        let response = self.request(Method::POST, url).await?.json(body).send().await?;
        let created: CreatedResponse = Self::read_json(response).await?;
        if created.id.is_empty() {
            return Err(CrmError::Parse(format!("{path} response has no id")));
        }
        Ok(created.id)
    }
}

#[async_trait]
impl Crm for SkyClient {
    #[tracing::instrument(skip_all)]
    async fn search_constituents(&self, search_text: &str) -> Result<SearchResponse, CrmError> {
        let mut url = self.endpoint("constituent/v1/constituents/search")?;
        url.query_pairs_mut()
            .append_pair("search_text", search_text)
            .append_pair("include_inactive", "true")
            .append_pair("strict_search", "false");

        let response = self.request(Method::GET, url).await?.send().await?;
        let result: SearchResponse = Self::read_json(response).await?;
        debug!(count = result.count, "Constituent search finished");
        Ok(result)
    }

    #[tracing::instrument(skip_all)]
    async fn create_constituent(&self, constituent: &NewConstituent) -> Result<String, CrmError> {
        self.create("constituent/v1/constituents", constituent).await
    }

    #[tracing::instrument(skip_all, fields(constituent_id = %gift.constituent_id))]
    async fn create_gift(&self, gift: &NewGift) -> Result<String, CrmError> {
        self.create("gift/v1/gifts", gift).await
    }
}
