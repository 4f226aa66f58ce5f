use eyre::{Context, Report};
use serde_derive::{Deserialize, Serialize};
use std::env;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub stripe: StripeConfig,
    #[serde(default)]
    pub sky: SkyConfig,
    #[serde(default)]
    pub gift: GiftConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ServerConfig {
    pub host: Ipv4Addr,
    pub port: u16,
}

impl ServerConfig {
    pub fn to_socket_addrs(&self) -> SocketAddr {
        SocketAddr::new(self.host.into(), self.port)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct StripeConfig {
    /// Overridden by `STRIPE_SECRET_KEY`.
    pub secret_key: String,
    pub api_base: String,
    pub currency: String,
    pub description: String,
    pub timeout_secs: u64,
}

impl Default for StripeConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            api_base: "https://api.stripe.com".to_string(),
            currency: "usd".to_string(),
            description: "Generous Donation to Zeidman Development".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SkyConfig {
    pub api_base: String,
    /// Overridden by `SKY_SUBSCRIPTION_KEY`.
    pub subscription_key: String,
    pub match_policy: MatchPolicy,
    pub timeout_secs: u64,
    pub auth: SkyAuthConfig,
}

impl Default for SkyConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.sky.blackbaud.com".to_string(),
            subscription_key: String::new(),
            match_policy: MatchPolicy::default(),
            timeout_secs: 30,
            auth: SkyAuthConfig::default(),
        }
    }
}

/// How a constituent search result is chosen.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// Take the first record the CRM returns.
    #[default]
    FirstResult,
    /// Keep only records whose email equals the donor's; more than one is an error.
    ExactEmail,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkyAuthConfig {
    /// A pre-issued access token (`SKY_ACCESS_TOKEN`).
    Static { access_token: String },
    /// OAuth refresh-token grant (`SKY_CLIENT_ID`, `SKY_CLIENT_SECRET`, `SKY_REFRESH_TOKEN`).
    Refresh {
        client_id: String,
        client_secret: String,
        refresh_token: String,
        #[serde(default = "default_token_url")]
        token_url: String,
    },
}

impl Default for SkyAuthConfig {
    fn default() -> Self {
        SkyAuthConfig::Static {
            access_token: String::new(),
        }
    }
}

fn default_token_url() -> String {
    "https://oauth2.sky.blackbaud.com/token".to_string()
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct GiftConfig {
    pub gift_type: String,
    pub post_status: String,
    pub payment_method: String,
    pub appeal_id: String,
    pub campaign_id: String,
    pub fund_id: String,
}

impl Default for GiftConfig {
    fn default() -> Self {
        Self {
            gift_type: "Donation".to_string(),
            post_status: "NotPosted".to_string(),
            payment_method: "Cash".to_string(),
            appeal_id: "25".to_string(),
            campaign_id: "2".to_string(),
            fund_id: "5".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowMode {
    /// Charge first, record only on success, compensate a failed record.
    #[default]
    Saga,
    /// Charge and record concurrently and AND the results. A declined card
    /// still produces a gift; divergent outcomes go to the reconciler.
    Concurrent,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompensationPolicy {
    #[default]
    Refund,
    ManualReview,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct WorkflowConfig {
    pub mode: WorkflowMode,
    pub compensation: CompensationPolicy,
    pub review_log: PathBuf,
    pub queue_size: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            mode: WorkflowMode::default(),
            compensation: CompensationPolicy::default(),
            review_log: PathBuf::from("reconciliation.jsonl"),
            queue_size: 64,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct TelemetryConfig {
    pub sentry_dsn: Option<String>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Report> {
        let path = path.as_ref();
        let config = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read config {}", path.display()))?;
        let mut config = Self::parse(&config)?;
        config.apply_env(|key| env::var(key).ok());
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self, Report> {
        toml::from_str(contents).wrap_err("Failed to parse config")
    }

    /// Secrets from the environment take precedence over the file.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("STRIPE_SECRET_KEY") {
            self.stripe.secret_key = key;
        }
        if let Some(key) = lookup("SKY_SUBSCRIPTION_KEY") {
            self.sky.subscription_key = key;
        }
        match &mut self.sky.auth {
            SkyAuthConfig::Static { access_token } => {
                if let Some(token) = lookup("SKY_ACCESS_TOKEN") {
                    *access_token = token;
                }
            }
            SkyAuthConfig::Refresh {
                client_id,
                client_secret,
                refresh_token,
                ..
            } => {
                if let Some(id) = lookup("SKY_CLIENT_ID") {
                    *client_id = id;
                }
                if let Some(secret) = lookup("SKY_CLIENT_SECRET") {
                    *client_secret = secret;
                }
                if let Some(token) = lookup("SKY_REFRESH_TOKEN") {
                    *refresh_token = token;
                }
            }
        }
    }

    pub fn validate(&self) -> Result<(), Report> {
        if self.stripe.secret_key.is_empty() {
            eyre::bail!("stripe.secret_key is not set (or STRIPE_SECRET_KEY)");
        }
        if self.sky.subscription_key.is_empty() {
            eyre::bail!("sky.subscription_key is not set (or SKY_SUBSCRIPTION_KEY)");
        }
        match &self.sky.auth {
            SkyAuthConfig::Static { access_token } if access_token.is_empty() => {
                eyre::bail!("sky.auth.access_token is not set (or SKY_ACCESS_TOKEN)")
            }
            SkyAuthConfig::Refresh {
                client_id,
                client_secret,
                refresh_token,
                ..
            } if client_id.is_empty() || client_secret.is_empty() || refresh_token.is_empty() => {
                eyre::bail!("sky.auth refresh credentials are incomplete")
            }
            _ => {}
        }
        if self.workflow.queue_size == 0 {
            eyre::bail!("workflow.queue_size must be greater than zero");
        }
        Ok(())
    }
}
