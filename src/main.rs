mod config;
mod crm;
mod donation;
mod orchestrator;
mod payment;
mod reconciler;
mod routes;
#[cfg(test)]
mod testing;

use crate::config::{Config, SkyAuthConfig, SkyConfig};
use crate::crm::{CredentialProvider, CrmRecorder, RefreshingToken, SkyClient, StaticToken};
use crate::orchestrator::{ChargeSettings, DonationOrchestrator};
use crate::payment::StripeClient;
use crate::reconciler::Reconciler;
use axum::Router;
use clap::Parser;
use eyre::{Report, WrapErr as _};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub type SharedAppState = Arc<AppState>;
pub struct AppState {
    orchestrator: DonationOrchestrator,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "DONATION_CONFIG", default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Report> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(sentry::integrations::tracing::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "info,{}=debug,hyper_util=info",
                    env!("CARGO_CRATE_NAME")
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load(&cli.config)?;
    config.validate()?;

    let _sentry = sentry::init((
        config.telemetry.sentry_dsn.clone(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            traces_sample_rate: 1.0,
            ..Default::default()
        },
    ));

    let payments = Arc::new(StripeClient::new(&config.stripe).wrap_err("Failed to build Stripe client")?);
    let sky = Arc::new(
        SkyClient::new(
            &config.sky.api_base,
            config.sky.subscription_key.clone(),
            Duration::from_secs(config.sky.timeout_secs),
            credentials(&config.sky)?,
        )
        .wrap_err("Failed to build SKY client")?,
    );

    let (reconciler, queue) = Reconciler::new(
        payments.clone(),
        config.workflow.compensation,
        config.workflow.review_log.clone(),
        config.workflow.queue_size,
    );
    let reconciler_handle = tokio::spawn(reconciler.run());

    let orchestrator = DonationOrchestrator::new(
        payments,
        CrmRecorder::new(sky, config.sky.match_policy, config.gift.clone()),
        config.workflow.mode,
        ChargeSettings {
            currency: config.stripe.currency.clone(),
            description: config.stripe.description.clone(),
        },
        queue,
    );
    let app_state: SharedAppState = Arc::new(AppState { orchestrator });

    let listener = tokio::net::TcpListener::bind(&config.server.to_socket_addrs())
        .await
        .wrap_err("Failed to bind listener")?;
    tracing::info!(
        mode = ?config.workflow.mode,
        "listening on {}",
        listener.local_addr()?
    );

    let app = Router::new().merge(routes::router()).with_state(app_state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("received CTRL+C, shutting down");
            }
        })
        .await?;

    // The router held the last queue handle; wait for pending compensations.
    reconciler_handle.await?;
    Ok(())
}

fn credentials(config: &SkyConfig) -> Result<Arc<dyn CredentialProvider>, Report> {
    let provider: Arc<dyn CredentialProvider> = match &config.auth {
        SkyAuthConfig::Static { access_token } => Arc::new(StaticToken::new(access_token.clone())),
        SkyAuthConfig::Refresh {
            client_id,
            client_secret,
            refresh_token,
            token_url,
        } => {
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()?;
            Arc::new(RefreshingToken::new(
                client,
                token_url.clone(),
                client_id.clone(),
                client_secret.clone(),
                refresh_token.clone(),
            ))
        }
    };
    Ok(provider)
}
