//! ace-client
//!
//! Command-line front end for the token engine: acquires tokens, installs
//! them at each resource server and keeps accessing resources until the
//! denial budget runs out or the process is interrupted.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ace_token_engine::{
    engine_config, resource_triplets, DefaultTokenEngine, EngineConfig, EngineReport,
};

/// Client for ACE protected resource servers
#[derive(Parser, Debug, Clone)]
#[command(name = "ace-client")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Authorization server address
    #[arg(short = 'a', long = "asuri", env = "ACE_AS_URI")]
    as_uri: Option<String>,

    /// Resource server address (repeatable)
    #[arg(short = 'r', long = "rsuri")]
    rs_uri: Vec<String>,

    /// Audience for the matching resource server (repeatable)
    #[arg(short = 'u', long)]
    audience: Vec<String>,

    /// Scope for the matching resource server (repeatable)
    #[arg(short = 's', long)]
    scope: Vec<String>,

    /// Denied resource requests tolerated before a token is dropped
    #[arg(short = 'd', long)]
    denials: Option<u32>,

    /// Seconds between resource requests
    #[arg(short = 'q', long = "requestinterval")]
    request_interval: Option<u64>,

    /// Client identifier at the authorization server
    #[arg(long, env = "ACE_CLIENT_ID")]
    client_id: Option<String>,

    /// Client secret at the authorization server
    #[arg(long, env = "ACE_CLIENT_SECRET", hide_env_values = true)]
    client_secret: Option<String>,

    /// Poll the revocation list
    #[arg(short = 'p', long, conflicts_with = "observe")]
    polling: bool,

    /// Seconds between revocation list polls
    #[arg(short = 'e', long = "interval", default_value_t = 10, requires = "polling")]
    poll_interval: u64,

    /// Observe the revocation list for changes
    #[arg(short = 'o', long)]
    observe: bool,

    /// Revocation list path at the authorization server
    #[arg(short = 't', long = "trladdress")]
    trl_address: Option<String>,

    /// Seconds a token lives when the server gives no lifetime
    #[arg(long)]
    token_lifetime: Option<u64>,

    /// Request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,
}

impl Cli {
    fn into_config(self) -> Result<EngineConfig> {
        let mut builder = engine_config().resource_servers(resource_triplets(
            self.rs_uri,
            self.audience,
            self.scope,
        )?);

        if let Some(uri) = self.as_uri {
            builder = builder.as_uri(uri);
        }
        if let Some(id) = self.client_id {
            builder = builder.client_id(id);
        }
        if let Some(secret) = self.client_secret {
            builder = builder.client_secret(secret);
        }
        if let Some(denials) = self.denials {
            builder = builder.denial_budget(denials);
        }
        if let Some(secs) = self.request_interval {
            builder = builder.request_interval(Duration::from_secs(secs));
        }
        if self.polling {
            builder = builder.polling(Duration::from_secs(self.poll_interval));
        } else if self.observe {
            builder = builder.observe();
        }
        if let Some(address) = self.trl_address {
            builder = builder.trl_address(address);
        }
        if let Some(secs) = self.token_lifetime {
            builder = builder.fallback_token_lifetime(Duration::from_secs(secs));
        }
        if let Some(secs) = self.timeout {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        Ok(builder.build()?)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Cli::parse()
        .into_config()
        .context("invalid client configuration")?;
    tracing::info!(
        as_uri = %config.as_uri,
        servers = config.resource_servers.len(),
        revocation = ?config.revocation,
        "Starting ACE client"
    );

    let engine = DefaultTokenEngine::new(config)?;

    tokio::select! {
        report = engine.run() => {
            let report = report.context("authorization server unavailable")?;
            log_report(&report);
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, shutting down");
        }
    }

    Ok(())
}

fn log_report(report: &EngineReport) {
    for exit in &report.loops {
        match &exit.error {
            Some(e) => tracing::warn!(
                address = %exit.address,
                renewals = exit.renewals,
                error = %e,
                "Access loop stopped"
            ),
            None => tracing::info!(
                address = %exit.address,
                renewals = exit.renewals,
                "Access loop finished"
            ),
        }
    }
    if let Some(summary) = &report.revocation {
        tracing::info!(
            updates = summary.updates,
            purged = summary.purged,
            errors = summary.errors,
            "Revocation sync stopped"
        );
    }
    tracing::info!(renewals = report.total_renewals(), "Client finished");
}

/// Initialize tracing subscriber with environment filter
fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
