use crate::{
    api::{self, GateConfig},
    cli::telemetry,
    session::TokenConfig,
};
use anyhow::Result;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tracing::{info, warn};

/// Secrets shorter than this are accepted but logged as weak.
const MIN_RECOMMENDED_SECRET_BYTES: usize = 32;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub jwt_secret: SecretString,
    pub issuer: String,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
    pub admin_path_prefixes: Vec<String>,
    pub shutdown_timeout_seconds: u64,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    if args.jwt_secret.expose_secret().len() < MIN_RECOMMENDED_SECRET_BYTES {
        warn!(
            "JWT secret is shorter than {} bytes; use a longer random secret",
            MIN_RECOMMENDED_SECRET_BYTES
        );
    }

    info!(
        port = args.port,
        issuer = %args.issuer,
        access_ttl = args.access_token_ttl_seconds,
        refresh_ttl = args.refresh_token_ttl_seconds,
        admin_prefixes = ?args.admin_path_prefixes,
        "Starting concierge"
    );

    let token_config = TokenConfig::new(args.jwt_secret, args.issuer)
        .with_access_ttl_seconds(args.access_token_ttl_seconds)
        .with_refresh_ttl_seconds(args.refresh_token_ttl_seconds);

    let gate_config = GateConfig::new().with_admin_prefixes(args.admin_path_prefixes);

    let result = api::new(
        args.port,
        args.dsn,
        token_config,
        gate_config,
        Duration::from_secs(args.shutdown_timeout_seconds),
    )
    .await;

    telemetry::shutdown_tracer();

    result
}
