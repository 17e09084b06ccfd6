use crate::api::gate::DEFAULT_ADMIN_PREFIX;
use clap::{Arg, ArgAction, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_JWT_SECRET: &str = "jwt-secret";
pub const ARG_ISSUER: &str = "issuer";
pub const ARG_ACCESS_TOKEN_TTL_SECONDS: &str = "access-token-ttl-seconds";
pub const ARG_REFRESH_TOKEN_TTL_SECONDS: &str = "refresh-token-ttl-seconds";
pub const ARG_ADMIN_PATH_PREFIX: &str = "admin-path-prefix";
pub const ARG_SHUTDOWN_TIMEOUT_SECONDS: &str = "shutdown-timeout-seconds";

#[derive(Debug)]
pub struct Options {
    pub jwt_secret: SecretString,
    pub issuer: Option<String>,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
    pub admin_path_prefixes: Vec<String>,
    pub shutdown_timeout_seconds: u64,
}

impl Options {
    /// Parse token and gate arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the secret is missing or a TTL is not positive.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let jwt_secret = match matches.get_one::<String>(ARG_JWT_SECRET) {
            Some(value) if !value.trim().is_empty() => SecretString::from(value.clone()),
            _ => anyhow::bail!("missing required argument: --{ARG_JWT_SECRET}"),
        };

        let access_token_ttl_seconds = positive(matches, ARG_ACCESS_TOKEN_TTL_SECONDS)?;
        let refresh_token_ttl_seconds = positive(matches, ARG_REFRESH_TOKEN_TTL_SECONDS)?;

        let admin_path_prefixes = matches
            .get_many::<String>(ARG_ADMIN_PATH_PREFIX)
            .map(|values| {
                values
                    .filter(|v| !v.trim().is_empty())
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        Ok(Self {
            jwt_secret,
            issuer: matches
                .get_one::<String>(ARG_ISSUER)
                .cloned()
                .filter(|v| !v.trim().is_empty()),
            access_token_ttl_seconds,
            refresh_token_ttl_seconds,
            admin_path_prefixes,
            shutdown_timeout_seconds: matches
                .get_one::<u64>(ARG_SHUTDOWN_TIMEOUT_SECONDS)
                .copied()
                .unwrap_or(15),
        })
    }
}

fn positive(matches: &ArgMatches, id: &str) -> anyhow::Result<i64> {
    match matches.get_one::<i64>(id).copied() {
        Some(value) if value > 0 => Ok(value),
        Some(value) => anyhow::bail!("--{id} must be positive, got {value}"),
        None => anyhow::bail!("missing required argument: --{id}"),
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_JWT_SECRET)
                .long(ARG_JWT_SECRET)
                .help("Shared secret used to sign and verify HS256 tokens")
                .env("CONCIERGE_JWT_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_ISSUER)
                .long(ARG_ISSUER)
                .help("Issuer claim for tokens (default: http://localhost:<port>)")
                .env("CONCIERGE_ISSUER"),
        )
        .arg(
            Arg::new(ARG_ACCESS_TOKEN_TTL_SECONDS)
                .long(ARG_ACCESS_TOKEN_TTL_SECONDS)
                .help("Access token TTL in seconds")
                .env("CONCIERGE_ACCESS_TOKEN_TTL_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_REFRESH_TOKEN_TTL_SECONDS)
                .long(ARG_REFRESH_TOKEN_TTL_SECONDS)
                .help("Refresh token TTL in seconds")
                .env("CONCIERGE_REFRESH_TOKEN_TTL_SECONDS")
                .default_value("2592000")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_ADMIN_PATH_PREFIX)
                .long(ARG_ADMIN_PATH_PREFIX)
                .help("Extra path prefix that requires the admin role (repeatable, /api/admin always does)")
                .env("CONCIERGE_ADMIN_PATH_PREFIX")
                .value_delimiter(',')
                .action(ArgAction::Append)
                .default_value(DEFAULT_ADMIN_PREFIX),
        )
        .arg(
            Arg::new(ARG_SHUTDOWN_TIMEOUT_SECONDS)
                .long(ARG_SHUTDOWN_TIMEOUT_SECONDS)
                .help("Seconds to wait for in-flight requests on shutdown")
                .env("CONCIERGE_SHUTDOWN_TIMEOUT_SECONDS")
                .default_value("15")
                .value_parser(clap::value_parser!(u64)),
        )
}
