//! Configuration types.
//!
//! Everything is read from the environment once at startup.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default Linear GraphQL endpoint.
pub const DEFAULT_LINEAR_API_URL: &str = "https://api.linear.app/graphql";

/// Ticketing backend configuration.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// API key sent in the `Authorization` header.
    pub api_key: SecretString,
    /// GraphQL endpoint.
    pub api_url: String,
    /// Team that new tickets are filed under.
    pub team_id: String,
}

impl BackendConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("LINEAR_API_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("LINEAR_API_KEY".into()))?;
        let team_id = std::env::var("LINEAR_TEAM_ID")
            .map_err(|_| ConfigError::MissingEnvVar("LINEAR_TEAM_ID".into()))?;
        let api_url =
            std::env::var("LINEAR_API_URL").unwrap_or_else(|_| DEFAULT_LINEAR_API_URL.to_string());

        Ok(Self {
            api_key: SecretString::from(api_key),
            api_url,
            team_id,
        })
    }
}

/// Slack connector configuration.
#[derive(Debug, Clone)]
pub struct SlackConfig {
    pub bot_token: SecretString,
    /// When present, inbound webhook signatures are verified.
    pub signing_secret: Option<SecretString>,
    /// Port for the events webhook.
    pub port: u16,
}

impl SlackConfig {
    /// Returns `None` when `SLACK_BOT_TOKEN` is not set (Slack disabled).
    pub fn from_env() -> Option<Self> {
        let bot_token = std::env::var("SLACK_BOT_TOKEN").ok()?;
        let signing_secret = std::env::var("SLACK_SIGNING_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .map(SecretString::from);
        let port: u16 = std::env::var("DISPATCH_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3000);

        Some(Self {
            bot_token: SecretString::from(bot_token),
            signing_secret,
            port,
        })
    }
}

/// Dispatcher behaviour knobs.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Upper bound on any single backend call.
    pub backend_timeout: Duration,
    /// Pending onboarding prompts older than this are treated as stale.
    /// `None` keeps them forever.
    pub onboarding_ttl: Option<Duration>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            backend_timeout: Duration::from_secs(15),
            onboarding_ttl: Some(Duration::from_secs(3600)), // 1 hour
        }
    }
}

impl DispatchConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let backend_timeout = match std::env::var("DISPATCH_BACKEND_TIMEOUT_SECS") {
            Ok(raw) => Duration::from_secs(parse_secs("DISPATCH_BACKEND_TIMEOUT_SECS", &raw)?),
            Err(_) => defaults.backend_timeout,
        };

        let onboarding_ttl = match std::env::var("DISPATCH_ONBOARDING_TTL_SECS") {
            Ok(raw) => match parse_secs("DISPATCH_ONBOARDING_TTL_SECS", &raw)? {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            Err(_) => defaults.onboarding_ttl,
        };

        Ok(Self {
            backend_timeout,
            onboarding_ttl,
        })
    }
}

fn parse_secs(key: &str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|e: std::num::ParseIntError| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })
}
