pub mod policy;

use anyhow::{anyhow, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::net::SocketAddr;
use std::str::FromStr;
use time::{Duration, UtcOffset};

use crate::config::policy::{parse_restricted_terms, EnginePolicy};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub http_addr: String,
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_connect_timeout_seconds: u64,
    pub db_busy_timeout_seconds: u64,
    pub admin_token: Option<String>,
    pub paseto_access_key: [u8; 32],
    pub access_ttl_minutes: u64,
    pub request_body_limit_bytes: usize,
    pub policy: EnginePolicy,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let http_addr = env_or("HTTP_ADDR", "0.0.0.0:8080");
        let _parsed_http_addr = SocketAddr::from_str(&http_addr)
            .map_err(|err| anyhow!("invalid HTTP_ADDR: {}", err))?;

        Ok(Self {
            http_addr,
            database_url: env_or("DATABASE_URL", "sqlite://reconnect.db"),
            db_max_connections: env_or_parse("DB_MAX_CONNECTIONS", "10")?,
            db_connect_timeout_seconds: env_or_parse("DB_CONNECT_TIMEOUT_SECONDS", "5")?,
            db_busy_timeout_seconds: env_or_parse("DB_BUSY_TIMEOUT_SECONDS", "5")?,
            admin_token: std::env::var("ADMIN_TOKEN").ok(),
            paseto_access_key: env_key_32("PASETO_ACCESS_KEY")?,
            access_ttl_minutes: env_or_parse("ACCESS_TTL_MINUTES", "15")?,
            request_body_limit_bytes: env_or_parse("REQUEST_BODY_LIMIT_BYTES", "65536")?,
            policy: policy_from_env()?,
        })
    }
}

fn policy_from_env() -> Result<EnginePolicy> {
    let mut policy = EnginePolicy::default();

    let offset_hours: i8 = env_or_parse("STREAK_UTC_OFFSET_HOURS", "8")?;
    policy.streak_offset = UtcOffset::from_hms(offset_hours, 0, 0)
        .map_err(|err| anyhow!("invalid STREAK_UTC_OFFSET_HOURS: {}", err))?;

    let cooldown_minutes: i64 = env_or_parse("CHAT_COOLDOWN_MINUTES", "10")?;
    if cooldown_minutes <= 0 {
        return Err(anyhow!("invalid CHAT_COOLDOWN_MINUTES: must be positive"));
    }
    policy.chat_cooldown = Duration::minutes(cooldown_minutes);

    if let Ok(terms) = std::env::var("RESTRICTED_TERMS") {
        let terms = parse_restricted_terms(&terms);
        if terms.is_empty() {
            return Err(anyhow!("invalid RESTRICTED_TERMS: no terms given"));
        }
        policy.restricted_terms = terms;
    }

    Ok(policy)
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_or_err(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| anyhow!("missing required env var: {}", key))
}

fn env_or_parse<T>(key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    let value = std::env::var(key).unwrap_or_else(|_| default.to_string());
    value
        .parse::<T>()
        .map_err(|err| anyhow!("invalid {}: {}", key, err))
}

fn env_key_32(key: &str) -> Result<[u8; 32]> {
    let value = env_or_err(key)?;
    let decoded = STANDARD
        .decode(value.as_bytes())
        .map_err(|err| anyhow!("invalid {}: {}", key, err))?;
    if decoded.len() != 32 {
        return Err(anyhow!("invalid {}: expected 32 bytes", key));
    }
    let mut key_bytes = [0u8; 32];
    key_bytes.copy_from_slice(&decoded);
    Ok(key_bytes)
}
