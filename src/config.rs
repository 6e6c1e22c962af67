use crate::error::{Error, Result};
use dotenvy::dotenv;
use std::env;

pub const DEFAULT_EMAILJS_API_URL: &str = "https://api.emailjs.com/api/v1.0/email/send";

/// Upper bound for the onboarding sleeps: ten years.
pub const MAX_ONBOARDING_DELAY_SECS: i64 = 60 * 60 * 24 * 365 * 10;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_address: String,
    pub database_url: String,
    pub jwt_secret: String,
    pub jwt_ttl_hours: i64,
    pub workflow_token: String,
    pub emailjs_service_id: String,
    pub emailjs_template_id: String,
    pub emailjs_public_key: String,
    pub emailjs_private_key: Option<String>,
    pub emailjs_api_url: String,
    pub auth_rate_limit: u32,
    pub auth_rate_window_secs: u64,
    pub onboarding_first_check_delay_secs: i64,
    pub onboarding_recheck_interval_secs: i64,
    pub onboarding_poll_interval_ms: u64,
    pub onboarding_max_attempts: i32,
    pub cors_origin: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        Ok(Self {
            server_address: get_env("SERVER_ADDRESS")?,
            database_url: get_env("DATABASE_URL")?,
            jwt_secret: get_env("JWT_SECRET")?,
            jwt_ttl_hours: get_env_parse_or("JWT_TTL_HOURS", 24 * 7)?,
            workflow_token: get_env("WORKFLOW_TOKEN")?,
            emailjs_service_id: get_env("EMAILJS_SERVICE_ID")?,
            emailjs_template_id: get_env("EMAILJS_TEMPLATE_ID")?,
            emailjs_public_key: get_env("EMAILJS_PUBLIC_KEY")?,
            emailjs_private_key: get_optional_env("EMAILJS_PRIVATE_KEY"),
            emailjs_api_url: get_optional_env("EMAILJS_API_URL")
                .unwrap_or_else(|| DEFAULT_EMAILJS_API_URL.to_string()),
            auth_rate_limit: get_env_parse_or("AUTH_RATE_LIMIT", 5)?,
            auth_rate_window_secs: get_env_parse_or("AUTH_RATE_WINDOW_SECS", 60)?,
            onboarding_first_check_delay_secs: get_delay_secs(
                "ONBOARDING_FIRST_CHECK_DELAY_SECS",
                60 * 60 * 24 * 3,
            )?,
            onboarding_recheck_interval_secs: get_delay_secs(
                "ONBOARDING_RECHECK_INTERVAL_SECS",
                60 * 60 * 24 * 30,
            )?,
            onboarding_poll_interval_ms: get_env_parse_or("ONBOARDING_POLL_INTERVAL_MS", 1000)?,
            onboarding_max_attempts: get_env_parse_or("ONBOARDING_MAX_ATTEMPTS", 5)?,
            cors_origin: get_optional_env("CORS_ORIGIN"),
        })
    }
}

fn get_env(name: &str) -> Result<String> {
    env::var(name).map_err(|_| Error::Config(format!("Missing environment variable: {}", name)))
}

/// Unset and blank variables are both treated as absent.
fn get_optional_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn get_env_parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match get_optional_env(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("Invalid value for {}: {}", name, e))),
        None => Ok(default),
    }
}

fn get_delay_secs(name: &str, default: i64) -> Result<i64> {
    let secs: i64 = get_env_parse_or(name, default)?;
    if !(0..=MAX_ONBOARDING_DELAY_SECS).contains(&secs) {
        return Err(Error::Config(format!(
            "{} must be between 0 and {} seconds, got {}",
            name, MAX_ONBOARDING_DELAY_SECS, secs
        )));
    }
    Ok(secs)
}
