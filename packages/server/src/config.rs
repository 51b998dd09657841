use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

/// Tunables for the confirmation workflow.
///
/// Constructed once at startup and passed into the session manager; the
/// domain layer never reads the environment itself.
#[derive(Debug, Clone)]
pub struct ConfirmationConfig {
    /// Lifetime of the public link, in days.
    pub link_ttl_days: i64,
    /// Lifetime of each one-time code, in minutes.
    pub otp_ttl_minutes: i64,
    /// Wrong-code submissions allowed before the session expires.
    pub max_attempts: i32,
    /// Minimum gap between SMS sends for the same session, in seconds.
    pub resend_cooldown_secs: i64,
    /// Base URL the public link is built from, e.g. "https://app.example.com".
    pub public_base_url: String,
    /// Provider template used for the confirmation SMS.
    pub sms_template_id: String,
    /// Country code prefixed onto local numbers before dispatch.
    pub default_country_code: String,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            link_ttl_days: 60,
            otp_ttl_minutes: 10,
            max_attempts: 5,
            resend_cooldown_secs: 60,
            public_base_url: "http://localhost:8080".to_string(),
            sms_template_id: String::new(),
            default_country_code: "+886".to_string(),
        }
    }
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub twilio_account_sid: String,
    pub twilio_auth_token: String,
    pub twilio_messaging_service_sid: String,
    pub confirmation: ConfirmationConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let defaults = ConfirmationConfig::default();
        let confirmation = ConfirmationConfig {
            link_ttl_days: env_or("CONFIRM_LINK_TTL_DAYS", defaults.link_ttl_days)?,
            otp_ttl_minutes: env_or("CONFIRM_OTP_TTL_MINUTES", defaults.otp_ttl_minutes)?,
            max_attempts: env_or("CONFIRM_MAX_ATTEMPTS", defaults.max_attempts)?,
            resend_cooldown_secs: env_or(
                "CONFIRM_RESEND_COOLDOWN_SECS",
                defaults.resend_cooldown_secs,
            )?,
            public_base_url: env::var("PUBLIC_BASE_URL")
                .unwrap_or(defaults.public_base_url),
            sms_template_id: env::var("CONFIRM_SMS_TEMPLATE_ID")
                .context("CONFIRM_SMS_TEMPLATE_ID must be set")?,
            default_country_code: env::var("DEFAULT_COUNTRY_CODE")
                .unwrap_or(defaults.default_country_code),
        };

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            twilio_account_sid: env::var("TWILIO_ACCOUNT_SID")
                .context("TWILIO_ACCOUNT_SID must be set")?,
            twilio_auth_token: env::var("TWILIO_AUTH_TOKEN")
                .context("TWILIO_AUTH_TOKEN must be set")?,
            twilio_messaging_service_sid: env::var("TWILIO_MESSAGING_SERVICE_SID")
                .context("TWILIO_MESSAGING_SERVICE_SID must be set")?,
            confirmation,
        })
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("{} must be a valid number", key)),
        Err(_) => Ok(default),
    }
}
