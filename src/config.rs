use std::env;

use chrono::{Duration, Utc};

const HOST: &str = "0.0.0.0";
const PORT: u16 = 8080;
const DB_NAME: &str = "noturs";
const JWT_EXPIRE_IN: &str = "90d";
const COOKIE_EXPIRE_DAYS: i64 = 90;
const SALT: u32 = 12;
const SECONDS_PER_DAY: i64 = 24 * 60 * 60;
const RATE_LIMIT_MAX: u32 = 100;
const RATE_LIMIT_WINDOW_SECS: u64 = 10 * 60;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Production,
    Development,
}

impl Mode {
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("development") {
            Mode::Development
        } else {
            Mode::Production
        }
    }
}

#[derive(Debug, Clone)]
pub struct MailConfig {
    pub host: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub mongo_uri: String,
    pub db_name: String,
    pub jwt_secret: String,
    pub jwt_expires_in: Duration,
    pub cookie_expire_days: i64,
    pub mode: Mode,
    pub salt_rounds: u32,
    pub mail: MailConfig,
    pub rate_limit_max: u32,
    pub rate_limit_window_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mongo_uri = required("MONGODB_URI")?;
        let jwt_secret = required("JWT_SECRET")?;

        let expire_in = optional("JWT_EXPIRE_IN").unwrap_or_else(|| JWT_EXPIRE_IN.to_string());
        let jwt_expires_in = parse_duration(&expire_in)
            .filter(|lifetime| Utc::now().checked_add_signed(*lifetime).is_some())
            .ok_or(ConfigError::Invalid {
                name: "JWT_EXPIRE_IN",
                value: expire_in.clone(),
            })?;

        let cookie_expire_days: i64 = parsed("JWT_COOKIE_EXPIRE", COOKIE_EXPIRE_DAYS)?;
        if cookie_expire_days.checked_mul(SECONDS_PER_DAY).is_none() {
            return Err(ConfigError::Invalid {
                name: "JWT_COOKIE_EXPIRE",
                value: cookie_expire_days.to_string(),
            });
        }

        Ok(Self {
            host: optional("HOST").unwrap_or_else(|| HOST.to_string()),
            port: parsed("PORT", PORT)?,
            mongo_uri,
            db_name: optional("DB_NAME").unwrap_or_else(|| DB_NAME.to_string()),
            jwt_secret,
            jwt_expires_in,
            cookie_expire_days,
            mode: optional("APP_ENV")
                .map(|value| Mode::parse(&value))
                .unwrap_or(Mode::Production),
            salt_rounds: parsed("SALT", SALT)?,
            mail: MailConfig {
                host: optional("EMAIL_HOST"),
                user: optional("EMAIL"),
                password: optional("EMAIL_PASSWORD"),
                from: optional("EMAIL_FROM")
                    .unwrap_or_else(|| "Natours <hello@natours.io>".to_string()),
            },
            rate_limit_max: parsed("RATE_LIMIT_MAX", RATE_LIMIT_MAX)?,
            rate_limit_window_secs: parsed("RATE_LIMIT_WINDOW_SECS", RATE_LIMIT_WINDOW_SECS)?,
        })
    }

    pub fn is_production(&self) -> bool {
        self.mode == Mode::Production
    }
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    optional(name).ok_or(ConfigError::Missing(name))
}

fn parsed<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match optional(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}

/// Accepts plain seconds (`3600`) or a number with a unit suffix (`90d`, `12h`, `30m`, `45s`).
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    let (digits, unit) = match value.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => value.split_at(idx),
        None => (value, "s"),
    };
    let amount: i64 = digits.parse().ok()?;

    match unit {
        "s" => Duration::try_seconds(amount),
        "m" => Duration::try_minutes(amount),
        "h" => Duration::try_hours(amount),
        "d" => Duration::try_days(amount),
        _ => None,
    }
}
