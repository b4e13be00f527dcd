use std::{fmt, str::FromStr};

use anyhow::Context;
use serde::Deserialize;

#[derive(Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

impl fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("ttl_minutes", &self.ttl_minutes)
            .finish()
    }
}

#[derive(Clone, Deserialize)]
pub struct DbConfig {
    pub url: String,
    pub max_open_conns: u32,
    pub min_idle_conns: u32,
    pub max_idle_time_secs: u64,
}

impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("url", &"<redacted>")
            .field("max_open_conns", &self.max_open_conns)
            .field("min_idle_conns", &self.min_idle_conns)
            .field("max_idle_time_secs", &self.max_idle_time_secs)
            .finish()
    }
}

#[derive(Clone, Deserialize)]
pub struct MailConfig {
    pub sendgrid_api_key: Option<String>,
    pub from_email: String,
    pub invitation_ttl_hours: i64,
    pub max_retries: u32,
    /// Return the plaintext invitation token from registration. Only for
    /// environments without a real mail transport.
    pub expose_invitation_token: bool,
}

impl fmt::Debug for MailConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailConfig")
            .field("sendgrid_api_key", &self.sendgrid_api_key.as_ref().map(|_| "<redacted>"))
            .field("from_email", &self.from_email)
            .field("invitation_ttl_hours", &self.invitation_ttl_hours)
            .field("max_retries", &self.max_retries)
            .field("expose_invitation_token", &self.expose_invitation_token)
            .finish()
    }
}

#[derive(Clone, Deserialize)]
pub struct BasicAuthConfig {
    pub user: String,
    pub pass: String,
}

impl fmt::Debug for BasicAuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuthConfig")
            .field("user", &self.user)
            .field("pass", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub env: String,
    pub frontend_url: String,
    pub cors_allowed_origin: String,
    pub database: DbConfig,
    pub jwt: JwtConfig,
    pub mail: MailConfig,
    pub basic_auth: BasicAuthConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database = DbConfig {
            url: required("DATABASE_URL")?,
            max_open_conns: parsed_or("DB_MAX_OPEN_CONNS", 30),
            min_idle_conns: parsed_or("DB_MIN_IDLE_CONNS", 0),
            max_idle_time_secs: parsed_or("DB_MAX_IDLE_TIME_SECS", 15 * 60),
        };
        let jwt = JwtConfig {
            secret: required("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "socialnet".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "socialnet".into()),
            ttl_minutes: ttl_from_env("JWT_TTL_MINUTES", 60 * 24 * 3, MAX_JWT_TTL_MINUTES)?,
        };
        let mail = MailConfig {
            sendgrid_api_key: std::env::var("SENDGRID_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            from_email: std::env::var("FROM_EMAIL").unwrap_or_default(),
            invitation_ttl_hours: ttl_from_env(
                "MAIL_INVITATION_TTL_HOURS",
                72,
                MAX_INVITATION_TTL_HOURS,
            )?,
            max_retries: parsed_or("MAIL_MAX_RETRIES", 3),
            expose_invitation_token: parsed_or("MAIL_EXPOSE_INVITATION_TOKEN", false),
        };
        let basic_auth = BasicAuthConfig {
            user: required("AUTH_BASIC_USER")?,
            pass: required("AUTH_BASIC_PASSWORD")?,
        };

        Ok(Self {
            env: std::env::var("APP_ENV").unwrap_or_else(|_| "development".into()),
            frontend_url: std::env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:4173".into()),
            cors_allowed_origin: std::env::var("CORS_ALLOWED_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:5173".into()),
            database,
            jwt,
            mail,
            basic_auth,
        })
    }

    pub fn is_production(&self) -> bool {
        self.env.eq_ignore_ascii_case("production")
    }
}

fn required(key: &str) -> anyhow::Result<String> {
    std::env::var(key).with_context(|| format!("{key} must be set"))
}

const MAX_JWT_TTL_MINUTES: i64 = 60 * 24 * 365;
const MAX_INVITATION_TTL_HOURS: i64 = 24 * 365;

fn ttl_from_env(key: &str, default: i64, max: i64) -> anyhow::Result<i64> {
    parse_ttl(key, std::env::var(key).ok().as_deref(), default, max)
}

/// Lifetimes must be in `1..=max`; unset or blank means `default`.
fn parse_ttl(key: &str, raw: Option<&str>, default: i64, max: i64) -> anyhow::Result<i64> {
    let Some(raw) = raw.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(default);
    };
    let value: i64 = raw
        .parse()
        .with_context(|| format!("{key} must be an integer, got {raw:?}"))?;
    if !(1..=max).contains(&value) {
        anyhow::bail!("{key} must be between 1 and {max}, got {value}");
    }
    Ok(value)
}

fn parsed_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_redacts_secrets() {
        let jwt = JwtConfig {
            secret: "top-secret".into(),
            issuer: "iss".into(),
            audience: "aud".into(),
            ttl_minutes: 5,
        };
        let basic = BasicAuthConfig {
            user: "ops".into(),
            pass: "hunter2".into(),
        };
        let rendered = format!("{jwt:?} {basic:?}");
        assert!(!rendered.contains("top-secret"));
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("ops"));
    }

    #[test]
    fn ttl_defaults_when_unset() {
        assert_eq!(parse_ttl("JWT_TTL_MINUTES", None, 4320, 10_000).unwrap(), 4320);
        assert_eq!(parse_ttl("JWT_TTL_MINUTES", Some("  "), 4320, 10_000).unwrap(), 4320);
        assert_eq!(parse_ttl("JWT_TTL_MINUTES", Some("15"), 4320, 10_000).unwrap(), 15);
    }

    #[test]
    fn ttl_rejects_non_positive_huge_and_garbage() {
        for raw in ["0", "-72", "10001", "9223372036854775807", "3d"] {
            let err = parse_ttl("MAIL_INVITATION_TTL_HOURS", Some(raw), 72, 10_000).unwrap_err();
            assert!(
                err.to_string().contains("MAIL_INVITATION_TTL_HOURS"),
                "accepted {raw:?}: {err}"
            );
        }
    }

    #[test]
    fn ttl_bounds_fit_duration_arithmetic() {
        let _ = time::Duration::minutes(MAX_JWT_TTL_MINUTES);
        let _ = time::Duration::hours(MAX_INVITATION_TTL_HOURS);
    }
}
