use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};

use feedmail_mail::{SmtpConfig, SmtpSecurity};
use feedmail_notifier::SchedulerConfig;

/// Process configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    /// Public URL of the client app that serves `/verify`, used in
    /// verification links. This server has no such route.
    pub base_url: String,
    pub fetch_timeout: Duration,
    pub scheduler: SchedulerConfig,
    pub smtp: SmtpConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset and empty values take defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let or_default = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let port = parse(&get, "FEEDMAIL_PORT", 3000u16)?;
        let host = or_default("FEEDMAIL_HOST", "0.0.0.0");

        let scheduler = SchedulerConfig {
            tick_period: Duration::from_secs(parse(&get, "FEEDMAIL_TICK_SECS", 600u64)?.max(1)),
            batch_size: parse(&get, "FEEDMAIL_BATCH_SIZE", 1000u64)?,
            notify_old_items: parse_bool(&get, "FEEDMAIL_NOTIFY_OLD_ITEMS")?,
            max_concurrent_fetches: parse(&get, "FEEDMAIL_MAX_CONCURRENT_FETCHES", 32usize)?,
        };

        let smtp = SmtpConfig {
            host: get("SMTP_HOST").ok_or_else(|| anyhow!("SMTP_HOST must be set"))?,
            port: parse(&get, "SMTP_PORT", 587u16)?,
            username: get("SMTP_USERNAME"),
            password: get("SMTP_PASSWORD"),
            from: get("SMTP_FROM").ok_or_else(|| anyhow!("SMTP_FROM must be set"))?,
            security: parse(&get, "SMTP_SECURITY", SmtpSecurity::StartTls)?,
        };

        Ok(Self {
            db_path: or_default("FEEDMAIL_DB_PATH", "feedmail.db").into(),
            base_url: get("FEEDMAIL_BASE_URL").ok_or_else(|| anyhow!("FEEDMAIL_BASE_URL must be set"))?,
            host,
            port,
            fetch_timeout: Duration::from_secs(parse(&get, "FEEDMAIL_FETCH_TIMEOUT_SECS", 30u64)?),
            scheduler,
            smtp,
        })
    }
}

fn parse<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("{}", e))
            .with_context(|| format!("invalid {}={:?}", key, raw)),
        None => Ok(default),
    }
}

fn parse_bool(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<bool> {
    match get(key).map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        None | Some("0" | "false" | "no" | "off") => Ok(false),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some(other) => Err(anyhow!("invalid {}={:?}", key, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<Config> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("SMTP_HOST", "smtp.example.com"),
        ("SMTP_FROM", "noreply@example.com"),
        ("FEEDMAIL_BASE_URL", "https://app.feedmail.example"),
    ];

    #[test]
    fn defaults_apply() {
        let config = config(&REQUIRED).unwrap();
        assert_eq!(config.db_path, PathBuf::from("feedmail.db"));
        assert_eq!(config.port, 3000);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.base_url, "https://app.feedmail.example");
        assert_eq!(config.scheduler.tick_period, Duration::from_secs(600));
        assert_eq!(config.scheduler.batch_size, 1000);
        assert!(!config.scheduler.notify_old_items);
        assert_eq!(config.smtp.port, 587);
        assert_eq!(config.smtp.security, SmtpSecurity::StartTls);
        assert!(config.smtp.username.is_none());
    }

    #[test]
    fn overrides_are_parsed() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("FEEDMAIL_PORT", "8080"),
            ("FEEDMAIL_BASE_URL", "https://feedmail.example"),
            ("FEEDMAIL_NOTIFY_OLD_ITEMS", "yes"),
            ("FEEDMAIL_BATCH_SIZE", "50"),
            ("SMTP_SECURITY", "tls"),
            ("SMTP_USERNAME", "mailer"),
        ]);
        let config = config(&pairs).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.base_url, "https://feedmail.example");
        assert!(config.scheduler.notify_old_items);
        assert_eq!(config.scheduler.batch_size, 50);
        assert_eq!(config.smtp.security, SmtpSecurity::Tls);
        assert_eq!(config.smtp.username.as_deref(), Some("mailer"));
    }

    #[test]
    fn smtp_and_link_settings_are_required() {
        for missing in ["SMTP_HOST", "SMTP_FROM", "FEEDMAIL_BASE_URL"] {
            let pairs: Vec<_> = REQUIRED.into_iter().filter(|(k, _)| *k != missing).collect();
            let err = config(&pairs).unwrap_err();
            assert!(err.to_string().contains(missing), "{}", err);
        }
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("FEEDMAIL_PORT", "eighty"));
        let err = config(&pairs).unwrap_err();
        assert!(format!("{:#}", err).contains("FEEDMAIL_PORT"));
    }
}
