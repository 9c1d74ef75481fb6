//! Process configuration, assembled once from the environment
//!
//! Environment variables:
//! - FOOTFALL_HOST / FOOTFALL_PORT: bind address (default 0.0.0.0:3000)
//! - FOOTFALL_DB_PATH: SQLite database file (default footfall.db)
//! - EMAIL_HOST, EMAIL_PORT, EMAIL_USER, EMAIL_PASS: SMTP relay and credentials
//! - ALERT_EMAIL_FROM: sender address (default EMAIL_USER)
//! - ALERT_EMAIL_RECIPIENTS: comma-separated recipient list
//! - ALERT_WEBHOOK_URL: webhook target, used when no SMTP host is set
//! - ALERT_THRESHOLD: overcrowding threshold (default 50)
//! - ALERT_WINDOW_MINUTES: trailing window (default 15)
//! - ALERT_CADENCE_MINUTES: minutes between scheduled cycles (default 15)

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::alerts::config::{
    AlertPolicy, DEFAULT_CADENCE, DEFAULT_THRESHOLD, DEFAULT_WINDOW, MAX_PERIOD,
};
use crate::api::ServerConfig;

const DEFAULT_DB_PATH: &str = "footfall.db";
const DEFAULT_SMTP_PORT: u16 = 587;
const DEFAULT_SENDER: &str = "alerts@localhost";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database_path: PathBuf,
    pub alerts: AlertPolicy,
    pub mail: MailConfig,
}

/// Outbound transport selection
#[derive(Debug, Clone, Default)]
pub struct MailConfig {
    /// Takes precedence over the webhook when set
    pub smtp: Option<SmtpSettings>,
    pub webhook_url: Option<String>,
}

/// SMTP relay and login. The login need not be an email address.
#[derive(Clone)]
pub struct SmtpSettings {
    pub host: String,
    /// 465 means implicit TLS, anything else STARTTLS
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl std::fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let defaults = ServerConfig::default();
        let server = ServerConfig {
            host: get("FOOTFALL_HOST").unwrap_or(defaults.host),
            port: parse_or(&get, "FOOTFALL_PORT", defaults.port),
        };

        let database_path = get("FOOTFALL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));

        let username = get("EMAIL_USER");
        let smtp = get("EMAIL_HOST").map(|host| SmtpSettings {
            host,
            port: parse_or(&get, "EMAIL_PORT", DEFAULT_SMTP_PORT),
            username: username.clone(),
            password: get("EMAIL_PASS"),
        });

        let alerts = AlertPolicy::default()
            .with_threshold(parse_or(&get, "ALERT_THRESHOLD", DEFAULT_THRESHOLD))
            .with_window(minutes_or(&get, "ALERT_WINDOW_MINUTES", DEFAULT_WINDOW))
            .with_cadence(minutes_or(&get, "ALERT_CADENCE_MINUTES", DEFAULT_CADENCE))
            .with_sender(
                get("ALERT_EMAIL_FROM")
                    .or(username)
                    .unwrap_or_else(|| DEFAULT_SENDER.to_string()),
            )
            .with_recipients(
                get("ALERT_EMAIL_RECIPIENTS")
                    .map(|raw| split_recipients(&raw))
                    .unwrap_or_default(),
            );

        Self {
            server,
            database_path,
            alerts,
            mail: MailConfig {
                smtp,
                webhook_url: get("ALERT_WEBHOOK_URL"),
            },
        }
    }
}

/// Split a comma-separated (or single) recipient list
pub fn split_recipients(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_or<T: FromStr + Copy + std::fmt::Display>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    match get(key) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, default = %default, "Invalid value, using default");
            default
        }),
    }
}

/// Whole minutes in `1..=MAX_PERIOD`; anything else warns and uses the default
fn minutes_or(get: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> Duration {
    let minutes: u64 = parse_or(get, key, default.as_secs() / 60);
    if minutes == 0 {
        tracing::warn!(key, "Zero minutes is not allowed, using default");
        return default;
    }

    match minutes.checked_mul(60).map(Duration::from_secs) {
        Some(period) if period <= MAX_PERIOD => period,
        _ => {
            tracing::warn!(
                key,
                minutes,
                max_minutes = MAX_PERIOD.as_secs() / 60,
                "Period too long, using default"
            );
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> AppConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[]);
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.server.port, 3000);
        assert_eq!(cfg.database_path, PathBuf::from("footfall.db"));
        assert_eq!(cfg.alerts.threshold, 50);
        assert_eq!(cfg.alerts.window, Duration::from_secs(900));
        assert_eq!(cfg.alerts.cadence, Duration::from_secs(900));
        assert_eq!(cfg.alerts.sender, "alerts@localhost");
        assert!(cfg.alerts.recipients.is_empty());
        assert!(cfg.mail.smtp.is_none());
        assert!(cfg.mail.webhook_url.is_none());
    }

    #[test]
    fn test_alert_overrides() {
        let cfg = config(&[
            ("ALERT_THRESHOLD", "120"),
            ("ALERT_WINDOW_MINUTES", "30"),
            ("ALERT_CADENCE_MINUTES", "5"),
            ("ALERT_EMAIL_RECIPIENTS", " a@example.com, ,b@example.com "),
        ]);
        assert_eq!(cfg.alerts.threshold, 120);
        assert_eq!(cfg.alerts.window_minutes(), 30);
        assert_eq!(cfg.alerts.cadence, Duration::from_secs(300));
        assert_eq!(
            cfg.alerts.recipients,
            vec!["a@example.com".to_string(), "b@example.com".to_string()]
        );
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let cfg = config(&[
            ("ALERT_THRESHOLD", "lots"),
            ("ALERT_CADENCE_MINUTES", "0"),
            ("FOOTFALL_PORT", "99999"),
        ]);
        assert_eq!(cfg.alerts.threshold, 50);
        assert_eq!(cfg.alerts.cadence, Duration::from_secs(900));
        assert_eq!(cfg.server.port, 3000);
    }

    #[test]
    fn test_overflowing_minutes_fall_back() {
        let cfg = config(&[
            ("ALERT_WINDOW_MINUTES", "400000000000000000"),
            ("ALERT_CADENCE_MINUTES", "400000000000000000"),
        ]);
        assert_eq!(cfg.alerts.window, Duration::from_secs(900));
        assert_eq!(cfg.alerts.cadence, Duration::from_secs(900));
    }

    #[test]
    fn test_unrepresentable_window_falls_back() {
        // Fits in u64 seconds but cannot be subtracted from a timestamp
        let cfg = config(&[
            ("ALERT_WINDOW_MINUTES", "200000000000"),
            ("ALERT_CADENCE_MINUTES", "200000000000"),
        ]);
        assert_eq!(cfg.alerts.window, Duration::from_secs(900));
        assert_eq!(cfg.alerts.cadence, Duration::from_secs(900));

        let now = chrono::Utc::now();
        assert_eq!(now - cfg.alerts.cutoff(now), chrono::Duration::minutes(15));
    }

    #[test]
    fn test_longest_period_accepted() {
        let max_minutes = (MAX_PERIOD.as_secs() / 60).to_string();
        let cfg = config(&[("ALERT_WINDOW_MINUTES", max_minutes.as_str())]);
        assert_eq!(cfg.alerts.window, MAX_PERIOD);
    }

    #[test]
    fn test_sender_override() {
        let cfg = config(&[
            ("EMAIL_HOST", "smtp.sendgrid.net"),
            ("EMAIL_USER", "apikey"),
            ("ALERT_EMAIL_FROM", "alerts@example.com"),
        ]);
        assert_eq!(cfg.alerts.sender, "alerts@example.com");
        assert_eq!(
            cfg.mail.smtp.as_ref().unwrap().username.as_deref(),
            Some("apikey")
        );
    }

    #[test]
    fn test_smtp_settings() {
        let cfg = config(&[
            ("EMAIL_HOST", "smtp.example.com"),
            ("EMAIL_USER", "alerts@example.com"),
            ("EMAIL_PASS", "secret"),
        ]);
        let smtp = cfg.mail.smtp.as_ref().unwrap();
        assert_eq!(smtp.host, "smtp.example.com");
        assert_eq!(smtp.port, 587);
        assert_eq!(smtp.password.as_deref(), Some("secret"));
        assert_eq!(cfg.alerts.sender, "alerts@example.com");
        assert!(!format!("{:?}", smtp).contains("secret"));
    }

    #[test]
    fn test_single_recipient() {
        assert_eq!(split_recipients("ops@example.com"), vec!["ops@example.com"]);
    }
}
