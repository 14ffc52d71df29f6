//! Configuration, built from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// IMAP account settings.
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    /// Mailbox that is polled and that actions apply to.
    pub mailbox: String,
}

/// Full process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub imap: ImapConfig,
    /// Path to `rules.json`.
    pub rules_path: PathBuf,
    /// libSQL database file.
    pub db_path: PathBuf,
    pub poll_interval: Duration,
    /// How many of the newest messages to fetch per poll.
    pub fetch_limit: usize,
    /// Run a single poll and exit.
    pub run_once: bool,
    /// Evaluate messages again even if already stored by an earlier poll.
    pub reprocess_seen: bool,
    /// Directory for a rolling log file, in addition to stderr.
    pub log_dir: Option<PathBuf>,
}

impl Config {
    /// Build config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("MAIL_RULES_IMAP_HOST")
            .filter(|h| !h.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("MAIL_RULES_IMAP_HOST".to_string()))?;

        let imap = ImapConfig {
            host,
            port: parse_or(&lookup, "MAIL_RULES_IMAP_PORT", 993)?,
            username: lookup("MAIL_RULES_USERNAME").unwrap_or_default(),
            password: SecretString::from(lookup("MAIL_RULES_PASSWORD").unwrap_or_default()),
            mailbox: lookup("MAIL_RULES_MAILBOX").unwrap_or_else(|| "INBOX".to_string()),
        };

        let poll_interval_secs: u64 = parse_or(&lookup, "MAIL_RULES_POLL_INTERVAL_SECS", 60)?;
        if poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MAIL_RULES_POLL_INTERVAL_SECS".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            imap,
            rules_path: lookup("MAIL_RULES_RULES_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./rules.json")),
            db_path: lookup("MAIL_RULES_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/mail-rules.db")),
            poll_interval: Duration::from_secs(poll_interval_secs),
            fetch_limit: parse_or(&lookup, "MAIL_RULES_FETCH_LIMIT", 10)?,
            run_once: parse_bool_or(&lookup, "MAIL_RULES_RUN_ONCE", false)?,
            reprocess_seen: parse_bool_or(&lookup, "MAIL_RULES_REPROCESS_SEEN", false)?,
            log_dir: lookup("MAIL_RULES_LOG_DIR")
                .filter(|d| !d.trim().is_empty())
                .map(PathBuf::from),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?}: {e}"),
        }),
        None => Ok(default),
    }
}

fn parse_bool_or<F>(lookup: &F, key: &str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" | "" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{raw:?} is not a boolean"),
            }),
        },
        None => Ok(default),
    }
}
