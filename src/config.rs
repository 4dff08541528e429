//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::intake::{Catalog, DispatcherConfig};

/// Intake bot configuration, built from environment variables.
#[derive(Debug)]
pub struct IntakeConfig {
    /// Bot API token. Required unless running the CLI channel.
    pub bot_token: Option<SecretString>,
    /// Chat that receives completed requests. `None` disables delivery.
    pub manager_chat_id: Option<i64>,
    /// Link shown as a "contact the manager" button after completion.
    pub manager_contact_url: Option<String>,
    /// JSON catalog to use instead of the built-in one.
    pub catalog_path: Option<PathBuf>,
    /// Bound on one operator delivery attempt.
    pub notify_timeout: Duration,
    /// Delivery attempts per request. `0` and `1` both mean a single attempt.
    pub notify_retries: u32,
    /// Sessions are pruned after this much inactivity.
    pub session_idle_timeout: Duration,
    /// Per-conversation worker lanes exit after this much inactivity.
    pub lane_idle_timeout: Duration,
    /// Read from stdin instead of polling Telegram.
    pub use_cli: bool,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            manager_chat_id: None,
            manager_contact_url: None,
            catalog_path: None,
            notify_timeout: Duration::from_secs(10),
            notify_retries: 3,
            session_idle_timeout: Duration::from_secs(3600), // 1 hour
            lane_idle_timeout: Duration::from_secs(300),     // 5 minutes
            use_cli: false,
        }
    }
}

impl IntakeConfig {
    /// Build config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let bot_token = get("TELEGRAM_BOT_TOKEN")
            .or_else(|| get("BOT_TOKEN"))
            .map(SecretString::from);

        let manager_chat_id = match get("MANAGER_CHAT_ID") {
            Some(raw) => match raw.parse::<i64>() {
                Ok(id) => Some(id),
                Err(_) => {
                    tracing::warn!(
                        value = %raw,
                        "MANAGER_CHAT_ID is not a numeric chat id, operator notifications disabled"
                    );
                    None
                }
            },
            None => None,
        };

        let notify_timeout = match get("INTAKE_NOTIFY_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(parse_positive("INTAKE_NOTIFY_TIMEOUT_SECS", &raw)?),
            None => defaults.notify_timeout,
        };

        let notify_retries: u32 = match get("INTAKE_NOTIFY_RETRIES") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "INTAKE_NOTIFY_RETRIES".into(),
                message: format!("expected a non-negative integer, got {raw:?}"),
            })?,
            None => defaults.notify_retries,
        };

        let session_idle_timeout = match get("INTAKE_SESSION_IDLE_SECS") {
            Some(raw) => Duration::from_secs(parse_positive("INTAKE_SESSION_IDLE_SECS", &raw)?),
            None => defaults.session_idle_timeout,
        };

        let use_cli = get("INTAKE_CLI")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Self {
            bot_token,
            manager_chat_id,
            manager_contact_url: get("MANAGER_CONTACT_URL"),
            catalog_path: get("INTAKE_CATALOG_PATH").map(PathBuf::from),
            notify_timeout,
            notify_retries,
            session_idle_timeout,
            lane_idle_timeout: defaults.lane_idle_timeout,
            use_cli,
        })
    }

    /// The configured catalog file, or the built-in catalog.
    pub fn load_catalog(&self) -> Result<Catalog, ConfigError> {
        match self.catalog_path {
            Some(ref path) => Catalog::load(path),
            None => Ok(Catalog::builtin()),
        }
    }

    /// Fail when the Telegram channel is selected without a bot token.
    pub fn check_channel(&self) -> Result<(), ConfigError> {
        if self.use_cli || self.bot_token.is_some() {
            return Ok(());
        }
        Err(ConfigError::MissingEnvVar("TELEGRAM_BOT_TOKEN".into()))
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            notify_timeout: self.notify_timeout,
            session_idle_timeout: self.session_idle_timeout,
            lane_idle_timeout: self.lane_idle_timeout,
            ..DispatcherConfig::default()
        }
    }
}

fn parse_positive(key: &str, raw: &str) -> Result<u64, ConfigError> {
    match raw.parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a positive number of seconds, got {raw:?}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<IntakeConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        IntakeConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = config(&[]).unwrap();
        assert!(cfg.bot_token.is_none());
        assert!(cfg.manager_chat_id.is_none());
        assert!(cfg.catalog_path.is_none());
        assert_eq!(cfg.notify_timeout, Duration::from_secs(10));
        assert_eq!(cfg.notify_retries, 3);
        assert!(!cfg.use_cli);
    }

    #[test]
    fn reads_every_variable() {
        let cfg = config(&[
            ("TELEGRAM_BOT_TOKEN", "123:ABC"),
            ("MANAGER_CHAT_ID", "-100500"),
            ("MANAGER_CONTACT_URL", "https://t.me/manager"),
            ("INTAKE_CATALOG_PATH", "/etc/intake/catalog.json"),
            ("INTAKE_NOTIFY_TIMEOUT_SECS", "3"),
            ("INTAKE_NOTIFY_RETRIES", "0"),
            ("INTAKE_SESSION_IDLE_SECS", "60"),
            ("INTAKE_CLI", "true"),
        ])
        .unwrap();
        assert_eq!(cfg.bot_token.unwrap().expose_secret(), "123:ABC");
        assert_eq!(cfg.manager_chat_id, Some(-100500));
        assert_eq!(cfg.manager_contact_url.as_deref(), Some("https://t.me/manager"));
        assert_eq!(
            cfg.catalog_path,
            Some(PathBuf::from("/etc/intake/catalog.json"))
        );
        assert_eq!(cfg.notify_timeout, Duration::from_secs(3));
        assert_eq!(cfg.notify_retries, 0);
        assert_eq!(cfg.session_idle_timeout, Duration::from_secs(60));
        assert!(cfg.use_cli);
    }

    #[test]
    fn legacy_token_name_accepted() {
        let cfg = config(&[("BOT_TOKEN", "9:Z")]).unwrap();
        assert_eq!(cfg.bot_token.unwrap().expose_secret(), "9:Z");

        let cfg = config(&[("BOT_TOKEN", "9:Z"), ("TELEGRAM_BOT_TOKEN", "1:A")]).unwrap();
        assert_eq!(cfg.bot_token.unwrap().expose_secret(), "1:A");
    }

    #[test]
    fn blank_values_count_as_unset() {
        let cfg = config(&[("TELEGRAM_BOT_TOKEN", "  "), ("MANAGER_CONTACT_URL", "")]).unwrap();
        assert!(cfg.bot_token.is_none());
        assert!(cfg.manager_contact_url.is_none());
    }

    #[test]
    fn non_numeric_chat_id_disables_notifications() {
        let cfg = config(&[("MANAGER_CHAT_ID", "@manager")]).unwrap();
        assert!(cfg.manager_chat_id.is_none());
    }

    #[test]
    fn invalid_durations_rejected() {
        let err = config(&[("INTAKE_NOTIFY_TIMEOUT_SECS", "0")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref key, .. } if key == "INTAKE_NOTIFY_TIMEOUT_SECS"
        ));
        assert!(config(&[("INTAKE_SESSION_IDLE_SECS", "soon")]).is_err());
        assert!(config(&[("INTAKE_NOTIFY_RETRIES", "-1")]).is_err());
    }

    #[test]
    fn builtin_catalog_without_path() {
        let catalog = config(&[]).unwrap().load_catalog().unwrap();
        assert!(catalog.lookup("iPhone").is_some());
    }

    #[test]
    fn catalog_loaded_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(&path, r#"[{"name": "Ноутбуки"}]"#).unwrap();

        let cfg = config(&[("INTAKE_CATALOG_PATH", path.to_str().unwrap())]).unwrap();
        let catalog = cfg.load_catalog().unwrap();
        assert_eq!(catalog.categories().collect::<Vec<_>>(), vec!["Ноутбуки"]);
    }

    #[test]
    fn telegram_channel_requires_token() {
        let err = config(&[]).unwrap().check_channel().unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref key) if key == "TELEGRAM_BOT_TOKEN"));

        assert!(config(&[("INTAKE_CLI", "1")]).unwrap().check_channel().is_ok());
        let cfg = config(&[("TELEGRAM_BOT_TOKEN", "1:A")]).unwrap();
        assert!(cfg.check_channel().is_ok());
    }

    #[test]
    fn dispatcher_config_carries_timeouts() {
        let cfg = config(&[("INTAKE_NOTIFY_TIMEOUT_SECS", "7")]).unwrap();
        let dc = cfg.dispatcher_config();
        assert_eq!(dc.notify_timeout, Duration::from_secs(7));
        assert_eq!(dc.session_idle_timeout, cfg.session_idle_timeout);
    }
}
