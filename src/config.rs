//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::channels::telegram::DEFAULT_API_BASE;
use crate::error::ConfigError;
use crate::form::FieldCatalog;

/// Largest accepted session idle time (100 years), well inside what
/// `chrono::Duration` can hold.
const MAX_IDLE_MINUTES: u64 = 100 * 365 * 24 * 60;

/// Bot configuration, read from the process environment.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Port the webhook server listens on.
    pub port: u16,
    /// Bot API token. Missing is allowed; sends then fail and are logged.
    pub telegram_token: Option<SecretString>,
    /// Bot API base URL.
    pub telegram_api_base: String,
    /// DOCX template, read on every render.
    pub template_path: PathBuf,
    /// File name of the document sent back to the user.
    pub document_name: String,
    /// Optional JSON field catalog replacing the built-in one.
    pub fields_path: Option<PathBuf>,
    /// Timeout for each outbound gateway request.
    pub send_timeout: Duration,
    /// Sessions idle this long are dropped. `None` keeps them forever.
    pub session_idle_timeout: Option<Duration>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            telegram_token: None,
            telegram_api_base: DEFAULT_API_BASE.to_string(),
            template_path: PathBuf::from("./template.docx"),
            document_name: "заполненный_документ.docx".to_string(),
            fields_path: None,
            send_timeout: Duration::from_secs(15),
            session_idle_timeout: Some(Duration::from_secs(24 * 3600)), // 1 day
        }
    }
}

impl BotConfig {
    /// Load from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Unparsable numbers are logged and
    /// replaced by their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let port = parse_or(get("PORT"), "PORT", defaults.port);

        let send_timeout = parse_or(
            get("FORMBOT_SEND_TIMEOUT_SECS"),
            "FORMBOT_SEND_TIMEOUT_SECS",
            defaults.send_timeout.as_secs(),
        );

        let idle_minutes: Option<u64> = get("FORMBOT_SESSION_IDLE_MINUTES").map(|raw| {
            parse_or(Some(raw), "FORMBOT_SESSION_IDLE_MINUTES", 24 * 60)
        });
        let session_idle_timeout = match idle_minutes {
            Some(0) => None,
            Some(minutes) if minutes <= MAX_IDLE_MINUTES => Some(Duration::from_secs(minutes * 60)),
            Some(minutes) => {
                let err = ConfigError::InvalidValue {
                    key: "FORMBOT_SESSION_IDLE_MINUTES".to_string(),
                    message: format!("{minutes} exceeds {MAX_IDLE_MINUTES}"),
                };
                tracing::warn!("{err}; using default {}", 24 * 60);
                defaults.session_idle_timeout
            }
            None => defaults.session_idle_timeout,
        };

        Self {
            port,
            telegram_token: get("TELEGRAM_TOKEN").map(SecretString::from),
            telegram_api_base: get("FORMBOT_TELEGRAM_API").unwrap_or(defaults.telegram_api_base),
            template_path: get("FORMBOT_TEMPLATE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.template_path),
            document_name: get("FORMBOT_DOCUMENT_NAME").unwrap_or(defaults.document_name),
            fields_path: get("FORMBOT_FIELDS_PATH").map(PathBuf::from),
            send_timeout: Duration::from_secs(send_timeout),
            session_idle_timeout,
        }
    }

    /// The configured field catalog, or the built-in one.
    pub fn load_catalog(&self) -> Result<FieldCatalog, ConfigError> {
        match &self.fields_path {
            Some(path) => FieldCatalog::from_json_file(path),
            None => Ok(FieldCatalog::default()),
        }
    }
}

fn parse_or<T>(raw: Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display,
    T::Err: std::fmt::Display,
{
    let Some(raw) = raw else {
        return default;
    };
    match raw.parse() {
        Ok(value) => value,
        Err(e) => {
            let err = ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{raw:?}: {e}"),
            };
            tracing::warn!("{err}; using default {default}");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> BotConfig {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        BotConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_when_env_is_empty() {
        let config = config_from(&[]);
        assert_eq!(config.port, 3000);
        assert!(config.telegram_token.is_none());
        assert_eq!(config.telegram_api_base, "https://api.telegram.org");
        assert_eq!(config.template_path, PathBuf::from("./template.docx"));
        assert_eq!(config.document_name, "заполненный_документ.docx");
        assert!(config.fields_path.is_none());
        assert_eq!(config.send_timeout, Duration::from_secs(15));
        assert_eq!(config.session_idle_timeout, Some(Duration::from_secs(86_400)));
    }

    #[test]
    fn reads_every_variable() {
        let config = config_from(&[
            ("PORT", "8443"),
            ("TELEGRAM_TOKEN", "123:ABC"),
            ("FORMBOT_TELEGRAM_API", "http://localhost:8081"),
            ("FORMBOT_TEMPLATE_PATH", "/srv/letter.docx"),
            ("FORMBOT_DOCUMENT_NAME", "letter.docx"),
            ("FORMBOT_FIELDS_PATH", "/srv/fields.json"),
            ("FORMBOT_SEND_TIMEOUT_SECS", "3"),
            ("FORMBOT_SESSION_IDLE_MINUTES", "30"),
        ]);

        assert_eq!(config.port, 8443);
        assert_eq!(config.telegram_token.unwrap().expose_secret(), "123:ABC");
        assert_eq!(config.telegram_api_base, "http://localhost:8081");
        assert_eq!(config.template_path, PathBuf::from("/srv/letter.docx"));
        assert_eq!(config.document_name, "letter.docx");
        assert_eq!(config.fields_path, Some(PathBuf::from("/srv/fields.json")));
        assert_eq!(config.send_timeout, Duration::from_secs(3));
        assert_eq!(config.session_idle_timeout, Some(Duration::from_secs(1800)));
    }

    #[test]
    fn invalid_numbers_fall_back() {
        let config = config_from(&[
            ("PORT", "not-a-port"),
            ("FORMBOT_SEND_TIMEOUT_SECS", "-1"),
            ("FORMBOT_SESSION_IDLE_MINUTES", "soon"),
        ]);
        assert_eq!(config.port, 3000);
        assert_eq!(config.send_timeout, Duration::from_secs(15));
        assert_eq!(config.session_idle_timeout, Some(Duration::from_secs(86_400)));
    }

    #[test]
    fn oversized_idle_minutes_fall_back() {
        let huge = u64::MAX.to_string();
        let config = config_from(&[("FORMBOT_SESSION_IDLE_MINUTES", huge.as_str())]);
        assert_eq!(config.session_idle_timeout, Some(Duration::from_secs(86_400)));

        let idle = config.session_idle_timeout.unwrap();
        assert!(chrono::Duration::from_std(idle).is_ok());
    }

    #[test]
    fn largest_idle_minutes_converts_to_chrono() {
        let max = MAX_IDLE_MINUTES.to_string();
        let config = config_from(&[("FORMBOT_SESSION_IDLE_MINUTES", max.as_str())]);
        let idle = config.session_idle_timeout.unwrap();
        assert_eq!(idle, Duration::from_secs(MAX_IDLE_MINUTES * 60));
        assert!(chrono::Duration::from_std(idle).is_ok());
    }

    #[test]
    fn zero_idle_minutes_disables_expiry() {
        let config = config_from(&[("FORMBOT_SESSION_IDLE_MINUTES", "0")]);
        assert!(config.session_idle_timeout.is_none());
    }

    #[test]
    fn blank_token_is_missing() {
        let config = config_from(&[("TELEGRAM_TOKEN", "   ")]);
        assert!(config.telegram_token.is_none());
    }

    #[test]
    fn load_catalog_default_and_file() {
        assert_eq!(config_from(&[]).load_catalog().unwrap(), FieldCatalog::default());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fields.json");
        std::fs::write(&path, r#"[{"key": "a", "prompt": "A?"}]"#).unwrap();

        let config = BotConfig {
            fields_path: Some(path),
            ..BotConfig::default()
        };
        assert_eq!(config.load_catalog().unwrap().len(), 1);
    }
}
