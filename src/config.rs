use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const APP_NAME: &str = "chatdesk";

const ENV_PREFIX: &str = "CHATDESK_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the hosted backend (row API under `/rest/v1`, auth under `/auth/v1`).
    pub backend_url: Option<String>,
    pub anon_key: String,
    pub webhook_url: Option<String>,
    /// Origin used to build password-reset redirect links.
    pub site_url: String,
    pub history_limit: usize,
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: None,
            anon_key: String::new(),
            webhook_url: None,
            site_url: "http://localhost:8080".to_string(),
            history_limit: 10,
            request_timeout_secs: 60,
        }
    }
}

impl Config {
    /// Load the config file if present, then apply `CHATDESK_*` overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config at {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse config at {}", path.display()))?
        } else {
            Config::default()
        };

        config.apply_overrides(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())?;
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("BACKEND_URL") {
            self.backend_url = Some(v);
        }
        if let Some(v) = lookup("ANON_KEY") {
            self.anon_key = v;
        }
        if let Some(v) = lookup("WEBHOOK_URL") {
            self.webhook_url = Some(v);
        }
        if let Some(v) = lookup("SITE_URL") {
            self.site_url = v;
        }
        if let Some(v) = lookup("HISTORY_LIMIT") {
            self.history_limit = v
                .parse()
                .with_context(|| format!("Invalid {ENV_PREFIX}HISTORY_LIMIT: {v}"))?;
        }
        if let Some(v) = lookup("REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = v
                .parse()
                .with_context(|| format!("Invalid {ENV_PREFIX}REQUEST_TIMEOUT_SECS: {v}"))?;
        }
        Ok(())
    }

    pub fn is_offline(&self) -> bool {
        self.backend_url.as_deref().map_or(true, |u| u.trim().is_empty())
    }

    fn config_path() -> PathBuf {
        let config_dir = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
                PathBuf::from(home).join(".config")
            });
        config_dir.join(APP_NAME).join("config.json")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.history_limit, 10);
        assert!(config.is_offline());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"backend_url": "https://db.example.com"}"#).unwrap();
        assert_eq!(config.backend_url.as_deref(), Some("https://db.example.com"));
        assert_eq!(config.history_limit, 10);
        assert!(!config.is_offline());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("WEBHOOK_URL", "https://hooks.example.com/reply"),
            ("HISTORY_LIMIT", "4"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(
            config.webhook_url.as_deref(),
            Some("https://hooks.example.com/reply")
        );
        assert_eq!(config.history_limit, 4);
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let mut config = Config::default();
        let result = config.apply_overrides(|key| {
            (key == "HISTORY_LIMIT").then(|| "ten".to_string())
        });
        assert!(result.is_err());
    }
}
