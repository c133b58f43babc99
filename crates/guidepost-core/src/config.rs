//! Application configuration management.
//!
//! Configuration is stored at `~/.config/guidepost/config.json`. The store
//! URL and API key can be overridden with `GUIDEPOST_STORE_URL` and
//! `GUIDEPOST_API_KEY`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::sync::{RetryPolicy, RollbackPolicy};
use crate::tickets::VenuePolicy;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "guidepost";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const STORE_URL_ENV: &str = "GUIDEPOST_STORE_URL";
pub const API_KEY_ENV: &str = "GUIDEPOST_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Venues where guides need an entrance ticket.
    pub ticket_venues: Vec<String>,
    pub retry: RetryPolicy,
    pub rollback: RollbackPolicy,
    /// How long cache invalidations wait before firing.
    pub invalidation_delay_ms: u64,
    pub log_to_file: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_url: None,
            api_key: None,
            ticket_venues: VenuePolicy::default().venues().to_vec(),
            retry: RetryPolicy::default(),
            rollback: RollbackPolicy::default(),
            invalidation_delay_ms: 500,
            log_to_file: false,
        }
    }
}

impl Config {
    /// Load from the default path, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_env();
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        serde_json::from_str(&contents).with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn apply_env(&mut self) {
        self.apply_overrides(std::env::var(STORE_URL_ENV).ok(), std::env::var(API_KEY_ENV).ok());
    }

    fn apply_overrides(&mut self, store_url: Option<String>, api_key: Option<String>) {
        if let Some(url) = store_url.filter(|s| !s.trim().is_empty()) {
            self.store_url = Some(url);
        }
        if let Some(key) = api_key.filter(|s| !s.trim().is_empty()) {
            self.api_key = Some(key);
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir().ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn venue_policy(&self) -> VenuePolicy {
        VenuePolicy::new(&self.ticket_venues)
    }

    pub fn invalidation_delay(&self) -> Duration {
        Duration::from_millis(self.invalidation_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.ticket_venues, vec!["versailles", "louvre"]);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.rollback, RollbackPolicy::LeaveStanding);
        assert!(config.venue_policy().requires_guide_tickets("Louvre"));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"store_url": "https://db.example.com", "rollback": "restore_snapshot"}"#)
                .unwrap();
        assert_eq!(config.store_url.as_deref(), Some("https://db.example.com"));
        assert_eq!(config.rollback, RollbackPolicy::RestoreSnapshot);
        assert_eq!(config.invalidation_delay(), Duration::from_millis(500));
        assert_eq!(config.retry, RetryPolicy::default());
    }

    #[test]
    fn test_overrides() {
        let mut config = Config::default();
        config.store_url = Some("https://file.example.com".into());
        config.apply_overrides(Some("https://env.example.com".into()), Some("  ".into()));
        assert_eq!(config.store_url.as_deref(), Some("https://env.example.com"));
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_missing_file_is_default() {
        let path = std::env::temp_dir().join("guidepost-no-such-config.json");
        let config = Config::load_from(&path).unwrap();
        assert!(config.store_url.is_none());
    }
}
