//! Configuration for nutrid.
//!
//! Loads settings from /etc/nutrid/config.toml, then /var/lib/nutrid/config.toml,
//! or falls back to defaults. Every field has a serde default so partial files work.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/nutrid/config.toml";

/// Fallback config file path
pub const DEFAULT_CONFIG_PATH: &str = "/var/lib/nutrid/config.toml";

/// Environment override for the USDA API key
pub const USDA_API_KEY_ENV: &str = "NUTRID_USDA_API_KEY";

/// Cache location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Root directory for snapshots, versions and backups
    #[serde(default = "crate::paths::default_cache_root")]
    pub root: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: crate::paths::default_cache_root(),
        }
    }
}

/// Update cycle and scheduler settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Minimum age of a dataset before it is refreshed
    #[serde(default = "default_update_interval_hours")]
    pub update_interval_hours: u64,

    /// Check interval while a source has pending retries
    #[serde(default = "default_retry_interval_minutes")]
    pub retry_interval_minutes: u64,

    /// Consecutive failures before the retry counter resets
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backup snapshots kept per source
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,

    /// Scheduler wake-up interval
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,

    /// Pause after a cycle crashed
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,

    /// Stop the scheduler on SIGTERM/SIGINT
    #[serde(default = "default_handle_signals")]
    pub handle_signals: bool,
}

fn default_update_interval_hours() -> u64 {
    24
}

fn default_retry_interval_minutes() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_backups() -> usize {
    5
}

fn default_tick_secs() -> u64 {
    60
}

fn default_error_backoff_secs() -> u64 {
    300
}

fn default_handle_signals() -> bool {
    true
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            update_interval_hours: default_update_interval_hours(),
            retry_interval_minutes: default_retry_interval_minutes(),
            max_retries: default_max_retries(),
            max_backups: default_max_backups(),
            tick_secs: default_tick_secs(),
            error_backoff_secs: default_error_backoff_secs(),
            handle_signals: default_handle_signals(),
        }
    }
}

impl UpdateConfig {
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_hours.saturating_mul(3600))
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_minutes.saturating_mul(60))
    }

    /// Scheduler wake-up interval, at least one second
    pub fn tick(&self) -> Duration {
        if self.tick_secs == 0 {
            warn!("tick_secs = 0 would spin the scheduler, using 1s");
            return Duration::from_secs(1);
        }
        Duration::from_secs(self.tick_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }
}

/// Provider client settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// USDA FoodData Central key; "DEMO_KEY" works with tight rate limits
    #[serde(default = "default_usda_api_key")]
    pub usda_api_key: String,

    #[serde(default = "default_usda_base_url")]
    pub usda_base_url: String,

    #[serde(default = "default_openfoodfacts_enabled")]
    pub openfoodfacts_enabled: bool,

    #[serde(default = "default_openfoodfacts_base_url")]
    pub openfoodfacts_base_url: String,

    /// HTTP request timeout
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Delay between canonical dataset queries
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_usda_api_key() -> String {
    "DEMO_KEY".to_string()
}

fn default_usda_base_url() -> String {
    "https://api.nal.usda.gov/fdc/v1".to_string()
}

fn default_openfoodfacts_enabled() -> bool {
    true
}

fn default_openfoodfacts_base_url() -> String {
    "https://world.openfoodfacts.org/api/v2".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_request_delay_ms() -> u64 {
    100
}

fn default_user_agent() -> String {
    format!("nutrid/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            usda_api_key: default_usda_api_key(),
            usda_base_url: default_usda_base_url(),
            openfoodfacts_enabled: default_openfoodfacts_enabled(),
            openfoodfacts_base_url: default_openfoodfacts_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            request_delay_ms: default_request_delay_ms(),
            user_agent: default_user_agent(),
        }
    }
}

impl ProviderConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

/// Complete configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NutriConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub updates: UpdateConfig,
    #[serde(default)]
    pub providers: ProviderConfig,
}

impl NutriConfig {
    /// Load from the standard locations, falling back to defaults
    pub fn load() -> Self {
        let mut config = Self::load_from_path(Path::new(CONFIG_PATH))
            .or_else(|_| Self::load_from_path(Path::new(DEFAULT_CONFIG_PATH)))
            .unwrap_or_else(|e| {
                warn!("Config not found, using defaults: {}", e);
                NutriConfig::default()
            });
        config.apply_env();
        config
    }

    /// Load from an explicit path (env overrides applied)
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::load_from_path(path)?;
        config.apply_env();
        Ok(config)
    }

    fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {:?}", path))?;
        let config: NutriConfig = toml::from_str(&content)
            .with_context(|| format!("Invalid config {:?}", path))?;
        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var(USDA_API_KEY_ENV) {
            if !key.trim().is_empty() {
                self.providers.usda_api_key = key.trim().to_string();
            }
        }
    }

    /// Write a default config file (for first-time setup)
    pub fn save_default(path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(&NutriConfig::default())?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        info!("Saved default config to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = NutriConfig::default();
        assert_eq!(config.updates.update_interval_hours, 24);
        assert_eq!(config.updates.retry_interval_minutes, 30);
        assert_eq!(config.updates.max_retries, 3);
        assert_eq!(config.updates.max_backups, 5);
        assert_eq!(config.updates.tick(), Duration::from_secs(60));
        assert_eq!(config.providers.usda_api_key, "DEMO_KEY");
        assert!(config.cache.root.ends_with("nutrid/food_db"));
    }

    #[test]
    fn test_extreme_intervals_are_clamped() {
        let updates = UpdateConfig {
            update_interval_hours: u64::MAX,
            retry_interval_minutes: u64::MAX,
            tick_secs: 0,
            ..UpdateConfig::default()
        };
        assert_eq!(updates.update_interval(), Duration::from_secs(u64::MAX));
        assert_eq!(updates.retry_interval(), Duration::from_secs(u64::MAX));
        assert_eq!(updates.tick(), Duration::from_secs(1));
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml_str = r#"
            [cache]
            root = "/srv/food"

            [updates]
            update_interval_hours = 6
            max_backups = 2
        "#;
        let config: NutriConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.cache.root, PathBuf::from("/srv/food"));
        assert_eq!(config.updates.update_interval(), Duration::from_secs(6 * 3600));
        assert_eq!(config.updates.max_backups, 2);
        // Untouched keys keep defaults
        assert_eq!(config.updates.max_retries, 3);
        assert!(config.updates.handle_signals);
        assert!(config.providers.openfoodfacts_enabled);
    }

    #[test]
    fn test_empty_toml_is_default() {
        let config: NutriConfig = toml::from_str("").unwrap();
        assert_eq!(config, NutriConfig::default());
    }

    #[test]
    fn test_save_default_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        NutriConfig::save_default(&path).unwrap();

        let loaded = NutriConfig::load_from_path(&path).unwrap();
        assert_eq!(loaded.updates, UpdateConfig::default());
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = TempDir::new().unwrap();
        assert!(NutriConfig::load_from_path(&dir.path().join("missing.toml")).is_err());
    }
}
