use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::service::SyncSettings;
use crate::sync::RetryPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  /// Currency dashboards and conversions default to
  #[serde(default = "default_currency")]
  pub default_currency: String,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub network: NetworkConfig,
  #[serde(default)]
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Failed drain passes before a queued action is dead-lettered
  pub max_drain_passes: u32,
  pub retry_max_attempts: u32,
  pub retry_base_delay_ms: u64,
  pub retry_max_delay_ms: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      max_drain_passes: 5,
      retry_max_attempts: 3,
      retry_base_delay_ms: 500,
      retry_max_delay_ms: 10_000,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
  pub poll_interval_secs: u64,
  pub probe_timeout_secs: u64,
  /// Reachability endpoint; defaults to the API health route
  pub probe_url: Option<String>,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self {
      poll_interval_secs: 30,
      probe_timeout_secs: 5,
      probe_url: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub aggregate_ttl_minutes: i64,
  pub rates_ttl_minutes: i64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      aggregate_ttl_minutes: 15,
      rates_ttl_minutes: 60,
    }
  }
}

fn default_currency() -> String {
  "USD".to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./subtrack.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/subtrack/config.yaml
  /// 4. ~/.config/subtrack/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/subtrack/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("subtrack.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("subtrack").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Get the API token from environment variables.
  ///
  /// Checks SUBTRACK_API_TOKEN first, then SUBTRACK_TOKEN as fallback.
  pub fn get_api_token() -> Result<String> {
    std::env::var("SUBTRACK_API_TOKEN")
      .or_else(|_| std::env::var("SUBTRACK_TOKEN"))
      .map_err(|_| {
        eyre!("API token not found. Set SUBTRACK_API_TOKEN or SUBTRACK_TOKEN environment variable.")
      })
  }

  /// Reachability endpoint for the network monitor.
  pub fn probe_url(&self) -> String {
    self
      .network
      .probe_url
      .clone()
      .unwrap_or_else(|| format!("{}/api/v1/health", self.api.url.trim_end_matches('/')))
  }

  pub fn retry_policy(&self) -> RetryPolicy {
    RetryPolicy {
      max_attempts: self.sync.retry_max_attempts,
      base_delay: Duration::from_millis(self.sync.retry_base_delay_ms),
      max_delay: Duration::from_millis(self.sync.retry_max_delay_ms),
    }
  }

  pub fn sync_settings(&self) -> SyncSettings {
    SyncSettings {
      default_currency: self.default_currency.clone(),
      aggregate_ttl_minutes: self.cache.aggregate_ttl_minutes,
      max_drain_passes: self.sync.max_drain_passes,
      retry: self.retry_policy(),
    }
  }
}
