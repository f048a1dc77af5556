use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::fetch::{FetchSettings, RetryPolicy};
use crate::store::{StoreSettings, MAX_REFRESH_INTERVAL};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub transport: TransportConfig,
  pub cache: CacheConfig,
  pub refresh: RefreshConfig,
  pub retry: RetryConfig,
  /// Delay before typed filter input is applied
  pub debounce_ms: Option<u64>,
  pub currency: CurrencyConfig,
  /// Where exports are written (defaults to the data dir)
  pub export_dir: Option<PathBuf>,
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
  /// Base URL operations are POSTed under, e.g. "http://localhost:8080/api/analytics"
  pub base_url: Option<String>,
  /// Operation names the backend serves
  pub operations: Vec<String>,
  pub timeout_secs: u64,
}

impl Default for TransportConfig {
  fn default() -> Self {
    Self {
      base_url: None,
      operations: crate::analytics::OPERATIONS
        .iter()
        .map(|s| s.to_string())
        .collect(),
      timeout_secs: 30,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub ttl_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self { ttl_secs: 5 * 60 }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
  pub interval_secs: u64,
  pub auto_refresh: bool,
  /// How long the global loading flag stays up after "refresh all"
  pub settle_ms: u64,
}

impl Default for RefreshConfig {
  fn default() -> Self {
    Self {
      interval_secs: 30,
      auto_refresh: true,
      settle_ms: 1000,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
  pub max_attempts: u32,
  pub backoff_ms: u64,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      backoff_ms: 1000,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CurrencyConfig {
  pub code: String,
  /// Overrides the symbol derived from `code`
  pub symbol: Option<String>,
}

impl Default for CurrencyConfig {
  fn default() -> Self {
    Self {
      code: "USD".to_string(),
      symbol: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// Default level when RUST_LOG is unset
  pub level: String,
  /// Also write logs to $XDG_DATA_HOME/invoicedash/logs
  pub file: bool,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      file: false,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided (must exist)
  /// 2. ./invoicedash.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/invoicedash/config.yaml
  ///
  /// Without an explicit path, a missing file means defaults.
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
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("invoicedash.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("invoicedash").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.refresh.interval_secs == 0 {
      return Err(eyre!("refresh.interval_secs must be greater than zero"));
    }
    if config.refresh.interval_secs > MAX_REFRESH_INTERVAL.as_secs() {
      return Err(eyre!(
        "refresh.interval_secs must be at most {}",
        MAX_REFRESH_INTERVAL.as_secs()
      ));
    }
    Ok(config)
  }

  /// Bearer token for the analytics backend, from INVOICEDASH_API_TOKEN.
  pub fn get_api_token() -> Option<String> {
    std::env::var("INVOICEDASH_API_TOKEN")
      .ok()
      .filter(|t| !t.is_empty())
  }

  /// $XDG_DATA_HOME/invoicedash
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;
    Ok(data_dir.join("invoicedash"))
  }

  pub fn export_dir(&self) -> Result<PathBuf> {
    match &self.export_dir {
      Some(dir) => Ok(dir.clone()),
      None => Ok(Self::data_dir()?.join("exports")),
    }
  }

  pub fn fetch_settings(&self) -> FetchSettings {
    FetchSettings {
      ttl: Duration::from_secs(self.cache.ttl_secs),
      retry: RetryPolicy {
        max_attempts: self.retry.max_attempts,
        backoff: Duration::from_millis(self.retry.backoff_ms),
      },
    }
  }

  pub fn store_settings(&self) -> StoreSettings {
    StoreSettings {
      refresh_interval: Duration::from_secs(self.refresh.interval_secs),
      auto_refresh: self.refresh.auto_refresh,
      settle_delay: Duration::from_millis(self.refresh.settle_ms),
    }
  }

  pub fn debounce_delay(&self) -> Duration {
    Duration::from_millis(self.debounce_ms.unwrap_or(300))
  }
}
