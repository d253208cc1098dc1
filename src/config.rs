use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::Backoff;

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
  /// Prefix prepended to every request URL
  pub base_api_url: Option<String>,
  /// Default headers; per-request headers win (names are case-insensitive)
  #[serde(deserialize_with = "deserialize_lowercase_map")]
  pub headers: BTreeMap<String, String>,
  pub retry: u32,
  pub cache_expiry_ms: Option<u64>,
  pub poll_interval_ms: Option<u64>,
  pub backoff: BackoffConfig,
  /// tracing filter directive used when RUST_LOG is unset
  pub log_level: Option<String>,
  pub log_file: Option<PathBuf>,
}

fn deserialize_lowercase_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let v: BTreeMap<String, String> = BTreeMap::deserialize(deserializer)?;
  Ok(v.into_iter().map(|(k, v)| (k.to_lowercase(), v)).collect())
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
  /// Retry immediately
  #[default]
  None,
  Fixed,
  Exponential,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackoffConfig {
  pub kind: BackoffKind,
  pub delay_ms: u64,
  /// Cap for exponential backoff
  pub max_delay_ms: u64,
  pub multiplier: f64,
}

impl Default for BackoffConfig {
  fn default() -> Self {
    Self {
      kind: BackoffKind::None,
      delay_ms: 500,
      max_delay_ms: 30_000,
      multiplier: 2.0,
    }
  }
}

impl BackoffConfig {
  pub fn to_backoff(&self) -> Backoff {
    match self.kind {
      BackoffKind::None => Backoff::None,
      BackoffKind::Fixed => Backoff::Fixed(Duration::from_millis(self.delay_ms)),
      BackoffKind::Exponential => Backoff::Exponential {
        initial: Duration::from_millis(self.delay_ms),
        max: Duration::from_millis(self.max_delay_ms),
        multiplier: self.multiplier,
      },
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./swrf.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/swrf/config.yaml
  ///
  /// Without any file the defaults are used.
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
    let local = PathBuf::from("swrf.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("swrf").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  pub fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    // An empty file is a valid, all-default config
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  pub fn cache_expiry(&self) -> Option<Duration> {
    self.cache_expiry_ms.map(Duration::from_millis)
  }

  pub fn poll_interval(&self) -> Option<Duration> {
    self.poll_interval_ms.map(Duration::from_millis)
  }
}
