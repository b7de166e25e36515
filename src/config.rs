use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::cache::{InvalidationRouter, KeyPattern};
use crate::pdv;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub backend: BackendConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub retry: RetryPolicy,
  #[serde(default)]
  pub log: LogConfig,
  /// Extra mutation routes, merged over the built-in ones
  #[serde(default)]
  pub invalidations: BTreeMap<String, Vec<KeyPattern>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
  /// Project URL, e.g. https://xyz.supabase.co
  pub url: String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
  30
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Seconds a successful result is served without refetching
  #[serde(default = "default_stale_time_secs")]
  pub stale_time_secs: u64,
}

fn default_stale_time_secs() -> u64 {
  300
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      stale_time_secs: default_stale_time_secs(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
  /// Directory for rolling log files (default: $XDG_DATA_HOME/pdv-cache/logs)
  pub dir: Option<PathBuf>,
  /// Filter directive used when PDV_LOG / RUST_LOG are unset
  pub filter: Option<String>,
  /// Log to stderr instead of files
  #[serde(default)]
  pub stderr: bool,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./pdv.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/pdv-cache/config.yaml
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
        "No configuration file found. Create one at ~/.config/pdv-cache/config.yaml\n\
                 with at least `backend: {{ url: ... }}`."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("pdv.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("pdv-cache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  pub fn stale_time(&self) -> chrono::Duration {
    chrono::Duration::seconds(self.cache.stale_time_secs as i64)
  }

  /// Built-in PDV routes plus the ones declared under `invalidations`.
  pub fn router(&self) -> InvalidationRouter {
    let mut router = pdv::routes::default_router();
    for (mutation, patterns) in &self.invalidations {
      router.register(mutation.clone(), patterns.iter().cloned());
    }
    router
  }

  /// Get the backend API key from environment variables.
  ///
  /// Checks PDV_API_KEY first, then SUPABASE_ANON_KEY as fallback.
  pub fn get_api_key() -> Result<String> {
    std::env::var("PDV_API_KEY")
      .or_else(|_| std::env::var("SUPABASE_ANON_KEY"))
      .map_err(|_| {
        eyre!("Backend API key not found. Set PDV_API_KEY or SUPABASE_ANON_KEY environment variable.")
      })
  }
}
