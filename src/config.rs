use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "churchdir-sync";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Where the database, image files and logs live (defaults to the platform data dir)
  pub data_dir: Option<PathBuf>,
  pub remote: RemoteConfig,
  pub sync: SyncConfig,
  pub images: ImageConfig,
  pub connectivity: ConnectivityConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
  /// Base URL of the remote document store API
  pub url: Option<String>,
  pub timeout_secs: u64,
  /// Entity types pulled on every cycle, in addition to those already cached
  pub entity_types: Vec<String>,
}

impl Default for RemoteConfig {
  fn default() -> Self {
    Self {
      url: None,
      timeout_secs: 30,
      entity_types: vec!["church".to_string(), "announcement".to_string()],
    }
  }
}

impl RemoteConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  pub interval_secs: u64,
  pub max_batch_size: usize,
  /// Attempts per cycle before the engine reports itself degraded
  pub max_attempts: u32,
  pub backoff_base_ms: u64,
  pub backoff_cap_ms: u64,
  /// How long a dirty record is protected from a newer remote write
  pub grace_window_secs: u64,
  /// How long acknowledged journal entries are kept before compaction
  pub journal_retention_secs: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      interval_secs: 15 * 60,
      max_batch_size: 50,
      max_attempts: 6,
      backoff_base_ms: 1_000,
      backoff_cap_ms: 5 * 60 * 1_000,
      grace_window_secs: 10 * 60,
      journal_retention_secs: 7 * 24 * 60 * 60,
    }
  }
}

impl SyncConfig {
  pub fn interval(&self) -> Duration {
    Duration::from_secs(self.interval_secs)
  }

  pub fn backoff_base(&self) -> Duration {
    Duration::from_millis(self.backoff_base_ms)
  }

  pub fn backoff_cap(&self) -> Duration {
    Duration::from_millis(self.backoff_cap_ms)
  }

  pub fn grace_window(&self) -> chrono::Duration {
    chrono::Duration::seconds(self.grace_window_secs as i64)
  }

  pub fn journal_retention(&self) -> chrono::Duration {
    chrono::Duration::seconds(self.journal_retention_secs as i64)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
  /// Size cap for unpinned images, in bytes
  pub cap_bytes: u64,
  /// Directory for cached image files (defaults to `<data_dir>/images`)
  pub dir: Option<PathBuf>,
  pub fetch_timeout_secs: u64,
  pub prefetch_concurrency: usize,
}

impl Default for ImageConfig {
  fn default() -> Self {
    Self {
      cap_bytes: 100 * 1024 * 1024,
      dir: None,
      fetch_timeout_secs: 20,
      prefetch_concurrency: 4,
    }
  }
}

impl ImageConfig {
  pub fn fetch_timeout(&self) -> Duration {
    Duration::from_secs(self.fetch_timeout_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
  /// How long a new state must hold before it is reported
  pub dwell_ms: u64,
  pub sample_interval_ms: u64,
  /// Probe answers slower than this count as degraded
  pub degraded_latency_ms: u64,
}

impl Default for ConnectivityConfig {
  fn default() -> Self {
    Self {
      dwell_ms: 2_000,
      sample_interval_ms: 1_000,
      degraded_latency_ms: 3_000,
    }
  }
}

impl ConnectivityConfig {
  pub fn dwell(&self) -> Duration {
    Duration::from_millis(self.dwell_ms)
  }

  pub fn sample_interval(&self) -> Duration {
    Duration::from_millis(self.sample_interval_ms)
  }

  pub fn degraded_latency(&self) -> Duration {
    Duration::from_millis(self.degraded_latency_ms)
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./churchdir-sync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/churchdir-sync/config.yaml
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
    // Check current directory
    let local = PathBuf::from(format!("{APP_DIR}.yaml"));
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join(APP_DIR).join("config.yaml");
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

  pub fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(contents)
  }

  /// Resolve the data directory.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join(APP_DIR))
  }

  pub fn database_path(&self) -> Result<PathBuf> {
    Ok(self.data_dir()?.join("cache.db"))
  }

  pub fn image_dir(&self) -> Result<PathBuf> {
    match &self.images.dir {
      Some(dir) => Ok(dir.clone()),
      None => Ok(self.data_dir()?.join("images")),
    }
  }

  pub fn log_dir(&self) -> Result<PathBuf> {
    Ok(self.data_dir()?.join("logs"))
  }

  /// Get the remote API token from the environment, if set.
  ///
  /// Checks CHURCHDIR_SYNC_TOKEN.
  pub fn api_token() -> Option<String> {
    std::env::var("CHURCHDIR_SYNC_TOKEN").ok()
  }
}
