use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  pub base_url: String,
  /// Employee whose requests are synchronized. `--user` overrides it.
  #[serde(default)]
  pub user_id: Option<String>,
  /// Deadline for each of the five list endpoints
  #[serde(default = "default_endpoint_timeout")]
  pub endpoint_timeout_secs: u64,
  #[serde(default = "default_mutation_timeout")]
  pub mutation_timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: "http://localhost:8080/api".to_string(),
      user_id: None,
      endpoint_timeout_secs: default_endpoint_timeout(),
      mutation_timeout_secs: default_mutation_timeout(),
    }
  }
}

impl ApiConfig {
  pub fn endpoint_timeout(&self) -> Duration {
    Duration::from_secs(self.endpoint_timeout_secs)
  }

  pub fn mutation_timeout(&self) -> Duration {
    Duration::from_secs(self.mutation_timeout_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  #[serde(default = "default_ttl")]
  pub ttl_secs: u64,
  #[serde(default = "default_poll_interval")]
  pub poll_interval_secs: u64,
  /// Keep the last good collection on disk for offline reads
  #[serde(default = "default_true")]
  pub persist: bool,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      ttl_secs: default_ttl(),
      poll_interval_secs: default_poll_interval(),
      persist: true,
    }
  }
}

impl CacheConfig {
  pub fn ttl(&self) -> chrono::Duration {
    // chrono::Duration::seconds panics above i64::MAX / 1000
    const MAX_TTL_SECS: u64 = (i64::MAX / 1000) as u64;
    chrono::Duration::seconds(self.ttl_secs.min(MAX_TTL_SECS) as i64)
  }

  pub fn poll_interval(&self) -> Duration {
    // a zero period would panic in tokio::time::interval
    Duration::from_secs(self.poll_interval_secs.max(1))
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
  #[serde(default = "default_level")]
  pub level: String,
  /// Log file directory (defaults to the data directory)
  #[serde(default)]
  pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: default_level(),
      directory: None,
    }
  }
}

fn default_endpoint_timeout() -> u64 {
  10
}

fn default_mutation_timeout() -> u64 {
  10
}

fn default_ttl() -> u64 {
  15 * 60
}

fn default_poll_interval() -> u64 {
  60
}

fn default_true() -> bool {
  true
}

fn default_level() -> String {
  "info".to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./hrsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/hrsync/config.yaml
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
        "No configuration file found. Create one at ~/.config/hrsync/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("hrsync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("hrsync").join("config.yaml");
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
    if config.api.base_url.trim().is_empty() {
      return Err(eyre!("api.base_url must not be empty"));
    }
    Ok(config)
  }

  /// Get the bearer token from environment variables.
  ///
  /// Checks HRSYNC_TOKEN first, then HR_API_TOKEN as fallback.
  pub fn get_api_token() -> Result<String> {
    std::env::var("HRSYNC_TOKEN")
      .or_else(|_| std::env::var("HR_API_TOKEN"))
      .map_err(|_| {
        eyre!("HR API token not found. Set HRSYNC_TOKEN or HR_API_TOKEN environment variable.")
      })
  }

  /// The signed-in user: the `--user` override, else `api.user_id`.
  pub fn user_id(&self, override_user: Option<&str>) -> Option<String> {
    override_user
      .map(str::to_string)
      .or_else(|| self.api.user_id.clone())
      .filter(|id| !id.trim().is_empty())
  }
}
