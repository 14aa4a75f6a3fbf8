//! Configuration loader and validator for the quotation sync client.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub app: App,
    pub remote: Remote,
    #[serde(default)]
    pub sync: SyncPolicy,
    pub cache: Cache,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
}

impl App {
    /// `data_dir` with a leading `~/` expanded against `$HOME`.
    pub fn resolved_data_dir(&self) -> String {
        match self.data_dir.strip_prefix("~/") {
            Some(rest) => match std::env::var("HOME") {
                Ok(home) => format!("{}/{}", home.trim_end_matches('/'), rest),
                Err(_) => self.data_dir.clone(),
            },
            None => self.data_dir.clone(),
        }
    }
}

/// Remote authority endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Remote {
    pub base_url: String,
    pub timeout_secs: u64,
}

/// Reconciliation behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncPolicy {
    /// Reload the full list after a run that confirmed at least one create.
    pub refresh_after_sync: bool,
    /// Park entries after this many rejections; 0 retries forever.
    pub rejection_retry_limit: u32,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            refresh_after_sync: true,
            rejection_retry_limit: 0,
        }
    }
}

/// Interception worker settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cache {
    pub prefix: String,
    pub version: String,
    pub api_prefix: String,
    pub shell_path: String,
    pub auto_activate: bool,
    pub static_assets: Vec<String>,
    pub external_assets: Vec<String>,
    pub asset_hosts: Vec<String>,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(self.app.resolved_data_dir())
    }

    /// Database URL, honouring a `DATABASE_URL` override.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/quotes.db", self.app.resolved_data_dir()))
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }

    if reqwest::Url::parse(&cfg.remote.base_url).is_err() {
        return Err(ConfigError::Invalid("remote.base_url must be an absolute URL"));
    }
    if cfg.remote.timeout_secs == 0 {
        return Err(ConfigError::Invalid("remote.timeout_secs must be > 0"));
    }

    let c = &cfg.cache;
    if c.prefix.trim().is_empty() || c.prefix.contains('-') {
        return Err(ConfigError::Invalid(
            "cache.prefix must be non-empty and contain no '-'",
        ));
    }
    if c.version.trim().is_empty() {
        return Err(ConfigError::Invalid("cache.version must be non-empty"));
    }
    if !c.api_prefix.starts_with('/') {
        return Err(ConfigError::Invalid("cache.api_prefix must start with '/'"));
    }
    if !c.shell_path.starts_with('/') {
        return Err(ConfigError::Invalid("cache.shell_path must start with '/'"));
    }
    if c.external_assets
        .iter()
        .any(|u| reqwest::Url::parse(u).is_err())
    {
        return Err(ConfigError::Invalid(
            "cache.external_assets entries must be absolute URLs",
        ));
    }

    Ok(())
}

/// Returns the example YAML content.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"

remote:
  base_url: "http://127.0.0.1:5000/"
  timeout_secs: 10

sync:
  refresh_after_sync: true
  rejection_retry_limit: 0

cache:
  prefix: "quotesync"
  version: "v7"
  api_prefix: "/api/"
  shell_path: "/dashboard"
  auto_activate: true
  static_assets:
    - "/"
    - "/dashboard"
    - "/login"
    - "/register"
    - "/static/css/auth.css"
    - "/static/css/dashboard.css"
    - "/static/js/dashboard.js"
    - "/manifest.json"
  external_assets:
    - "https://fonts.googleapis.com/css2?family=Inter:wght@300;400;500;600;700&display=swap"
    - "https://cdnjs.cloudflare.com/ajax/libs/font-awesome/6.4.0/css/all.min.css"
    - "https://cdn.jsdelivr.net/npm/chart.js"
  asset_hosts:
    - "fonts.googleapis.com"
    - "fonts.gstatic.com"
    - "cdnjs.cloudflare.com"
    - "cdn.jsdelivr.net"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.cache.static_assets.len(), 8);
        assert_eq!(cfg.sync, SyncPolicy::default());
    }

    #[test]
    fn sync_section_is_optional() {
        let trimmed = example().replace(
            "sync:\n  refresh_after_sync: true\n  rejection_retry_limit: 0\n",
            "",
        );
        let cfg: Config = serde_yaml::from_str(&trimmed).unwrap();
        assert!(cfg.sync.refresh_after_sync);
    }

    #[test]
    fn invalid_base_url() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.remote.base_url = "not a url".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("remote.base_url")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn invalid_cache_settings() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.cache.prefix = "quote-sync".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("cache.prefix")),
            _ => panic!("wrong error"),
        }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.cache.version = " ".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.cache.shell_path = "dashboard".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.cache.external_assets.push("/relative.css".into());
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.remote.timeout_secs, 10);
        assert_eq!(cfg.cache.shell_path, "/dashboard");
    }
}
