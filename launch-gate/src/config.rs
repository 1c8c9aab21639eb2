use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct Config {
  pub logging: LoggingConfig,
  pub remote_config: RemoteConfigEndpoint,
  pub identity: IdentityConfig,
  pub gate: GateConfig,
  pub connectivity: ConnectivityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
  #[serde(default = "default_log_level")]
  pub level: String,

  #[serde(default = "default_retention_days")]
  pub retention_days: u64,
}

fn default_log_level() -> String {
  "info".to_string()
}

fn default_retention_days() -> u64 {
  14
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      retention_days: default_retention_days(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfigEndpoint {
  #[serde(default = "default_endpoint")]
  pub endpoint: String,

  #[serde(default = "default_allowlist_domains")]
  pub allowlist_domains: Vec<String>,

  #[serde(default = "default_timeout_seconds")]
  pub timeout_seconds: u64,

  #[serde(default = "default_true")]
  pub require_https: bool,
}

impl Default for RemoteConfigEndpoint {
  fn default() -> Self {
    Self {
      endpoint: default_endpoint(),
      allowlist_domains: default_allowlist_domains(),
      timeout_seconds: default_timeout_seconds(),
      require_https: true,
    }
  }
}

/// Fixed identifiers attached to every config request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
  #[serde(default = "default_bundle_id")]
  pub bundle_id: String,

  #[serde(default = "default_os")]
  pub os: String,

  #[serde(default = "default_store_id")]
  pub store_id: String,

  #[serde(default = "default_firebase_project_id")]
  pub firebase_project_id: String,

  #[serde(default)]
  pub locale: Option<String>,
}

impl Default for IdentityConfig {
  fn default() -> Self {
    Self {
      bundle_id: default_bundle_id(),
      os: default_os(),
      store_id: default_store_id(),
      firebase_project_id: default_firebase_project_id(),
      locale: None,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
  #[serde(default = "default_priming_cooldown_days")]
  pub priming_cooldown_days: u64,

  #[serde(default = "default_fallback_delay_ms")]
  pub fallback_delay_ms: u64,
}

impl Default for GateConfig {
  fn default() -> Self {
    Self {
      priming_cooldown_days: default_priming_cooldown_days(),
      fallback_delay_ms: default_fallback_delay_ms(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectivityConfig {
  #[serde(default = "default_probe_addr")]
  pub probe_addr: String,

  #[serde(default = "default_poll_interval_ms")]
  pub poll_interval_ms: u64,

  #[serde(default = "default_probe_timeout_ms")]
  pub probe_timeout_ms: u64,
}

impl Default for ConnectivityConfig {
  fn default() -> Self {
    Self {
      probe_addr: default_probe_addr(),
      poll_interval_ms: default_poll_interval_ms(),
      probe_timeout_ms: default_probe_timeout_ms(),
    }
  }
}

fn default_true() -> bool {
  true
}

fn default_endpoint() -> String {
  "https://henhubplus.com/config.php".to_string()
}

fn default_allowlist_domains() -> Vec<String> {
  vec!["henhubplus.com".to_string()]
}

fn default_timeout_seconds() -> u64 {
  10
}

fn default_bundle_id() -> String {
  "com.app.henhubapphub".to_string()
}

fn default_os() -> String {
  "iOS".to_string()
}

fn default_store_id() -> String {
  "6755047615".to_string()
}

fn default_firebase_project_id() -> String {
  "496521065968".to_string()
}

fn default_priming_cooldown_days() -> u64 {
  3
}

fn default_fallback_delay_ms() -> u64 {
  2000
}

fn default_probe_addr() -> String {
  "1.1.1.1:443".to_string()
}

fn default_poll_interval_ms() -> u64 {
  2000
}

fn default_probe_timeout_ms() -> u64 {
  1500
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigFile {
  #[serde(default)]
  pub logging: Option<LoggingConfig>,

  #[serde(default)]
  pub remote_config: Option<RemoteConfigEndpoint>,

  #[serde(default)]
  pub identity: Option<IdentityConfig>,

  #[serde(default)]
  pub gate: Option<GateConfig>,

  #[serde(default)]
  pub connectivity: Option<ConnectivityConfig>,
}

impl ConfigFile {
  fn normalize(self) -> Config {
    let mut cfg = Config::default();
    if let Some(l) = self.logging {
      cfg.logging = l;
    }
    if let Some(rc) = self.remote_config {
      cfg.remote_config = rc;
    }
    if let Some(i) = self.identity {
      cfg.identity = i;
    }
    if let Some(g) = self.gate {
      cfg.gate = g;
    }
    if let Some(c) = self.connectivity {
      cfg.connectivity = c;
    }

    if let Err(reason) = validate_remote_config(&cfg.remote_config) {
      tracing::warn!(
        reason = %reason,
        "remote_config invalid; config requests will fail and the app will be shown"
      );
    }

    cfg
  }

  fn needs_upgrade(&self) -> bool {
    self.logging.is_none()
      || self.remote_config.is_none()
      || self.identity.is_none()
      || self.gate.is_none()
      || self.connectivity.is_none()
  }
}

pub fn load_or_create_default(path: &Path) -> anyhow::Result<Config> {
  let parent = path
    .parent()
    .ok_or_else(|| anyhow::anyhow!("config path has no parent: {}", path.display()))?;
  fs::create_dir_all(parent)?;

  if !path.exists() {
    let cfg = Config::default();
    write_atomic(path, &toml::to_string_pretty(&to_config_file(&cfg))?)?;
    return Ok(cfg);
  }

  let raw = fs::read_to_string(path)?;
  match toml::from_str::<ConfigFile>(&raw) {
    Ok(file) => {
      let cfg = file.clone().normalize();
      if file.needs_upgrade() {
        let backup = parent.join(format!("config.toml.bak-{}", now_unix_s()));
        let _ = fs::copy(path, &backup);
        let _ = write_atomic(path, &toml::to_string_pretty(&to_config_file(&cfg))?);
        eprintln!(
          "launch-gate: upgraded config defaults written to {} (backup: {})",
          path.display(),
          backup.display()
        );
      }
      Ok(cfg)
    }
    Err(e) => {
      let cfg = Config::default();
      let backup = parent.join(format!("config.toml.bad-{}", now_unix_s()));
      let _ = fs::rename(path, &backup);
      write_atomic(path, &toml::to_string_pretty(&to_config_file(&cfg))?)?;
      eprintln!(
        "launch-gate: invalid config at {} (backed up to {}): {e}",
        path.display(),
        backup.display()
      );
      Ok(cfg)
    }
  }
}

fn to_config_file(cfg: &Config) -> ConfigFile {
  ConfigFile {
    logging: Some(cfg.logging.clone()),
    remote_config: Some(cfg.remote_config.clone()),
    identity: Some(cfg.identity.clone()),
    gate: Some(cfg.gate.clone()),
    connectivity: Some(cfg.connectivity.clone()),
  }
}

fn write_atomic(path: &Path, contents: &str) -> anyhow::Result<()> {
  let parent = path
    .parent()
    .ok_or_else(|| anyhow::anyhow!("file path has no parent: {}", path.display()))?;
  fs::create_dir_all(parent)?;
  let tmp = parent.join(format!(
    ".{}.tmp",
    path.file_name().unwrap_or_default().to_string_lossy()
  ));

  fs::write(&tmp, contents)?;
  fs::rename(&tmp, path)?;
  Ok(())
}

pub fn validate_remote_config(cfg: &RemoteConfigEndpoint) -> Result<reqwest::Url, String> {
  if cfg.timeout_seconds == 0 {
    return Err("timeout_seconds must be > 0".to_string());
  }
  if cfg.endpoint.trim().is_empty() {
    return Err("endpoint must not be empty".to_string());
  }

  let Ok(url) = reqwest::Url::parse(&cfg.endpoint) else {
    return Err(format!("invalid endpoint URL: {}", cfg.endpoint));
  };
  if cfg.require_https && url.scheme() != "https" {
    return Err(format!("endpoint must use HTTPS: {}", cfg.endpoint));
  }
  let Some(host) = url.host_str() else {
    return Err(format!("endpoint has no host: {}", cfg.endpoint));
  };
  if !cfg.allowlist_domains.iter().any(|d| d == host) {
    return Err(format!("endpoint host not allowlisted: {host}"));
  }

  Ok(url)
}

fn now_unix_s() -> u64 {
  crate::types::now_unix_ms() / 1000
}
