use std::path::{Path, PathBuf};

pub fn base_dir() -> anyhow::Result<PathBuf> {
  if let Ok(home) = std::env::var("LAUNCH_GATE_HOME") {
    if !home.trim().is_empty() {
      return Ok(PathBuf::from(home));
    }
  }
  let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
  Ok(PathBuf::from(home).join(".launch-gate"))
}

pub fn config_path(base: &Path) -> PathBuf {
  base.join("config.toml")
}

pub fn logs_dir(base: &Path) -> PathBuf {
  base.join("logs")
}

pub fn store_path(base: &Path) -> PathBuf {
  base.join("store.json")
}
