use super::KeyValueStore;
use crate::types::now_unix_ms;
use anyhow::Context;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// JSON document on disk, loaded once and rewritten atomically on flush.
#[derive(Debug)]
pub struct FileStore {
  path: PathBuf,
  values: Mutex<Map<String, Value>>,
}

impl FileStore {
  pub fn open(path: &Path) -> anyhow::Result<Self> {
    let values = if path.exists() {
      let raw = fs::read(path).with_context(|| format!("read {}", path.display()))?;
      match serde_json::from_slice::<Map<String, Value>>(&raw) {
        Ok(map) => map,
        Err(e) => {
          let backup = path.with_file_name(format!("store.json.bad-{}", now_unix_ms() / 1000));
          let _ = fs::rename(path, &backup);
          tracing::warn!(
            error = %e,
            backup = %backup.display(),
            "store file unreadable; starting empty"
          );
          Map::new()
        }
      }
    } else {
      Map::new()
    };

    Ok(Self {
      path: path.to_path_buf(),
      values: Mutex::new(values),
    })
  }
}

impl KeyValueStore for FileStore {
  fn get(&self, key: &str) -> Option<Value> {
    let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
    values.get(key).cloned()
  }

  fn set(&self, key: &str, value: Value) {
    let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
    values.insert(key.to_string(), value);
  }

  fn remove(&self, key: &str) {
    let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
    values.remove(key);
  }

  fn flush(&self) -> anyhow::Result<()> {
    // Hold the lock across the write so concurrent flushes cannot interleave.
    let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
    let bytes = serde_json::to_vec_pretty(&*values)?;
    write_atomic(&self.path, &bytes)
  }
}

fn write_atomic(path: &Path, contents: &[u8]) -> anyhow::Result<()> {
  let parent = path
    .parent()
    .ok_or_else(|| anyhow::anyhow!("file path has no parent: {}", path.display()))?;
  fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;

  let tmp = parent.join(format!(
    ".{}.tmp",
    path.file_name().unwrap_or_default().to_string_lossy()
  ));
  fs::write(&tmp, contents).with_context(|| format!("write {}", tmp.display()))?;
  fs::rename(&tmp, path)
    .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
  Ok(())
}
