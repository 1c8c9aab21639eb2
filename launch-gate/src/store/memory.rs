use super::KeyValueStore;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct MemoryStore {
  values: Mutex<HashMap<String, Value>>,
}

impl KeyValueStore for MemoryStore {
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
    Ok(())
  }
}
