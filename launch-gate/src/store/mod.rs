use crate::types::{AttributionPayload, RemoteConfig};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

pub const KEY_CONVERSION_DATA: &str = "conversion_data";
pub const KEY_PUSH_TOKEN: &str = "fcmToken";
pub const KEY_ATTRIBUTION_ID: &str = "apps_flyer_id";
pub const KEY_LAST_DENIED: &str = "lastNotificationDeniedDate";
pub const KEY_NO_MORE_REQUESTS: &str = "config_no_more_requests";
pub const KEY_CONFIG_URL: &str = "config_url";
pub const KEY_CONFIG_EXPIRES: &str = "config_expires";
pub const KEY_IS_ORGANIC: &str = "is_organic_conversion";

const ALL_KEYS: [&str; 8] = [
  KEY_CONVERSION_DATA,
  KEY_PUSH_TOKEN,
  KEY_ATTRIBUTION_ID,
  KEY_LAST_DENIED,
  KEY_NO_MORE_REQUESTS,
  KEY_CONFIG_URL,
  KEY_CONFIG_EXPIRES,
  KEY_IS_ORGANIC,
];

/// Single-key get/set/remove over small scalar values.
///
/// Writes may be buffered; `flush` makes everything written so far durable.
pub trait KeyValueStore: Send + Sync {
  fn get(&self, key: &str) -> Option<Value>;
  fn set(&self, key: &str, value: Value);
  fn remove(&self, key: &str);
  fn flush(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreSnapshot {
  pub conversion_data: Option<String>,
  pub push_token: Option<String>,
  pub attribution_id: Option<String>,
  pub last_denied_at_unix_ms: Option<u64>,
  pub no_more_requests: bool,
  pub config_url: Option<String>,
  pub config_expires: Option<f64>,
  pub is_organic: bool,
}

/// Typed view over the keys the startup gate reads and writes.
#[derive(Clone)]
pub struct FlagStore {
  kv: Arc<dyn KeyValueStore>,
}

impl FlagStore {
  pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
    Self { kv }
  }

  pub fn in_memory() -> Self {
    Self::new(Arc::new(MemoryStore::default()))
  }

  pub fn conversion_data_raw(&self) -> Option<String> {
    match self.kv.get(KEY_CONVERSION_DATA)? {
      Value::String(s) => Some(s),
      Value::Null => None,
      other => Some(other.to_string()),
    }
  }

  /// `Ok(None)` when absent, `Err` when present but not a JSON object.
  pub fn conversion_data(&self) -> anyhow::Result<Option<AttributionPayload>> {
    let Some(raw) = self.conversion_data_raw() else {
      return Ok(None);
    };
    match serde_json::from_str::<Value>(&raw)? {
      Value::Object(map) => Ok(Some(map)),
      other => anyhow::bail!("conversion data is a JSON {}, expected an object", json_kind(&other)),
    }
  }

  pub fn set_conversion_data(&self, raw_json: &str, organic: bool) -> anyhow::Result<()> {
    self.kv.set(KEY_CONVERSION_DATA, Value::String(raw_json.to_string()));
    self.kv.set(KEY_IS_ORGANIC, Value::Bool(organic));
    self.kv.flush()
  }

  pub fn push_token(&self) -> Option<String> {
    self.get_string(KEY_PUSH_TOKEN)
  }

  pub fn set_push_token(&self, token: &str) -> anyhow::Result<()> {
    self.kv.set(KEY_PUSH_TOKEN, Value::String(token.to_string()));
    self.kv.flush()
  }

  pub fn attribution_id(&self) -> Option<String> {
    self.get_string(KEY_ATTRIBUTION_ID)
  }

  pub fn set_attribution_id(&self, id: &str) -> anyhow::Result<()> {
    self.kv.set(KEY_ATTRIBUTION_ID, Value::String(id.to_string()));
    self.kv.flush()
  }

  pub fn is_organic(&self) -> bool {
    self.get_bool(KEY_IS_ORGANIC)
  }

  pub fn last_denied_at(&self) -> Option<u64> {
    self.kv.get(KEY_LAST_DENIED).and_then(|v| v.as_u64())
  }

  pub fn set_last_denied_at(&self, unix_ms: u64) -> anyhow::Result<()> {
    self.kv.set(KEY_LAST_DENIED, Value::from(unix_ms));
    self.kv.flush()
  }

  pub fn no_more_requests(&self) -> bool {
    self.get_bool(KEY_NO_MORE_REQUESTS)
  }

  pub fn set_no_more_requests(&self) -> anyhow::Result<()> {
    self.kv.set(KEY_NO_MORE_REQUESTS, Value::Bool(true));
    self.kv.flush()
  }

  pub fn remote_config(&self) -> Option<RemoteConfig> {
    let url = self.get_string(KEY_CONFIG_URL)?;
    let expires_at = self.kv.get(KEY_CONFIG_EXPIRES).and_then(|v| v.as_f64())?;
    Some(RemoteConfig { url, expires_at })
  }

  /// Persists the config and lifts the no-more-requests flag in one flush.
  pub fn commit_remote_config(&self, config: &RemoteConfig) -> anyhow::Result<()> {
    let expires = serde_json::Number::from_f64(config.expires_at)
      .map(Value::Number)
      .ok_or_else(|| anyhow::anyhow!("config expiry is not a finite number"))?;
    self.kv.set(KEY_CONFIG_URL, Value::String(config.url.clone()));
    self.kv.set(KEY_CONFIG_EXPIRES, expires);
    self.kv.remove(KEY_NO_MORE_REQUESTS);
    self.kv.flush()
  }

  pub fn snapshot(&self) -> StoreSnapshot {
    let config = self.remote_config();
    StoreSnapshot {
      conversion_data: self.conversion_data_raw(),
      push_token: self.push_token(),
      attribution_id: self.attribution_id(),
      last_denied_at_unix_ms: self.last_denied_at(),
      no_more_requests: self.no_more_requests(),
      config_url: config.as_ref().map(|c| c.url.clone()),
      config_expires: config.map(|c| c.expires_at),
      is_organic: self.is_organic(),
    }
  }

  pub fn clear(&self) -> anyhow::Result<()> {
    for key in ALL_KEYS {
      self.kv.remove(key);
    }
    self.kv.flush()
  }

  fn get_string(&self, key: &str) -> Option<String> {
    self.kv.get(key)?.as_str().map(str::to_string)
  }

  fn get_bool(&self, key: &str) -> bool {
    self.kv.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
  }
}

fn json_kind(v: &Value) -> &'static str {
  match v {
    Value::Null => "null",
    Value::Bool(_) => "boolean",
    Value::Number(_) => "number",
    Value::String(_) => "string",
    Value::Array(_) => "array",
    Value::Object(_) => "object",
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn commit_clears_no_more_requests() {
    let store = FlagStore::in_memory();
    store.set_no_more_requests().unwrap();
    assert!(store.no_more_requests());

    store
      .commit_remote_config(&RemoteConfig {
        url: "https://x/y".to_string(),
        expires_at: 1234.0,
      })
      .unwrap();

    assert!(!store.no_more_requests());
    assert_eq!(store.remote_config().unwrap().url, "https://x/y");
  }

  #[test]
  fn conversion_data_must_be_an_object() {
    let store = FlagStore::in_memory();
    assert!(store.conversion_data().unwrap().is_none());

    store.set_conversion_data("[1,2,3]", false).unwrap();
    assert!(store.conversion_data().is_err());

    store.set_conversion_data("not json", false).unwrap();
    assert!(store.conversion_data().is_err());

    store
      .set_conversion_data(r#"{"af_status":"Non-organic"}"#, false)
      .unwrap();
    let payload = store.conversion_data().unwrap().unwrap();
    assert_eq!(payload["af_status"], "Non-organic");
  }

  #[test]
  fn clear_removes_everything() {
    let store = FlagStore::in_memory();
    store.set_conversion_data("{}", true).unwrap();
    store.set_last_denied_at(42).unwrap();
    store.set_push_token("tok").unwrap();

    store.clear().unwrap();

    let snap = store.snapshot();
    assert!(snap.conversion_data.is_none());
    assert!(snap.last_denied_at_unix_ms.is_none());
    assert!(snap.push_token.is_none());
    assert!(!snap.is_organic);
  }
}
