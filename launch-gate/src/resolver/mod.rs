use crate::config::IdentityConfig;
use crate::store::FlagStore;
use crate::types::{redact_url_for_log, AttributionPayload, RemoteConfig, RouteOutcome};
use serde::Deserialize;
use serde_json::Value;

pub mod transport;

pub use transport::{ConfigTransport, HttpReply, HttpTransport};

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
  #[error("precondition failed: {0}")]
  Precondition(String),
  #[error("transport error: {0}")]
  Transport(String),
  #[error("unexpected HTTP status {status}")]
  Protocol { status: u16 },
  #[error("invalid schema: {0}")]
  Schema(String),
}

impl ResolveError {
  pub fn kind(&self) -> &'static str {
    match self {
      ResolveError::Precondition(_) => "precondition",
      ResolveError::Transport(_) => "transport",
      ResolveError::Protocol { .. } => "protocol",
      ResolveError::Schema(_) => "schema",
    }
  }
}

/// Identifiers injected into the attribution payload before it is sent.
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
  pub bundle_id: String,
  pub os: String,
  pub store_id: String,
  pub firebase_project_id: String,
  pub locale: String,
}

impl DeviceIdentity {
  pub fn from_config(cfg: &IdentityConfig) -> Self {
    Self {
      bundle_id: cfg.bundle_id.clone(),
      os: cfg.os.clone(),
      store_id: cfg.store_id.clone(),
      firebase_project_id: cfg.firebase_project_id.clone(),
      locale: cfg.locale.clone().unwrap_or_else(current_locale),
    }
  }
}

/// `en_US.UTF-8` -> `en_US`; `C`/`POSIX`/unset fall back to `en_US`.
pub fn current_locale() -> String {
  ["LC_ALL", "LC_MESSAGES", "LANG"]
    .iter()
    .filter_map(|var| std::env::var(var).ok())
    .find_map(|raw| locale_identifier(&raw))
    .unwrap_or_else(|| "en_US".to_string())
}

fn locale_identifier(raw: &str) -> Option<String> {
  let id = raw.split(['.', '@']).next()?.trim();
  if id.is_empty() || id == "C" || id == "POSIX" {
    return None;
  }
  Some(id.to_string())
}

#[derive(Debug, Deserialize)]
struct ConfigResponse {
  #[serde(default)]
  ok: Option<bool>,
  #[serde(default)]
  url: Option<Value>,
  #[serde(default)]
  expires: Option<Value>,
}

pub struct ConfigResolver {
  store: FlagStore,
  transport: Box<dyn ConfigTransport>,
  identity: DeviceIdentity,
}

impl ConfigResolver {
  pub fn new(
    store: FlagStore,
    transport: Box<dyn ConfigTransport>,
    identity: DeviceIdentity,
  ) -> Self {
    Self {
      store,
      transport,
      identity,
    }
  }

  pub fn stored_config(&self) -> Option<RemoteConfig> {
    self.store.remote_config()
  }

  /// One request/response cycle. Any failure permanently disables requests.
  ///
  /// A received config is routed even when persisting it fails. Nothing durable
  /// was written then, so the next launch requests again.
  ///
  /// Blocks on the network; run it off the serialized event context.
  pub fn resolve(&self) -> RouteOutcome {
    if self.store.no_more_requests() {
      tracing::info!("config requests disabled by flag; skipping request");
      return RouteOutcome::StopRequesting;
    }

    match self.try_resolve() {
      Ok(config) => {
        if let Err(e) = self.store.commit_remote_config(&config) {
          tracing::error!(
            kind = "store",
            error = ?e,
            "failed to persist remote config; routing to it for this launch only"
          );
        } else {
          tracing::info!(
            url = %redact_url_for_log(&config.url),
            expires = config.expires_at,
            "remote config saved"
          );
        }
        RouteOutcome::ConfigReady(config.url)
      }
      Err(e) => {
        tracing::warn!(
          kind = e.kind(),
          reason = %e,
          "config request failed; further requests disabled"
        );
        if let Err(store_err) = self.store.set_no_more_requests() {
          tracing::error!(error = ?store_err, "failed to persist no-more-requests flag");
        }
        RouteOutcome::StopRequesting
      }
    }
  }

  fn try_resolve(&self) -> Result<RemoteConfig, ResolveError> {
    let payload = self
      .store
      .conversion_data()
      .map_err(|e| ResolveError::Schema(format!("conversion data unreadable: {e}")))?
      .ok_or_else(|| ResolveError::Precondition("conversion data not found".to_string()))?;

    let body = serde_json::to_vec(&self.augment(payload))
      .map_err(|e| ResolveError::Schema(format!("serialize request body: {e}")))?;

    let reply = self.transport.post_json(&body)?;
    if !(200..300).contains(&reply.status) {
      return Err(ResolveError::Protocol {
        status: reply.status,
      });
    }

    parse_config_response(&reply.body)
  }

  fn augment(&self, mut payload: AttributionPayload) -> AttributionPayload {
    let id = &self.identity;
    let fields = [
      ("push_token", self.store.push_token().unwrap_or_default()),
      ("af_id", self.store.attribution_id().unwrap_or_default()),
      ("bundle_id", id.bundle_id.clone()),
      ("os", id.os.clone()),
      ("store_id", id.store_id.clone()),
      ("locale", id.locale.clone()),
      ("firebase_project_id", id.firebase_project_id.clone()),
    ];
    for (key, value) in fields {
      payload.insert(key.to_string(), Value::String(value));
    }
    payload
  }
}

fn parse_config_response(body: &[u8]) -> Result<RemoteConfig, ResolveError> {
  let value: Value = serde_json::from_slice(body)
    .map_err(|e| ResolveError::Schema(format!("response is not JSON: {e}")))?;
  if !value.is_object() {
    return Err(ResolveError::Schema("response is not a JSON object".to_string()));
  }

  let resp: ConfigResponse = serde_json::from_value(value)
    .map_err(|e| ResolveError::Schema(format!("response shape: {e}")))?;

  if resp.ok != Some(true) {
    return Err(ResolveError::Schema("response ok flag is not true".to_string()));
  }
  let url = match resp.url {
    Some(Value::String(url)) => url,
    _ => return Err(ResolveError::Schema("response url missing or not a string".to_string())),
  };
  let expires_at = resp
    .expires
    .as_ref()
    .and_then(Value::as_f64)
    .ok_or_else(|| ResolveError::Schema("response expires missing or not a number".to_string()))?;

  Ok(RemoteConfig { url, expires_at })
}


#[cfg(test)]
mod http_tests {
  use super::*;
  use crate::config::RemoteConfigEndpoint;
  use httpmock::prelude::*;

  #[test]
  fn end_to_end_against_mock_endpoint() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
      when
        .method(POST)
        .path("/config.php")
        .header("content-type", "application/json");
      then
        .status(200)
        .header("content-type", "application/json")
        .body(r#"{"ok":true,"url":"https://content.example/start","expires":1760000000}"#);
    });

    let store = FlagStore::in_memory();
    store.set_conversion_data(r#"{"af_status":"Non-organic"}"#, false).unwrap();
    let transport = HttpTransport::new(&RemoteConfigEndpoint {
      endpoint: server.url("/config.php"),
      allowlist_domains: vec!["127.0.0.1".to_string()],
      timeout_seconds: 5,
      require_https: false,
    })
    .unwrap();
    let identity = DeviceIdentity::from_config(&IdentityConfig::default());
    let resolver = ConfigResolver::new(store.clone(), Box::new(transport), identity);

    assert_eq!(
      resolver.resolve(),
      RouteOutcome::ConfigReady("https://content.example/start".to_string())
    );
    mock.assert();
    assert_eq!(store.remote_config().unwrap().expires_at, 1_760_000_000.0);
  }
}
