use serde::{Deserialize, Serialize};

/// Install-attribution ("conversion") data as delivered by the attribution SDK.
pub type AttributionPayload = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
  pub url: String,
  /// Stored as received. Nothing re-fetches on expiry.
  pub expires_at: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
  ConfigReady(String),
  StopRequesting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "url", rename_all = "snake_case")]
pub enum Destination {
  App,
  Content(String),
  NoConnectivity,
}

impl Destination {
  pub fn label(&self) -> &'static str {
    match self {
      Destination::App => "app",
      Destination::Content(_) => "content",
      Destination::NoConnectivity => "no_connectivity",
    }
  }
}

pub fn redact_url_for_log(url: &str) -> String {
  // Query strings can carry tokens; log only host and path.
  match reqwest::Url::parse(url) {
    Ok(u) => {
      let host = u.host_str().unwrap_or("<no-host>");
      format!("{host}{}", u.path())
    }
    Err(_) => "<invalid-url>".to_string(),
  }
}

pub fn now_unix_ms() -> u64 {
  use std::time::{SystemTime, UNIX_EPOCH};
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap_or_default()
    .as_millis() as u64
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn redaction_drops_query() {
    assert_eq!(
      redact_url_for_log("https://x.example/y?token=secret"),
      "x.example/y"
    );
    assert_eq!(redact_url_for_log("not a url"), "<invalid-url>");
  }
}
