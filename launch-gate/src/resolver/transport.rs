use super::ResolveError;
use crate::config::{self, RemoteConfigEndpoint};
use reqwest::blocking::{Client, Response};
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use reqwest::redirect::Policy;
use reqwest::Url;
use std::io::Read;
use std::time::Duration;

const MAX_RESPONSE_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct HttpReply {
  pub status: u16,
  pub body: Vec<u8>,
}

pub trait ConfigTransport: Send + Sync {
  fn post_json(&self, body: &[u8]) -> Result<HttpReply, ResolveError>;
}

pub struct HttpTransport {
  client: Client,
  endpoint: Result<Url, String>,
}

impl HttpTransport {
  pub fn new(cfg: &RemoteConfigEndpoint) -> anyhow::Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(cfg.timeout_seconds.max(1)))
      .redirect(Policy::none())
      .build()
      .map_err(|e| anyhow::anyhow!("build HTTP client: {e}"))?;

    // An invalid endpoint is not fatal here: every send fails instead.
    Ok(Self {
      client,
      endpoint: config::validate_remote_config(cfg),
    })
  }
}

impl ConfigTransport for HttpTransport {
  fn post_json(&self, body: &[u8]) -> Result<HttpReply, ResolveError> {
    let url = self
      .endpoint
      .as_ref()
      .map_err(|reason| ResolveError::Transport(format!("endpoint rejected: {reason}")))?;

    let response = self
      .client
      .post(url.clone())
      .header(CONTENT_TYPE, "application/json")
      .header(USER_AGENT, format!("launch-gate/{}", env!("CARGO_PKG_VERSION")))
      .body(body.to_vec())
      .send()
      .map_err(|e| ResolveError::Transport(format!("POST {}: {e}", safe_url_label(url))))?;

    let status = response.status().as_u16();
    let body = read_response_with_limit(response, MAX_RESPONSE_BYTES)?;
    Ok(HttpReply { status, body })
  }
}

fn read_response_with_limit(response: Response, max_bytes: usize) -> Result<Vec<u8>, ResolveError> {
  let mut out = Vec::new();
  let mut limited = response.take((max_bytes.saturating_add(1)) as u64);
  limited
    .read_to_end(&mut out)
    .map_err(|e| ResolveError::Transport(format!("read response body: {e}")))?;

  if out.len() > max_bytes {
    return Err(ResolveError::Schema(format!(
      "response exceeds max size {max_bytes} bytes"
    )));
  }

  Ok(out)
}

fn safe_url_label(url: &Url) -> String {
  let host = url.host_str().unwrap_or("<no-host>");
  let mut path = url.path().to_string();
  if path.is_empty() {
    path = "/".to_string();
  }
  format!("{host}{path}")
}

#[cfg(test)]
mod tests {
  use super::*;
  use httpmock::prelude::*;

  fn endpoint_for(server: &MockServer) -> RemoteConfigEndpoint {
    RemoteConfigEndpoint {
      endpoint: server.url("/config.php"),
      allowlist_domains: vec!["127.0.0.1".to_string(), "localhost".to_string()],
      timeout_seconds: 5,
      require_https: false,
    }
  }

  #[test]
  fn posts_json_with_content_type() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
      when
        .method(POST)
        .path("/config.php")
        .header("content-type", "application/json")
        .body(r#"{"a":1}"#);
      then.status(200).body(r#"{"ok":true}"#);
    });

    let transport = HttpTransport::new(&endpoint_for(&server)).unwrap();
    let reply = transport.post_json(br#"{"a":1}"#).unwrap();

    mock.assert();
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body, br#"{"ok":true}"#);
  }

  #[test]
  fn non_success_status_is_returned_not_raised() {
    let server = MockServer::start();
    server.mock(|when, then| {
      when.method(POST);
      then.status(500);
    });

    let transport = HttpTransport::new(&endpoint_for(&server)).unwrap();
    assert_eq!(transport.post_json(b"{}").unwrap().status, 500);
  }

  #[test]
  fn disallowed_endpoint_never_sends() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
      when.method(POST);
      then.status(200);
    });

    let mut cfg = endpoint_for(&server);
    cfg.allowlist_domains = vec!["henhubplus.com".to_string()];
    let transport = HttpTransport::new(&cfg).unwrap();

    assert!(matches!(
      transport.post_json(b"{}"),
      Err(ResolveError::Transport(_))
    ));
    mock.assert_hits(0);
  }

  #[test]
  fn oversized_body_is_a_schema_error() {
    let server = MockServer::start();
    server.mock(|when, then| {
      when.method(POST);
      then.status(200).body(vec![b'x'; MAX_RESPONSE_BYTES + 10]);
    });

    let transport = HttpTransport::new(&endpoint_for(&server)).unwrap();
    assert!(matches!(
      transport.post_json(b"{}"),
      Err(ResolveError::Schema(_))
    ));
  }
}
