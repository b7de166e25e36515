//! REST implementation of [`RemoteCall`] for the hosted backend.

use color_eyre::{eyre::eyre, Result};
use futures::FutureExt;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use url::Url;

use super::{ErrorKind, RemoteCall, RemoteError, RemoteFuture, RemoteResult};
use crate::config::Config;

/// Error body returned by the backend's REST layer.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
  message: String,
  #[serde(default)]
  code: Option<String>,
  #[serde(default)]
  details: Option<String>,
}

/// Backend client speaking the RPC / table REST dialect.
///
/// Reads hit `POST /rest/v1/rpc/{procedure}`, writes hit `POST /rest/v1/{table}`.
#[derive(Clone)]
pub struct RestBackend {
  http: reqwest::Client,
  base: Url,
  api_key: String,
}

impl RestBackend {
  pub fn new(config: &Config) -> Result<Self> {
    let api_key = Config::get_api_key()?;

    let base = base_url(&config.backend.url)?;

    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.backend.timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base,
      api_key,
    })
  }

  /// Resolve `path` below the configured base, keeping any base path prefix.
  fn endpoint(&self, path: &str) -> RemoteResult<Url> {
    self
      .base
      .join(path)
      .map_err(|e| RemoteError::unknown(format!("Invalid endpoint '{}': {}", path, e)))
  }

  async fn post(&self, url: Url, body: Value, return_rows: bool) -> RemoteResult<Value> {
    let mut request = self
      .http
      .post(url.clone())
      .header("apikey", &self.api_key)
      .bearer_auth(&self.api_key)
      .json(&body);

    if return_rows {
      request = request.header("Prefer", "return=representation");
    }

    let response = request.send().await.map_err(|e| {
      tracing::debug!(%url, error = %e, "request failed before a response");
      RemoteError::new(classify_transport(&e), e.to_string())
    })?;

    let status = response.status();
    if status.is_success() {
      if status == StatusCode::NO_CONTENT {
        return Ok(Value::Null);
      }
      let text = response
        .text()
        .await
        .map_err(|e| RemoteError::network(format!("Failed to read response body: {}", e)))?;
      if text.trim().is_empty() {
        return Ok(Value::Null);
      }
      return Ok(serde_json::from_str(&text)?);
    }

    let text = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ApiErrorBody>(&text) {
      Ok(body) => {
        let mut message = body.message;
        if let Some(code) = body.code {
          message = format!("{} ({})", message, code);
        }
        if let Some(details) = body.details {
          message = format!("{}: {}", message, details);
        }
        message
      }
      Err(_) => format!("HTTP {}: {}", status.as_u16(), text),
    };

    let kind = classify_status(status);
    if kind == ErrorKind::Unknown {
      tracing::error!(%url, status = status.as_u16(), %message, "unclassified backend failure");
    }
    Err(RemoteError::new(kind, message))
  }
}

impl RemoteCall for RestBackend {
  fn call<'a>(&'a self, procedure: &'a str, args: Value) -> RemoteFuture<'a> {
    async move {
      let url = self.endpoint(&format!("rest/v1/rpc/{}", procedure))?;
      self.post(url, args, false).await
    }
    .boxed()
  }

  fn write<'a>(&'a self, target: &'a str, payload: Value) -> RemoteFuture<'a> {
    async move {
      let url = self.endpoint(&format!("rest/v1/{}", target))?;
      self.post(url, payload, true).await
    }
    .boxed()
  }
}

/// Map an HTTP failure status onto an [`ErrorKind`].
pub fn classify_status(status: StatusCode) -> ErrorKind {
  match status.as_u16() {
    400 | 409 | 422 => ErrorKind::Validation,
    401 | 403 => ErrorKind::Auth,
    404 => ErrorKind::NotFound,
    408 | 429 => ErrorKind::Network,
    500..=599 => ErrorKind::Network,
    _ => ErrorKind::Unknown,
  }
}

fn classify_transport(e: &reqwest::Error) -> ErrorKind {
  if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() || e.is_decode() {
    ErrorKind::Network
  } else {
    ErrorKind::Unknown
  }
}

/// Parse the backend url as a directory so joins keep its path.
fn base_url(raw: &str) -> Result<Url> {
  let mut base = Url::parse(raw).map_err(|e| eyre!("Invalid backend url '{}': {}", raw, e))?;
  if !base.path().ends_with('/') {
    let path = format!("{}/", base.path());
    base.set_path(&path);
  }
  Ok(base)
}
