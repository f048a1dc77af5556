use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;
use url::Url;

use super::{Operation, OperationError, OperationFuture, Transport};
use crate::config::{Config, TransportConfig};
use crate::store::FilterSet;

/// Transport that POSTs the filter set to `{base_url}/{operation}`.
///
/// Only operations listed in the configuration resolve; anything else is
/// reported as unavailable to the orchestrator.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base_url: Url,
  operations: Arc<BTreeSet<String>>,
}

impl HttpTransport {
  pub fn new(config: &TransportConfig) -> Result<Self> {
    let raw = config
      .base_url
      .as_deref()
      .ok_or_else(|| eyre!("transport.base_url is not configured"))?;

    // Trailing slash so joins append instead of replacing the last segment
    let base_url = if raw.ends_with('/') {
      Url::parse(raw)
    } else {
      Url::parse(&format!("{}/", raw))
    }
    .map_err(|e| eyre!("Invalid transport.base_url '{}': {}", raw, e))?;

    let mut headers = HeaderMap::new();
    if let Some(token) = Config::get_api_token() {
      let value = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|e| eyre!("Invalid API token: {}", e))?;
      headers.insert(AUTHORIZATION, value);
    }

    let client = reqwest::Client::builder()
      .default_headers(headers)
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      base_url,
      operations: Arc::new(config.operations.iter().cloned().collect()),
    })
  }

  fn endpoint(&self, operation: &str) -> Result<Url, OperationError> {
    self
      .base_url
      .join(operation)
      .map_err(|e| OperationError(format!("Invalid endpoint for {}: {}", operation, e)))
  }
}

impl Transport for HttpTransport {
  fn resolve(&self, name: &str) -> Option<Operation> {
    if !self.operations.contains(name) {
      return None;
    }

    let transport = self.clone();
    let name = name.to_string();
    let operation: Operation = Arc::new(move |filters: FilterSet| -> OperationFuture {
      let transport = transport.clone();
      let name = name.clone();
      Box::pin(async move {
        let url = transport.endpoint(&name)?;
        trace!(%url, "invoking operation");

        let response = transport
          .client
          .post(url)
          .json(&filters)
          .send()
          .await
          .map_err(|e| OperationError(format!("{} request failed: {}", name, e)))?;

        let status = response.status();
        if !status.is_success() {
          return Err(OperationError(format!(
            "{} returned HTTP {}",
            name, status
          )));
        }

        response
          .json::<Value>()
          .await
          .map_err(|e| OperationError(format!("{} returned invalid JSON: {}", name, e)))
      })
    });
    Some(operation)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn config(base_url: Option<&str>) -> TransportConfig {
    TransportConfig {
      base_url: base_url.map(String::from),
      operations: vec!["getAlerts".to_string()],
      ..TransportConfig::default()
    }
  }

  #[test]
  fn test_requires_base_url() {
    assert!(HttpTransport::new(&config(None)).is_err());
    assert!(HttpTransport::new(&config(Some("not a url"))).is_err());
  }

  #[test]
  fn test_only_configured_operations_resolve() {
    let transport = HttpTransport::new(&config(Some("http://localhost:9000/api"))).unwrap();
    assert!(transport.resolve("getAlerts").is_some());
    assert!(transport.resolve("getTaxLiability").is_none());
  }

  #[test]
  fn test_endpoint_appends_operation() {
    let transport = HttpTransport::new(&config(Some("http://localhost:9000/api"))).unwrap();
    assert_eq!(
      transport.endpoint("getAlerts").unwrap().as_str(),
      "http://localhost:9000/api/getAlerts"
    );
  }
}
