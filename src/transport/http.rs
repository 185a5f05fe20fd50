//! `reqwest`-backed transport.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use url::Url;

use super::{ApiRequest, ApiResponse, HttpTransport, Method, ResponseType};
use crate::config::{ApiConfig, Config};
use crate::error::TransportError;

/// Transport that talks JSON over HTTP to the user administration API.
#[derive(Clone)]
pub struct ReqwestTransport {
  client: reqwest::Client,
  base_url: Url,
  token: Option<String>,
}

impl ReqwestTransport {
  pub fn new(config: &ApiConfig, token: Option<String>) -> color_eyre::Result<Self> {
    use color_eyre::eyre::eyre;

    let mut base_url = Url::parse(&config.base_url)
      .map_err(|e| eyre!("Invalid API base url {}: {}", config.base_url, e))?;
    // Joining replaces the last segment unless the base ends in a slash
    if !base_url.path().ends_with('/') {
      let prefixed = format!("{}/", base_url.path());
      base_url.set_path(&prefixed);
    }

    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      base_url,
      token,
    })
  }

  /// Build a transport from the loaded configuration, picking the API
  /// token up from the environment when present.
  pub fn from_config(config: &Config) -> color_eyre::Result<Self> {
    Self::new(&config.api, Config::get_api_token().ok())
  }

  fn url_for(&self, path: &str) -> Result<Url, TransportError> {
    self
      .base_url
      .join(path.trim_start_matches('/'))
      .map_err(|e| TransportError::Network(format!("invalid url {}: {}", path, e)))
  }
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
  match method {
    Method::Get => reqwest::Method::GET,
    Method::Post => reqwest::Method::POST,
    Method::Put => reqwest::Method::PUT,
    Method::Patch => reqwest::Method::PATCH,
    Method::Delete => reqwest::Method::DELETE,
  }
}

/// Flatten a JSON object into query pairs, skipping nulls.
pub(crate) fn query_pairs(query: &Value) -> Vec<(String, String)> {
  let Some(map) = query.as_object() else {
    return Vec::new();
  };

  map
    .iter()
    .filter_map(|(key, value)| {
      let rendered = match value {
        Value::Null => return None,
        Value::String(s) => s.clone(),
        Value::Array(items) => items
          .iter()
          .map(|item| match item {
            Value::String(s) => s.clone(),
            other => other.to_string(),
          })
          .collect::<Vec<_>>()
          .join(","),
        other => other.to_string(),
      };
      Some((key.clone(), rendered))
    })
    .collect()
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
  async fn request(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
    let url = self.url_for(&request.path)?;
    let mut builder = self
      .client
      .request(to_reqwest_method(request.method), url);

    if let Some(token) = &self.token {
      builder = builder.bearer_auth(token);
    }
    if let Some(query) = &request.query {
      builder = builder.query(&query_pairs(query));
    }
    if let Some(body) = &request.body {
      builder = builder.json(body);
    }

    let response = builder
      .send()
      .await
      .map_err(|e| TransportError::Network(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
      let message = response
        .text()
        .await
        .unwrap_or_else(|_| status.canonical_reason().unwrap_or("").to_string());
      return Err(TransportError::Status {
        status: status.as_u16(),
        message,
      });
    }

    let bytes = response
      .bytes()
      .await
      .map_err(|e| TransportError::Network(e.to_string()))?;

    match request.response_type {
      ResponseType::Binary => Ok(ApiResponse::Binary(bytes.to_vec())),
      ResponseType::Json if bytes.is_empty() => Ok(ApiResponse::Json(Value::Null)),
      ResponseType::Json => Ok(ApiResponse::Json(serde_json::from_slice(&bytes)?)),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_query_pairs_skip_nulls_and_join_arrays() {
    let mut pairs = query_pairs(&json!({
      "page": 2,
      "search": "ana",
      "status": null,
      "ids": ["1", "2"],
    }));
    pairs.sort();

    assert_eq!(
      pairs,
      vec![
        ("ids".to_string(), "1,2".to_string()),
        ("page".to_string(), "2".to_string()),
        ("search".to_string(), "ana".to_string()),
      ]
    );
  }

  fn transport(base_url: &str) -> ReqwestTransport {
    let api = ApiConfig {
      base_url: base_url.to_string(),
      timeout_secs: 5,
    };
    ReqwestTransport::new(&api, None).expect("transport")
  }

  #[test]
  fn test_url_keeps_base_path_prefix() {
    let url = transport("https://gw.example.com/backend")
      .url_for("/api/users")
      .expect("url");
    assert_eq!(url.as_str(), "https://gw.example.com/backend/api/users");

    let url = transport("https://gw.example.com/backend/")
      .url_for("/api/users/7")
      .expect("url");
    assert_eq!(url.as_str(), "https://gw.example.com/backend/api/users/7");
  }

  #[test]
  fn test_url_without_base_path() {
    let url = transport("http://localhost:8000")
      .url_for("/api/users/bulk/progress/3")
      .expect("url");
    assert_eq!(url.as_str(), "http://localhost:8000/api/users/bulk/progress/3");
  }

  #[test]
  fn test_query_pairs_non_object_is_empty() {
    assert!(query_pairs(&json!([1, 2])).is_empty());
  }
}
