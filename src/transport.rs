//! Transport seam: the single HTTP call the orchestrators make per attempt.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::FetchError;
use crate::request::{Method, RequestBody};

/// Header set on every JSON (or bodiless) request unless the caller overrides it.
pub const DEFAULT_CONTENT_TYPE: (&str, &str) = ("content-type", "application/json");

/// Fully resolved request handed to a [`Transport`].
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
  pub url: String,
  pub method: Method,
  pub body: Option<RequestBody>,
  /// Header names are lowercase
  pub headers: BTreeMap<String, String>,
}

impl TransportRequest {
  /// Build a request, applying the default header policy.
  ///
  /// `content-type: application/json` is added unless the body is binary or
  /// form data. Caller headers are merged last and win over the default,
  /// whatever their casing.
  pub fn new(
    url: impl Into<String>,
    method: Method,
    body: Option<RequestBody>,
    caller_headers: &BTreeMap<String, String>,
  ) -> Self {
    let mut headers = BTreeMap::new();
    if body.as_ref().map_or(true, RequestBody::is_json) {
      let (name, value) = DEFAULT_CONTENT_TYPE;
      headers.insert(name.to_string(), value.to_string());
    }
    for (name, value) in caller_headers {
      headers.insert(name.to_ascii_lowercase(), value.clone());
    }

    Self {
      url: url.into(),
      method,
      body,
      headers,
    }
  }
}

/// Status and raw body of a completed HTTP exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
  pub status: u16,
  pub body: String,
}

impl TransportResponse {
  pub fn new(status: u16, body: impl Into<String>) -> Self {
    Self {
      status,
      body: body.into(),
    }
  }

  /// Whether the status is 2xx.
  pub fn ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn text(&self) -> &str {
    &self.body
  }
}

/// Mockable HTTP transport.
///
/// Implementations perform exactly one exchange: retries happen in the
/// orchestrators, never here.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn send(&self, request: TransportRequest) -> Result<TransportResponse, FetchError>;
}

/// Parse a response into its JSON payload.
///
/// An empty body is an empty object. A non-2xx status turns the parsed body
/// into the payload of a [`FetchError::Status`].
pub fn parse_response(response: &TransportResponse) -> Result<Value, FetchError> {
  let text = response.text();
  let value = if text.is_empty() {
    Value::Object(Map::new())
  } else {
    serde_json::from_str(text).map_err(|e| FetchError::Parse(e.to_string()))?
  };

  if !response.ok() {
    return Err(FetchError::Status {
      status: response.status,
      body: value,
    });
  }

  Ok(value)
}

/// Send `request` and parse the response payload.
pub async fn execute(
  transport: &dyn Transport,
  request: TransportRequest,
) -> Result<Value, FetchError> {
  let response = transport.send(request).await?;
  parse_response(&response)
}

/// Production transport backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
  client: reqwest::Client,
}

impl ReqwestTransport {
  pub fn new() -> Result<Self, FetchError> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("swr-fetch/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| FetchError::Transport(format!("failed to build HTTP client: {}", e)))?;

    Ok(Self { client })
  }

  /// Wrap an existing client (custom timeouts, proxies, ...).
  pub fn with_client(client: reqwest::Client) -> Self {
    Self { client }
  }
}

impl From<Method> for reqwest::Method {
  fn from(method: Method) -> Self {
    match method {
      Method::Get => reqwest::Method::GET,
      Method::Post => reqwest::Method::POST,
      Method::Put => reqwest::Method::PUT,
      Method::Patch => reqwest::Method::PATCH,
      Method::Delete => reqwest::Method::DELETE,
    }
  }
}

#[async_trait]
impl Transport for ReqwestTransport {
  async fn send(&self, request: TransportRequest) -> Result<TransportResponse, FetchError> {
    let url = request
      .url
      .parse::<url::Url>()
      .map_err(|e| FetchError::InvalidUrl(format!("{}: {}", request.url, e)))?;

    debug!("HTTP {}: {}", request.method, url);

    let mut builder = self.client.request(request.method.into(), url);
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    builder = match request.body {
      Some(RequestBody::Json(value)) => builder.body(value.to_string()),
      Some(RequestBody::Binary(bytes)) => builder.body(bytes),
      Some(RequestBody::Form(pairs)) => builder.form(&pairs),
      None => builder,
    };

    let response = builder
      .send()
      .await
      .map_err(|e| FetchError::Transport(e.to_string()))?;
    let status = response.status().as_u16();
    let body = response
      .text()
      .await
      .map_err(|e| FetchError::Transport(e.to_string()))?;

    Ok(TransportResponse { status, body })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use wiremock::matchers::{body_json, header, method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  #[test]
  fn test_json_requests_get_default_content_type() {
    let request = TransportRequest::new("/a", Method::Get, None, &BTreeMap::new());
    assert_eq!(
      request.headers.get("content-type").map(String::as_str),
      Some("application/json")
    );
  }

  #[test]
  fn test_binary_and_form_requests_get_no_content_type() {
    let binary = TransportRequest::new(
      "/a",
      Method::Put,
      Some(RequestBody::Binary(vec![0xff])),
      &BTreeMap::new(),
    );
    assert!(binary.headers.is_empty());

    let form = TransportRequest::new(
      "/a",
      Method::Post,
      Some(RequestBody::Form(vec![("a".into(), "1".into())])),
      &BTreeMap::new(),
    );
    assert!(!form.headers.contains_key("content-type"));
  }

  #[test]
  fn test_caller_headers_override_default() {
    let mut headers = BTreeMap::new();
    headers.insert("Content-Type".to_string(), "text/plain".to_string());
    headers.insert("X-Token".to_string(), "abc".to_string());

    let request = TransportRequest::new("/a", Method::Post, None, &headers);
    assert_eq!(request.headers.len(), 2);
    assert_eq!(request.headers["content-type"], "text/plain");
    assert_eq!(request.headers["x-token"], "abc");
  }

  #[test]
  fn test_empty_body_parses_as_empty_object() {
    let value = parse_response(&TransportResponse::new(204, "")).unwrap();
    assert_eq!(value, json!({}));
  }

  #[test]
  fn test_error_status_carries_parsed_body() {
    let error = parse_response(&TransportResponse::new(400, r#"{"errors":["bad"]}"#)).unwrap_err();
    assert_eq!(
      error,
      FetchError::Status {
        status: 400,
        body: json!({"errors": ["bad"]}),
      }
    );
  }

  #[test]
  fn test_invalid_json_is_parse_failure() {
    let error = parse_response(&TransportResponse::new(200, "<html>")).unwrap_err();
    assert!(matches!(error, FetchError::Parse(_)));
  }

  #[tokio::test]
  async fn test_reqwest_transport_get() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/users"))
      .and(header("content-type", "application/json"))
      .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"users":[]}"#))
      .expect(1)
      .mount(&server)
      .await;

    let transport = ReqwestTransport::new().unwrap();
    let request = TransportRequest::new(
      format!("{}/api/users", server.uri()),
      Method::Get,
      None,
      &BTreeMap::new(),
    );

    let value = execute(&transport, request).await.unwrap();
    assert_eq!(value, json!({"users": []}));
  }

  #[tokio::test]
  async fn test_reqwest_transport_posts_json_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/api/users"))
      .and(body_json(json!({"firstName": "Test"})))
      .respond_with(ResponseTemplate::new(201).set_body_string(r#"{"id":7}"#))
      .expect(1)
      .mount(&server)
      .await;

    let transport = ReqwestTransport::new().unwrap();
    let request = TransportRequest::new(
      format!("{}/api/users", server.uri()),
      Method::Post,
      Some(RequestBody::Json(json!({"firstName": "Test"}))),
      &BTreeMap::new(),
    );

    let value = execute(&transport, request).await.unwrap();
    assert_eq!(value, json!({"id": 7}));
  }

  #[tokio::test]
  async fn test_reqwest_transport_returns_error_statuses() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .respond_with(ResponseTemplate::new(503).set_body_string(r#"{"message":"down"}"#))
      .mount(&server)
      .await;

    let transport = ReqwestTransport::new().unwrap();
    let request = TransportRequest::new(server.uri(), Method::Get, None, &BTreeMap::new());

    let response = transport.send(request).await.unwrap();
    assert_eq!(response.status, 503);
    assert!(!response.ok());
  }

  #[tokio::test]
  async fn test_reqwest_transport_rejects_relative_urls() {
    let transport = ReqwestTransport::new().unwrap();
    let request = TransportRequest::new("example.com/api", Method::Get, None, &BTreeMap::new());

    let error = transport.send(request).await.unwrap_err();
    assert!(matches!(error, FetchError::InvalidUrl(_)));
  }
}
