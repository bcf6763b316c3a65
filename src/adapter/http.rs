//! HTTP-API adapter.
//!
//! Drives JSON-over-HTTP management APIs. The request URL is the configured
//! `base_url` joined with a rendered endpoint template; the method follows
//! the action (`create`→POST, `verify`→GET, `rotate`→PUT, `revoke`→DELETE,
//! `list`→GET). Non-GET/DELETE requests carry a rendered body template or,
//! absent one, the operation parameters as JSON.
//!
//! # Retries
//!
//! 4xx responses are terminal — the backend understood the request and said
//! no. 5xx responses and transport errors retry with one-second linear
//! backoff, up to `retries` attempts (default 3). On exhaustion the last
//! status and body form the error.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use tracing::debug;

use crate::{Error, Result};

use super::template;
use super::{
    Action, Adapter, AdapterCapabilities, AdapterConfig, AdapterType, ExecutionResult, Operation,
};

/// Default attempt count for retriable failures.
const DEFAULT_ATTEMPTS: u32 = 3;

/// The shared client never waits less than this, whatever the config says.
const TIMEOUT_FLOOR: Duration = Duration::from_secs(30);

/// Adapter for HTTP management APIs.
pub struct HttpApiAdapter {
    client: Client,
}

impl HttpApiAdapter {
    /// Create the adapter with its shared HTTP client.
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .timeout(TIMEOUT_FLOOR)
                .build()
                .unwrap_or_default(),
        }
    }

    fn request_timeout(config: &AdapterConfig) -> Duration {
        config
            .timeout_secs
            .map_or(TIMEOUT_FLOOR, |secs| Duration::from_secs(secs).max(TIMEOUT_FLOOR))
    }

    fn build_request(
        &self,
        operation: &Operation,
        config: &AdapterConfig,
    ) -> Result<RequestBuilder> {
        let base_url = config.connection_str("base_url").ok_or_else(|| {
            Error::config("http adapter requires connection.base_url".to_string())
        })?;
        let endpoint = config.endpoint_template(operation.action).ok_or_else(|| {
            Error::config(format!(
                "no endpoint template for action '{}'",
                operation.action
            ))
        })?;
        let path = template::render_for(endpoint, operation)?;
        let url = format!("{}{path}", base_url.trim_end_matches('/'));

        let method = method_for(operation.action);
        let mut request = self
            .client
            .request(method.clone(), &url)
            .timeout(Self::request_timeout(config));

        if method != Method::GET && method != Method::DELETE {
            request = match config.body_template(operation.action) {
                Some(body) => {
                    let rendered = template::render_for(body, operation)?;
                    request
                        .header(reqwest::header::CONTENT_TYPE, "application/json")
                        .body(rendered)
                }
                None => request.json(&operation.parameters),
            };
        }

        apply_auth(request, config)
    }
}

impl Default for HttpApiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn method_for(action: Action) -> Method {
    match action {
        Action::Create => Method::POST,
        Action::Verify | Action::List => Method::GET,
        Action::Rotate => Method::PUT,
        Action::Revoke => Method::DELETE,
    }
}

/// Apply the configured authentication mode to a request.
fn apply_auth(request: RequestBuilder, config: &AdapterConfig) -> Result<RequestBuilder> {
    let Some(auth_type) = config.auth.get("type") else {
        return Ok(request);
    };
    let value = config.auth.get("value").cloned().unwrap_or_default();

    match auth_type.as_str() {
        "bearer" => Ok(request.bearer_auth(value)),
        "api_key" => {
            if config.auth.get("location").map(String::as_str) == Some("query") {
                let param = config
                    .auth
                    .get("param_name")
                    .map_or("api_key", String::as_str);
                Ok(request.query(&[(param, value.as_str())]))
            } else {
                let header = config
                    .auth
                    .get("header_name")
                    .map_or("X-API-Key", String::as_str);
                Ok(request.header(header, value))
            }
        }
        "basic" => {
            let username = config.auth.get("username").cloned().unwrap_or_default();
            Ok(request.basic_auth(username, Some(value)))
        }
        other => Err(Error::config(format!("unknown http auth type '{other}'"))),
    }
}

/// Shape a successful response into a result: JSON objects become the data
/// map, anything else lands under a single `response` key, and response
/// headers surface as `header_<name>` metadata.
async fn shape_response(response: reqwest::Response) -> ExecutionResult {
    let mut metadata = HashMap::new();
    for (name, value) in response.headers() {
        if let Ok(v) = value.to_str() {
            metadata.insert(
                format!("header_{}", name.as_str().to_ascii_lowercase()),
                v.to_string(),
            );
        }
    }
    metadata.insert("status".into(), response.status().as_u16().to_string());

    let text = response.text().await.unwrap_or_default();
    let data = match serde_json::from_str::<serde_json::Value>(&text) {
        Ok(serde_json::Value::Object(map)) => map,
        Ok(other) => {
            let mut map = serde_json::Map::new();
            map.insert("response".into(), other);
            map
        }
        Err(_) => {
            let mut map = serde_json::Map::new();
            map.insert("response".into(), serde_json::Value::String(text));
            map
        }
    };

    ExecutionResult {
        success: true,
        data,
        error: None,
        metadata,
    }
}

#[async_trait]
impl Adapter for HttpApiAdapter {
    fn name(&self) -> &str {
        "http-api"
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::HttpApi
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            supported_actions: vec![
                Action::Create,
                Action::Verify,
                Action::Rotate,
                Action::Revoke,
                Action::List,
            ],
            required_config: vec!["connection.base_url".into()],
            optional_config: vec![
                "auth.type".into(),
                "auth.value".into(),
                "auth.username".into(),
                "auth.header_name".into(),
                "auth.param_name".into(),
                "auth.location".into(),
            ],
            features: vec!["templated_endpoints".into(), "linear_retry".into()],
        }
    }

    fn validate(&self, config: &AdapterConfig) -> Result<()> {
        let base_url = config.connection_str("base_url").ok_or_else(|| {
            Error::config("http adapter requires connection.base_url".to_string())
        })?;
        url::Url::parse(base_url)
            .map_err(|e| Error::config(format!("invalid base_url '{base_url}': {e}")))?;

        if let Some(auth_type) = config.auth.get("type") {
            if !matches!(auth_type.as_str(), "bearer" | "api_key" | "basic") {
                return Err(Error::config(format!(
                    "unknown http auth type '{auth_type}'"
                )));
            }
        }
        Ok(())
    }

    async fn execute(
        &self,
        operation: &Operation,
        config: &AdapterConfig,
    ) -> Result<ExecutionResult> {
        let attempts = config.retries.unwrap_or(DEFAULT_ATTEMPTS).max(1);
        let mut last_failure = String::new();

        for attempt in 1..=attempts {
            let request = self.build_request(operation, config)?;

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        debug!(action = %operation.action, %status, attempt, "HTTP operation succeeded");
                        return Ok(shape_response(response).await);
                    }

                    let body = response.text().await.unwrap_or_default();
                    last_failure = format!("HTTP {status}: {body}");

                    // The backend understood the request and rejected it;
                    // retrying cannot change the answer.
                    if status.is_client_error() {
                        return Ok(ExecutionResult::fail(last_failure));
                    }
                }
                Err(e) => {
                    last_failure = format!("transport error: {e}");
                }
            }

            if attempt < attempts {
                let delay = Duration::from_secs(u64::from(attempt));
                debug!(attempt, delay_secs = attempt, error = %last_failure, "Retrying after backoff");
                tokio::time::sleep(delay).await;
            }
        }

        Ok(ExecutionResult::fail(last_failure))
    }
}
