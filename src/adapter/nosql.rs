//! NoSQL adapter.
//!
//! Dispatches rendered command templates to document and key-value stores
//! through a family-handler seam: a [`NoSqlHandler`] validates configuration
//! and constructs a [`NoSqlConnection`] for its family, the adapter does the
//! template work and result normalization. The `redis` family ships with a
//! wire implementation; `memory` backs contract tests and local development;
//! `mongodb` is recognized but reports that no wire driver is bundled.
//!
//! # Command form
//!
//! A rendered template that parses as a JSON object with a top-level
//! `command` field names the command, the remaining fields become its
//! parameter map. Any other rendered text is the command itself, with the
//! operation's parameters passed through. `verify` defaults to `{"ping": 1}`
//! when no template is declared.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::debug;

use crate::{Error, Result};

use super::template;
use super::{
    Action, Adapter, AdapterCapabilities, AdapterConfig, AdapterType, ExecutionResult, Operation,
};

/// Default verify command when none is declared.
const DEFAULT_VERIFY_TEMPLATE: &str = r#"{"ping": 1}"#;

// ============================================================================
// Seam traits
// ============================================================================

/// A live connection to a NoSQL backend.
#[async_trait]
pub trait NoSqlConnection: Send {
    /// Run one command and return its raw response.
    ///
    /// # Errors
    ///
    /// Returns a provider error on backend failure.
    async fn run_command(
        &mut self,
        command: &str,
        parameters: &serde_json::Map<String, Value>,
    ) -> Result<Value>;
}

/// Family-specific connection construction and config validation.
#[async_trait]
pub trait NoSqlHandler: Send + Sync + 'static {
    /// Canonical family name (`redis`, `mongodb`, ...).
    fn family(&self) -> &'static str;

    /// Accepted aliases for the family.
    fn aliases(&self) -> &'static [&'static str] {
        &[]
    }

    /// Validate family-specific configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error describing the first problem found.
    fn validate(&self, config: &AdapterConfig) -> Result<()>;

    /// Open a connection.
    ///
    /// # Errors
    ///
    /// Returns a provider error when the backend is unreachable.
    async fn connect(&self, config: &AdapterConfig) -> Result<Box<dyn NoSqlConnection>>;
}

// ============================================================================
// Adapter
// ============================================================================

/// Adapter for NoSQL backends.
pub struct NoSqlAdapter {
    handlers: RwLock<HashMap<String, Arc<dyn NoSqlHandler>>>,
}

impl NoSqlAdapter {
    /// Create the adapter with the built-in family handlers.
    #[must_use]
    pub fn new() -> Self {
        let adapter = Self::empty();
        // A fresh table cannot hold duplicates.
        let _ = adapter.register_handler(Arc::new(RedisHandler));
        let _ = adapter.register_handler(Arc::new(MongoHandler));
        let _ = adapter.register_handler(Arc::new(MemoryNoSqlHandler::default()));
        adapter
    }

    /// Create the adapter with no family handlers; callers compose their
    /// own via [`NoSqlAdapter::register_handler`].
    #[must_use]
    pub fn empty() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler for its family and aliases.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the family is already taken.
    pub fn register_handler(&self, handler: Arc<dyn NoSqlHandler>) -> Result<()> {
        let mut handlers = self.handlers.write();
        for name in std::iter::once(handler.family()).chain(handler.aliases().iter().copied()) {
            if handlers.contains_key(name) {
                return Err(Error::config(format!(
                    "nosql handler for family '{name}' is already registered"
                )));
            }
        }
        for name in std::iter::once(handler.family()).chain(handler.aliases().iter().copied()) {
            handlers.insert(name.to_string(), Arc::clone(&handler));
        }
        Ok(())
    }

    fn handler_for(&self, config: &AdapterConfig) -> Result<Arc<dyn NoSqlHandler>> {
        let family = config
            .connection_str("type")
            .ok_or_else(|| Error::config("nosql adapter requires connection.type".to_string()))?
            .to_ascii_lowercase();
        self.handlers.read().get(&family).map(Arc::clone).ok_or_else(|| {
            Error::config(format!("unknown nosql family '{family}'"))
        })
    }

    /// Render the command for an operation and split it into command text
    /// and parameter map.
    fn render_command(
        operation: &Operation,
        config: &AdapterConfig,
    ) -> Result<(String, serde_json::Map<String, Value>)> {
        let rendered = match config.command_template(operation.action, &operation.target) {
            Some(tpl) => template::render_for(tpl, operation)?,
            None if operation.action == Action::Verify => DEFAULT_VERIFY_TEMPLATE.to_string(),
            None => {
                return Err(Error::config(format!(
                    "no nosql command template for action '{}'",
                    operation.action
                )));
            }
        };

        if let Ok(Value::Object(mut map)) = serde_json::from_str::<Value>(&rendered) {
            if let Some(Value::String(command)) = map.remove("command") {
                return Ok((command, map));
            }
        }
        Ok((rendered, operation.parameters.clone()))
    }

    /// Normalize a list response into `{items: [...], count: n}`.
    fn normalize_list(value: Value) -> serde_json::Map<String, Value> {
        let items = match value {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            single => vec![single],
        };
        let mut data = serde_json::Map::new();
        data.insert("count".into(), Value::from(items.len()));
        data.insert("items".into(), Value::Array(items));
        data
    }
}

impl Default for NoSqlAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Adapter for NoSqlAdapter {
    fn name(&self) -> &str {
        "nosql"
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::NoSql
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
            required_config: vec!["connection.type".into()],
            optional_config: vec!["connection.host".into(), "connection.port".into()],
            features: vec!["templated_commands".into(), "pluggable_families".into()],
        }
    }

    fn validate(&self, config: &AdapterConfig) -> Result<()> {
        self.handler_for(config)?.validate(config)
    }

    async fn execute(
        &self,
        operation: &Operation,
        config: &AdapterConfig,
    ) -> Result<ExecutionResult> {
        let handler = self.handler_for(config)?;
        let (command, parameters) = Self::render_command(operation, config)?;
        debug!(family = handler.family(), command = %command, "Running nosql command");

        let mut connection = match handler.connect(config).await {
            Ok(c) => c,
            Err(e) => return Ok(ExecutionResult::fail(e.to_string())),
        };

        match connection.run_command(&command, &parameters).await {
            Ok(value) => {
                let data = if operation.action == Action::List {
                    Self::normalize_list(value)
                } else if let Value::Object(map) = value {
                    map
                } else {
                    let mut map = serde_json::Map::new();
                    map.insert("result".into(), value);
                    map
                };
                Ok(ExecutionResult::ok(data))
            }
            Err(e) => Ok(ExecutionResult::fail(e.to_string())),
        }
    }
}

// ============================================================================
// Redis family
// ============================================================================

struct RedisHandler;

#[async_trait]
impl NoSqlHandler for RedisHandler {
    fn family(&self) -> &'static str {
        "redis"
    }

    fn validate(&self, config: &AdapterConfig) -> Result<()> {
        if config.connection_str("url").is_some() {
            return Ok(());
        }
        if config.connection_str("host").is_none() {
            return Err(Error::config(
                "redis family requires connection.url or connection.host".to_string(),
            ));
        }
        Ok(())
    }

    async fn connect(&self, config: &AdapterConfig) -> Result<Box<dyn NoSqlConnection>> {
        let url = match config.connection_str("url") {
            Some(url) => url.to_string(),
            None => {
                let host = config.connection_str("host").ok_or_else(|| {
                    Error::config(
                        "redis family requires connection.url or connection.host".to_string(),
                    )
                })?;
                let port = config.connection_str("port").unwrap_or("6379");
                format!("redis://{host}:{port}")
            }
        };

        let client = redis::Client::open(url.as_str())
            .map_err(|e| Error::provider("redis", "connect", e.to_string()))?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::provider("redis", "connect", e.to_string()))?;
        Ok(Box::new(RedisConnection { connection }))
    }
}

struct RedisConnection {
    connection: redis::aio::MultiplexedConnection,
}

#[async_trait]
impl NoSqlConnection for RedisConnection {
    async fn run_command(
        &mut self,
        command: &str,
        _parameters: &serde_json::Map<String, Value>,
    ) -> Result<Value> {
        // Redis commands are positional; arguments are rendered into the
        // command text by the template.
        let mut tokens = command.split_whitespace();
        let name = tokens
            .next()
            .ok_or_else(|| Error::config("empty redis command".to_string()))?;

        let mut cmd = redis::cmd(name);
        for token in tokens {
            cmd.arg(token);
        }

        let value: redis::Value = cmd
            .query_async(&mut self.connection)
            .await
            .map_err(|e| Error::provider("redis", "command", e.to_string()))?;
        Ok(redis_to_json(value))
    }
}

fn redis_to_json(value: redis::Value) -> Value {
    match value {
        redis::Value::Nil => Value::Null,
        redis::Value::Int(i) => Value::from(i),
        redis::Value::BulkString(bytes) => {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        }
        redis::Value::SimpleString(s) => Value::String(s),
        redis::Value::Okay => Value::String("OK".to_string()),
        redis::Value::Array(items) | redis::Value::Set(items) => {
            Value::Array(items.into_iter().map(redis_to_json).collect())
        }
        redis::Value::Map(entries) => {
            let mut map = serde_json::Map::new();
            for (k, v) in entries {
                let key = match redis_to_json(k) {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                map.insert(key, redis_to_json(v));
            }
            Value::Object(map)
        }
        other => Value::String(format!("{other:?}")),
    }
}

// ============================================================================
// MongoDB family (recognized, no bundled driver)
// ============================================================================

struct MongoHandler;

#[async_trait]
impl NoSqlHandler for MongoHandler {
    fn family(&self) -> &'static str {
        "mongodb"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["mongo"]
    }

    fn validate(&self, _config: &AdapterConfig) -> Result<()> {
        Err(Error::config(
            "no mongodb wire driver is bundled; use the redis family or register a custom handler"
                .to_string(),
        ))
    }

    async fn connect(&self, _config: &AdapterConfig) -> Result<Box<dyn NoSqlConnection>> {
        Err(Error::config(
            "no mongodb wire driver is bundled; use the redis family or register a custom handler"
                .to_string(),
        ))
    }
}

// ============================================================================
// In-memory family (contract tests, local development)
// ============================================================================

/// Shared script/recording state for [`MemoryNoSqlConnection`].
type MemoryState = Arc<Mutex<MemoryInner>>;

#[derive(Default)]
struct MemoryInner {
    responses: HashMap<String, Value>,
    executed: Vec<(String, serde_json::Map<String, Value>)>,
    fail_with: Option<String>,
    fail_commands: HashMap<String, String>,
}

/// In-memory [`NoSqlConnection`] with scripted responses and a command log.
#[derive(Clone, Default)]
pub struct MemoryNoSqlConnection {
    state: MemoryState,
}

impl MemoryNoSqlConnection {
    /// Create an empty connection (answers every command with `null`,
    /// except `ping`-style commands which answer `{"ok": 1}`).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the response for a command.
    pub fn respond_with(&self, command: &str, response: Value) {
        self.state.lock().responses.insert(command.to_string(), response);
    }

    /// Make every subsequent command fail.
    pub fn fail_with(&self, message: &str) {
        self.state.lock().fail_with = Some(message.to_string());
    }

    /// Make one specific command fail while others keep working.
    pub fn fail_command(&self, command: &str, message: &str) {
        self.state
            .lock()
            .fail_commands
            .insert(command.to_string(), message.to_string());
    }

    /// Commands executed so far, in order.
    #[must_use]
    pub fn executed(&self) -> Vec<(String, serde_json::Map<String, Value>)> {
        self.state.lock().executed.clone()
    }
}

#[async_trait]
impl NoSqlConnection for MemoryNoSqlConnection {
    async fn run_command(
        &mut self,
        command: &str,
        parameters: &serde_json::Map<String, Value>,
    ) -> Result<Value> {
        let mut inner = self.state.lock();
        inner
            .executed
            .push((command.to_string(), parameters.clone()));
        if let Some(message) = inner.fail_with.clone() {
            return Err(Error::provider("memory", "command", message));
        }
        if let Some(message) = inner.fail_commands.get(command).cloned() {
            return Err(Error::provider("memory", "command", message));
        }
        if let Some(response) = inner.responses.get(command) {
            return Ok(response.clone());
        }
        if command.to_ascii_lowercase().contains("ping") {
            return Ok(serde_json::json!({"ok": 1}));
        }
        Ok(Value::Null)
    }
}

/// Handler for the `memory` family. Every connection it hands out shares the
/// same scripted state, so tests can assert on executed commands.
#[derive(Default)]
pub struct MemoryNoSqlHandler {
    connection: MemoryNoSqlConnection,
}

impl MemoryNoSqlHandler {
    /// Create a handler around a scripted connection.
    #[must_use]
    pub fn with_connection(connection: MemoryNoSqlConnection) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl NoSqlHandler for MemoryNoSqlHandler {
    fn family(&self) -> &'static str {
        "memory"
    }

    fn validate(&self, _config: &AdapterConfig) -> Result<()> {
        Ok(())
    }

    async fn connect(&self, _config: &AdapterConfig) -> Result<Box<dyn NoSqlConnection>> {
        Ok(Box::new(self.connection.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn memory_config() -> AdapterConfig {
        AdapterConfig {
            connection: HashMap::from([("type".to_string(), "memory".to_string())]),
            service: json!({
                "commands": {
                    "rotate": r#"{"command": "setPassword", "user": "{{target}}", "password": "{{parameters.password}}"}"#,
                    "list": "SMEMBERS users",
                }
            }),
            ..AdapterConfig::default()
        }
    }

    fn scripted_adapter() -> (NoSqlAdapter, MemoryNoSqlConnection) {
        let connection = MemoryNoSqlConnection::new();
        let adapter = NoSqlAdapter::empty();
        adapter
            .register_handler(Arc::new(MemoryNoSqlHandler::with_connection(
                connection.clone(),
            )))
            .unwrap();
        (adapter, connection)
    }

    #[test]
    fn command_with_json_command_field_splits_parameters() {
        let op = Operation::new(Action::Rotate, "app_user")
            .with_parameter("password", json!("pw"));
        let (command, params) =
            NoSqlAdapter::render_command(&op, &memory_config()).unwrap();
        assert_eq!(command, "setPassword");
        assert_eq!(params["user"], json!("app_user"));
        assert_eq!(params["password"], json!("pw"));
        assert!(!params.contains_key("command"));
    }

    #[test]
    fn plain_text_command_passes_operation_parameters() {
        let op = Operation::new(Action::List, "users").with_parameter("limit", json!(10));
        let (command, params) = NoSqlAdapter::render_command(&op, &memory_config()).unwrap();
        assert_eq!(command, "SMEMBERS users");
        assert_eq!(params["limit"], json!(10));
    }

    #[test]
    fn verify_defaults_to_ping_document() {
        let op = Operation::new(Action::Verify, "any");
        let (command, params) = NoSqlAdapter::render_command(&op, &memory_config()).unwrap();
        // No top-level "command" field: the rendered text is the command.
        assert_eq!(command, DEFAULT_VERIFY_TEMPLATE);
        assert!(params.is_empty());
    }

    #[test]
    fn missing_template_is_protocol_error_except_verify() {
        let op = Operation::new(Action::Revoke, "u");
        let err = NoSqlAdapter::render_command(&op, &memory_config()).unwrap_err();
        assert!(err.to_string().contains("no nosql command template"));
    }

    #[test]
    fn unknown_family_is_rejected() {
        let adapter = NoSqlAdapter::new();
        let config = AdapterConfig {
            connection: HashMap::from([("type".to_string(), "cassandra".to_string())]),
            ..AdapterConfig::default()
        };
        assert!(
            adapter
                .validate(&config)
                .unwrap_err()
                .to_string()
                .contains("unknown nosql family")
        );
    }

    #[test]
    fn mongodb_family_reports_missing_driver() {
        let adapter = NoSqlAdapter::new();
        let config = AdapterConfig {
            connection: HashMap::from([("type".to_string(), "mongodb".to_string())]),
            ..AdapterConfig::default()
        };
        let err = adapter.validate(&config).unwrap_err();
        assert!(err.to_string().contains("no mongodb wire driver"));
    }

    #[tokio::test]
    async fn execute_records_command_and_shapes_object_response() {
        let (adapter, connection) = scripted_adapter();
        connection.respond_with("setPassword", json!({"ok": 1, "user": "app_user"}));

        let op = Operation::new(Action::Rotate, "app_user")
            .with_parameter("password", json!("pw"));
        let result = adapter.execute(&op, &memory_config()).await.unwrap();

        assert!(result.success);
        assert_eq!(result.data["ok"], json!(1));
        let executed = connection.executed();
        assert_eq!(executed.len(), 1);
        assert_eq!(executed[0].0, "setPassword");
        assert_eq!(executed[0].1["password"], json!("pw"));
    }

    #[tokio::test]
    async fn list_responses_normalize_to_items_and_count() {
        let (adapter, connection) = scripted_adapter();

        connection.respond_with("SMEMBERS users", json!(["alice", "bob"]));
        let op = Operation::new(Action::List, "users");
        let result = adapter.execute(&op, &memory_config()).await.unwrap();
        assert_eq!(result.data["count"], json!(2));
        assert_eq!(result.data["items"], json!(["alice", "bob"]));

        // A scalar response still normalizes.
        connection.respond_with("SMEMBERS users", json!("alice"));
        let result = adapter.execute(&op, &memory_config()).await.unwrap();
        assert_eq!(result.data["count"], json!(1));
        assert_eq!(result.data["items"], json!(["alice"]));
    }

    #[tokio::test]
    async fn backend_failure_sets_error_not_err() {
        let (adapter, connection) = scripted_adapter();
        connection.fail_with("connection reset");

        let op = Operation::new(Action::Verify, "any");
        let result = adapter.execute(&op, &memory_config()).await.unwrap();
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap_or_default().contains("connection reset"));
    }
}
