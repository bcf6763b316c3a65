//! Protocol adapters — credential lifecycle operations against backends.
//!
//! Four families (SQL, HTTP-API, NoSQL, Certificate) implement a single
//! [`Adapter`] trait driven by templated, config-declared commands. The
//! [`AdapterRegistry`] dispatches a generic [`Operation`] to the adapter
//! registered for its family; [`default_registry`] holds the built-in four.
//!
//! # Contract
//!
//! `execute` always returns a well-formed [`ExecutionResult`]: backend
//! failures set `success = false` and fill `error`. Protocol-level problems
//! (missing template, invalid auth type, unknown action) surface as `Err`
//! from `execute` itself.

pub mod certificate;
pub mod http;
pub mod nosql;
pub mod sql;
pub mod template;

pub use certificate::CertificateAdapter;
pub use http::HttpApiAdapter;
pub use nosql::{
    MemoryNoSqlConnection, MemoryNoSqlHandler, NoSqlAdapter, NoSqlConnection, NoSqlHandler,
};
pub use sql::SqlAdapter;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::ServiceConfig;
use crate::{Error, Result};

// ============================================================================
// Operations
// ============================================================================

/// Credential lifecycle actions an adapter can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Create a credential or secret object.
    Create,
    /// Check that a credential works.
    Verify,
    /// Replace a credential's value.
    Rotate,
    /// Invalidate a credential.
    Revoke,
    /// Enumerate credentials.
    List,
}

impl Action {
    /// Stable lowercase name, used in template lookups and audit entries.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Verify => "verify",
            Self::Rotate => "rotate",
            Self::Revoke => "revoke",
            Self::List => "list",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "create" => Ok(Self::Create),
            "verify" => Ok(Self::Verify),
            "rotate" => Ok(Self::Rotate),
            "revoke" => Ok(Self::Revoke),
            "list" => Ok(Self::List),
            other => Err(Error::config(format!("unknown adapter action '{other}'"))),
        }
    }
}

/// A single adapter invocation.
#[derive(Debug, Clone)]
pub struct Operation {
    /// What to do.
    pub action: Action,
    /// What to do it to (username, key id, certificate CN, ...).
    pub target: String,
    /// Action parameters, rendered into templates and request bodies.
    pub parameters: serde_json::Map<String, serde_json::Value>,
    /// Free-form metadata carried through to the result.
    pub metadata: HashMap<String, String>,
}

impl Operation {
    /// Build an operation with empty parameters and metadata.
    #[must_use]
    pub fn new(action: Action, target: impl Into<String>) -> Self {
        Self {
            action,
            target: target.into(),
            parameters: serde_json::Map::new(),
            metadata: HashMap::new(),
        }
    }

    /// Builder: set a parameter.
    #[must_use]
    pub fn with_parameter(mut self, key: &str, value: serde_json::Value) -> Self {
        self.parameters.insert(key.to_string(), value);
        self
    }
}

// ============================================================================
// Adapter configuration
// ============================================================================

/// Configuration handed to an adapter per call.
#[derive(Debug, Clone, Default)]
pub struct AdapterConfig {
    /// Connection parameters (host, port, base_url, ...).
    pub connection: HashMap<String, String>,
    /// Authentication parameters (type, username, value, ...).
    pub auth: HashMap<String, String>,
    /// Family-specific `endpoints` / `commands` template tables.
    pub service: serde_json::Value,
    /// Per-operation timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Retry attempts for retriable operations.
    pub retries: Option<u32>,
}

impl AdapterConfig {
    /// Build from a declared rotation service.
    #[must_use]
    pub fn from_service(service: &ServiceConfig) -> Self {
        Self {
            connection: service.connection.clone(),
            auth: service.auth.clone(),
            service: service.service.clone(),
            timeout_secs: service.timeout_secs,
            retries: service.retries,
        }
    }

    /// Look up a command template: `commands.<action>_<target>` first, then
    /// `commands.<action>`.
    #[must_use]
    pub fn command_template(&self, action: Action, target: &str) -> Option<&str> {
        let commands = self.service.get("commands")?;
        commands
            .get(format!("{action}_{target}"))
            .or_else(|| commands.get(action.as_str()))
            .and_then(serde_json::Value::as_str)
    }

    /// Look up an endpoint template for an action.
    #[must_use]
    pub fn endpoint_template(&self, action: Action) -> Option<&str> {
        self.service
            .get("endpoints")?
            .get(action.as_str())
            .and_then(serde_json::Value::as_str)
    }

    /// Look up a body template for an action.
    #[must_use]
    pub fn body_template(&self, action: Action) -> Option<&str> {
        self.service
            .get("bodies")?
            .get(action.as_str())
            .and_then(serde_json::Value::as_str)
    }

    /// Connection value by key.
    #[must_use]
    pub fn connection_str(&self, key: &str) -> Option<&str> {
        self.connection.get(key).map(String::as_str)
    }
}

// ============================================================================
// Results
// ============================================================================

/// Outcome of an adapter operation. Always well-formed: backend failures set
/// `success = false` and fill `error` instead of failing `execute`.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    /// Whether the backend accepted the operation.
    pub success: bool,
    /// Operation output (certificate PEM, listed rows, response fields, ...).
    pub data: serde_json::Map<String, serde_json::Value>,
    /// Backend failure description when `success` is false.
    pub error: Option<String>,
    /// Transport-level metadata (response headers, row counts, ...).
    pub metadata: HashMap<String, String>,
}

impl ExecutionResult {
    /// Successful result with data.
    #[must_use]
    pub fn ok(data: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            success: true,
            data,
            error: None,
            metadata: HashMap::new(),
        }
    }

    /// Failed result with a backend error message.
    #[must_use]
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: serde_json::Map::new(),
            error: Some(error.into()),
            metadata: HashMap::new(),
        }
    }
}

// ============================================================================
// Adapter trait and registry
// ============================================================================

/// Adapter families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterType {
    /// Relational databases.
    Sql,
    /// JSON-over-HTTP management APIs.
    HttpApi,
    /// Document and key-value stores.
    NoSql,
    /// X.509 certificate issuance.
    Certificate,
}

impl FromStr for AdapterType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sql" | "database" => Ok(Self::Sql),
            "http_api" | "http-api" | "http" => Ok(Self::HttpApi),
            "nosql" => Ok(Self::NoSql),
            "certificate" | "cert" => Ok(Self::Certificate),
            other => Err(Error::config(format!("unknown adapter type '{other}'"))),
        }
    }
}

impl fmt::Display for AdapterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Sql => "sql",
            Self::HttpApi => "http_api",
            Self::NoSql => "nosql",
            Self::Certificate => "certificate",
        };
        f.write_str(s)
    }
}

/// What an adapter family can do, for discovery and validation.
#[derive(Debug, Clone, Default)]
pub struct AdapterCapabilities {
    /// Actions the adapter implements.
    pub supported_actions: Vec<Action>,
    /// Connection/auth keys that must be present.
    pub required_config: Vec<String>,
    /// Recognized optional keys.
    pub optional_config: Vec<String>,
    /// Free-form feature tags (`transactions`, `templated_endpoints`, ...).
    pub features: Vec<String>,
}

/// A protocol adapter family.
#[async_trait]
pub trait Adapter: Send + Sync + 'static {
    /// Stable adapter name.
    fn name(&self) -> &str;

    /// The family this adapter serves.
    fn adapter_type(&self) -> AdapterType;

    /// Capability description.
    fn capabilities(&self) -> AdapterCapabilities;

    /// Validate a configuration without contacting the backend.
    ///
    /// # Errors
    ///
    /// Returns a configuration error describing the first problem found.
    /// A configuration that validates must not fail `execute` on pre-check
    /// grounds.
    fn validate(&self, config: &AdapterConfig) -> Result<()>;

    /// Perform an operation.
    ///
    /// # Errors
    ///
    /// Returns `Err` for protocol-level problems only; backend failures are
    /// reported through the result.
    async fn execute(&self, operation: &Operation, config: &AdapterConfig)
    -> Result<ExecutionResult>;
}

/// Registry mapping adapter families to implementations.
///
/// Reads take a shared lock and return clones; registration takes an
/// exclusive lock. Duplicate registration is a hard error.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: RwLock<HashMap<AdapterType, Arc<dyn Adapter>>>,
}

impl AdapterRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter for its family.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the family already has an adapter.
    pub fn register(&self, adapter: Arc<dyn Adapter>) -> Result<()> {
        let mut adapters = self.adapters.write();
        let adapter_type = adapter.adapter_type();
        if adapters.contains_key(&adapter_type) {
            return Err(Error::config(format!(
                "adapter for type '{adapter_type}' is already registered"
            )));
        }
        adapters.insert(adapter_type, adapter);
        Ok(())
    }

    /// Look up the adapter for a family.
    #[must_use]
    pub fn get(&self, adapter_type: AdapterType) -> Option<Arc<dyn Adapter>> {
        self.adapters.read().get(&adapter_type).map(Arc::clone)
    }

    /// Families with a registered adapter, sorted by name. Returned by value.
    #[must_use]
    pub fn types(&self) -> Vec<AdapterType> {
        let mut types: Vec<AdapterType> = self.adapters.read().keys().copied().collect();
        types.sort_by_key(|t| t.to_string());
        types
    }

    /// Dispatch an operation to the adapter registered for a family.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when no adapter is registered, or the
    /// adapter's own protocol-level error.
    pub async fn execute(
        &self,
        adapter_type: AdapterType,
        operation: &Operation,
        config: &AdapterConfig,
    ) -> Result<ExecutionResult> {
        let adapter = self.get(adapter_type).ok_or_else(|| {
            Error::config(format!("no adapter registered for type '{adapter_type}'"))
        })?;
        adapter.execute(operation, config).await
    }
}

/// Process-wide registry holding the four built-in adapter families.
pub fn default_registry() -> Arc<AdapterRegistry> {
    static REGISTRY: LazyLock<Arc<AdapterRegistry>> = LazyLock::new(|| {
        let registry = AdapterRegistry::new();
        // A fresh registry cannot hold duplicates.
        let _ = registry.register(Arc::new(SqlAdapter::new()));
        let _ = registry.register(Arc::new(HttpApiAdapter::new()));
        let _ = registry.register(Arc::new(NoSqlAdapter::new()));
        let _ = registry.register(Arc::new(CertificateAdapter::new()));
        Arc::new(registry)
    });
    Arc::clone(&REGISTRY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_round_trips_through_strings() {
        for action in [
            Action::Create,
            Action::Verify,
            Action::Rotate,
            Action::Revoke,
            Action::List,
        ] {
            assert_eq!(action.as_str().parse::<Action>().unwrap(), action);
        }
        assert!("destroy".parse::<Action>().is_err());
    }

    #[test]
    fn adapter_type_aliases() {
        assert_eq!("http".parse::<AdapterType>().unwrap(), AdapterType::HttpApi);
        assert_eq!("cert".parse::<AdapterType>().unwrap(), AdapterType::Certificate);
        assert_eq!("database".parse::<AdapterType>().unwrap(), AdapterType::Sql);
        assert!("grpc".parse::<AdapterType>().is_err());
    }

    #[test]
    fn command_template_prefers_target_specific_entry() {
        let config = AdapterConfig {
            service: serde_json::json!({
                "commands": {
                    "rotate": "generic",
                    "rotate_admin": "specific",
                }
            }),
            ..AdapterConfig::default()
        };
        assert_eq!(
            config.command_template(Action::Rotate, "admin"),
            Some("specific")
        );
        assert_eq!(
            config.command_template(Action::Rotate, "app"),
            Some("generic")
        );
        assert_eq!(config.command_template(Action::List, "app"), None);
    }

    #[test]
    fn duplicate_registration_is_a_hard_error() {
        let registry = AdapterRegistry::new();
        registry.register(Arc::new(CertificateAdapter::new())).unwrap();
        let err = registry
            .register(Arc::new(CertificateAdapter::new()))
            .unwrap_err();
        assert!(err.to_string().contains("already registered"));
    }

    #[test]
    fn default_registry_holds_all_four_families() {
        let registry = default_registry();
        assert_eq!(
            registry.types(),
            vec![
                AdapterType::Certificate,
                AdapterType::HttpApi,
                AdapterType::NoSql,
                AdapterType::Sql,
            ]
        );
    }

    #[tokio::test]
    async fn dispatch_to_unregistered_family_fails() {
        let registry = AdapterRegistry::new();
        let operation = Operation::new(Action::Verify, "x");
        let err = registry
            .execute(AdapterType::Sql, &operation, &AdapterConfig::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no adapter registered"));
    }
}
