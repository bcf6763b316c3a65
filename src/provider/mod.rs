//! Provider abstraction — pluggable secret backends.
//!
//! This module unifies all secret sources behind a single [`Provider`] trait
//! consumed by the resolver, and a [`ProviderRegistry`] that routes store
//! references to the right instance by name.
//!
//! Implementations may be cloud-SDK-backed, subprocess-backed, or in-memory;
//! the resolver holds no assumption beyond this interface and calls it
//! concurrently. Built-in types (`env`, `memory`) cover local development and
//! tests; everything else is registered programmatically.

mod env;
mod memory;

pub use env::EnvProvider;
pub use memory::MemoryProvider;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::config::{ProviderConfig, SecretReference};
use crate::{Error, Result};

// ============================================================================
// Data model
// ============================================================================

/// A store reference as the provider contract sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Provider name the reference was routed by.
    pub provider: String,
    /// Backend-specific key or path.
    pub key: String,
    /// Optional version pin.
    pub version: Option<String>,
}

impl Reference {
    /// Build a reference from a parsed `store://` form.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for `svc://` references — those name
    /// rotation targets, not retrievable secrets.
    pub fn from_secret_reference(r: &SecretReference) -> Result<Self> {
        match r {
            SecretReference::Store {
                provider,
                key,
                version,
            } => Ok(Self {
                provider: provider.clone(),
                key: key.clone(),
                version: version.clone(),
            }),
            SecretReference::Service { service } => Err(Error::config(format!(
                "svc://{service} names a rotation target and cannot be resolved as a secret"
            ))),
        }
    }

    /// Human-readable source tag: `<provider>:<key>[@version]`.
    #[must_use]
    pub fn source_tag(&self) -> String {
        match &self.version {
            Some(v) => format!("{}:{}@{}", self.provider, self.key, v),
            None => format!("{}:{}", self.provider, self.key),
        }
    }
}

/// A fetched secret. The value is opaque text as far as the engine is
/// concerned; transforms operate on it downstream.
#[derive(Clone, Default)]
pub struct SecretValue {
    /// The secret text.
    pub value: String,
    /// Backend version identifier, when the backend has one.
    pub version: Option<String>,
    /// Last update time, when the backend reports one.
    pub updated_at: Option<DateTime<Utc>>,
    /// Backend-specific metadata.
    pub metadata: HashMap<String, String>,
}

impl SecretValue {
    /// Wrap a plain string value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            ..Self::default()
        }
    }
}

// Secret material must never reach logs through Debug formatting.
impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretValue")
            .field("value", &"[REDACTED]")
            .field("version", &self.version)
            .field("updated_at", &self.updated_at)
            .finish_non_exhaustive()
    }
}

/// Metadata about a secret, without the value.
#[derive(Debug, Clone, Default)]
pub struct SecretMetadata {
    /// Whether the key exists in the backend.
    pub exists: bool,
    /// Current version identifier.
    pub version: Option<String>,
    /// Last update time.
    pub updated_at: Option<DateTime<Utc>>,
    /// Backend-specific metadata.
    pub metadata: HashMap<String, String>,
}

/// Capability flags a provider advertises.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Secrets are versioned and version pins are honored.
    pub versioning: bool,
    /// `describe` returns meaningful metadata.
    pub metadata: bool,
    /// The backend can push change notifications.
    pub watching: bool,
    /// Values may be binary (base64-encoded in transit).
    pub binary: bool,
    /// The backend requires authentication.
    pub requires_auth: bool,
    /// Supported authentication methods.
    pub auth_methods: Vec<String>,
}

// ============================================================================
// Provider trait
// ============================================================================

/// An addressable secret backend.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync + 'static` so they can be stored in
/// `Arc<dyn Provider>` and called from concurrent resolution tasks.
/// Cancellation follows the usual future model: callers wrap calls in
/// deadlines and drop them to abort.
#[async_trait]
pub trait Provider: Send + Sync + 'static {
    /// Unique, stable name for this provider instance.
    fn name(&self) -> &str;

    /// Fetch the secret a reference points at.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the key does not exist, or a
    /// provider error for backend failures.
    async fn resolve(&self, reference: &Reference) -> Result<SecretValue>;

    /// Fetch metadata for a reference without necessarily fetching the value.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend cannot be reached.
    async fn describe(&self, reference: &Reference) -> Result<SecretMetadata>;

    /// Capability flags for this provider.
    fn capabilities(&self) -> Capabilities;

    /// Check that the provider is reachable and authenticated.
    ///
    /// # Errors
    ///
    /// Returns an error describing what is misconfigured or unreachable.
    async fn validate(&self) -> Result<()>;
}

impl std::fmt::Debug for dyn Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider").field("name", &self.name()).finish()
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Registry of named providers.
///
/// Reads take a shared lock; registration takes an exclusive lock. Listing
/// returns a copy — callers never hold internal state by reference.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<dyn Provider>>>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its own name, replacing any previous
    /// registration with that name.
    pub fn register(&self, provider: Arc<dyn Provider>) {
        let name = provider.name().to_string();
        let previous = self.providers.write().insert(name.clone(), provider);
        if previous.is_some() {
            tracing::debug!(provider = %name, "Replaced provider registration");
        }
    }

    /// Look up a provider by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.read().get(name).map(Arc::clone)
    }

    /// Look up a provider by name, failing with a configuration error.
    ///
    /// # Errors
    ///
    /// Returns `Config` when no provider with that name is registered.
    pub fn require(&self, name: &str) -> Result<Arc<dyn Provider>> {
        self.get(name)
            .ok_or_else(|| Error::config(format!("provider not found: {name}")))
    }

    /// Names of all registered providers, sorted. Returned by value.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.read().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Number of registered providers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.read().len()
    }

    /// Returns `true` if no providers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.read().is_empty()
    }
}

/// Build a provider from its declaration. Only the built-in types (`env`,
/// `memory`) can be constructed from configuration alone; cloud and vault
/// providers are registered programmatically by the embedding application.
///
/// # Errors
///
/// Returns a configuration error for provider types with no built-in
/// constructor.
pub fn build_provider(name: &str, config: &ProviderConfig) -> Result<Arc<dyn Provider>> {
    match config.provider_type.to_ascii_lowercase().as_str() {
        "env" => Ok(Arc::new(EnvProvider::from_config(name, config))),
        "memory" => Ok(Arc::new(MemoryProvider::from_config(name, config)?)),
        other => Err(Error::config(format!(
            "provider type '{other}' has no built-in constructor; register it programmatically"
        ))),
    }
}
