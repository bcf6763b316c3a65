//! In-memory provider.
//!
//! Doubles as the contract-level test harness for the resolver: supports
//! versioned entries, artificial latency, and failure injection, all behind
//! the same [`Provider`] contract the real backends implement. Also
//! constructible from configuration (`type: memory` with an inline `values`
//! map) for local development.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::config::ProviderConfig;
use crate::{Error, Result};

use super::{Capabilities, Provider, Reference, SecretMetadata, SecretValue};

#[derive(Clone)]
struct Entry {
    value: String,
    version: String,
}

/// In-memory secret store.
pub struct MemoryProvider {
    name: String,
    // key -> versions, newest last
    entries: RwLock<HashMap<String, Vec<Entry>>>,
    delay: Option<Duration>,
    fail_resolve: RwLock<Option<String>>,
    fail_validate: RwLock<Option<String>>,
}

impl MemoryProvider {
    /// Create an empty store.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: RwLock::new(HashMap::new()),
            delay: None,
            fail_resolve: RwLock::new(None),
            fail_validate: RwLock::new(None),
        }
    }

    /// Build from a config declaration with an inline `values` map.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when `values` is present but not a map
    /// of strings.
    pub fn from_config(name: &str, config: &ProviderConfig) -> Result<Self> {
        let provider = Self::new(name);
        if let Some(values) = config.options.get("values") {
            let map: HashMap<String, String> = serde_yaml::from_value(values.clone())
                .map_err(|e| {
                    Error::config(format!("provider '{name}': invalid 'values' map: {e}"))
                })?;
            for (key, value) in map {
                provider.insert(&key, &value);
            }
        }
        Ok(provider)
    }

    /// Builder: seed a key with a value (version "1", or the next version
    /// when the key already exists).
    #[must_use]
    pub fn with_value(self, key: &str, value: &str) -> Self {
        self.insert(key, value);
        self
    }

    /// Builder: add artificial latency to every call.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Insert a new version for a key. Returns the assigned version.
    pub fn insert(&self, key: &str, value: &str) -> String {
        let mut entries = self.entries.write();
        let versions = entries.entry(key.to_string()).or_default();
        let version = (versions.len() + 1).to_string();
        versions.push(Entry {
            value: value.to_string(),
            version: version.clone(),
        });
        version
    }

    /// Make every subsequent `resolve` fail with the given message.
    pub fn fail_resolve_with(&self, message: &str) {
        *self.fail_resolve.write() = Some(message.to_string());
    }

    /// Make every subsequent `validate` fail with the given message.
    pub fn fail_validate_with(&self, message: &str) {
        *self.fail_validate.write() = Some(message.to_string());
    }

    async fn simulate_latency(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn lookup(&self, reference: &Reference) -> Result<Entry> {
        let entries = self.entries.read();
        let versions = entries
            .get(&reference.key)
            .ok_or_else(|| Error::not_found(&self.name, &reference.key))?;
        match &reference.version {
            Some(v) => versions
                .iter()
                .find(|e| &e.version == v)
                .cloned()
                .ok_or_else(|| {
                    Error::not_found(&self.name, format!("{}@{v}", reference.key))
                }),
            None => versions
                .last()
                .cloned()
                .ok_or_else(|| Error::not_found(&self.name, &reference.key)),
        }
    }
}

#[async_trait]
impl Provider for MemoryProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn resolve(&self, reference: &Reference) -> Result<SecretValue> {
        self.simulate_latency().await;
        if let Some(message) = self.fail_resolve.read().clone() {
            return Err(Error::provider(&self.name, "resolve", message));
        }
        let entry = self.lookup(reference)?;
        Ok(SecretValue {
            value: entry.value,
            version: Some(entry.version),
            updated_at: Some(Utc::now()),
            metadata: HashMap::new(),
        })
    }

    async fn describe(&self, reference: &Reference) -> Result<SecretMetadata> {
        self.simulate_latency().await;
        match self.lookup(reference) {
            Ok(entry) => Ok(SecretMetadata {
                exists: true,
                version: Some(entry.version),
                updated_at: Some(Utc::now()),
                metadata: HashMap::new(),
            }),
            Err(e) if e.is_not_found() => Ok(SecretMetadata::default()),
            Err(e) => Err(e),
        }
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            versioning: true,
            metadata: true,
            ..Capabilities::default()
        }
    }

    async fn validate(&self) -> Result<()> {
        self.simulate_latency().await;
        if let Some(message) = self.fail_validate.read().clone() {
            return Err(Error::provider(&self.name, "validate", message));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(key: &str, version: Option<&str>) -> Reference {
        Reference {
            provider: "mem".into(),
            key: key.into(),
            version: version.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn resolves_latest_version_by_default() {
        let provider = MemoryProvider::new("mem")
            .with_value("k", "old")
            .with_value("k", "new");

        let value = provider.resolve(&reference("k", None)).await.unwrap();
        assert_eq!(value.value, "new");
        assert_eq!(value.version.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn version_pin_fetches_older_entry() {
        let provider = MemoryProvider::new("mem")
            .with_value("k", "old")
            .with_value("k", "new");

        let value = provider.resolve(&reference("k", Some("1"))).await.unwrap();
        assert_eq!(value.value, "old");
    }

    #[tokio::test]
    async fn missing_key_and_missing_version_are_not_found() {
        let provider = MemoryProvider::new("mem").with_value("k", "v");
        assert!(
            provider
                .resolve(&reference("missing", None))
                .await
                .unwrap_err()
                .is_not_found()
        );
        assert!(
            provider
                .resolve(&reference("k", Some("9")))
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn failure_injection() {
        let provider = MemoryProvider::new("mem").with_value("k", "v");
        provider.fail_resolve_with("backend down");

        let err = provider.resolve(&reference("k", None)).await.unwrap_err();
        assert!(err.to_string().contains("backend down"));

        provider.fail_validate_with("no session");
        assert!(provider.validate().await.is_err());
    }

    #[tokio::test]
    async fn artificial_delay_applies() {
        let provider = MemoryProvider::new("mem")
            .with_value("k", "v")
            .with_delay(Duration::from_millis(20));

        let started = std::time::Instant::now();
        provider.resolve(&reference("k", None)).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn from_config_reads_values_map() {
        let yaml = r"
type: memory
values:
  api_key: abc123
";
        let config: ProviderConfig = serde_yaml::from_str(yaml).unwrap();
        let provider = MemoryProvider::from_config("mem", &config).unwrap();
        let entry = provider.lookup(&reference("api_key", None)).unwrap();
        assert_eq!(entry.value, "abc123");
    }
}
