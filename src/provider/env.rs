//! Process-environment provider.

use async_trait::async_trait;

use crate::config::ProviderConfig;
use crate::{Error, Result};

use super::{Capabilities, Provider, Reference, SecretMetadata, SecretValue};

/// Resolves keys from the process environment, with an optional prefix
/// (`prefix: APP_` turns key `db_password` into `APP_DB_PASSWORD`).
pub struct EnvProvider {
    name: String,
    prefix: Option<String>,
}

impl EnvProvider {
    /// Create a provider with no prefix.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            prefix: None,
        }
    }

    /// Build from a config declaration.
    #[must_use]
    pub fn from_config(name: &str, config: &ProviderConfig) -> Self {
        Self {
            name: name.to_string(),
            prefix: config.option_str("prefix").map(str::to_string),
        }
    }

    fn env_key(&self, key: &str) -> String {
        let upper = key.to_ascii_uppercase().replace(['-', '.', '/'], "_");
        match &self.prefix {
            Some(p) => format!("{p}{upper}"),
            None => upper,
        }
    }
}

#[async_trait]
impl Provider for EnvProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn resolve(&self, reference: &Reference) -> Result<SecretValue> {
        if reference.version.is_some() {
            return Err(Error::provider(
                &self.name,
                "resolve",
                "environment variables are not versioned",
            ));
        }
        let env_key = self.env_key(&reference.key);
        match std::env::var(&env_key) {
            Ok(value) => Ok(SecretValue::new(value)),
            Err(_) => Err(Error::not_found(&self.name, &reference.key)),
        }
    }

    async fn describe(&self, reference: &Reference) -> Result<SecretMetadata> {
        let exists = std::env::var(self.env_key(&reference.key)).is_ok();
        Ok(SecretMetadata {
            exists,
            ..SecretMetadata::default()
        })
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    async fn validate(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(key: &str) -> Reference {
        Reference {
            provider: "env".into(),
            key: key.into(),
            version: None,
        }
    }

    #[tokio::test]
    async fn resolves_uppercased_key() {
        // PATH is set on every platform the tests run on.
        let provider = EnvProvider::new("env");
        let value = provider.resolve(&reference("path")).await.unwrap();
        assert!(!value.value.is_empty());
    }

    #[tokio::test]
    async fn missing_variable_is_not_found() {
        let provider = EnvProvider::new("env");
        let err = provider
            .resolve(&reference("secretops_definitely_unset"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn version_pin_is_rejected() {
        let provider = EnvProvider::new("env");
        let mut r = reference("path");
        r.version = Some("2".into());
        let err = provider.resolve(&r).await.unwrap_err();
        assert!(err.to_string().contains("not versioned"));
    }

    #[test]
    fn key_normalization_applies_prefix() {
        let provider = EnvProvider {
            name: "env".into(),
            prefix: Some("APP_".into()),
        };
        assert_eq!(provider.env_key("db.password"), "APP_DB_PASSWORD");
        assert_eq!(provider.env_key("api-key"), "APP_API_KEY");
    }

    #[tokio::test]
    async fn describe_reports_existence() {
        let provider = EnvProvider::new("env");
        assert!(provider.describe(&reference("path")).await.unwrap().exists);
        assert!(
            !provider
                .describe(&reference("secretops_definitely_unset"))
                .await
                .unwrap()
                .exists
        );
    }
}
