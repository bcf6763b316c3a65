//! Rotation strategies.
//!
//! A [`RotationStrategy`] owns the mechanics of replacing one kind of
//! credential; the engine selects one (by name or by secret type) and runs
//! it. [`TwoSecretRotation`] extends the contract with the primitives the
//! engine needs for zero-downtime overlap rotations.
//!
//! [`AdapterRotation`] is the built-in strategy: it drives whatever protocol
//! adapter the secret's service declaration names, so one strategy covers
//! SQL users, API keys behind management endpoints, and NoSQL accounts.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde_json::Value;
use tracing::{debug, warn};

use crate::adapter::{Action, AdapterConfig, AdapterRegistry, AdapterType, Operation};
use crate::config::ServiceConfig;
use crate::{Error, Result};

use super::audit::AuditEntry;
use super::{ManagedSecret, RotationRequest, RotationResult, RotationStatus};

/// Length of generated replacement credentials.
const GENERATED_SECRET_LEN: usize = 32;

// ============================================================================
// Strategy traits
// ============================================================================

/// A credential rotation algorithm.
#[async_trait]
pub trait RotationStrategy: Send + Sync + 'static {
    /// Unique strategy name.
    fn name(&self) -> &str;

    /// Whether this strategy can rotate the given secret.
    fn supports_secret(&self, secret: &ManagedSecret) -> bool;

    /// Perform a rotation. Unsupported secrets yield a failed result (with a
    /// message naming the unsupported type), not an `Err`.
    ///
    /// # Errors
    ///
    /// Returns `Err` only for protocol-level problems (broken templates,
    /// missing adapters).
    async fn rotate(&self, request: &RotationRequest) -> Result<RotationResult>;

    /// Verify that the secret (optionally a specific new reference) works.
    ///
    /// # Errors
    ///
    /// Returns an error when verification fails.
    async fn verify(&self, secret: &ManagedSecret, new_ref: Option<&str>) -> Result<()>;

    /// Undo a partially applied rotation, best effort.
    ///
    /// # Errors
    ///
    /// Returns an error when the rollback itself fails.
    async fn rollback(&self, secret: &ManagedSecret, reason: &str) -> Result<()>;

    /// Last known status for a secret this strategy has touched.
    fn status(&self, secret_name: &str) -> RotationStatus;
}

impl std::fmt::Debug for dyn RotationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotationStrategy").field("name", &self.name()).finish()
    }
}

/// Primitives for two-secret overlap rotation: create a secondary, verify
/// it, promote it, deprecate the primary. The engine drives the sequencing
/// and rollback.
#[async_trait]
pub trait TwoSecretRotation: RotationStrategy {
    /// Create the secondary secret; returns its reference.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend rejects the secondary.
    async fn create_secondary_secret(&self, request: &RotationRequest) -> Result<String>;

    /// Make the secondary the primary for consumers.
    ///
    /// # Errors
    ///
    /// Returns an error when promotion fails.
    async fn promote_secondary_secret(
        &self,
        secret: &ManagedSecret,
        secondary_ref: &str,
    ) -> Result<()>;

    /// Retire the old primary; returns its reference when known.
    ///
    /// # Errors
    ///
    /// Returns an error when deprecation fails.
    async fn deprecate_primary_secret(&self, secret: &ManagedSecret) -> Result<Option<String>>;
}

/// Generate a replacement credential value.
#[must_use]
pub fn generate_secret_value() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_SECRET_LEN)
        .map(char::from)
        .collect()
}

// ============================================================================
// Adapter-backed strategy
// ============================================================================

/// Rotates credentials by driving the protocol adapter the secret's service
/// declaration names.
pub struct AdapterRotation {
    name: String,
    registry: Arc<AdapterRegistry>,
    supported_types: Vec<String>,
    statuses: RwLock<HashMap<String, RotationStatus>>,
}

impl AdapterRotation {
    /// Create the strategy for a set of secret types.
    #[must_use]
    pub fn new(name: &str, registry: Arc<AdapterRegistry>, supported_types: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            registry,
            supported_types,
            statuses: RwLock::new(HashMap::new()),
        }
    }

    /// Strategy with the default coverage: everything a protocol adapter can
    /// express.
    #[must_use]
    pub fn with_defaults(registry: Arc<AdapterRegistry>) -> Self {
        Self::new(
            "adapter",
            registry,
            vec![
                "database_password".into(),
                "api_key".into(),
                "nosql_password".into(),
                "certificate".into(),
            ],
        )
    }

    fn set_status(&self, secret_name: &str, status: RotationStatus) {
        self.statuses.write().insert(secret_name.to_string(), status);
    }

    /// Build the rotate operation: request parameters, plus a generated
    /// replacement value when the caller did not supply one.
    fn build_operation(&self, action: Action, request: &RotationRequest) -> Operation {
        let mut operation = Operation::new(action, &request.secret.target);
        operation.parameters = request.parameters.clone();
        if action == Action::Rotate && !operation.parameters.contains_key("password") {
            operation
                .parameters
                .insert("password".into(), Value::String(generate_secret_value()));
        }
        operation
            .metadata
            .insert("secret".into(), request.secret.name.clone());
        operation
    }

    async fn execute(
        &self,
        operation: &Operation,
        secret: &ManagedSecret,
    ) -> Result<crate::adapter::ExecutionResult> {
        self.registry
            .execute(secret.adapter_type, operation, &secret.config)
            .await
    }
}

#[async_trait]
impl RotationStrategy for AdapterRotation {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_secret(&self, secret: &ManagedSecret) -> bool {
        self.supported_types
            .iter()
            .any(|t| t.eq_ignore_ascii_case(&secret.secret_type))
    }

    async fn rotate(&self, request: &RotationRequest) -> Result<RotationResult> {
        let secret = &request.secret;
        if !self.supports_secret(secret) {
            return Ok(RotationResult::failed_with(
                AuditEntry::failure(
                    "rotate",
                    &self.name,
                    format!(
                        "strategy '{}' does not support secret type '{}'",
                        self.name, secret.secret_type
                    ),
                ),
            ));
        }

        self.set_status(&secret.name, RotationStatus::InProgress);
        let mut trail = Vec::new();

        let operation = self.build_operation(Action::Rotate, request);
        let outcome = self.execute(&operation, secret).await?;
        if !outcome.success {
            let message = outcome
                .error
                .unwrap_or_else(|| "backend rejected rotation".to_string());
            trail.push(AuditEntry::failure("rotate", &self.name, &message));
            self.rollback(secret, &message).await.ok();
            trail.push(AuditEntry::info("rollback", &self.name, "rollback requested"));
            self.set_status(&secret.name, RotationStatus::Failed);
            return Ok(RotationResult::failed(trail));
        }

        let new_ref = outcome
            .data
            .get("serial")
            .or_else(|| outcome.data.get("version"))
            .and_then(Value::as_str)
            .map_or_else(|| uuid::Uuid::new_v4().to_string(), str::to_string);
        trail.push(AuditEntry::success(
            "rotate",
            &self.name,
            format!("backend accepted rotation of '{}'", secret.target),
        ));

        // Verify with the rotate outcome's data in hand - certificate
        // verification needs the issued PEM, SQL/NoSQL templates ignore it.
        let mut verify_op = Operation::new(Action::Verify, &secret.target);
        verify_op.parameters = outcome.data.clone();
        let verified = self.execute(&verify_op, secret).await?;
        if !verified.success {
            let message = verified
                .error
                .unwrap_or_else(|| "verification failed".to_string());
            trail.push(AuditEntry::failure("verify", &self.name, &message));
            self.rollback(secret, &message).await.ok();
            trail.push(AuditEntry::info("rollback", &self.name, "rollback requested"));
            self.set_status(&secret.name, RotationStatus::Failed);
            return Ok(RotationResult::failed(trail));
        }
        trail.push(AuditEntry::success(
            "verify",
            &self.name,
            "new credential verified",
        ));

        self.set_status(&secret.name, RotationStatus::Completed);
        Ok(RotationResult::completed(new_ref, trail))
    }

    async fn verify(&self, secret: &ManagedSecret, _new_ref: Option<&str>) -> Result<()> {
        let operation = Operation::new(Action::Verify, &secret.target);
        let outcome = self.execute(&operation, secret).await?;
        if outcome.success {
            Ok(())
        } else {
            Err(Error::provider(
                secret.adapter_type.to_string(),
                "verify",
                outcome
                    .error
                    .unwrap_or_else(|| "verification failed".to_string()),
            ))
        }
    }

    async fn rollback(&self, secret: &ManagedSecret, reason: &str) -> Result<()> {
        warn!(secret = %secret.name, reason, "Rolling back rotation");
        self.set_status(&secret.name, RotationStatus::RolledBack);
        // The previous credential was never removed; nothing to restore.
        Ok(())
    }

    fn status(&self, secret_name: &str) -> RotationStatus {
        self.statuses
            .read()
            .get(secret_name)
            .copied()
            .unwrap_or(RotationStatus::Pending)
    }
}

#[async_trait]
impl TwoSecretRotation for AdapterRotation {
    async fn create_secondary_secret(&self, request: &RotationRequest) -> Result<String> {
        let secret = &request.secret;
        let mut operation = self.build_operation(Action::Create, request);
        if !operation.parameters.contains_key("password") {
            operation
                .parameters
                .insert("password".into(), Value::String(generate_secret_value()));
        }

        let outcome = self.execute(&operation, secret).await?;
        if !outcome.success {
            return Err(Error::provider(
                secret.adapter_type.to_string(),
                "create",
                outcome
                    .error
                    .unwrap_or_else(|| "secondary creation failed".to_string()),
            ));
        }
        Ok(outcome
            .data
            .get("serial")
            .or_else(|| outcome.data.get("version"))
            .and_then(Value::as_str)
            .map_or_else(|| uuid::Uuid::new_v4().to_string(), str::to_string))
    }

    async fn promote_secondary_secret(
        &self,
        secret: &ManagedSecret,
        secondary_ref: &str,
    ) -> Result<()> {
        debug!(secret = %secret.name, secondary = secondary_ref, "Promoting secondary");
        let mut operation = Operation::new(Action::Rotate, &secret.target);
        operation
            .parameters
            .insert("promote".into(), Value::String(secondary_ref.to_string()));
        let outcome = self.execute(&operation, secret).await?;
        if outcome.success {
            Ok(())
        } else {
            Err(Error::provider(
                secret.adapter_type.to_string(),
                "rotate",
                outcome
                    .error
                    .unwrap_or_else(|| "promotion failed".to_string()),
            ))
        }
    }

    async fn deprecate_primary_secret(&self, secret: &ManagedSecret) -> Result<Option<String>> {
        let operation = Operation::new(Action::Revoke, &secret.target);
        let outcome = self.execute(&operation, secret).await?;
        if outcome.success {
            Ok(outcome
                .data
                .get("serial")
                .and_then(Value::as_str)
                .map(str::to_string))
        } else {
            Err(Error::provider(
                secret.adapter_type.to_string(),
                "revoke",
                outcome
                    .error
                    .unwrap_or_else(|| "deprecation failed".to_string()),
            ))
        }
    }
}

/// Build a [`ManagedSecret`] from a declared rotation service.
pub fn managed_secret_from_service(
    name: &str,
    service: &ServiceConfig,
) -> Result<ManagedSecret> {
    let adapter_type: AdapterType = service.adapter_type.parse()?;
    Ok(ManagedSecret {
        name: name.to_string(),
        secret_type: service.secret_type.clone(),
        adapter_type,
        target: name.to_string(),
        config: AdapterConfig::from_service(service),
        metadata: HashMap::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_values_are_long_and_distinct() {
        let a = generate_secret_value();
        let b = generate_secret_value();
        assert_eq!(a.len(), GENERATED_SECRET_LEN);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn managed_secret_from_service_parses_adapter_type() {
        let service = ServiceConfig {
            adapter_type: "certificate".into(),
            secret_type: "certificate".into(),
            connection: HashMap::new(),
            auth: HashMap::new(),
            service: serde_json::Value::Null,
            timeout_secs: None,
            retries: None,
            strategy: None,
        };
        let secret = managed_secret_from_service("web-cert", &service).unwrap();
        assert_eq!(secret.adapter_type, AdapterType::Certificate);
        assert_eq!(secret.target, "web-cert");

        let bad = ServiceConfig {
            adapter_type: "carrier-pigeon".into(),
            ..service
        };
        assert!(managed_secret_from_service("x", &bad).is_err());
    }
}
