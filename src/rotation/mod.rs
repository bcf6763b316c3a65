//! Rotation engine — credential lifecycle orchestration.
//!
//! The engine holds a registry of named [`RotationStrategy`] implementations,
//! picks one per request (explicitly by name, or by secret type), runs it,
//! and stamps its own audit entry onto every result. Two-secret overlap
//! rotations are driven step by step with rollback on any failure. History
//! and scheduling are delegated to external collaborators behind traits.

pub mod audit;
pub mod health;
pub mod strategy;

pub use audit::{AuditEntry, AuditStatus};
pub use health::{HealthHandle, HealthMonitor};
pub use strategy::{AdapterRotation, RotationStrategy, TwoSecretRotation};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::debug;

use crate::adapter::{AdapterConfig, AdapterType};
use crate::{Error, Result};

// ============================================================================
// Data model
// ============================================================================

/// A secret under rotation management.
#[derive(Debug, Clone)]
pub struct ManagedSecret {
    /// Logical name (usually the service name).
    pub name: String,
    /// Secret type tag used for strategy auto-selection.
    pub secret_type: String,
    /// Adapter family that owns the backend.
    pub adapter_type: AdapterType,
    /// Operation target handed to the adapter.
    pub target: String,
    /// Adapter configuration.
    pub config: AdapterConfig,
    /// Free-form metadata.
    pub metadata: HashMap<String, String>,
}

/// A rotation request.
#[derive(Debug, Clone)]
pub struct RotationRequest {
    /// The secret to rotate.
    pub secret: ManagedSecret,
    /// Explicit strategy name; auto-selected by secret type when `None`.
    pub strategy: Option<String>,
    /// Parameters forwarded into adapter templates.
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

impl RotationRequest {
    /// Request with auto-selected strategy and no parameters.
    #[must_use]
    pub fn new(secret: ManagedSecret) -> Self {
        Self {
            secret,
            strategy: None,
            parameters: serde_json::Map::new(),
        }
    }
}

/// Rotation lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationStatus {
    /// Not yet started.
    Pending,
    /// A strategy is working on it.
    InProgress,
    /// The new credential is live and verified.
    Completed,
    /// The rotation failed; see the audit trail.
    Failed,
    /// A failure triggered rollback.
    RolledBack,
}

/// Outcome of one rotation.
#[derive(Debug, Clone, Serialize)]
pub struct RotationResult {
    /// Final state.
    pub status: RotationStatus,
    /// Reference to the new credential, when one was created.
    pub new_secret_ref: Option<String>,
    /// Reference to the retired credential, when known.
    pub old_secret_ref: Option<String>,
    /// Completion time for successful rotations.
    pub rotated_at: Option<DateTime<Utc>>,
    /// Append-only structured trail.
    pub audit_trail: Vec<AuditEntry>,
}

impl RotationResult {
    /// Successful result carrying the new reference and a trail.
    #[must_use]
    pub fn completed(new_secret_ref: String, audit_trail: Vec<AuditEntry>) -> Self {
        Self {
            status: RotationStatus::Completed,
            new_secret_ref: Some(new_secret_ref),
            old_secret_ref: None,
            rotated_at: Some(Utc::now()),
            audit_trail,
        }
    }

    /// Failed result with a trail.
    #[must_use]
    pub fn failed(audit_trail: Vec<AuditEntry>) -> Self {
        Self {
            status: RotationStatus::Failed,
            new_secret_ref: None,
            old_secret_ref: None,
            rotated_at: None,
            audit_trail,
        }
    }

    /// Failed result from a single entry.
    #[must_use]
    pub fn failed_with(entry: AuditEntry) -> Self {
        Self::failed(vec![entry])
    }
}

// ============================================================================
// Collaborator traits
// ============================================================================

/// One line of persisted rotation history.
#[derive(Debug, Clone, Serialize)]
pub struct RotationRecord {
    /// Record id.
    pub id: uuid::Uuid,
    /// Secret name.
    pub secret: String,
    /// Final status of that rotation.
    pub status: RotationStatus,
    /// When the record was written.
    pub recorded_at: DateTime<Utc>,
    /// New credential reference, when one was created.
    pub new_secret_ref: Option<String>,
}

/// Append-only rotation history storage.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append a record.
    ///
    /// # Errors
    ///
    /// Returns an error when the store is unavailable.
    async fn append(&self, record: RotationRecord) -> Result<()>;

    /// Records for one secret, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error when the store is unavailable.
    async fn history(&self, secret: &str) -> Result<Vec<RotationRecord>>;
}

/// External rotation scheduler.
#[async_trait]
pub trait RotationScheduler: Send + Sync {
    /// Register a recurring rotation.
    ///
    /// # Errors
    ///
    /// Returns an error when the schedule cannot be registered.
    async fn schedule(&self, secret: &str, every: Duration) -> Result<()>;
}

/// In-memory [`HistoryStore`] for tests and single-run usage.
#[derive(Default)]
pub struct MemoryHistoryStore {
    records: Mutex<Vec<RotationRecord>>,
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn append(&self, record: RotationRecord) -> Result<()> {
        self.records.lock().push(record);
        Ok(())
    }

    async fn history(&self, secret: &str) -> Result<Vec<RotationRecord>> {
        Ok(self
            .records
            .lock()
            .iter()
            .filter(|r| r.secret == secret)
            .cloned()
            .collect())
    }
}

// ============================================================================
// Engine
// ============================================================================

/// The rotation engine.
pub struct RotationEngine {
    strategies: RwLock<HashMap<String, Arc<dyn RotationStrategy>>>,
    history: Option<Arc<dyn HistoryStore>>,
    scheduler: Option<Arc<dyn RotationScheduler>>,
}

impl RotationEngine {
    /// Engine with no strategies registered.
    #[must_use]
    pub fn new() -> Self {
        Self {
            strategies: RwLock::new(HashMap::new()),
            history: None,
            scheduler: None,
        }
    }

    /// Attach a history store.
    #[must_use]
    pub fn with_history(mut self, history: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    /// Attach a scheduler.
    #[must_use]
    pub fn with_scheduler(mut self, scheduler: Arc<dyn RotationScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Register a strategy under its name.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the name is already taken.
    pub fn register_strategy(&self, strategy: Arc<dyn RotationStrategy>) -> Result<()> {
        let mut strategies = self.strategies.write();
        let name = strategy.name().to_string();
        if strategies.contains_key(&name) {
            return Err(Error::config(format!(
                "rotation strategy '{name}' is already registered"
            )));
        }
        strategies.insert(name, strategy);
        Ok(())
    }

    /// Names of registered strategies, sorted. Returned by value.
    #[must_use]
    pub fn strategy_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.strategies.read().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// First strategy (by name, ascending, for determinism) that supports
    /// the secret.
    ///
    /// # Errors
    ///
    /// Returns a user error containing "no suitable" when nothing matches.
    pub fn auto_select_strategy(&self, secret: &ManagedSecret) -> Result<Arc<dyn RotationStrategy>> {
        let strategies = self.strategies.read();
        let mut entries: Vec<(&String, &Arc<dyn RotationStrategy>)> = strategies.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        for (_, candidate) in entries {
            if candidate.supports_secret(secret) {
                return Ok(Arc::clone(candidate));
            }
        }
        Err(Error::user(format!(
            "no suitable rotation strategy for secret type '{}'",
            secret.secret_type
        ))
        .with_suggestion("Register a strategy that supports this secret type"))
    }

    fn select(&self, request: &RotationRequest) -> Result<Arc<dyn RotationStrategy>> {
        match &request.strategy {
            Some(name) => self.strategies.read().get(name).map(Arc::clone).ok_or_else(|| {
                Error::config(format!("rotation strategy not found: {name}"))
            }),
            None => self.auto_select_strategy(&request.secret),
        }
    }

    /// Rotate one secret. The engine prepends its dispatch entry to the
    /// strategy's audit trail and returns the result otherwise untouched.
    ///
    /// # Errors
    ///
    /// Returns strategy-selection errors and protocol-level strategy errors.
    pub async fn rotate(&self, request: &RotationRequest) -> Result<RotationResult> {
        let strategy = self.select(request)?;
        debug!(secret = %request.secret.name, strategy = strategy.name(), "Dispatching rotation");

        let dispatch = AuditEntry::info(
            "dispatch",
            "engine",
            format!(
                "strategy '{}' selected for secret '{}'",
                strategy.name(),
                request.secret.name
            ),
        );

        let mut result = strategy.rotate(request).await?;
        result.audit_trail.insert(0, dispatch);
        self.record(&request.secret.name, &result).await;
        Ok(result)
    }

    /// Drive a two-secret overlap rotation: create secondary, verify it,
    /// promote it, deprecate the primary. Any step failure triggers the
    /// strategy's rollback and yields a failed result whose trail preserves
    /// the reason.
    ///
    /// # Errors
    ///
    /// Returns `Err` only when rollback itself fails after a step failure.
    pub async fn rotate_two_secret(
        &self,
        strategy: &Arc<dyn TwoSecretRotation>,
        request: &RotationRequest,
    ) -> Result<RotationResult> {
        let secret = &request.secret;
        let mut trail = vec![AuditEntry::info(
            "dispatch",
            "engine",
            format!(
                "two-secret rotation of '{}' via strategy '{}'",
                secret.name,
                strategy.name()
            ),
        )];

        macro_rules! step {
            ($action:literal, $future:expr) => {
                match $future.await {
                    Ok(value) => {
                        trail.push(AuditEntry::success($action, strategy.name(), concat!($action, " succeeded")));
                        value
                    }
                    Err(e) => {
                        trail.push(AuditEntry::failure($action, strategy.name(), e.to_string()));
                        strategy.rollback(secret, &e.to_string()).await?;
                        trail.push(AuditEntry::info(
                            "rollback",
                            strategy.name(),
                            "rollback completed",
                        ));
                        let result = RotationResult::failed(trail);
                        self.record(&secret.name, &result).await;
                        return Ok(result);
                    }
                }
            };
        }

        let secondary = step!("create_secondary", strategy.create_secondary_secret(request));
        step!("verify", strategy.verify(secret, Some(&secondary)));
        step!(
            "promote",
            strategy.promote_secondary_secret(secret, &secondary)
        );
        let old_ref = step!("deprecate_primary", strategy.deprecate_primary_secret(secret));

        trail.push(AuditEntry::success(
            "complete",
            "engine",
            format!("two-secret rotation of '{}' completed", secret.name),
        ));
        let mut result = RotationResult::completed(secondary, trail);
        result.old_secret_ref = old_ref;
        self.record(&secret.name, &result).await;
        Ok(result)
    }

    /// Rotate a batch, preserving request order. Failures become failed
    /// results; the batch never aborts.
    pub async fn batch_rotate(&self, requests: &[RotationRequest]) -> Vec<RotationResult> {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            match self.rotate(request).await {
                Ok(result) => results.push(result),
                Err(e) => results.push(RotationResult::failed_with(AuditEntry::failure(
                    "rotate",
                    "engine",
                    e.to_string(),
                ))),
            }
        }
        results
    }

    /// Persisted history for a secret, oldest first.
    ///
    /// # Errors
    ///
    /// Returns the store's error; an engine without a store returns empty.
    pub async fn rotation_history(&self, secret: &str) -> Result<Vec<RotationRecord>> {
        match &self.history {
            Some(store) => store.history(secret).await,
            None => Ok(Vec::new()),
        }
    }

    /// Register a recurring rotation with the external scheduler.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when no scheduler is attached.
    pub async fn schedule_rotation(&self, secret: &str, every: Duration) -> Result<()> {
        match &self.scheduler {
            Some(scheduler) => scheduler.schedule(secret, every).await,
            None => Err(Error::config(
                "no rotation scheduler is configured".to_string(),
            )),
        }
    }

    async fn record(&self, secret: &str, result: &RotationResult) {
        if let Some(store) = &self.history {
            let record = RotationRecord {
                id: uuid::Uuid::new_v4(),
                secret: secret.to_string(),
                status: result.status,
                recorded_at: Utc::now(),
                new_secret_ref: result.new_secret_ref.clone(),
            };
            if let Err(e) = store.append(record).await {
                tracing::warn!(secret, error = %e, "Failed to append rotation history");
            }
        }
    }
}

impl Default for RotationEngine {
    fn default() -> Self {
        Self::new()
    }
}
