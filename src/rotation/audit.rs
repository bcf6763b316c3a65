//! Rotation audit trail.
//!
//! Every rotation produces an append-only list of structured entries. The
//! engine contributes at least one entry per rotation and never mutates
//! entries supplied by strategies. Entries are also emitted through
//! `tracing` so any log aggregator can reconstruct the trail.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Outcome of a single audited step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    /// The step completed.
    Success,
    /// The step failed.
    Failure,
    /// Informational entry (dispatch decisions, skipped steps).
    Info,
}

/// One structured event in a rotation's audit trail.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    /// When the step happened.
    pub timestamp: DateTime<Utc>,
    /// Step name (`create_secondary`, `verify`, `dispatch`, ...).
    pub action: String,
    /// Component that performed the step (engine or strategy name).
    pub component: String,
    /// Step outcome.
    pub status: AuditStatus,
    /// Human-readable description.
    pub message: String,
    /// Optional structured detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl AuditEntry {
    /// Construct an entry and emit it to the log.
    #[must_use]
    pub fn new(
        action: impl Into<String>,
        component: impl Into<String>,
        status: AuditStatus,
        message: impl Into<String>,
    ) -> Self {
        let entry = Self {
            timestamp: Utc::now(),
            action: action.into(),
            component: component.into(),
            status,
            message: message.into(),
            details: None,
        };
        tracing::info!(
            action = %entry.action,
            component = %entry.component,
            status = ?entry.status,
            message = %entry.message,
            "rotation.audit"
        );
        entry
    }

    /// Successful step.
    #[must_use]
    pub fn success(
        action: impl Into<String>,
        component: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(action, component, AuditStatus::Success, message)
    }

    /// Failed step.
    #[must_use]
    pub fn failure(
        action: impl Into<String>,
        component: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(action, component, AuditStatus::Failure, message)
    }

    /// Informational entry.
    #[must_use]
    pub fn info(
        action: impl Into<String>,
        component: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(action, component, AuditStatus::Info, message)
    }

    /// Attach structured detail.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}
