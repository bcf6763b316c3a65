//! Rotation health monitoring.
//!
//! Periodically verifies a rotated credential through its strategy. After a
//! configurable number of consecutive failures the monitor invokes the
//! strategy's rollback, records the event, and keeps watching. Cancellation
//! comes from a `CancellationToken`, so an embedding application can stop
//! all monitors on shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::strategy::RotationStrategy;
use super::ManagedSecret;

/// Default number of consecutive failures before rollback.
const DEFAULT_FAILURE_THRESHOLD: u64 = 3;

/// Shared view of a monitor's state.
#[derive(Clone, Default)]
pub struct HealthHandle {
    healthy: Arc<AtomicBool>,
    consecutive_failures: Arc<AtomicU64>,
    checks: Arc<AtomicU64>,
    rollbacks: Arc<AtomicU64>,
}

impl HealthHandle {
    fn new() -> Self {
        let handle = Self::default();
        handle.healthy.store(true, Ordering::Relaxed);
        handle
    }

    /// Whether the last check succeeded.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// Consecutive failures so far.
    #[must_use]
    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Total checks performed.
    #[must_use]
    pub fn checks(&self) -> u64 {
        self.checks.load(Ordering::Relaxed)
    }

    /// Rollbacks triggered by this monitor.
    #[must_use]
    pub fn rollbacks(&self) -> u64 {
        self.rollbacks.load(Ordering::Relaxed)
    }
}

/// Periodic liveness checker for one managed secret.
pub struct HealthMonitor {
    strategy: Arc<dyn RotationStrategy>,
    secret: ManagedSecret,
    interval: Duration,
    failure_threshold: u64,
}

impl HealthMonitor {
    /// Build a monitor checking every `interval`.
    #[must_use]
    pub fn new(
        strategy: Arc<dyn RotationStrategy>,
        secret: ManagedSecret,
        interval: Duration,
    ) -> Self {
        Self {
            strategy,
            secret,
            interval,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
        }
    }

    /// Override the consecutive-failure threshold (minimum 1).
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u64) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Run one verification cycle against the handle. Returns `true` when a
    /// rollback was triggered.
    async fn check_once(&self, handle: &HealthHandle) -> bool {
        handle.checks.fetch_add(1, Ordering::Relaxed);

        match self.strategy.verify(&self.secret, None).await {
            Ok(()) => {
                if !handle.healthy.load(Ordering::Relaxed) {
                    info!(secret = %self.secret.name, "Secret recovered");
                }
                handle.healthy.store(true, Ordering::Relaxed);
                handle.consecutive_failures.store(0, Ordering::Relaxed);
                false
            }
            Err(e) => {
                let failures = handle.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    secret = %self.secret.name,
                    consecutive_failures = failures,
                    error = %e,
                    "Secret verification failed"
                );
                if failures >= self.failure_threshold {
                    handle.healthy.store(false, Ordering::Relaxed);
                    handle.consecutive_failures.store(0, Ordering::Relaxed);
                    handle.rollbacks.fetch_add(1, Ordering::Relaxed);
                    if let Err(rollback_err) =
                        self.strategy.rollback(&self.secret, &e.to_string()).await
                    {
                        warn!(
                            secret = %self.secret.name,
                            error = %rollback_err,
                            "Rollback failed"
                        );
                    }
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Spawn the monitoring loop. Returns the handle for observation; the
    /// loop ends when the token is cancelled.
    pub fn spawn(self, token: CancellationToken) -> HealthHandle {
        let handle = HealthHandle::new();
        let observer = handle.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so a freshly rotated
            // secret gets a full interval before its first check.
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = token.cancelled() => {
                        debug!(secret = %self.secret.name, "Health monitor stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        self.check_once(&handle).await;
                    }
                }
            }
        });

        observer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterConfig, AdapterType};
    use crate::rotation::{RotationRequest, RotationResult, RotationStatus};
    use crate::{Error, Result};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicBool;

    struct FlakyStrategy {
        fail: AtomicBool,
        rollbacks: AtomicU64,
    }

    #[async_trait]
    impl RotationStrategy for FlakyStrategy {
        fn name(&self) -> &str {
            "flaky"
        }

        fn supports_secret(&self, _secret: &ManagedSecret) -> bool {
            true
        }

        async fn rotate(&self, _request: &RotationRequest) -> Result<RotationResult> {
            Ok(RotationResult::failed(vec![]))
        }

        async fn verify(&self, _secret: &ManagedSecret, _new_ref: Option<&str>) -> Result<()> {
            if self.fail.load(Ordering::Relaxed) {
                Err(Error::user("down"))
            } else {
                Ok(())
            }
        }

        async fn rollback(&self, _secret: &ManagedSecret, _reason: &str) -> Result<()> {
            self.rollbacks.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        fn status(&self, _secret_name: &str) -> RotationStatus {
            RotationStatus::Pending
        }
    }

    fn secret() -> ManagedSecret {
        ManagedSecret {
            name: "db".into(),
            secret_type: "database_password".into(),
            adapter_type: AdapterType::Sql,
            target: "app_user".into(),
            config: AdapterConfig::default(),
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn healthy_checks_reset_failure_count() {
        let strategy = Arc::new(FlakyStrategy {
            fail: AtomicBool::new(false),
            rollbacks: AtomicU64::new(0),
        });
        let monitor = HealthMonitor::new(
            Arc::clone(&strategy) as Arc<dyn RotationStrategy>,
            secret(),
            Duration::from_secs(60),
        );
        let handle = HealthHandle::new();

        assert!(!monitor.check_once(&handle).await);
        assert!(handle.is_healthy());
        assert_eq!(handle.checks(), 1);
        assert_eq!(handle.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn threshold_triggers_rollback() {
        let strategy = Arc::new(FlakyStrategy {
            fail: AtomicBool::new(true),
            rollbacks: AtomicU64::new(0),
        });
        let monitor = HealthMonitor::new(
            Arc::clone(&strategy) as Arc<dyn RotationStrategy>,
            secret(),
            Duration::from_secs(60),
        )
        .with_failure_threshold(3);
        let handle = HealthHandle::new();

        assert!(!monitor.check_once(&handle).await);
        assert!(!monitor.check_once(&handle).await);
        assert!(monitor.check_once(&handle).await);

        assert!(!handle.is_healthy());
        assert_eq!(handle.rollbacks(), 1);
        assert_eq!(strategy.rollbacks.load(Ordering::Relaxed), 1);

        // Recovery flips the handle back.
        strategy.fail.store(false, Ordering::Relaxed);
        assert!(!monitor.check_once(&handle).await);
        assert!(handle.is_healthy());
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_monitor_checks_periodically_and_cancels() {
        let strategy = Arc::new(FlakyStrategy {
            fail: AtomicBool::new(false),
            rollbacks: AtomicU64::new(0),
        });
        let monitor = HealthMonitor::new(
            Arc::clone(&strategy) as Arc<dyn RotationStrategy>,
            secret(),
            Duration::from_secs(30),
        );
        let token = CancellationToken::new();
        let handle = monitor.spawn(token.clone());

        tokio::time::sleep(Duration::from_secs(95)).await;
        tokio::task::yield_now().await;
        assert!(handle.checks() >= 3);

        token.cancel();
        let after_cancel = handle.checks();
        tokio::time::sleep(Duration::from_secs(120)).await;
        tokio::task::yield_now().await;
        assert_eq!(handle.checks(), after_cancel);
    }
}
