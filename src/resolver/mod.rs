//! Variable resolution — the engine's resolve path.
//!
//! [`Resolver::plan`] inspects an environment without contacting providers.
//! [`Resolver::resolve`] runs the policy gate, fans out one task per variable
//! under a counting semaphore, applies transform pipelines, and aggregates
//! failures. [`Resolver::validate_provider`] health-checks a single provider
//! under its configured deadline.
//!
//! # Concurrency
//!
//! At most `max_in_flight` provider calls run at once (default 10), so an
//! environment with ten thousand variables cannot stampede a backend. Tasks
//! complete in any order; the result map's iteration order is unspecified.
//! Dropping the `resolve` future aborts all in-flight tasks.

pub mod timeout;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::config::{Config, SecretReference, Variable, VariableSource};
use crate::policy::PolicyEnforcer;
use crate::provider::{ProviderRegistry, Reference};
use crate::transform::Pipeline;
use crate::{Error, Result};

/// Default bound on in-flight provider calls during a single resolve.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 10;

// ============================================================================
// Results
// ============================================================================

/// A single variable after resolution.
#[derive(Debug)]
pub struct ResolvedVariable {
    /// Variable name.
    pub name: String,
    /// Resolved value; empty when the variable failed.
    pub value: String,
    /// Human-readable source tag (`"literal"` or `"<provider>:<key>[@v]"`).
    pub source: String,
    /// Whether a transform pipeline ran on the value.
    pub transformed: bool,
    /// Failure description, when resolution or transformation failed.
    pub error: Option<String>,
}

impl ResolvedVariable {
    /// Returns `true` when the variable carries a usable value.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// The outcome of resolving an environment.
///
/// Contains every variable that produced a value plus failed-optional
/// variables with their errors attached. Required failures abort the resolve
/// call instead and are carried by the returned error.
#[derive(Debug, Default)]
pub struct ResolvedEnvironment {
    /// Per-variable records, keyed by variable name.
    pub variables: HashMap<String, ResolvedVariable>,
}

impl ResolvedEnvironment {
    /// Flatten to a name → value map containing only successful entries.
    /// Failed-optional variables are dropped here; consult
    /// [`ResolvedEnvironment::variables`] for their errors.
    #[must_use]
    pub fn values(&self) -> HashMap<String, String> {
        self.variables
            .values()
            .filter(|v| v.is_ok())
            .map(|v| (v.name.clone(), v.value.clone()))
            .collect()
    }
}

/// One line of a pre-flight plan.
#[derive(Debug, Clone)]
pub struct PlanEntry {
    /// Variable name.
    pub name: String,
    /// Source label (`"literal"` or `"provider:<name> key:<key>"`).
    pub source: String,
    /// Transform pipeline, when declared.
    pub transform: Option<String>,
    /// Whether failure is tolerated.
    pub optional: bool,
}

/// Pre-flight listing of an environment. Never contacts providers.
#[derive(Debug, Default)]
pub struct PlanReport {
    /// Resolvable variables.
    pub variables: Vec<PlanEntry>,
    /// Configuration errors found during inspection.
    pub errors: Vec<String>,
}

// ============================================================================
// Resolver
// ============================================================================

/// The resolution engine.
pub struct Resolver {
    config: Arc<Config>,
    registry: Arc<ProviderRegistry>,
    policy: Arc<PolicyEnforcer>,
    max_in_flight: usize,
}

impl Resolver {
    /// Build a resolver over a configuration and a provider registry.
    #[must_use]
    pub fn new(config: Arc<Config>, registry: Arc<ProviderRegistry>) -> Self {
        let policy = Arc::new(PolicyEnforcer::new(config.policies.clone()));
        let max_in_flight = config
            .max_concurrent_resolves
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_IN_FLIGHT);
        Self {
            config,
            registry,
            policy,
            max_in_flight,
        }
    }

    /// Inspect an environment without contacting providers.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the environment does not exist.
    /// Per-variable problems land in [`PlanReport::errors`].
    pub fn plan(&self, env_name: &str) -> Result<PlanReport> {
        let env = self.config.environment(env_name)?;
        let mut report = PlanReport::default();

        for (name, variable) in env {
            match variable.source() {
                VariableSource::Literal(_) => report.variables.push(PlanEntry {
                    name: name.clone(),
                    source: "literal".to_string(),
                    transform: variable.transform().map(str::to_string),
                    optional: variable.optional(),
                }),
                VariableSource::Reference(SecretReference::Store { provider, key, .. }) => {
                    if self.registry.get(&provider).is_none() {
                        report
                            .errors
                            .push(format!("{name}: provider not found: {provider}"));
                    } else {
                        report.variables.push(PlanEntry {
                            name: name.clone(),
                            source: format!("provider:{provider} key:{key}"),
                            transform: variable.transform().map(str::to_string),
                            optional: variable.optional(),
                        });
                    }
                }
                VariableSource::Reference(SecretReference::Service { service }) => {
                    report.errors.push(format!(
                        "{name}: svc://{service} is a rotation target, not a retrievable secret"
                    ));
                }
                VariableSource::Invalid(reason) => {
                    report.errors.push(format!("{name}: {reason}"));
                }
            }
        }

        Ok(report)
    }

    /// Resolve every variable of an environment concurrently.
    ///
    /// # Errors
    ///
    /// Returns a configuration error from the policy gate (no provider is
    /// called), the verbatim failure when exactly one required variable
    /// fails, or an aggregated user error when several do.
    pub async fn resolve(&self, env_name: &str) -> Result<ResolvedEnvironment> {
        let env = self.config.environment(env_name)?.clone();

        // Policy gate: structural validity and provider-type rules, before
        // any provider is contacted.
        self.policy.validate_secret_count(env_name, env.len())?;
        for (name, variable) in &env {
            match variable.source() {
                VariableSource::Literal(_) => {}
                VariableSource::Reference(SecretReference::Store { provider, .. }) => {
                    if self.registry.get(&provider).is_none() {
                        return Err(Error::config(format!(
                            "{name}: provider not found: {provider}"
                        )));
                    }
                    let provider_config = self.config.provider(&provider)?;
                    self.policy
                        .validate_provider_type(env_name, &provider_config.provider_type)?;
                }
                VariableSource::Reference(SecretReference::Service { service }) => {
                    return Err(Error::config(format!(
                        "{name}: svc://{service} names a rotation target and cannot be resolved"
                    )));
                }
                VariableSource::Invalid(reason) => {
                    return Err(Error::config(format!("{name}: {reason}")));
                }
            }
        }

        // Fan-out: one task per variable, bounded by a counting semaphore.
        let semaphore = Arc::new(Semaphore::new(self.max_in_flight));
        let results: Arc<Mutex<HashMap<String, ResolvedVariable>>> =
            Arc::new(Mutex::new(HashMap::with_capacity(env.len())));
        let (failure_tx, mut failure_rx) = mpsc::channel::<(String, Error)>(env.len().max(1));

        let mut tasks = JoinSet::new();
        for (name, variable) in env {
            let semaphore = Arc::clone(&semaphore);
            let results = Arc::clone(&results);
            let failure_tx = failure_tx.clone();
            let config = Arc::clone(&self.config);
            let registry = Arc::clone(&self.registry);
            let policy = Arc::clone(&self.policy);

            tasks.spawn(async move {
                // Closed only if the whole resolve was dropped.
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };

                let optional = variable.optional();
                match resolve_one(&config, &registry, &policy, &name, &variable).await {
                    Ok(resolved) => {
                        results.lock().insert(name.clone(), resolved);
                    }
                    Err((source, err)) => {
                        if optional {
                            warn!(variable = %name, error = %err, "Optional variable failed");
                        }
                        results.lock().insert(
                            name.clone(),
                            ResolvedVariable {
                                name: name.clone(),
                                value: String::new(),
                                source,
                                transformed: false,
                                error: Some(err.render()),
                            },
                        );
                        if !optional {
                            // Capacity equals the variable count, so this
                            // never blocks; a dropped receiver means the
                            // caller went away.
                            let _ = failure_tx.send((name, err)).await;
                        }
                    }
                }
            });
        }
        drop(failure_tx);

        // Barrier: wait for every task, then drain the failure channel.
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                return Err(Error::Internal(format!("resolution task panicked: {e}")));
            }
        }
        let mut failures: Vec<(String, Error)> = Vec::new();
        while let Some(failure) = failure_rx.recv().await {
            failures.push(failure);
        }

        let variables = Arc::try_unwrap(results)
            .map_err(|_| Error::Internal("resolution results still shared".into()))?
            .into_inner();

        match failures.len() {
            0 => Ok(ResolvedEnvironment { variables }),
            1 => Err(failures.remove(0).1),
            n => {
                failures.sort_by(|a, b| a.0.cmp(&b.0));
                let details = failures
                    .iter()
                    .map(|(name, err)| format!("{name}: {err}"))
                    .collect();
                Err(Error::user(format!("Failed to resolve {n} variables"))
                    .with_details(details)
                    .with_suggestion(
                        "Run 'secretops validate' to check provider connectivity",
                    ))
            }
        }
    }

    /// Health-check a single provider under its configured deadline.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unknown providers, the provider's
    /// own validation failure, or an enriched timeout error.
    pub async fn validate_provider(&self, name: &str) -> Result<()> {
        let provider = self.registry.require(name)?;
        let provider_config = self.config.provider(name)?;
        let timeout_ms = provider_config.effective_timeout_ms();
        let deadline = timeout::provider_deadline(None, timeout_ms);

        match tokio::time::timeout(deadline, provider.validate()).await {
            Ok(result) => result,
            Err(_) => Err(timeout::timeout_error(
                name,
                &provider_config.provider_type,
                timeout_ms,
            )),
        }
    }
}

/// Resolve a single variable: fetch (or take the literal), transform, then
/// run value policy. Errors carry the source tag so failed records stay
/// attributable.
async fn resolve_one(
    config: &Config,
    registry: &ProviderRegistry,
    policy: &PolicyEnforcer,
    name: &str,
    variable: &Variable,
) -> std::result::Result<ResolvedVariable, (String, Error)> {
    let (raw_value, source) = match variable.source() {
        VariableSource::Literal(value) => (value, "literal".to_string()),
        VariableSource::Reference(ref secret_ref) => {
            let reference = Reference::from_secret_reference(secret_ref)
                .map_err(|e| ("invalid".to_string(), e))?;
            let source = reference.source_tag();
            debug!(variable = name, source = %source, "Fetching secret");

            let provider = registry
                .require(&reference.provider)
                .map_err(|e| (source.clone(), e))?;
            let provider_config = config
                .provider(&reference.provider)
                .map_err(|e| (source.clone(), e))?;
            let timeout_ms = provider_config.effective_timeout_ms();
            let deadline = timeout::provider_deadline(None, timeout_ms);

            let secret = match tokio::time::timeout(deadline, provider.resolve(&reference)).await
            {
                Ok(Ok(secret)) => secret,
                Ok(Err(e)) => return Err((source, e)),
                Err(_) => {
                    return Err((
                        source,
                        timeout::timeout_error(
                            &reference.provider,
                            &provider_config.provider_type,
                            timeout_ms,
                        ),
                    ));
                }
            };
            (secret.value, source)
        }
        VariableSource::Invalid(reason) => {
            return Err(("invalid".to_string(), Error::config(reason)));
        }
    };

    let (value, transformed) = match variable.transform() {
        Some(pipeline) if !pipeline.trim().is_empty() => {
            debug!(variable = name, transform = pipeline, "Applying transform");
            let pipeline = Pipeline::parse(pipeline).map_err(|e| (source.clone(), e))?;
            let value = pipeline.apply(&raw_value).map_err(|e| (source.clone(), e))?;
            (value, true)
        }
        _ => (raw_value, false),
    };

    policy
        .validate_secret_value(name, &value)
        .map_err(|e| (source.clone(), e))?;

    Ok(ResolvedVariable {
        name: name.to_string(),
        value,
        source,
        transformed,
        error: None,
    })
}
