//! Configuration management.
//!
//! The configuration document declares secret providers, environments of
//! variables, rotation services, and an optional policy block:
//!
//! ```yaml
//! version: "1"
//! providers:
//!   corp-vault:
//!     type: vault
//!     timeout_ms: 5000
//! envs:
//!   production:
//!     DB_PASSWORD: store://corp-vault/db/password
//!     API_KEY:
//!       from: { provider: corp-vault, key: api/key, version: "3" }
//!       transform: "json_extract:.value | trim"
//!       optional: true
//! services:
//!   billing-db:
//!     type: sql
//!     secret_type: database_password
//! policies:
//!   denied_provider_types: [literal]
//! ```
//!
//! Variables accept either a bare string (a `store://` / `svc://` reference,
//! or anything else as a literal) or the structured form above.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

// ============================================================================
// Secret references
// ============================================================================

/// A parsed secret reference.
///
/// `store://<provider>/<key>[@<version>]` addresses a retrievable secret;
/// `svc://<service>` names a rotation target and is rejected by the resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SecretReference {
    /// A store reference: provider, key, optional version.
    Store {
        /// Provider name as declared under `providers`.
        provider: String,
        /// Backend-specific key or path.
        key: String,
        /// Optional version pin.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
    },
    /// A rotation-service reference.
    Service {
        /// Service name as declared under `services`.
        service: String,
    },
}

impl SecretReference {
    /// Parse a `store://` or `svc://` URI.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unknown schemes or malformed
    /// references (missing provider, empty key, empty version).
    pub fn parse(raw: &str) -> Result<Self> {
        if let Some(rest) = raw.strip_prefix("store://") {
            let (path, version) = match rest.rsplit_once('@') {
                Some((path, v)) if !v.is_empty() => (path, Some(v.to_string())),
                Some((_, _)) => {
                    return Err(Error::config(format!("empty version in reference '{raw}'")));
                }
                None => (rest, None),
            };
            let (provider, key) = path
                .split_once('/')
                .ok_or_else(|| Error::config(format!("reference '{raw}' is missing a key")))?;
            if provider.is_empty() || key.is_empty() {
                return Err(Error::config(format!("malformed store reference '{raw}'")));
            }
            return Ok(Self::Store {
                provider: provider.to_string(),
                key: key.to_string(),
                version,
            });
        }
        if let Some(service) = raw.strip_prefix("svc://") {
            if service.is_empty() {
                return Err(Error::config(format!("malformed service reference '{raw}'")));
            }
            return Ok(Self::Service {
                service: service.to_string(),
            });
        }
        Err(Error::config(format!(
            "unknown reference scheme in '{raw}' (expected store:// or svc://)"
        )))
    }

    /// Returns `true` when the string uses one of the reference schemes.
    #[must_use]
    pub fn is_reference(raw: &str) -> bool {
        raw.starts_with("store://") || raw.starts_with("svc://")
    }
}

impl fmt::Display for SecretReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store {
                provider,
                key,
                version: Some(v),
            } => write!(f, "store://{provider}/{key}@{v}"),
            Self::Store {
                provider,
                key,
                version: None,
            } => write!(f, "store://{provider}/{key}"),
            Self::Service { service } => write!(f, "svc://{service}"),
        }
    }
}

// ============================================================================
// Variables
// ============================================================================

/// The declared source of a single environment variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Variable {
    /// Shorthand: a bare string. `store://` / `svc://` strings parse as
    /// references; anything else is a literal value.
    Bare(String),
    /// Structured form with transform pipeline and optional flag.
    Detailed {
        /// Literal value (mutually exclusive with `from`).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        literal: Option<String>,
        /// Secret reference (mutually exclusive with `literal`).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<SecretReference>,
        /// Transform pipeline applied to the fetched value.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transform: Option<String>,
        /// When `true`, a resolution failure is recorded but does not fail
        /// the environment.
        #[serde(default)]
        optional: bool,
    },
}

/// Normalized view of a variable's source.
#[derive(Debug, Clone, PartialEq)]
pub enum VariableSource {
    /// Inline literal value.
    Literal(String),
    /// Reference into a provider or service.
    Reference(SecretReference),
    /// Neither literal nor reference (or both) — a configuration error.
    Invalid(String),
}

impl Variable {
    /// Classify this variable's source.
    #[must_use]
    pub fn source(&self) -> VariableSource {
        match self {
            Self::Bare(raw) => {
                if SecretReference::is_reference(raw) {
                    match SecretReference::parse(raw) {
                        Ok(r) => VariableSource::Reference(r),
                        Err(e) => VariableSource::Invalid(e.to_string()),
                    }
                } else {
                    VariableSource::Literal(raw.clone())
                }
            }
            Self::Detailed { literal, from, .. } => match (literal, from) {
                (Some(_), Some(_)) => VariableSource::Invalid(
                    "variable declares both 'literal' and 'from'".to_string(),
                ),
                (Some(v), None) => VariableSource::Literal(v.clone()),
                (None, Some(r)) => VariableSource::Reference(r.clone()),
                (None, None) => VariableSource::Invalid(
                    "variable declares neither 'literal' nor 'from'".to_string(),
                ),
            },
        }
    }

    /// The transform pipeline, if any.
    #[must_use]
    pub fn transform(&self) -> Option<&str> {
        match self {
            Self::Bare(_) => None,
            Self::Detailed { transform, .. } => transform.as_deref(),
        }
    }

    /// Whether a failure on this variable is tolerated.
    #[must_use]
    pub fn optional(&self) -> bool {
        match self {
            Self::Bare(_) => false,
            Self::Detailed { optional, .. } => *optional,
        }
    }
}

/// An environment: ordered mapping from variable name to variable.
pub type Environment = BTreeMap<String, Variable>;

// ============================================================================
// Providers
// ============================================================================

/// Declaration of a secret provider instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider type tag (`vault`, `aws_secrets_manager`, `env`, `memory`, ...).
    #[serde(rename = "type")]
    pub provider_type: String,
    /// Per-call timeout in milliseconds. Defaults by provider type.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Type-specific fields (address, region, inline values, ...).
    #[serde(flatten)]
    pub options: BTreeMap<String, serde_yaml::Value>,
}

impl ProviderConfig {
    /// Effective timeout for this provider, falling back to the per-type
    /// default when `timeout_ms` is unset.
    #[must_use]
    pub fn effective_timeout_ms(&self) -> u64 {
        self.timeout_ms
            .unwrap_or_else(|| default_timeout_ms(&self.provider_type))
    }

    /// Fetch a string option by key.
    #[must_use]
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(serde_yaml::Value::as_str)
    }
}

/// Default provider timeout by type. CLI-backed vaults (bitwarden, 1password)
/// spawn subprocesses and get a larger budget than SDK-backed clouds.
#[must_use]
pub fn default_timeout_ms(provider_type: &str) -> u64 {
    let t = provider_type.to_ascii_lowercase();
    if t.starts_with("bitwarden") || t.starts_with("1password") {
        10_000
    } else if t.starts_with("aws") || t.starts_with("gcp") || t.starts_with("azure") {
        5_000
    } else if t.starts_with("vault") {
        5_000
    } else {
        3_000
    }
}

// ============================================================================
// Rotation services
// ============================================================================

/// Declaration of a rotation target behind a protocol adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Adapter family (`sql`, `http_api`, `nosql`, `certificate`).
    #[serde(rename = "type")]
    pub adapter_type: String,
    /// Secret type used for rotation strategy auto-selection
    /// (`database_password`, `api_key`, `certificate`, ...).
    pub secret_type: String,
    /// Connection parameters handed to the adapter.
    #[serde(default)]
    pub connection: HashMap<String, String>,
    /// Authentication parameters handed to the adapter.
    #[serde(default)]
    pub auth: HashMap<String, String>,
    /// Adapter-specific command/endpoint templates.
    #[serde(default)]
    pub service: serde_json::Value,
    /// Per-operation timeout in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Retry attempts for retriable adapter operations.
    #[serde(default)]
    pub retries: Option<u32>,
    /// Preferred rotation strategy name; auto-selected when unset.
    #[serde(default)]
    pub strategy: Option<String>,
}

// ============================================================================
// Policies
// ============================================================================

/// Organization-wide policy ruleset. Empty lists mean "no restriction";
/// deny always beats allow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Provider types allowed everywhere (empty = all).
    pub allowed_provider_types: Vec<String>,
    /// Provider types denied everywhere.
    pub denied_provider_types: Vec<String>,
    /// Per-environment overrides.
    pub environments: HashMap<String, EnvPolicy>,
    /// Output-path rules applied when rendering to files.
    pub output: OutputPolicy,
    /// Secret value complexity requirements.
    pub complexity: ComplexityPolicy,
    /// Regex patterns that must not match any resolved value.
    pub forbidden_patterns: Vec<String>,
    /// Regex patterns that must match every resolved value.
    pub required_patterns: Vec<String>,
}

/// Per-environment policy restrictions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvPolicy {
    /// Provider types allowed in this environment (empty = all).
    pub allowed_provider_types: Vec<String>,
    /// Provider types denied in this environment.
    pub denied_provider_types: Vec<String>,
    /// Maximum number of variables in this environment (0 = unlimited).
    pub max_secrets: usize,
}

/// Output-path allow/deny rules (regex, matched against the rendered path).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputPolicy {
    /// Paths allowed (empty = all).
    pub allowed_paths: Vec<String>,
    /// Paths denied.
    pub denied_paths: Vec<String>,
}

/// Secret value complexity requirements. Zero/false fields are not enforced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplexityPolicy {
    /// Minimum value length.
    pub min_length: usize,
    /// Maximum value length (0 = unlimited).
    pub max_length: usize,
    /// Require at least one ASCII uppercase character.
    pub require_uppercase: bool,
    /// Require at least one ASCII lowercase character.
    pub require_lowercase: bool,
    /// Require at least one ASCII digit.
    pub require_digit: bool,
    /// Require at least one non-alphanumeric character.
    pub require_symbol: bool,
}

// ============================================================================
// Top-level config
// ============================================================================

/// Main configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Config schema version.
    pub version: String,
    /// Environment files loaded into the process environment before
    /// resolution. Missing files are skipped.
    pub env_files: Vec<String>,
    /// Secret provider declarations. `secret_stores` is accepted as an alias.
    #[serde(alias = "secret_stores")]
    pub providers: HashMap<String, ProviderConfig>,
    /// Environments of variables.
    pub envs: HashMap<String, Environment>,
    /// Rotation service declarations.
    pub services: HashMap<String, ServiceConfig>,
    /// Policy block.
    pub policies: PolicyConfig,
    /// Maximum provider calls in flight during a single resolve.
    pub max_concurrent_resolves: Option<usize>,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("SECRETOPS_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::config(e.to_string()))?;

        config.load_env_files();

        Ok(config)
    }

    /// Look up an environment by name.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the known environments when the
    /// requested one does not exist.
    pub fn environment(&self, name: &str) -> Result<&Environment> {
        self.envs.get(name).ok_or_else(|| {
            let mut known: Vec<&str> = self.envs.keys().map(String::as_str).collect();
            known.sort_unstable();
            Error::config(format!(
                "environment '{name}' not found (known: {})",
                known.join(", ")
            ))
        })
    }

    /// Look up a provider declaration by name.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the provider is not declared.
    pub fn provider(&self, name: &str) -> Result<&ProviderConfig> {
        self.providers
            .get(name)
            .ok_or_else(|| Error::config(format!("provider not found: {name}")))
    }

    /// Look up a rotation service declaration by name.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the service is not declared.
    pub fn service(&self, name: &str) -> Result<&ServiceConfig> {
        self.services
            .get(name)
            .ok_or_else(|| Error::config(format!("service not found: {name}")))
    }

    /// Load declared env files into the process environment.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let path = Path::new(path_str);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {path_str}"),
                    Err(e) => tracing::warn!("Failed to load env file {path_str}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {path_str}");
            }
        }
    }
}
