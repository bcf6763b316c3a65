//! Policy enforcement.
//!
//! Validates provider usage, output paths, and secret values against the
//! configured [`PolicyConfig`] before any provider is contacted. Evaluation
//! order follows the ruleset: global deny, global allow, per-environment
//! deny/allow, per-environment count, output paths, complexity, forbidden
//! patterns, required patterns.
//!
//! Provider-type comparisons are case-insensitive. Empty lists mean "no
//! restriction". Deny beats allow.

use regex::Regex;
use tracing::debug;

use crate::config::{ComplexityPolicy, PolicyConfig};
use crate::{Error, Result};

/// Policy enforcer. Construct once from configuration; all checks are pure.
pub struct PolicyEnforcer {
    config: PolicyConfig,
}

impl PolicyEnforcer {
    /// Build the enforcer from the configured ruleset.
    #[must_use]
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    /// Validate that a provider type may be used in the given environment.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the violated rule.
    pub fn validate_provider_type(&self, env_name: &str, provider_type: &str) -> Result<()> {
        let ptype = provider_type.to_ascii_lowercase();

        if contains_ci(&self.config.denied_provider_types, &ptype) {
            return Err(Error::config(format!(
                "provider type '{provider_type}' is denied by policy"
            )));
        }
        if !self.config.allowed_provider_types.is_empty()
            && !contains_ci(&self.config.allowed_provider_types, &ptype)
        {
            return Err(Error::config(format!(
                "provider type '{provider_type}' is not on the policy allow-list"
            )));
        }

        if let Some(env_policy) = self.config.environments.get(env_name) {
            if contains_ci(&env_policy.denied_provider_types, &ptype) {
                return Err(Error::config(format!(
                    "provider type '{provider_type}' is denied for environment '{env_name}'"
                )));
            }
            if !env_policy.allowed_provider_types.is_empty()
                && !contains_ci(&env_policy.allowed_provider_types, &ptype)
            {
                return Err(Error::config(format!(
                    "provider type '{provider_type}' is not allowed for environment '{env_name}'"
                )));
            }
        }

        Ok(())
    }

    /// Validate the variable count for an environment against `max_secrets`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the environment exceeds its budget.
    pub fn validate_secret_count(&self, env_name: &str, count: usize) -> Result<()> {
        if let Some(env_policy) = self.config.environments.get(env_name) {
            if env_policy.max_secrets > 0 && count > env_policy.max_secrets {
                return Err(Error::config(format!(
                    "environment '{env_name}' declares {count} variables, policy allows {}",
                    env_policy.max_secrets
                )));
            }
        }
        Ok(())
    }

    /// Validate an output path against the allow/deny regex rules.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the path is denied, not on a
    /// non-empty allow-list, or a policy pattern fails to compile.
    pub fn validate_output_path(&self, path: &str) -> Result<()> {
        for pattern in &self.config.output.denied_paths {
            if compile(pattern)?.is_match(path) {
                return Err(Error::config(format!(
                    "output path '{path}' is denied by policy pattern '{pattern}'"
                )));
            }
        }
        if !self.config.output.allowed_paths.is_empty() {
            let allowed = self
                .config
                .output
                .allowed_paths
                .iter()
                .map(|p| compile(p).map(|re| re.is_match(path)))
                .collect::<Result<Vec<_>>>()?;
            if !allowed.into_iter().any(|m| m) {
                return Err(Error::config(format!(
                    "output path '{path}' is not on the policy allow-list"
                )));
            }
        }
        Ok(())
    }

    /// Validate a resolved secret value: complexity, forbidden patterns,
    /// required patterns. The value itself never appears in error messages.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the variable and the failed rule.
    pub fn validate_secret_value(&self, name: &str, value: &str) -> Result<()> {
        check_complexity(name, value, &self.config.complexity)?;

        for pattern in &self.config.forbidden_patterns {
            if compile(pattern)?.is_match(value) {
                return Err(Error::config(format!(
                    "secret '{name}' matches forbidden pattern '{pattern}'"
                )));
            }
        }
        for pattern in &self.config.required_patterns {
            if !compile(pattern)?.is_match(value) {
                return Err(Error::config(format!(
                    "secret '{name}' does not match required pattern '{pattern}'"
                )));
            }
        }

        debug!(secret = name, "Secret value passed policy checks");
        Ok(())
    }
}

/// Case-insensitive membership test.
fn contains_ci(list: &[String], needle_lower: &str) -> bool {
    list.iter()
        .any(|item| item.to_ascii_lowercase() == needle_lower)
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| Error::config(format!("invalid policy pattern '{pattern}': {e}")))
}

fn check_complexity(name: &str, value: &str, policy: &ComplexityPolicy) -> Result<()> {
    if policy.min_length > 0 && value.len() < policy.min_length {
        return Err(Error::config(format!(
            "secret '{name}' is shorter than the policy minimum of {} characters",
            policy.min_length
        )));
    }
    if policy.max_length > 0 && value.len() > policy.max_length {
        return Err(Error::config(format!(
            "secret '{name}' is longer than the policy maximum of {} characters",
            policy.max_length
        )));
    }
    if policy.require_uppercase && !value.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(Error::config(format!(
            "secret '{name}' must contain an uppercase character"
        )));
    }
    if policy.require_lowercase && !value.chars().any(|c| c.is_ascii_lowercase()) {
        return Err(Error::config(format!(
            "secret '{name}' must contain a lowercase character"
        )));
    }
    if policy.require_digit && !value.chars().any(|c| c.is_ascii_digit()) {
        return Err(Error::config(format!(
            "secret '{name}' must contain a digit"
        )));
    }
    if policy.require_symbol && !value.chars().any(|c| !c.is_ascii_alphanumeric()) {
        return Err(Error::config(format!(
            "secret '{name}' must contain a symbol"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EnvPolicy, OutputPolicy};

    fn enforcer(config: PolicyConfig) -> PolicyEnforcer {
        PolicyEnforcer::new(config)
    }

    #[test]
    fn empty_policy_allows_everything() {
        let e = enforcer(PolicyConfig::default());
        assert!(e.validate_provider_type("prod", "vault").is_ok());
        assert!(e.validate_secret_count("prod", 10_000).is_ok());
        assert!(e.validate_output_path("/tmp/.env").is_ok());
        assert!(e.validate_secret_value("X", "").is_ok());
    }

    #[test]
    fn global_deny_beats_allow() {
        let config = PolicyConfig {
            allowed_provider_types: vec!["vault".into()],
            denied_provider_types: vec!["vault".into()],
            ..PolicyConfig::default()
        };
        let err = enforcer(config)
            .validate_provider_type("prod", "vault")
            .unwrap_err();
        assert!(err.to_string().contains("denied"));
    }

    #[test]
    fn provider_type_comparison_is_case_insensitive() {
        let config = PolicyConfig {
            denied_provider_types: vec!["Literal".into()],
            ..PolicyConfig::default()
        };
        assert!(
            enforcer(config)
                .validate_provider_type("prod", "LITERAL")
                .is_err()
        );
    }

    #[test]
    fn allow_list_rejects_unlisted_type() {
        let config = PolicyConfig {
            allowed_provider_types: vec!["vault".into(), "aws_secrets_manager".into()],
            ..PolicyConfig::default()
        };
        let e = enforcer(config);
        assert!(e.validate_provider_type("prod", "VAULT").is_ok());
        assert!(e.validate_provider_type("prod", "keychain").is_err());
    }

    #[test]
    fn environment_rules_override() {
        let mut config = PolicyConfig::default();
        config.environments.insert(
            "production".into(),
            EnvPolicy {
                denied_provider_types: vec!["env".into()],
                allowed_provider_types: vec![],
                max_secrets: 2,
            },
        );
        let e = enforcer(config);
        assert!(e.validate_provider_type("staging", "env").is_ok());
        assert!(e.validate_provider_type("production", "env").is_err());
        assert!(e.validate_secret_count("production", 2).is_ok());
        assert!(e.validate_secret_count("production", 3).is_err());
        assert!(e.validate_secret_count("staging", 3).is_ok());
    }

    #[test]
    fn output_path_rules() {
        let config = PolicyConfig {
            output: OutputPolicy {
                allowed_paths: vec![r"^/secure/".into()],
                denied_paths: vec![r"\.bak$".into()],
            },
            ..PolicyConfig::default()
        };
        let e = enforcer(config);
        assert!(e.validate_output_path("/secure/.env").is_ok());
        assert!(e.validate_output_path("/tmp/.env").is_err());
        assert!(e.validate_output_path("/secure/.env.bak").is_err());
    }

    #[test]
    fn complexity_rules() {
        let config = PolicyConfig {
            complexity: ComplexityPolicy {
                min_length: 8,
                max_length: 64,
                require_uppercase: true,
                require_lowercase: true,
                require_digit: true,
                require_symbol: true,
            },
            ..PolicyConfig::default()
        };
        let e = enforcer(config);
        assert!(e.validate_secret_value("X", "Aa1!aaaa").is_ok());
        assert!(e.validate_secret_value("X", "Aa1!").is_err()); // too short
        assert!(e.validate_secret_value("X", "aa1!aaaa").is_err()); // no upper
        assert!(e.validate_secret_value("X", "AA1!AAAA").is_err()); // no lower
        assert!(e.validate_secret_value("X", "Aaa!aaaa").is_err()); // no digit
        assert!(e.validate_secret_value("X", "Aa1aaaaa").is_err()); // no symbol
    }

    #[test]
    fn forbidden_and_required_patterns() {
        let config = PolicyConfig {
            forbidden_patterns: vec!["(?i)changeme".into()],
            required_patterns: vec!["^.{4,}$".into()],
            ..PolicyConfig::default()
        };
        let e = enforcer(config);
        assert!(e.validate_secret_value("X", "s3cret").is_ok());
        assert!(e.validate_secret_value("X", "ChangeMe123").is_err());
        assert!(e.validate_secret_value("X", "abc").is_err());
    }

    #[test]
    fn invalid_policy_pattern_is_a_config_error() {
        let config = PolicyConfig {
            forbidden_patterns: vec!["(unclosed".into()],
            ..PolicyConfig::default()
        };
        let err = enforcer(config)
            .validate_secret_value("X", "value")
            .unwrap_err();
        assert!(err.to_string().contains("invalid policy pattern"));
    }
}
