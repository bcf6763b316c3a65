//! Provider deadline computation and timeout error enrichment.
//!
//! When a provider call exceeds its deadline, the bare elapsed error is
//! useless to an operator. This module turns it into a user error whose
//! suggestion is chosen by provider family and by whether the configured
//! budget was below the family's recommended floor.

use std::time::Duration;

use crate::Error;

/// Effective deadline for a provider call: the provider's own budget, capped
/// by whatever remains of the caller's.
#[must_use]
pub fn provider_deadline(caller_remaining: Option<Duration>, timeout_ms: u64) -> Duration {
    let provider_budget = Duration::from_millis(timeout_ms);
    match caller_remaining {
        Some(remaining) => remaining.min(provider_budget),
        None => provider_budget,
    }
}

/// Recommended minimum timeout per provider family, in milliseconds.
/// CLI-backed vaults spawn a subprocess per call and need more headroom.
fn recommended_floor_ms(provider_type: &str) -> u64 {
    let t = provider_type.to_ascii_lowercase();
    if t.starts_with("bitwarden") || t.starts_with("1password") {
        15_000
    } else {
        10_000
    }
}

/// Build the user-facing timeout error for a provider call that exceeded its
/// deadline.
#[must_use]
pub fn timeout_error(provider_name: &str, provider_type: &str, timeout_ms: u64) -> Error {
    let floor = recommended_floor_ms(provider_type);
    let suggestion = if timeout_ms < floor {
        format!("Increase timeout_ms for provider '{provider_name}' to at least {floor}")
    } else {
        slow_backend_hint(provider_type)
    };

    Error::user(format!(
        "Provider '{provider_name}' timed out after {timeout_ms}ms"
    ))
    .with_details(vec![format!("provider type: {provider_type}")])
    .with_suggestion(suggestion)
}

/// Family-specific hint when the timeout was already generous: the budget is
/// not the problem, the backend is.
fn slow_backend_hint(provider_type: &str) -> String {
    let t = provider_type.to_ascii_lowercase();
    if t.starts_with("bitwarden") {
        "Check the Bitwarden CLI session: run 'bw unlock' and export BW_SESSION".to_string()
    } else if t.starts_with("1password") {
        "Re-sign in to 1Password: run 'op signin'".to_string()
    } else if t.starts_with("aws") {
        "Verify the AWS region and credentials (AWS_REGION, AWS_PROFILE)".to_string()
    } else if t.starts_with("gcp") {
        "Verify GCP authentication: run 'gcloud auth application-default login'".to_string()
    } else if t.starts_with("azure") {
        "Verify Azure authentication: run 'az login'".to_string()
    } else if t.starts_with("vault") {
        "Verify VAULT_ADDR points at a reachable Vault instance".to_string()
    } else {
        "Check network connectivity to the secret backend".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn suggestion_of(err: &Error) -> String {
        match err {
            Error::User { suggestion, .. } => suggestion.clone().unwrap_or_default(),
            other => panic!("expected user error, got {other:?}"),
        }
    }

    #[test]
    fn deadline_is_min_of_caller_and_provider() {
        assert_eq!(
            provider_deadline(Some(Duration::from_millis(200)), 5_000),
            Duration::from_millis(200)
        );
        assert_eq!(
            provider_deadline(Some(Duration::from_secs(60)), 5_000),
            Duration::from_millis(5_000)
        );
        assert_eq!(provider_deadline(None, 5_000), Duration::from_millis(5_000));
    }

    #[test]
    fn short_timeout_suggests_raising_the_budget() {
        let err = timeout_error("bw", "bitwarden", 5_000);
        assert!(suggestion_of(&err).contains("at least 15000"));

        let err = timeout_error("sm", "aws_secrets_manager", 5_000);
        assert!(suggestion_of(&err).contains("at least 10000"));
    }

    #[test]
    fn generous_timeout_suggests_backend_fixes() {
        assert!(suggestion_of(&timeout_error("bw", "bitwarden", 20_000)).contains("bw unlock"));
        assert!(suggestion_of(&timeout_error("op", "1password", 20_000)).contains("op signin"));
        assert!(
            suggestion_of(&timeout_error("sm", "aws_secrets_manager", 20_000)).contains("AWS")
        );
        assert!(suggestion_of(&timeout_error("g", "gcp_secret_manager", 20_000)).contains("gcloud"));
        assert!(suggestion_of(&timeout_error("a", "azure_key_vault", 20_000)).contains("az login"));
        assert!(suggestion_of(&timeout_error("v", "vault", 20_000)).contains("VAULT_ADDR"));
    }

    #[test]
    fn unknown_family_gets_generic_hints() {
        assert!(
            suggestion_of(&timeout_error("x", "keychain", 500)).contains("at least 10000")
        );
        assert!(
            suggestion_of(&timeout_error("x", "keychain", 20_000)).contains("connectivity")
        );
    }

    #[test]
    fn message_names_provider_and_budget() {
        let err = timeout_error("corp-vault", "vault", 2_000);
        assert_eq!(
            err.to_string(),
            "Provider 'corp-vault' timed out after 2000ms"
        );
    }
}
