//! Error types for the secret-operations engine.
//!
//! Four user-visible kinds map onto engine behavior:
//!
//! | Kind | When |
//! |------|------|
//! | `Config` | structural problem in user configuration; never retried |
//! | `User` | actionable failure carrying details and a suggestion |
//! | `Provider` | a backend call failed; carries provider name and operation |
//! | `NotFound` | the backend reports the key does not exist |
//!
//! Infrastructure conversions (`Io`, `Json`, `Yaml`, `Http`) exist so `?`
//! works at the seams; they are not part of the user-facing taxonomy.

use std::io;

use thiserror::Error;

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;

/// Engine errors.
#[derive(Error, Debug)]
pub enum Error {
    /// Structural problem in user configuration (unknown provider, missing
    /// source, policy violation, bad reference). Surfaced immediately.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Actionable failure with details and a suggestion for the operator.
    #[error("{message}")]
    User {
        /// Human-readable message.
        message: String,
        /// Supporting detail lines (one per underlying failure).
        details: Vec<String>,
        /// What the operator should do about it.
        suggestion: Option<String>,
    },

    /// A backend call failed. Carries the provider name and the operation
    /// that was being performed.
    #[error("Provider '{provider}' failed during {operation}: {message}")]
    Provider {
        /// Name of the provider that failed.
        provider: String,
        /// Operation in flight (`resolve`, `describe`, `validate`, ...).
        operation: String,
        /// Backend failure description.
        message: String,
    },

    /// The backend reports that the requested key does not exist.
    #[error("Secret not found: {provider}/{key}")]
    NotFound {
        /// Provider that was asked.
        provider: String,
        /// Key that was requested.
        key: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a user error with no details or suggestion.
    pub fn user(message: impl Into<String>) -> Self {
        Self::User {
            message: message.into(),
            details: Vec::new(),
            suggestion: None,
        }
    }

    /// Attach detail lines to a user error. No-op for other kinds.
    #[must_use]
    pub fn with_details(mut self, lines: Vec<String>) -> Self {
        if let Self::User { details, .. } = &mut self {
            *details = lines;
        }
        self
    }

    /// Attach a suggestion to a user error. No-op for other kinds.
    #[must_use]
    pub fn with_suggestion(mut self, text: impl Into<String>) -> Self {
        if let Self::User { suggestion, .. } = &mut self {
            *suggestion = Some(text.into());
        }
        self
    }

    /// Create a provider error.
    pub fn provider(
        provider: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Provider {
            provider: provider.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a not-found error.
    pub fn not_found(provider: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            provider: provider.into(),
            key: key.into(),
        }
    }

    /// Returns `true` for configuration errors (never retriable).
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Returns `true` when the error is a missing-secret report.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Render the error for terminal output: message, then indented details,
    /// then the suggestion on its own line.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::User {
                message,
                details,
                suggestion,
            } => {
                let mut out = message.clone();
                for line in details {
                    out.push_str("\n  - ");
                    out.push_str(line);
                }
                if let Some(s) = suggestion {
                    out.push_str("\nSuggestion: ");
                    out.push_str(s);
                }
                out
            }
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_error_builder_chains() {
        let err = Error::user("Failed to resolve 2 variables")
            .with_details(vec!["A: timeout".into(), "B: not found".into()])
            .with_suggestion("Run 'secretops validate' to check provider connectivity");

        let rendered = err.render();
        assert!(rendered.starts_with("Failed to resolve 2 variables"));
        assert!(rendered.contains("A: timeout"));
        assert!(rendered.contains("Suggestion: Run 'secretops validate'"));
    }

    #[test]
    fn suggestion_is_noop_on_config_error() {
        let err = Error::config("bad reference").with_suggestion("ignored");
        assert!(err.is_config());
        assert_eq!(err.to_string(), "Configuration error: bad reference");
    }

    #[test]
    fn not_found_display() {
        let err = Error::not_found("vault", "db/password");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Secret not found: vault/db/password");
    }

    #[test]
    fn provider_error_carries_operation() {
        let err = Error::provider("aws-sm", "resolve", "throttled");
        assert_eq!(
            err.to_string(),
            "Provider 'aws-sm' failed during resolve: throttled"
        );
    }
}
