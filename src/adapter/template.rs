//! Command and endpoint template rendering.
//!
//! One template dialect serves the HTTP, SQL, and NoSQL adapters: `{{path}}`
//! placeholders resolved against an explicit data model built from the
//! operation —
//!
//! | Placeholder | Value |
//! |-------------|-------|
//! | `{{target}}` | operation target |
//! | `{{action}}` | action name |
//! | `{{parameters.<key>}}` | parameter by key |
//! | `{{metadata.<key>}}` | metadata entry by key |
//! | `{{<key>}}` | flattened parameter shorthand |
//!
//! The reserved names (`target`, `action`, `parameters`, `metadata`) always
//! win over same-named parameters; a parameter named `target` is only
//! reachable as `{{parameters.target}}`. Templates carry no logic beyond
//! field access.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::{Error, Result};

use super::Operation;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    // Compile-time constant pattern.
    #[allow(clippy::unwrap_used)]
    Regex::new(r"\{\{\s*([A-Za-z0-9_.-]+)\s*\}\}").unwrap()
});

/// Data model a template is rendered against.
#[derive(Debug, Clone)]
pub struct TemplateData {
    root: serde_json::Map<String, Value>,
}

impl TemplateData {
    /// Build the data model for an operation.
    #[must_use]
    pub fn from_operation(operation: &Operation) -> Self {
        let mut root = serde_json::Map::new();

        // Flattened parameter shorthand first, so the reserved keys below
        // overwrite any parameter that collides with them.
        for (key, value) in &operation.parameters {
            root.insert(key.clone(), value.clone());
        }

        root.insert("target".into(), Value::String(operation.target.clone()));
        root.insert(
            "action".into(),
            Value::String(operation.action.as_str().to_string()),
        );
        root.insert(
            "parameters".into(),
            Value::Object(operation.parameters.clone()),
        );
        root.insert(
            "metadata".into(),
            Value::Object(
                operation
                    .metadata
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            ),
        );

        Self { root }
    }

    fn lookup(&self, path: &str) -> Option<&Value> {
        let mut current = self.root.get(path.split('.').next()?)?;
        for segment in path.split('.').skip(1) {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }
}

/// Render a template, substituting every `{{path}}` placeholder.
///
/// # Errors
///
/// Returns a configuration error for placeholders that do not resolve — a
/// half-rendered command must never reach a backend.
pub fn render(template: &str, data: &TemplateData) -> Result<String> {
    let mut output = String::with_capacity(template.len());
    let mut last_end = 0;

    for captures in PLACEHOLDER.captures_iter(template) {
        // Group 0 always exists for a match.
        #[allow(clippy::unwrap_used)]
        let whole = captures.get(0).unwrap();
        let path = &captures[1];

        let value = data.lookup(path).ok_or_else(|| {
            Error::config(format!("template placeholder '{{{{{path}}}}}' did not resolve"))
        })?;

        output.push_str(&template[last_end..whole.start()]);
        output.push_str(&render_value(value));
        last_end = whole.end();
    }
    output.push_str(&template[last_end..]);
    Ok(output)
}

/// Render an operation's template in one step.
///
/// # Errors
///
/// See [`render`].
pub fn render_for(template: &str, operation: &Operation) -> Result<String> {
    render(template, &TemplateData::from_operation(operation))
}

/// String form of a template value: scalars render bare, containers render
/// as compact JSON.
fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        container => serde_json::to_string(container).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::Action;
    use serde_json::json;

    fn operation() -> Operation {
        let mut op = Operation::new(Action::Rotate, "app_user")
            .with_parameter("password", json!("n3w-p4ss"))
            .with_parameter("ttl", json!(3600));
        op.metadata.insert("requested_by".into(), "ci".into());
        op
    }

    #[test]
    fn renders_reserved_keys_and_parameters() {
        let rendered = render_for(
            "ALTER USER {{target}} WITH PASSWORD '{{parameters.password}}' -- {{action}}",
            &operation(),
        )
        .unwrap();
        assert_eq!(
            rendered,
            "ALTER USER app_user WITH PASSWORD 'n3w-p4ss' -- rotate"
        );
    }

    #[test]
    fn flattened_shorthand_and_metadata() {
        let rendered = render_for("{{password}}/{{ttl}}/{{metadata.requested_by}}", &operation())
            .unwrap();
        assert_eq!(rendered, "n3w-p4ss/3600/ci");
    }

    #[test]
    fn reserved_names_shadow_parameters() {
        let op = Operation::new(Action::Create, "real-target")
            .with_parameter("target", json!("sneaky"));
        assert_eq!(render_for("{{target}}", &op).unwrap(), "real-target");
        assert_eq!(render_for("{{parameters.target}}", &op).unwrap(), "sneaky");
    }

    #[test]
    fn whitespace_inside_braces_is_tolerated() {
        assert_eq!(
            render_for("{{ target }}", &Operation::new(Action::List, "t")).unwrap(),
            "t"
        );
    }

    #[test]
    fn unresolved_placeholder_is_an_error() {
        let err = render_for("{{missing}}", &Operation::new(Action::List, "t")).unwrap_err();
        assert!(err.to_string().contains("'{{missing}}'"));
    }

    #[test]
    fn containers_render_as_compact_json() {
        let op = Operation::new(Action::Create, "t")
            .with_parameter("tags", json!(["a", "b"]));
        assert_eq!(render_for("{{tags}}", &op).unwrap(), r#"["a","b"]"#);
    }

    #[test]
    fn template_without_placeholders_is_unchanged() {
        assert_eq!(
            render_for("SELECT 1", &Operation::new(Action::Verify, "t")).unwrap(),
            "SELECT 1"
        );
    }
}
