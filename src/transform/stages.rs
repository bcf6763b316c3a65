//! Individual transform stages.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::Result;

use super::{pipeline_error, unknown_stage_error};

/// A single parsed stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    /// Strip leading/trailing whitespace.
    Trim,
    /// Replace every newline with the two-character `\n` sequence and drop
    /// carriage returns.
    MultilineToSingle,
    /// Standard base64 with padding.
    Base64Encode,
    /// Standard base64 with padding.
    Base64Decode,
    /// Walk a `.`-delimited object path through a JSON document.
    JsonExtract(String),
    /// Walk a `.`-delimited object path through a YAML document.
    YamlExtract(String),
    /// Global substring replacement.
    Replace {
        /// Substring to replace (may be empty).
        from: String,
        /// Replacement (may be empty).
        to: String,
    },
    /// Join list-shaped input with a separator.
    Join(String),
}

impl Stage {
    /// Parse a single stage token (`name` or `name:args`).
    ///
    /// # Errors
    ///
    /// Returns a user error for unknown names or malformed arguments.
    pub fn parse(token: &str) -> Result<Self> {
        let (name, args) = match token.split_once(':') {
            Some((name, args)) => (name.trim(), Some(args)),
            None => (token, None),
        };

        match (name, args) {
            ("trim", None) => Ok(Self::Trim),
            ("multiline_to_single", None) => Ok(Self::MultilineToSingle),
            ("base64_encode", None) => Ok(Self::Base64Encode),
            ("base64_decode", None) => Ok(Self::Base64Decode),
            ("json_extract", Some(path)) => {
                validate_path(token, path)?;
                Ok(Self::JsonExtract(path.to_string()))
            }
            ("yaml_extract", Some(path)) => {
                validate_path(token, path)?;
                Ok(Self::YamlExtract(path.to_string()))
            }
            ("replace", Some(args)) => match args.split_once(':') {
                Some((from, to)) => Ok(Self::Replace {
                    from: from.to_string(),
                    to: to.to_string(),
                }),
                None => Err(pipeline_error(
                    token,
                    "expected replace:<from>:<to> with two arguments",
                )),
            },
            ("join", Some(sep)) => Ok(Self::Join(sep.to_string())),
            ("json_extract" | "yaml_extract", None) => {
                Err(pipeline_error(token, "expected a path argument, e.g. json_extract:.a.b"))
            }
            ("replace", None) => Err(pipeline_error(token, "expected replace:<from>:<to>")),
            ("join", None) => Err(pipeline_error(token, "expected join:<separator>")),
            _ => Err(unknown_stage_error(name)),
        }
    }

    /// Apply this stage to a value.
    ///
    /// # Errors
    ///
    /// Returns a user error describing the failure; the pipeline aborts.
    pub fn apply(&self, input: &str) -> Result<String> {
        match self {
            Self::Trim => Ok(input.trim().to_string()),
            Self::MultilineToSingle => Ok(input.replace('\r', "").replace('\n', "\\n")),
            Self::Base64Encode => Ok(BASE64.encode(input.as_bytes())),
            Self::Base64Decode => {
                let bytes = BASE64
                    .decode(input.trim())
                    .map_err(|e| pipeline_error("base64_decode", e.to_string()))?;
                String::from_utf8(bytes).map_err(|_| {
                    pipeline_error("base64_decode", "decoded value is not valid UTF-8")
                })
            }
            Self::JsonExtract(path) => json_extract(path, input),
            Self::YamlExtract(path) => yaml_extract(path, input),
            Self::Replace { from, to } => {
                if from.is_empty() {
                    // Replacing the empty string is the identity; a Rust
                    // str::replace("") would interleave `to` everywhere.
                    Ok(input.to_string())
                } else {
                    Ok(input.replace(from.as_str(), to))
                }
            }
            Self::Join(sep) => Ok(join(sep, input)),
        }
    }
}

fn validate_path(stage: &str, path: &str) -> Result<()> {
    if !path.starts_with('.') {
        return Err(pipeline_error(
            stage,
            format!("path '{path}' must begin with '.'"),
        ));
    }
    if path.contains('[') {
        return Err(pipeline_error(
            stage,
            "array indexing ([n]) is not supported; extract the array and post-process instead",
        ));
    }
    Ok(())
}

// ── JSON extraction ─────────────────────────────────────────────────────────

fn json_extract(path: &str, input: &str) -> Result<String> {
    let stage = format!("json_extract:{path}");
    let mut current: serde_json::Value = serde_json::from_str(input)
        .map_err(|e| pipeline_error(&stage, format!("input is not valid JSON: {e}")))?;

    for segment in path_segments(path) {
        current = match current {
            serde_json::Value::Object(mut map) => map.remove(segment).ok_or_else(|| {
                pipeline_error(&stage, format!("key '{segment}' not found"))
            })?,
            other => {
                return Err(pipeline_error(
                    &stage,
                    format!(
                        "cannot navigate into {} at '{segment}'",
                        json_type_name(&other)
                    ),
                ));
            }
        };
    }

    Ok(render_json_scalar(&current))
}

/// Canonical string form of an extracted JSON value. Floats render with the
/// fractional part truncated; null is the empty string; containers
/// re-serialize to compact JSON.
fn render_json_scalar(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(u) = n.as_u64() {
                u.to_string()
            } else {
                #[allow(clippy::cast_possible_truncation)]
                let truncated = n.as_f64().unwrap_or_default().trunc() as i64;
                truncated.to_string()
            }
        }
        serde_json::Value::Null => String::new(),
        container => serde_json::to_string(container).unwrap_or_default(),
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

// ── YAML extraction ─────────────────────────────────────────────────────────

fn yaml_extract(path: &str, input: &str) -> Result<String> {
    let stage = format!("yaml_extract:{path}");
    let mut current: serde_yaml::Value = serde_yaml::from_str(input)
        .map_err(|e| pipeline_error(&stage, format!("input is not valid YAML: {e}")))?;

    for segment in path_segments(path) {
        current = match current {
            serde_yaml::Value::Mapping(mut map) => map
                .remove(&serde_yaml::Value::String(segment.to_string()))
                .ok_or_else(|| pipeline_error(&stage, format!("key '{segment}' not found")))?,
            _ => {
                return Err(pipeline_error(
                    &stage,
                    format!("cannot navigate into a non-mapping at '{segment}'"),
                ));
            }
        };
    }

    Ok(match current {
        serde_yaml::Value::String(s) => s,
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else {
                #[allow(clippy::cast_possible_truncation)]
                let truncated = n.as_f64().unwrap_or_default().trunc() as i64;
                truncated.to_string()
            }
        }
        serde_yaml::Value::Null => String::new(),
        complex => serde_yaml::to_string(&complex)
            .unwrap_or_default()
            .trim()
            .to_string(),
    })
}

fn path_segments(path: &str) -> impl Iterator<Item = &str> {
    path.trim_start_matches('.').split('.').filter(|s| !s.is_empty())
}

// ── Join ────────────────────────────────────────────────────────────────────

/// Delimiters tried in order when the input is not a JSON array.
const JOIN_DELIMITERS: &[char] = &['\n', ',', ';', '|', ' '];

fn join(sep: &str, input: &str) -> String {
    if let Ok(serde_json::Value::Array(items)) = serde_json::from_str(input) {
        return items
            .iter()
            .map(render_json_scalar)
            .collect::<Vec<_>>()
            .join(sep);
    }

    let Some(delimiter) = JOIN_DELIMITERS.iter().find(|d| input.contains(**d)) else {
        return input.to_string();
    };

    let pieces: Vec<&str> = input
        .split(*delimiter)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    if pieces.len() <= 1 {
        return input.to_string();
    }
    pieces.join(sep)
}
