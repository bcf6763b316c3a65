//! Transform pipeline — a small value-rewrite DSL applied after resolution.
//!
//! A pipeline string is a chain of stages evaluated left to right; each stage
//! takes a string and yields a string, or an error that aborts the chain:
//!
//! ```text
//! json_extract:.credentials.password | trim
//! base64_decode,trim
//! ```
//!
//! Stages are separated by `|` when one is present, otherwise by `,` (so
//! `replace` arguments may contain commas in pipe-separated pipelines).
//! Transforms are pure: no I/O, no logging, no suspension.

mod stages;

pub use stages::Stage;

use crate::{Error, Result};

/// Stage names accepted by [`Pipeline::parse`], for diagnostics.
pub const SUPPORTED_STAGES: &[&str] = &[
    "trim",
    "multiline_to_single",
    "base64_encode",
    "base64_decode",
    "json_extract:<path>",
    "yaml_extract:<path>",
    "replace:<from>:<to>",
    "join:<separator>",
];

/// A compiled transform pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    /// Parse a pipeline string into its stages.
    ///
    /// # Errors
    ///
    /// Returns a user error naming the offending stage and listing the
    /// supported stages.
    pub fn parse(pipeline: &str) -> Result<Self> {
        let separator = if pipeline.contains('|') { '|' } else { ',' };
        let stages = pipeline
            .split(separator)
            .map(str::trim)
            .map(|token| {
                if token.is_empty() {
                    return Err(pipeline_error(pipeline, "empty transform stage"));
                }
                Stage::parse(token)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { stages })
    }

    /// Apply every stage, left to right.
    ///
    /// # Errors
    ///
    /// Returns the first stage failure, aborting the remainder of the chain.
    pub fn apply(&self, input: &str) -> Result<String> {
        let mut value = input.to_string();
        for stage in &self.stages {
            value = stage.apply(&value)?;
        }
        Ok(value)
    }

    /// Number of stages in the pipeline.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns `true` for a pipeline with no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Parse and apply a pipeline in one step.
///
/// # Errors
///
/// Returns parse errors and stage failures as user errors.
pub fn apply(pipeline: &str, input: &str) -> Result<String> {
    Pipeline::parse(pipeline)?.apply(input)
}

/// Build the uniform user error for pipeline problems: names the failing
/// piece and suggests the supported stage list.
pub(crate) fn pipeline_error(stage: &str, message: impl Into<String>) -> Error {
    Error::user(format!("transform '{stage}' failed: {}", message.into())).with_suggestion(
        format!("Supported transforms: {}", SUPPORTED_STAGES.join(", ")),
    )
}

/// Error for a stage name that is not in the table.
pub(crate) fn unknown_stage_error(name: &str) -> Error {
    Error::user(format!("unknown transform '{name}'")).with_suggestion(format!(
        "Supported transforms: {}",
        SUPPORTED_STAGES.join(", ")
    ))
}
