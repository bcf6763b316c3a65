//! Command-line interface.
//!
//! `plan` and `resolve` drive the resolver; `validate` health-checks
//! providers; `rotate` runs the rotation engine against a declared service.
//! Resolved environments render as dotenv, JSON, or YAML, to stdout or to a
//! policy-checked output file.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::warn;

use crate::adapter::default_registry;
use crate::config::Config;
use crate::policy::PolicyEnforcer;
use crate::provider::{ProviderRegistry, build_provider};
use crate::resolver::Resolver;
use crate::rotation::{
    AdapterRotation, RotationEngine, RotationRequest, RotationStatus,
    strategy::managed_secret_from_service,
};
use crate::{Error, Result};

/// Declarative secret-operations engine.
#[derive(Parser, Debug)]
#[command(name = "secretops")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "SECRETOPS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", env = "SECRETOPS_LOG_LEVEL")]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "SECRETOPS_LOG_FORMAT")]
    pub log_format: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show what an environment would resolve, without contacting providers
    Plan {
        /// Environment name
        env: String,
    },
    /// Resolve an environment and render it
    Resolve {
        /// Environment name
        env: String,
        /// Output format
        #[arg(long, value_enum, default_value = "dotenv")]
        format: OutputFormat,
        /// Write to a file instead of stdout (checked against policy)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Health-check one provider, or all registered providers
    Validate {
        /// Provider name (all providers when omitted)
        provider: Option<String>,
    },
    /// Rotate the credential behind a declared service
    Rotate {
        /// Service name from the `services` block
        service: String,
        /// Strategy name (auto-selected by secret type when omitted)
        #[arg(long)]
        strategy: Option<String>,
    },
}

/// Rendering formats for resolved environments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// `KEY="value"` lines
    Dotenv,
    /// JSON object
    Json,
    /// YAML mapping
    Yaml,
}

/// Run a parsed CLI invocation.
///
/// # Errors
///
/// Returns any configuration, resolution, or rotation error; `main` renders
/// it and maps it to a failure exit code.
pub async fn run(cli: Cli) -> Result<()> {
    let config = Arc::new(Config::load(cli.config.as_deref())?);
    match cli.command {
        Command::Plan { env } => run_plan(&config, &env),
        Command::Resolve {
            env,
            format,
            output,
        } => run_resolve(&config, &env, format, output.as_deref()).await,
        Command::Validate { provider } => run_validate(&config, provider.as_deref()).await,
        Command::Rotate { service, strategy } => {
            run_rotate(&config, &service, strategy.as_deref()).await
        }
    }
}

/// Build the provider registry from the config's declarations. Types without
/// a built-in constructor are skipped with a warning; variables referencing
/// them surface "provider not found" at plan/resolve time.
fn registry_from_config(config: &Config) -> Arc<ProviderRegistry> {
    let registry = Arc::new(ProviderRegistry::new());
    for (name, provider_config) in &config.providers {
        match build_provider(name, provider_config) {
            Ok(provider) => registry.register(provider),
            Err(e) => warn!(provider = %name, error = %e, "Skipping provider"),
        }
    }
    registry
}

fn run_plan(config: &Arc<Config>, env: &str) -> Result<()> {
    let resolver = Resolver::new(Arc::clone(config), registry_from_config(config));
    let report = resolver.plan(env)?;

    for entry in &report.variables {
        let transform = entry
            .transform
            .as_deref()
            .map(|t| format!(" | transform: {t}"))
            .unwrap_or_default();
        let optional = if entry.optional { " (optional)" } else { "" };
        println!("{}  <-  {}{transform}{optional}", entry.name, entry.source);
    }
    for error in &report.errors {
        println!("ERROR  {error}");
    }

    if report.errors.is_empty() {
        Ok(())
    } else {
        Err(Error::user(format!(
            "{} variable(s) cannot resolve",
            report.errors.len()
        ))
        .with_details(report.errors.clone()))
    }
}

async fn run_resolve(
    config: &Arc<Config>,
    env: &str,
    format: OutputFormat,
    output: Option<&std::path::Path>,
) -> Result<()> {
    let resolver = Resolver::new(Arc::clone(config), registry_from_config(config));
    let resolved = resolver.resolve(env).await?;
    let rendered = render(&resolved.values(), format)?;

    match output {
        Some(path) => {
            let enforcer = PolicyEnforcer::new(config.policies.clone());
            enforcer.validate_output_path(&path.display().to_string())?;
            std::fs::write(path, rendered)?;
            eprintln!("Wrote {} variables to {}", resolved.values().len(), path.display());
        }
        None => print!("{rendered}"),
    }
    Ok(())
}

async fn run_validate(config: &Arc<Config>, provider: Option<&str>) -> Result<()> {
    let registry = registry_from_config(config);
    let resolver = Resolver::new(Arc::clone(config), Arc::clone(&registry));

    let names = match provider {
        Some(name) => vec![name.to_string()],
        None => registry.names(),
    };
    if names.is_empty() {
        println!("No providers configured.");
        return Ok(());
    }

    let mut failures = Vec::new();
    for name in &names {
        match resolver.validate_provider(name).await {
            Ok(()) => println!("{name}: OK"),
            Err(e) => {
                println!("{name}: FAILED\n  {}", e.render().replace('\n', "\n  "));
                failures.push(name.clone());
            }
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(Error::user(format!(
            "{} provider(s) failed validation",
            failures.len()
        ))
        .with_details(failures))
    }
}

async fn run_rotate(config: &Arc<Config>, service: &str, strategy: Option<&str>) -> Result<()> {
    let service_config = config.service(service)?;
    let secret = managed_secret_from_service(service, service_config)?;

    let engine = RotationEngine::new();
    engine.register_strategy(Arc::new(AdapterRotation::with_defaults(default_registry())))?;

    let mut request = RotationRequest::new(secret);
    request.strategy = strategy
        .map(str::to_string)
        .or_else(|| service_config.strategy.clone());

    let result = engine.rotate(&request).await?;
    for entry in &result.audit_trail {
        println!(
            "[{}] {} {}: {}",
            entry.timestamp.to_rfc3339(),
            entry.component,
            entry.action,
            entry.message
        );
    }

    match result.status {
        RotationStatus::Completed => {
            if let Some(new_ref) = &result.new_secret_ref {
                println!("Rotated '{service}' -> {new_ref}");
            }
            Ok(())
        }
        status => Err(Error::user(format!(
            "rotation of '{service}' ended with status {status:?}"
        ))),
    }
}

/// Render the flattened successful map in the requested format.
fn render(values: &HashMap<String, String>, format: OutputFormat) -> Result<String> {
    // Deterministic output regardless of map iteration order.
    let mut sorted: Vec<(&String, &String)> = values.iter().collect();
    sorted.sort_by_key(|(k, _)| *k);

    match format {
        OutputFormat::Dotenv => {
            let mut out = String::new();
            for (key, value) in sorted {
                out.push_str(key);
                out.push_str("=\"");
                out.push_str(&escape_dotenv(value));
                out.push_str("\"\n");
            }
            Ok(out)
        }
        OutputFormat::Json => {
            let map: std::collections::BTreeMap<&String, &String> =
                sorted.into_iter().collect();
            let mut out = serde_json::to_string_pretty(&map)?;
            out.push('\n');
            Ok(out)
        }
        OutputFormat::Yaml => {
            let map: std::collections::BTreeMap<&String, &String> =
                sorted.into_iter().collect();
            Ok(serde_yaml::to_string(&map)?)
        }
    }
}

fn escape_dotenv(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
