//! secretops — declarative secret-operations engine.
//!
//! Reads a configuration binding environment variables to secret references
//! in heterogeneous backends, resolves them concurrently through provider
//! plugins, applies transform pipelines, enforces policy, and renders a
//! structured environment. A second surface performs credential lifecycle
//! operations (create/verify/rotate/revoke/list) through protocol adapters
//! and a rotation engine.
//!
//! # Subsystems
//!
//! - [`resolver`] — concurrent variable resolution with per-provider
//!   deadlines, policy gate, transforms, and failure aggregation
//! - [`transform`] — the pure value-rewrite pipeline DSL
//! - [`adapter`] — SQL / HTTP-API / NoSQL / Certificate protocol adapters
//! - [`rotation`] — strategy registry, two-secret overlap flows, audit
//!   trails, health monitoring

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod adapter;
pub mod cli;
pub mod config;
pub mod error;
pub mod policy;
pub mod provider;
pub mod resolver;
pub mod rotation;
pub mod transform;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging.
///
/// # Errors
///
/// Currently infallible; kept fallible for parity with embedding hosts that
/// install their own subscriber first.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
