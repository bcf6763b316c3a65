//! SQL adapter.
//!
//! Executes rendered SQL templates against relational backends. A connection
//! is opened per `execute` call, pinged, used, and dropped — the adapter
//! holds no pools. Mutating actions (`create`, `rotate`, `revoke`) run
//! inside a transaction that rolls back on error; `verify` expects a single
//! scalar; `list` emits one column→value map per row.
//!
//! The driver is chosen by connection family through sqlx's `Any` driver.
//! `sqlserver` parses as a family (with its aliases) but no driver ships
//! for it, so validation reports that instead of failing mid-operation.

use std::str::FromStr;
use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::any::install_default_drivers;
use sqlx::{AnyConnection, Column, Connection, Row};
use tracing::debug;

use crate::{Error, Result};

use super::template;
use super::{
    Action, Adapter, AdapterCapabilities, AdapterConfig, AdapterType, ExecutionResult, Operation,
};

/// Default per-operation timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Relational backend families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlFamily {
    /// `PostgreSQL`
    Postgres,
    /// `MySQL` / MariaDB
    MySql,
    /// Microsoft SQL Server (no bundled driver)
    SqlServer,
}

impl SqlFamily {
    /// URL scheme understood by the Any driver, when one is available.
    #[must_use]
    pub fn url_scheme(self) -> Option<&'static str> {
        match self {
            Self::Postgres => Some("postgres"),
            Self::MySql => Some("mysql"),
            Self::SqlServer => None,
        }
    }
}

impl FromStr for SqlFamily {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "postgresql" | "postgres" | "pg" => Ok(Self::Postgres),
            "mysql" | "mariadb" => Ok(Self::MySql),
            "sqlserver" | "mssql" => Ok(Self::SqlServer),
            other => Err(Error::config(format!("unknown sql family '{other}'"))),
        }
    }
}

/// Adapter for relational databases.
#[derive(Default)]
pub struct SqlAdapter;

impl SqlAdapter {
    /// Create the adapter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn connection_url(config: &AdapterConfig) -> Result<String> {
        let family: SqlFamily = config
            .connection_str("type")
            .ok_or_else(|| Error::config("sql adapter requires connection.type".to_string()))?
            .parse()?;
        let scheme = family.url_scheme().ok_or_else(|| {
            Error::config(format!(
                "no sql driver is bundled for family '{}'",
                config.connection_str("type").unwrap_or_default()
            ))
        })?;

        let host = require(config, "host")?;
        let port = require(config, "port")?;
        let database = require(config, "database")?;
        let username = config
            .auth
            .get("username")
            .ok_or_else(|| Error::config("sql adapter requires auth.username".to_string()))?;
        let password = config
            .auth
            .get("password")
            .or_else(|| config.auth.get("value"));

        let mut url = url::Url::parse(&format!("{scheme}://{host}:{port}/{database}"))
            .map_err(|e| Error::config(format!("invalid sql connection parameters: {e}")))?;
        url.set_username(username)
            .map_err(|()| Error::config("invalid sql username".to_string()))?;
        url.set_password(password.map(String::as_str))
            .map_err(|()| Error::config("invalid sql password".to_string()))?;
        Ok(url.to_string())
    }

    fn render_command(operation: &Operation, config: &AdapterConfig) -> Result<String> {
        match config.command_template(operation.action, &operation.target) {
            Some(tpl) => template::render_for(tpl, operation),
            // Verify has a sensible universal default; everything else must
            // be declared.
            None if operation.action == Action::Verify => Ok("SELECT 1".to_string()),
            None => Err(Error::config(format!(
                "no sql command template for action '{}'",
                operation.action
            ))),
        }
    }

    async fn run(
        operation: &Operation,
        config: &AdapterConfig,
        sql: String,
    ) -> std::result::Result<ExecutionResult, sqlx::Error> {
        driver_init();
        let url = match Self::connection_url(config) {
            Ok(url) => url,
            Err(e) => return Ok(ExecutionResult::fail(e.to_string())),
        };

        let mut conn = AnyConnection::connect(&url).await?;
        conn.ping().await?;
        debug!(action = %operation.action, "SQL connection established");

        let result = match operation.action {
            Action::Create | Action::Rotate | Action::Revoke => {
                let mut tx = conn.begin().await?;
                let done = sqlx::query(&sql).execute(&mut *tx).await;
                match done {
                    Ok(outcome) => {
                        tx.commit().await?;
                        let mut data = serde_json::Map::new();
                        data.insert(
                            "rows_affected".into(),
                            serde_json::Value::from(outcome.rows_affected()),
                        );
                        ExecutionResult::ok(data)
                    }
                    Err(e) => {
                        // Dropping the transaction rolls it back.
                        drop(tx);
                        ExecutionResult::fail(format!("statement failed: {e}"))
                    }
                }
            }
            Action::Verify => {
                let row = sqlx::query(&sql).fetch_one(&mut conn).await?;
                let mut data = serde_json::Map::new();
                data.insert("result".into(), decode_column(&row, 0));
                ExecutionResult::ok(data)
            }
            Action::List => {
                let rows = sqlx::query(&sql).fetch_all(&mut conn).await?;
                let items: Vec<serde_json::Value> = rows
                    .iter()
                    .map(|row| {
                        let mut entry = serde_json::Map::new();
                        for (i, column) in row.columns().iter().enumerate() {
                            entry.insert(column.name().to_string(), decode_column(row, i));
                        }
                        serde_json::Value::Object(entry)
                    })
                    .collect();
                let mut data = serde_json::Map::new();
                data.insert("count".into(), serde_json::Value::from(items.len()));
                data.insert("items".into(), serde_json::Value::Array(items));
                ExecutionResult::ok(data)
            }
        };

        conn.close().await.ok();
        Ok(result)
    }
}

fn driver_init() {
    static INIT: Once = Once::new();
    INIT.call_once(install_default_drivers);
}

fn require<'a>(config: &'a AdapterConfig, key: &str) -> Result<&'a str> {
    config
        .connection_str(key)
        .ok_or_else(|| Error::config(format!("sql adapter requires connection.{key}")))
}

/// Decode a column into JSON, trying the common wire types in order.
fn decode_column(row: &sqlx::any::AnyRow, index: usize) -> serde_json::Value {
    if let Ok(v) = row.try_get::<String, _>(index) {
        return serde_json::Value::String(v);
    }
    if let Ok(v) = row.try_get::<i64, _>(index) {
        return serde_json::Value::from(v);
    }
    if let Ok(v) = row.try_get::<f64, _>(index) {
        return serde_json::Value::from(v);
    }
    if let Ok(v) = row.try_get::<bool, _>(index) {
        return serde_json::Value::from(v);
    }
    serde_json::Value::Null
}

#[async_trait]
impl Adapter for SqlAdapter {
    fn name(&self) -> &str {
        "sql"
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Sql
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            supported_actions: vec![
                Action::Create,
                Action::Verify,
                Action::Rotate,
                Action::Revoke,
                Action::List,
            ],
            required_config: vec![
                "connection.type".into(),
                "connection.host".into(),
                "connection.port".into(),
                "connection.database".into(),
                "auth.username".into(),
            ],
            optional_config: vec!["auth.password".into()],
            features: vec!["transactions".into(), "templated_commands".into()],
        }
    }

    fn validate(&self, config: &AdapterConfig) -> Result<()> {
        let family: SqlFamily = config
            .connection_str("type")
            .ok_or_else(|| Error::config("sql adapter requires connection.type".to_string()))?
            .parse()?;
        if family.url_scheme().is_none() {
            return Err(Error::config(format!(
                "no sql driver is bundled for family '{}'",
                config.connection_str("type").unwrap_or_default()
            )));
        }
        for key in ["host", "port", "database"] {
            require(config, key)?;
        }
        if !config.auth.contains_key("username") {
            return Err(Error::config("sql adapter requires auth.username".to_string()));
        }
        Ok(())
    }

    async fn execute(
        &self,
        operation: &Operation,
        config: &AdapterConfig,
    ) -> Result<ExecutionResult> {
        let sql = Self::render_command(operation, config)?;
        let timeout = config
            .timeout_secs
            .map_or(DEFAULT_TIMEOUT, Duration::from_secs);

        match tokio::time::timeout(timeout, Self::run(operation, config, sql)).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Ok(ExecutionResult::fail(format!("sql backend error: {e}"))),
            Err(_) => Ok(ExecutionResult::fail(format!(
                "sql operation timed out after {}s",
                timeout.as_secs()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn config(family: &str) -> AdapterConfig {
        AdapterConfig {
            connection: HashMap::from([
                ("type".to_string(), family.to_string()),
                ("host".to_string(), "db.internal".to_string()),
                ("port".to_string(), "5432".to_string()),
                ("database".to_string(), "app".to_string()),
            ]),
            auth: HashMap::from([
                ("username".to_string(), "admin".to_string()),
                ("password".to_string(), "p@ss w/slash".to_string()),
            ]),
            service: json!({
                "commands": {
                    "rotate": "ALTER USER {{target}} WITH PASSWORD '{{parameters.password}}'",
                }
            }),
            ..AdapterConfig::default()
        }
    }

    #[test]
    fn family_aliases_parse() {
        assert_eq!("postgres".parse::<SqlFamily>().unwrap(), SqlFamily::Postgres);
        assert_eq!("postgresql".parse::<SqlFamily>().unwrap(), SqlFamily::Postgres);
        assert_eq!("mariadb".parse::<SqlFamily>().unwrap(), SqlFamily::MySql);
        assert_eq!("mssql".parse::<SqlFamily>().unwrap(), SqlFamily::SqlServer);
        assert!("oracle".parse::<SqlFamily>().is_err());
    }

    #[test]
    fn validate_accepts_driverable_families() {
        let adapter = SqlAdapter::new();
        assert!(adapter.validate(&config("postgresql")).is_ok());
        assert!(adapter.validate(&config("mysql")).is_ok());
    }

    #[test]
    fn validate_reports_missing_driver_for_sqlserver() {
        let err = SqlAdapter::new().validate(&config("sqlserver")).unwrap_err();
        assert!(err.to_string().contains("no sql driver"));
    }

    #[test]
    fn validate_requires_connection_fields_and_username() {
        let adapter = SqlAdapter::new();

        let mut c = config("postgresql");
        c.connection.remove("database");
        assert!(adapter.validate(&c).unwrap_err().to_string().contains("database"));

        let mut c = config("postgresql");
        c.auth.remove("username");
        assert!(adapter.validate(&c).unwrap_err().to_string().contains("username"));
    }

    #[test]
    fn connection_url_percent_encodes_credentials() {
        let url = SqlAdapter::connection_url(&config("postgresql")).unwrap();
        assert!(url.starts_with("postgres://admin:"));
        assert!(url.contains("p%40ss"));
        assert!(url.ends_with("@db.internal:5432/app"));
    }

    #[test]
    fn render_command_defaults_verify_only() {
        let cfg = config("postgresql");
        let verify = Operation::new(Action::Verify, "admin");
        assert_eq!(SqlAdapter::render_command(&verify, &cfg).unwrap(), "SELECT 1");

        let rotate = Operation::new(Action::Rotate, "admin")
            .with_parameter("password", json!("s3cret"));
        assert_eq!(
            SqlAdapter::render_command(&rotate, &cfg).unwrap(),
            "ALTER USER admin WITH PASSWORD 's3cret'"
        );

        let create = Operation::new(Action::Create, "admin");
        assert!(
            SqlAdapter::render_command(&create, &cfg)
                .unwrap_err()
                .to_string()
                .contains("no sql command template")
        );
    }

    #[tokio::test]
    async fn execute_surfaces_unreachable_backend_as_failure() {
        // Port 1 refuses connections; the adapter must report a backend
        // failure through the result, not a protocol error.
        let mut cfg = config("postgresql");
        cfg.connection.insert("port".into(), "1".into());
        cfg.connection.insert("host".into(), "127.0.0.1".into());
        cfg.timeout_secs = Some(2);

        let result = SqlAdapter::new()
            .execute(&Operation::new(Action::Verify, "admin"), &cfg)
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.error.is_some());
    }
}
