//! Log-severity bridge between the application and the database client.
//!
//! The application is configured with a [`Severity`]. The database client
//! has its own scale, [`DbLogLevel`]. This module maps one onto the other in
//! both directions and provides the adapter through which every message the
//! client logs reaches `tracing`.
//!
//! # Mapping
//!
//! | Application | Client  |
//! |-------------|---------|
//! | `FATAL`     | `None`  |
//! | `ERROR`     | `Error` |
//! | `WARN`      | `Warn`  |
//! | `INFO`      | `Trace` |
//! | `DEBUG`     | `Trace` |
//!
//! `INFO` does not map to the client's `Info`: the client's informational
//! output is noise at our normal level, only its detail output is useful.
//! In the other direction a client `Info` message is demoted to `DEBUG`.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::error::{ConfigError, DbError};

/// Module identifier attached to every database client log event.
pub const DB_LOG_MODULE: &str = "db";

/// Structured fields attached to a database client log message.
pub type LogFields = Map<String, Value>;

/// Field keys [`TracingDbLogger`] records as individual `tracing` fields.
/// Any other key is collected into a single `extra` JSON field.
const KNOWN_FIELDS: [&str; 4] = ["sql", "rows", "time_us", "err"];

/// Statements running at least this long are reported at `Warn`.
pub const SLOW_STATEMENT: Duration = Duration::from_secs(1);

/// Application log severity, as configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum Severity {
    Fatal,
    Error,
    Warn,
    Info,
    Debug,
}

impl Severity {
    /// `tracing_subscriber::EnvFilter` directive for this severity.
    ///
    /// `tracing` has no fatal level, so `Fatal` keeps errors only.
    pub fn filter_directive(self) -> &'static str {
        match self {
            Severity::Fatal | Severity::Error => "error",
            Severity::Warn => "warn",
            Severity::Info => "info",
            Severity::Debug => "debug",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Fatal => "FATAL",
            Severity::Error => "ERROR",
            Severity::Warn => "WARN",
            Severity::Info => "INFO",
            Severity::Debug => "DEBUG",
        }
    }
}

impl FromStr for Severity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "FATAL" => Ok(Severity::Fatal),
            "ERROR" => Ok(Severity::Error),
            "WARN" => Ok(Severity::Warn),
            "INFO" => Ok(Severity::Info),
            "DEBUG" => Ok(Severity::Debug),
            _ => Err(ConfigError::UnsupportedLogLevel(s.to_string())),
        }
    }
}

impl TryFrom<String> for Severity {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, ConfigError> {
        value.parse()
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Database client log level, least to most verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DbLogLevel {
    None,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Level handed to the database client for a configured application severity.
pub fn db_log_level(severity: Severity) -> DbLogLevel {
    match severity {
        Severity::Fatal => DbLogLevel::None,
        Severity::Error => DbLogLevel::Error,
        Severity::Warn => DbLogLevel::Warn,
        Severity::Info | Severity::Debug => DbLogLevel::Trace,
    }
}

/// Application severity a database client message is emitted at.
///
/// `None` is the client's "no level" marker; such messages are emitted at
/// `INFO` so they stay visible at the normal operating level.
pub fn app_severity(level: DbLogLevel) -> Severity {
    match level {
        DbLogLevel::None => Severity::Info,
        DbLogLevel::Error => Severity::Error,
        DbLogLevel::Warn => Severity::Warn,
        DbLogLevel::Info | DbLogLevel::Debug | DbLogLevel::Trace => Severity::Debug,
    }
}

/// Logging interface the database client writes to.
pub trait DbLogger: Send + Sync {
    fn log(&self, level: DbLogLevel, msg: &str, fields: &LogFields);
}

/// [`DbLogger`] that forwards into `tracing`, tagged with [`DB_LOG_MODULE`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDbLogger;

impl DbLogger for TracingDbLogger {
    fn log(&self, level: DbLogLevel, msg: &str, fields: &LogFields) {
        let sql = fields.get("sql").and_then(Value::as_str);
        let rows = fields.get("rows").and_then(Value::as_u64);
        let time_us = fields.get("time_us").and_then(Value::as_u64);
        let err = fields.get("err").and_then(Value::as_str);

        let rest: LogFields = fields
            .iter()
            .filter(|(key, _)| !KNOWN_FIELDS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        let extra = (!rest.is_empty()).then(|| Value::Object(rest).to_string());
        let extra = extra.as_deref();

        // Absent values are skipped by the subscriber.
        macro_rules! db_event {
            ($event:ident) => {
                tracing::$event!(
                    module = DB_LOG_MODULE,
                    sql,
                    rows,
                    time_us,
                    err,
                    extra,
                    "{}",
                    msg
                )
            };
        }

        match app_severity(level) {
            Severity::Fatal | Severity::Error => db_event!(error),
            Severity::Warn => db_event!(warn),
            Severity::Info => db_event!(info),
            Severity::Debug => db_event!(debug),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct NoopDbLogger;

impl DbLogger for NoopDbLogger {
    fn log(&self, _level: DbLogLevel, _msg: &str, _fields: &LogFields) {}
}

/// The client side of the bridge: a logger plus the level it was configured
/// with. Messages more verbose than the level are dropped before reaching
/// the logger.
#[derive(Clone)]
pub struct DbLog {
    level: DbLogLevel,
    logger: Arc<dyn DbLogger>,
}

impl DbLog {
    pub fn new(level: DbLogLevel, logger: Arc<dyn DbLogger>) -> Self {
        Self { level, logger }
    }

    /// Bridge for a configured application severity, logging through `tracing`.
    pub fn for_severity(severity: Severity) -> Self {
        Self::new(db_log_level(severity), Arc::new(TracingDbLogger))
    }

    pub fn disabled() -> Self {
        Self::new(DbLogLevel::None, Arc::new(NoopDbLogger))
    }

    pub fn level(&self) -> DbLogLevel {
        self.level
    }

    pub fn enabled(&self, level: DbLogLevel) -> bool {
        level != DbLogLevel::None && level <= self.level
    }

    pub fn emit(&self, level: DbLogLevel, msg: &str, fields: LogFields) {
        if self.enabled(level) {
            self.logger.log(level, msg, &fields);
        }
    }

    /// Record the outcome of one statement: `Info` with the affected row
    /// count on success (`Warn` once it took [`SLOW_STATEMENT`] or longer),
    /// `Error` with the cause on failure.
    pub fn statement(&self, sql: &str, elapsed: Duration, outcome: Result<u64, &DbError>) {
        let mut fields = LogFields::new();
        fields.insert("sql".to_string(), json!(sql.trim()));
        fields.insert("time_us".to_string(), json!(elapsed.as_micros() as u64));

        match outcome {
            Ok(rows) if elapsed >= SLOW_STATEMENT => {
                fields.insert("rows".to_string(), json!(rows));
                self.emit(DbLogLevel::Warn, "Slow statement", fields);
            }
            Ok(rows) => {
                fields.insert("rows".to_string(), json!(rows));
                self.emit(DbLogLevel::Info, "Exec", fields);
            }
            Err(err) => {
                fields.insert("err".to_string(), json!(err.to_string()));
                self.emit(DbLogLevel::Error, "Exec", fields);
            }
        }
    }
}

impl fmt::Debug for DbLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbLog").field("level", &self.level).finish()
    }
}
