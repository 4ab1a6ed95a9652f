//! Application configuration management.
//!
//! Configuration is read from environment variables with the `envy` crate.
//! Each component gets its own struct under its own prefix, so every struct
//! lists exactly the keys that component reads:
//!
//! - `TSG_LOG_*` → [`LogConfig`]
//! - `TSG_HTTP_*` → [`HttpServerConfig`]
//! - `TSG_PG_*` → [`DbConfig`]

use serde::Deserialize;
use sqlx::ConnectOptions;
use sqlx::postgres::PgConnectOptions;

use crate::error::ConfigError;
use crate::severity::{DbLogLevel, Severity, db_log_level};

/// Value of the `application_name` runtime parameter sent to the server.
pub const APPLICATION_NAME: &str = env!("CARGO_PKG_NAME");

pub const DEFAULT_HTTP_BIND: &str = "127.0.0.1";
pub const DEFAULT_HTTP_PORT: u16 = 3000;

/// Commonly configured CockroachDB port.
pub const DEFAULT_PG_PORT: u16 = 26257;

/// Output format of the process-wide logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl TryFrom<String> for LogFormat {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(ConfigError::UnsupportedLogFormat(value)),
        }
    }
}

/// Logging configuration.
///
/// # Environment Variables
///
/// - `TSG_LOG_LEVEL` (optional): `FATAL`, `ERROR`, `WARN`, `INFO` or `DEBUG`, any case. Defaults to `INFO`
/// - `TSG_LOG_FORMAT` (optional): `pretty` or `json`. Defaults to `pretty`
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: Severity,

    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

fn default_log_level() -> Severity {
    Severity::Info
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

impl LogConfig {
    /// True when the process runs at its most verbose level.
    pub fn is_debug(&self) -> bool {
        self.level == Severity::Debug
    }

    /// Level handed to the database client's logger.
    pub fn db_log_level(&self) -> DbLogLevel {
        db_log_level(self.level)
    }
}

/// HTTP listener configuration.
///
/// # Environment Variables
///
/// - `TSG_HTTP_BIND` (optional): bind address, defaults to `127.0.0.1`
/// - `TSG_HTTP_PORT` (optional): port, defaults to 3000
#[derive(Debug, Clone, Deserialize)]
pub struct HttpServerConfig {
    #[serde(default)]
    pub bind: String,

    #[serde(default)]
    pub port: u16,
}

impl HttpServerConfig {
    /// Empty bind and zero port mean "use the default".
    fn apply_defaults(mut self) -> Self {
        if self.bind.is_empty() {
            self.bind = DEFAULT_HTTP_BIND.to_string();
        }
        if self.port == 0 {
            self.port = DEFAULT_HTTP_PORT;
        }
        self
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

/// Database connection configuration.
///
/// # Environment Variables
///
/// - `TSG_PG_DATABASE`, `TSG_PG_USER`, `TSG_PG_PASSWORD` (optional)
/// - `TSG_PG_HOST` (optional): defaults to `localhost`
/// - `TSG_PG_PORT` (optional): defaults to 26257
/// - `TSG_PG_MAX_CONNECTIONS` (optional): pool size, defaults to 5
#[derive(Clone, Deserialize)]
pub struct DbConfig {
    #[serde(default)]
    pub database: String,

    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_pg_host")]
    pub host: String,

    #[serde(default = "default_pg_port")]
    pub port: u16,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_pg_host() -> String {
    "localhost".to_string()
}

fn default_pg_port() -> u16 {
    DEFAULT_PG_PORT
}

fn default_max_connections() -> u32 {
    5
}

impl std::fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConfig")
            .field("database", &self.database)
            .field("user", &self.user)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("max_connections", &self.max_connections)
            .finish_non_exhaustive()
    }
}

impl DbConfig {
    /// Connection options for the pool.
    ///
    /// sqlx's own statement logging is switched off. Statements are reported
    /// through [`crate::severity::DbLog`] instead, which tags them and applies
    /// the bridged level.
    pub fn connect_options(&self) -> PgConnectOptions {
        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .application_name(APPLICATION_NAME)
            .disable_statement_logging();

        if !self.database.is_empty() {
            options = options.database(&self.database);
        }
        if !self.user.is_empty() {
            options = options.username(&self.user);
        }
        if !self.password.is_empty() {
            options = options.password(&self.password);
        }
        options
    }
}

/// Full process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub log: LogConfig,
    pub http: HttpServerConfig,
    pub db: DbConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// A `.env` file is loaded first if present.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be parsed, including an
    /// unsupported log level or log format.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    /// Load configuration from any key/value source using the same names as
    /// the environment.
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: Vec<(String, String)> = vars.into_iter().collect();

        let log = envy::prefixed("TSG_LOG_").from_iter::<_, LogConfig>(vars.clone())?;
        let http = envy::prefixed("TSG_HTTP_")
            .from_iter::<_, HttpServerConfig>(vars.clone())?
            .apply_defaults();
        let db = envy::prefixed("TSG_PG_").from_iter::<_, DbConfig>(vars)?;

        Ok(Self { log, http, db })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults() {
        let config = Config::from_vars(Vec::new()).unwrap();

        assert_eq!(config.log.level, Severity::Info);
        assert_eq!(config.log.format, LogFormat::Pretty);
        assert!(!config.log.is_debug());
        assert_eq!(config.http.addr(), "127.0.0.1:3000");
        assert_eq!(config.db.port, 26257);
        assert_eq!(config.db.host, "localhost");
        assert_eq!(config.db.max_connections, 5);
    }

    #[test]
    fn empty_bind_and_zero_port_fall_back() {
        let config =
            Config::from_vars(vars(&[("TSG_HTTP_BIND", ""), ("TSG_HTTP_PORT", "0")])).unwrap();
        assert_eq!(config.http.addr(), "127.0.0.1:3000");

        let config = Config::from_vars(vars(&[
            ("TSG_HTTP_BIND", "0.0.0.0"),
            ("TSG_HTTP_PORT", "8080"),
        ]))
        .unwrap();
        assert_eq!(config.http.addr(), "0.0.0.0:8080");
    }

    #[test]
    fn log_level_is_case_insensitive() {
        let config = Config::from_vars(vars(&[("TSG_LOG_LEVEL", "debug")])).unwrap();
        assert_eq!(config.log.level, Severity::Debug);
        assert!(config.log.is_debug());
        assert_eq!(config.log.db_log_level(), DbLogLevel::Trace);
    }

    #[test]
    fn is_debug_only_for_debug() {
        for level in ["FATAL", "ERROR", "WARN", "INFO"] {
            let config = Config::from_vars(vars(&[("TSG_LOG_LEVEL", level)])).unwrap();
            assert!(!config.log.is_debug(), "{level} must not be debug");
        }
    }

    #[test]
    fn unsupported_log_level_is_an_error() {
        let result = Config::from_vars(vars(&[("TSG_LOG_LEVEL", "TRACE")]));
        assert!(result.is_err());
    }

    #[test]
    fn unsupported_log_format_is_an_error() {
        let result = Config::from_vars(vars(&[("TSG_LOG_FORMAT", "xml")]));
        assert!(result.is_err());

        let config = Config::from_vars(vars(&[("TSG_LOG_FORMAT", "JSON")])).unwrap();
        assert_eq!(config.log.format, LogFormat::Json);
    }

    #[test]
    fn db_settings_are_read() {
        let config = Config::from_vars(vars(&[
            ("TSG_PG_DATABASE", "triton"),
            ("TSG_PG_USER", "root"),
            ("TSG_PG_PASSWORD", "secret"),
            ("TSG_PG_HOST", "db.internal"),
            ("TSG_PG_PORT", "5432"),
        ]))
        .unwrap();

        assert_eq!(config.db.database, "triton");
        assert_eq!(config.db.user, "root");
        assert_eq!(config.db.host, "db.internal");
        assert_eq!(config.db.port, 5432);
        assert!(!format!("{:?}", config.db).contains("secret"));

        let options = config.db.connect_options();
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 5432);
        assert_eq!(options.get_database(), Some("triton"));
        assert_eq!(options.get_username(), "root");
        assert_eq!(options.get_application_name(), Some(APPLICATION_NAME));
    }

    #[test]
    fn sqlx_statement_logging_is_off_at_every_level() {
        for level in ["FATAL", "ERROR", "WARN", "INFO", "DEBUG"] {
            let config = Config::from_vars(vars(&[("TSG_LOG_LEVEL", level)])).unwrap();
            let options = format!("{:?}", config.db.connect_options());

            assert!(
                options.contains("LogSettings { statements_level: Off"),
                "{level}: {options}"
            );
            assert!(
                options.contains("slow_statements_level: Off"),
                "{level}: {options}"
            );
        }
    }
}
