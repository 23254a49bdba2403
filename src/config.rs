//! Configuration management for checksql.
//!
//! Settings come from an optional TOML file. Database credentials are passed
//! on the command line as `user/password@host:port:database`.

use crate::error::{CheckError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use url::Url;

/// Usage message for malformed credentials.
pub const CREDENTIALS_FORMAT: &str = "DB connection properties should be specified in following format: <username>/<password>@<host>:<port>:<database>";

/// Main configuration structure for checksql.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Compile-check settings.
    #[serde(default)]
    pub check: CheckSettings,

    /// Catalog selection.
    #[serde(default)]
    pub catalog: CatalogSettings,
}

/// Settings for the compile-check harness and the database clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckSettings {
    /// Name of the transient view.
    #[serde(default = "default_view_name")]
    pub view_name: String,

    /// Name of the transient routine.
    #[serde(default = "default_routine_name")]
    pub routine_name: String,

    /// Per-statement timeout applied to both databases.
    #[serde(default = "default_statement_timeout")]
    pub statement_timeout_secs: u64,

    /// Read routine diagnostics through the plpgsql_check extension when installed.
    #[serde(default = "default_true")]
    pub use_plpgsql_check: bool,

    /// Log a progress line every N rows.
    #[serde(default = "default_progress_every")]
    pub progress_every: u64,
}

fn default_view_name() -> String {
    "checksql_select".to_string()
}

fn default_routine_name() -> String {
    "checksql_plsql".to_string()
}

fn default_statement_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_progress_every() -> u64 {
    500
}

impl Default for CheckSettings {
    fn default() -> Self {
        Self {
            view_name: default_view_name(),
            routine_name: default_routine_name(),
            statement_timeout_secs: default_statement_timeout(),
            use_plpgsql_check: default_true(),
            progress_every: default_progress_every(),
        }
    }
}

/// Which catalog to scan.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CatalogSettings {
    /// JSON catalog file. The built-in catalog is used when absent.
    pub path: Option<PathBuf>,

    /// Tables whose entries are skipped.
    #[serde(default)]
    pub disabled_tables: Vec<String>,
}

impl Settings {
    /// Returns the default config file path for the current platform.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("checksql")
            .join("config.toml")
    }

    /// Loads settings from a TOML file. A missing file yields defaults.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| CheckError::config(format!("Failed to read config file: {e}")))?;

        Self::parse_toml(&content, path)
    }

    fn parse_toml(content: &str, path: &Path) -> Result<Self> {
        let settings: Self = toml::from_str(content).map_err(|e| {
            CheckError::config(format!(
                "Configuration error in {}:\n  {}",
                path.display(),
                e
            ))
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Object names are spliced into DDL, so they must be plain identifiers.
    pub fn validate(&self) -> Result<()> {
        for name in [&self.check.view_name, &self.check.routine_name] {
            if !identifier_regex().is_match(name) {
                return Err(CheckError::config(format!(
                    "'{name}' is not a valid object name"
                )));
            }
        }
        if self.check.view_name == self.check.routine_name {
            return Err(CheckError::config(
                "view_name and routine_name must differ",
            ));
        }
        if self.check.statement_timeout_secs == 0 {
            return Err(CheckError::config("statement_timeout_secs must be positive"));
        }
        Ok(())
    }
}

fn identifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z_][a-z0-9_]{0,62}$").expect("valid identifier regex"))
}

fn credentials_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<user>.+?)/(?P<password>.+?)@(?P<host>[^:/@]+):(?P<port>\d+)[:/](?P<database>[^:/]+)$")
            .expect("valid credentials regex")
    })
}

/// Database connection configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl ConnectionConfig {
    /// Parses `user/password@host:port:database`. `host:port/database` is
    /// accepted as well.
    pub fn parse_credentials(value: &str) -> Result<Self> {
        let caps = credentials_regex()
            .captures(value.trim())
            .ok_or_else(|| CheckError::config(CREDENTIALS_FORMAT))?;

        let port = caps["port"]
            .parse::<u16>()
            .map_err(|_| CheckError::config(CREDENTIALS_FORMAT))?;

        Ok(Self {
            host: caps["host"].to_string(),
            port,
            database: caps["database"].to_string(),
            user: caps["user"].to_string(),
            password: caps["password"].to_string(),
        })
    }

    /// Converts the connection config to a `postgres://` URL with
    /// percent-encoded credentials.
    pub fn to_connection_string(&self) -> Result<String> {
        let invalid = || CheckError::config(format!("Invalid connection settings for {}", self.display_string()));

        let mut url = Url::parse("postgres://localhost").map_err(|_| invalid())?;
        url.set_host(Some(&self.host)).map_err(|_| invalid())?;
        url.set_port(Some(self.port)).map_err(|_| invalid())?;
        url.set_username(&self.user).map_err(|_| invalid())?;
        url.set_password(Some(&self.password)).map_err(|_| invalid())?;
        url.set_path(&self.database);

        Ok(url.to_string())
    }

    /// Returns a display-safe string (no password) for log output.
    pub fn display_string(&self) -> String {
        format!("{}@{}:{}/{}", self.user, self.host, self.port, self.database)
    }
}
