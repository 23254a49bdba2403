//! Command-line argument parsing for checksql.

use crate::config::{ConnectionConfig, Settings};
use crate::db::TargetRole;
use crate::error::Result;
use clap::Parser;
use std::path::PathBuf;

/// Compile-checks SQL and PL/pgSQL fragments stored in application tables
/// against a test schema.
#[derive(Parser, Debug)]
#[command(name = "checksql")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Owner schema credentials: <username>/<password>@<host>:<port>:<database>
    #[arg(value_name = "OWNER", env = "CHECKSQL_OWNER")]
    pub owner: String,

    /// Test schema credentials. Compile checks run in the owner schema when omitted.
    #[arg(value_name = "TEST", env = "CHECKSQL_TEST")]
    pub test: Option<String>,

    /// JSON catalog file (overrides the config file and the built-in catalog)
    #[arg(long, value_name = "PATH")]
    pub catalog: Option<PathBuf>,

    /// Config file path
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only drop leftover transient objects, then exit
    #[arg(long)]
    pub drop_only: bool,

    /// Write the log to a file (default location when PATH is omitted)
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<Option<PathBuf>>,
}

impl Cli {
    /// Parses command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Owner connection.
    pub fn owner_config(&self) -> Result<ConnectionConfig> {
        ConnectionConfig::parse_credentials(&self.owner)
    }

    /// Separate test connection, if one was given.
    pub fn test_config(&self) -> Result<Option<ConnectionConfig>> {
        self.test
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .map(ConnectionConfig::parse_credentials)
            .transpose()
    }

    /// Which schema receives the compile checks.
    pub fn target_role(&self) -> TargetRole {
        match self.test.as_deref() {
            Some(t) if !t.trim().is_empty() => TargetRole::Secondary,
            _ => TargetRole::Primary,
        }
    }

    /// Returns the config file path to use.
    ///
    /// Uses the --config argument if provided, otherwise the default path.
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(Settings::default_path)
    }

    /// Catalog file to load: --catalog first, then the config file.
    pub fn catalog_path(&self, settings: &Settings) -> Option<PathBuf> {
        self.catalog
            .clone()
            .or_else(|| settings.catalog.path.clone())
    }

    /// Log file, if file logging was requested.
    pub fn log_path(&self) -> Option<PathBuf> {
        self.log_file
            .as_ref()
            .map(|p| p.clone().unwrap_or_else(crate::logging::default_log_path))
    }
}
