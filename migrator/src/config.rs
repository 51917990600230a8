//! Settings for a [Migrator](crate::Migrator).

use crate::backend::BackendConfig;
use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_MIGRATIONS_DIR: &str = "./db/migrations";
pub const DEFAULT_MIGRATIONS_TABLE: &str = "schema_history";
pub const DEFAULT_SCHEMA_FILE: &str = "./db/schema.sql";

/// Settings for a migrator. Deserializable so callers can load it from a config file; every
/// field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigratorConfig {
    /// Database URL, e.g. `postgres://localhost/app` or `sqlite:db/app.sqlite3`.
    pub database_url: Option<String>,
    /// Overrides the user in `database_url`.
    pub database_user: Option<String>,
    /// Overrides the password in `database_url`.
    pub database_password: Option<String>,
    pub migrations_dir: PathBuf,
    /// Name of the history table.
    pub migrations_table: String,
    /// Where schema dumps are written.
    pub schema_file: PathBuf,
    /// Dump the schema after every successful migrate / rollback.
    pub auto_dump_schema: bool,
    /// Report rows affected by each migration.
    pub verbose: bool,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            database_user: None,
            database_password: None,
            migrations_dir: PathBuf::from(DEFAULT_MIGRATIONS_DIR),
            migrations_table: DEFAULT_MIGRATIONS_TABLE.to_string(),
            schema_file: PathBuf::from(DEFAULT_SCHEMA_FILE),
            auto_dump_schema: false,
            verbose: false,
        }
    }
}

impl MigratorConfig {
    /// The connection descriptor handed to the driver.
    pub fn backend_config(&self) -> Result<BackendConfig, Error> {
        let url = self
            .database_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .ok_or_else(|| Error::Argument("a database url is required".to_string()))?;

        Ok(BackendConfig::parse(url, self.migrations_table.clone())?
            .with_credentials(self.database_user.clone(), self.database_password.clone()))
    }
}
