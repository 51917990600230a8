use crate::files::MigrationFile;
use serde::Serialize;

/// Template written by [Migrator::new_migration](crate::Migrator::new_migration).
pub const MIGRATION_TEMPLATE: &str = "-- migrate:up\n\n\n-- migrate:down\n\n";

/// A report of actions performed during a migrate or rollback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Versions applied (or rolled back), in the order they ran.
    pub migrations_run: Vec<String>,
    /// Whether the schema file was rewritten afterwards.
    pub schema_dumped: bool,
}

/// Whether one migration file has been applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusResult {
    #[serde(flatten)]
    pub file: MigrationFile,
    pub applied: bool,
}

/// Which block of a migration file is being run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Up,
    Down,
}

impl Direction {
    #[cfg_attr(not(feature = "tracing"), allow(dead_code))]
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}
