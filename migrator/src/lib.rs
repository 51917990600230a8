#![cfg_attr(docsrs, feature(doc_cfg))]
//! `migrator` is a framework-agnostic engine for plain-SQL database migrations.
//!
//! Core concepts:
//! - A migration is one `.sql` file named `<version>_<name>.sql`, where the version is a
//!   sortable timestamp such as `20240101120000`.
//! - Each file has a `-- migrate:up` block and optionally a `-- migrate:down` block. A directive
//!   line may carry `key:value` options, e.g. `-- migrate:up transaction:false`.
//! - Applied versions are recorded in a history table (default `schema_history`) so each
//!   file runs at most once per database.
//!
//! # Example migration file
//!
//! ```sql
//! -- migrate:up
//! create table users (id integer primary key, email varchar(255) not null);
//!
//! -- migrate:down
//! drop table users;
//! ```
//!
//! # Usage
//!
//! Build a [MigratorConfig], resolve a driver for its URL from a [BackendRegistry], and call
//! operations on the resulting [Migrator]:
//!
//! - [Migrator::new_migration] writes an empty migration file.
//! - [Migrator::migrate] / [Migrator::up] apply pending files in version order.
//! - [Migrator::rollback] / [Migrator::down] revert the most recently applied files.
//! - [Migrator::status] / [Migrator::check_status] list files with their applied state.
//! - [Migrator::dump_schema] writes the current schema to a file.
//!
//! Each file's up (or down) block runs together with its history write in one transaction,
//! unless the block sets `transaction:false`.
//!
//! # Feature flags
//!
//! - [`sqlite`](sqlite) (default): SQLite driver, for `sqlite:` and `sqlite3:` URLs.
//! - [`mysql`](mysql): MySQL driver, for `mysql:` URLs.
//! - [`postgres`](postgres): PostgreSQL driver, for `postgres:` and `postgresql:` URLs.
//! - `tracing`: emit spans and events through [tracing](https://docs.rs/tracing).
//! - `testing`: the [testing] module with an in-memory backend and fixtures.

mod core;
pub use core::{MigrationReport, StatusResult, MIGRATION_TEMPLATE};

mod error;
pub use error::Error;

pub mod backend;
pub use backend::{Backend, BackendConfig, BackendRegistry, Connection, Executor, Transaction};

mod config;
pub use config::{
    MigratorConfig, DEFAULT_MIGRATIONS_DIR, DEFAULT_MIGRATIONS_TABLE, DEFAULT_SCHEMA_FILE,
};

pub mod files;
pub use files::MigrationFile;

pub mod parser;

mod migrator;
pub use migrator::{new_migration_file, Migrator};

#[cfg(feature = "sqlite")]
#[cfg_attr(docsrs, doc(cfg(feature = "sqlite")))]
pub mod sqlite;

#[cfg(feature = "mysql")]
#[cfg_attr(docsrs, doc(cfg(feature = "mysql")))]
pub mod mysql;

#[cfg(feature = "postgres")]
#[cfg_attr(docsrs, doc(cfg(feature = "postgres")))]
pub mod postgres;

#[cfg(any(test, feature = "testing"))]
#[cfg_attr(docsrs, doc(cfg(feature = "testing")))]
pub mod testing;

#[cfg(all(test, feature = "mysql"))]
pub(crate) mod test_mysql;

#[cfg(all(test, feature = "postgres"))]
pub(crate) mod test_postgres;
