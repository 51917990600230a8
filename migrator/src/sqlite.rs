//! SQLite driver, registered for the `sqlite` and `sqlite3` URL schemes.
//!
//! The database is a file named by the URL:
//!
//! - `sqlite:db/app.sqlite3` and `sqlite://db/app.sqlite3` are relative to the working
//!   directory.
//! - `sqlite:///var/lib/app.sqlite3` is absolute.
//!
//! Creating the database creates the file and dropping it deletes the file.
//!
//! # Example
//!
//! ```
//! use migrator::sqlite::SqliteBackend;
//! use migrator::Migrator;
//!
//! let dir = tempfile::tempdir()?;
//! let backend = SqliteBackend::new(dir.path().join("app.sqlite3"), "schema_history");
//! let migrator = Migrator::with_backend(Box::new(backend))
//!     .with_migrations_dir(dir.path().join("migrations"));
//! assert!(migrator.ping().is_ok());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::backend::{
    quote_identifier, versions_insert, Backend, BackendConfig, Connection, ExecResult, Executor,
    Transaction,
};
use crate::error::Error;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Opens connections to one SQLite database file.
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    path: PathBuf,
    migrations_table: String,
    busy_timeout: Duration,
}

impl SqliteBackend {
    pub fn new(path: impl Into<PathBuf>, migrations_table: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            migrations_table: migrations_table.into(),
            busy_timeout: Duration::from_secs(30),
        }
    }

    pub fn from_config(config: &BackendConfig) -> Result<Self, Error> {
        Ok(Self::new(
            database_path(&config.url)?,
            config.migrations_table.clone(),
        ))
    }

    /// Set the busy timeout for SQLite database operations.
    /// This controls how long a migration waits for a lock held by another process.
    /// Defaults to 30 seconds.
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<rusqlite::Connection, Error> {
        let conn = rusqlite::Connection::open(&self.path).map_err(|e| {
            Error::Connection(format!("unable to open `{}`: {}", self.path.display(), e))
        })?;
        conn.busy_timeout(self.busy_timeout)?;
        Ok(conn)
    }
}

/// Resolve the database file named by a `sqlite:` URL.
fn database_path(url: &Url) -> Result<PathBuf, Error> {
    let path = match url.host_str() {
        Some(host) if !host.is_empty() => format!("{}{}", host, url.path()),
        _ => url.path().to_string(),
    };
    if path.is_empty() || path == "/" {
        return Err(Error::Argument(format!(
            "database url `{}` does not name a file",
            url
        )));
    }
    Ok(PathBuf::from(path))
}

impl Backend for SqliteBackend {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn open(&self) -> Result<Box<dyn Connection>, Error> {
        #[cfg(feature = "tracing")]
        tracing::debug!(path = %self.path.display(), "Opening SQLite database");

        Ok(Box::new(SqliteConnection {
            conn: self.connect()?,
            migrations_table: quote_identifier(&self.migrations_table, '"'),
        }))
    }

    fn database_exists(&self) -> Result<bool, Error> {
        Ok(self.path.exists())
    }

    fn create_database(&self) -> Result<(), Error> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        // opening the file creates it
        self.connect()?.execute_batch("SELECT 1")?;
        Ok(())
    }

    fn drop_database(&self) -> Result<(), Error> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

struct SqliteConnection {
    conn: rusqlite::Connection,
    /// Already quoted.
    migrations_table: String,
}

impl Executor for SqliteConnection {
    fn execute(&mut self, sql: &str) -> Result<ExecResult, Error> {
        execute(&self.conn, sql)
    }

    fn insert_version(&mut self, version: &str) -> Result<(), Error> {
        insert_version(&self.conn, &self.migrations_table, version)
    }

    fn delete_version(&mut self, version: &str) -> Result<(), Error> {
        delete_version(&self.conn, &self.migrations_table, version)
    }
}

impl Connection for SqliteConnection {
    fn ensure_migrations_table(&mut self) -> Result<(), Error> {
        self.conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (version VARCHAR(255) PRIMARY KEY)",
                self.migrations_table
            ),
            [],
        )?;
        Ok(())
    }

    fn select_applied_versions(&mut self, limit: Option<usize>) -> Result<Vec<String>, Error> {
        let mut query = format!(
            "SELECT version FROM {} ORDER BY version DESC",
            self.migrations_table
        );
        if let Some(limit) = limit {
            query.push_str(&format!(" LIMIT {}", limit));
        }
        let mut stmt = self.conn.prepare(&query)?;
        let versions = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(versions)
    }

    fn begin(&mut self) -> Result<Box<dyn Transaction + '_>, Error> {
        Ok(Box::new(SqliteTransaction {
            tx: self.conn.transaction()?,
            migrations_table: &self.migrations_table,
        }))
    }

    fn dump_schema(&mut self) -> Result<Vec<u8>, Error> {
        let statements = {
            let mut stmt = self.conn.prepare(
                "SELECT sql FROM sqlite_master \
                 WHERE sql IS NOT NULL AND name NOT LIKE 'sqlite_%' \
                 ORDER BY CASE type WHEN 'table' THEN 0 WHEN 'index' THEN 1 ELSE 2 END, name",
            )?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let mut schema = String::new();
        for statement in statements {
            schema.push_str(&statement);
            schema.push_str(";\n");
        }

        let versions = self.select_applied_versions(None)?;
        schema.push_str(&versions_insert(&self.migrations_table, &versions));
        Ok(schema.into_bytes())
    }

    fn ping(&mut self) -> Result<(), Error> {
        self.conn.execute_batch("SELECT 1")?;
        Ok(())
    }
}

struct SqliteTransaction<'conn> {
    tx: rusqlite::Transaction<'conn>,
    migrations_table: &'conn str,
}

impl Executor for SqliteTransaction<'_> {
    fn execute(&mut self, sql: &str) -> Result<ExecResult, Error> {
        execute(&self.tx, sql)
    }

    fn insert_version(&mut self, version: &str) -> Result<(), Error> {
        insert_version(&self.tx, self.migrations_table, version)
    }

    fn delete_version(&mut self, version: &str) -> Result<(), Error> {
        delete_version(&self.tx, self.migrations_table, version)
    }
}

impl Transaction for SqliteTransaction<'_> {
    fn commit(self: Box<Self>) -> Result<(), Error> {
        let this = *self;
        this.tx.commit()?;
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<(), Error> {
        let this = *self;
        this.tx.rollback()?;
        Ok(())
    }
}

fn execute(conn: &rusqlite::Connection, sql: &str) -> Result<ExecResult, Error> {
    conn.execute_batch(sql)?;
    Ok(ExecResult {
        rows_affected: Some(conn.changes() as u64),
        last_insert_id: u64::try_from(conn.last_insert_rowid())
            .ok()
            .filter(|id| *id > 0),
    })
}

fn insert_version(conn: &rusqlite::Connection, table: &str, version: &str) -> Result<(), Error> {
    conn.execute(
        &format!("INSERT INTO {} (version) VALUES (?1)", table),
        [version],
    )
    .map_err(|e| Error::Record {
        version: version.to_string(),
        message: e.to_string(),
    })?;
    Ok(())
}

fn delete_version(conn: &rusqlite::Connection, table: &str, version: &str) -> Result<(), Error> {
    conn.execute(&format!("DELETE FROM {} WHERE version = ?1", table), [version])
        .map_err(|e| Error::Record {
            version: version.to_string(),
            message: e.to_string(),
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MigrationDir, OutputBuffer};
    use crate::{BackendRegistry, Migrator, MigratorConfig};

    fn table_names(path: &Path) -> Vec<String> {
        let conn = rusqlite::Connection::open(path).unwrap();
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<String>, _>>()
            .unwrap()
    }

    fn migrator(dir: &MigrationDir) -> (Migrator, PathBuf) {
        let db = dir.path().join("test.sqlite3");
        let backend = SqliteBackend::new(&db, "schema_history");
        let migrator = Migrator::with_backend(Box::new(backend))
            .with_migrations_dir(dir.path())
            .with_output(OutputBuffer::new());
        (migrator, db)
    }

    #[test]
    fn resolves_database_paths() {
        let path = |url: &str| database_path(&Url::parse(url).unwrap());
        assert_eq!(path("sqlite:db/app.sqlite3").unwrap(), PathBuf::from("db/app.sqlite3"));
        assert_eq!(path("sqlite://db/app.sqlite3").unwrap(), PathBuf::from("db/app.sqlite3"));
        assert_eq!(path("sqlite:///tmp/app.db").unwrap(), PathBuf::from("/tmp/app.db"));
        assert_eq!(path("sqlite3:/tmp/app.db").unwrap(), PathBuf::from("/tmp/app.db"));
        assert!(matches!(path("sqlite://"), Err(Error::Argument(_))));
    }

    #[test]
    fn migrate_and_rollback_end_to_end() {
        let dir = MigrationDir::new().unwrap();
        dir.add_simple(
            "20210101000000",
            "users",
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);",
            "DROP TABLE users;",
        )
        .unwrap();
        dir.add_simple(
            "20210102000000",
            "posts",
            "CREATE TABLE posts (id INTEGER PRIMARY KEY);\nCREATE INDEX posts_id ON posts (id);",
            "DROP TABLE posts;",
        )
        .unwrap();
        let (mut migrator, db) = migrator(&dir);

        let report = migrator.migrate().unwrap();
        assert_eq!(report.migrations_run.len(), 2);
        assert_eq!(table_names(&db), vec!["posts", "schema_history", "users"]);
        assert_eq!(migrator.status(true).unwrap(), 0);

        migrator.rollback().unwrap();
        assert_eq!(table_names(&db), vec!["schema_history", "users"]);
        assert_eq!(migrator.status(true).unwrap(), 1);
    }

    #[test]
    fn failed_migration_leaves_no_trace() {
        let dir = MigrationDir::new().unwrap();
        dir.add_simple(
            "001",
            "broken",
            "CREATE TABLE users (id INTEGER PRIMARY KEY);\nbleep blorp;",
            "DROP TABLE users;",
        )
        .unwrap();
        let (mut migrator, db) = migrator(&dir);

        assert!(matches!(migrator.migrate(), Err(Error::Sqlite(_))));
        assert_eq!(table_names(&db), vec!["schema_history"]);
        assert_eq!(migrator.status(true).unwrap(), 1);
    }

    #[test]
    fn duplicate_history_row_is_a_record_error() {
        let dir = MigrationDir::new().unwrap();
        let backend = SqliteBackend::new(dir.path().join("test.sqlite3"), "schema_history");
        let mut conn = backend.open().unwrap();
        conn.ensure_migrations_table().unwrap();
        conn.ensure_migrations_table().unwrap();

        conn.insert_version("001").unwrap();
        assert!(matches!(
            conn.insert_version("001"),
            Err(Error::Record { ref version, .. }) if version == "001"
        ));
    }

    #[test]
    fn locked_database_fails_after_busy_timeout() {
        let dir = MigrationDir::new().unwrap();
        dir.add_simple("001", "users", "CREATE TABLE users (id INTEGER);", "DROP TABLE users;")
            .unwrap();
        let db = dir.path().join("test.sqlite3");
        let holder = rusqlite::Connection::open(&db).unwrap();
        holder.execute_batch("BEGIN EXCLUSIVE;").unwrap();

        let backend =
            SqliteBackend::new(&db, "schema_history").with_busy_timeout(Duration::from_millis(100));
        let mut migrator = Migrator::with_backend(Box::new(backend))
            .with_migrations_dir(dir.path())
            .with_output(OutputBuffer::new());

        let started = std::time::Instant::now();
        assert!(migrator.migrate().is_err());
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(50), "gave up after {:?}", waited);
        assert!(waited < Duration::from_secs(10), "waited {:?}", waited);

        holder.execute_batch("COMMIT;").unwrap();
        migrator.migrate().unwrap();
        assert_eq!(table_names(&db), vec!["schema_history", "users"]);
    }

    #[test]
    fn transaction_dropped_without_commit_rolls_back() {
        let dir = MigrationDir::new().unwrap();
        let backend = SqliteBackend::new(dir.path().join("test.sqlite3"), "schema_history");
        let mut conn = backend.open().unwrap();
        conn.ensure_migrations_table().unwrap();
        {
            let mut tx = conn.begin().unwrap();
            tx.execute("CREATE TABLE t (id INTEGER);").unwrap();
            tx.insert_version("001").unwrap();
        }
        assert!(conn.select_applied_versions(None).unwrap().is_empty());
        assert_eq!(table_names(backend.path()), vec!["schema_history"]);
    }

    #[test]
    fn selects_newest_first_with_limit() {
        let dir = MigrationDir::new().unwrap();
        let backend = SqliteBackend::new(dir.path().join("test.sqlite3"), "schema_history");
        let mut conn = backend.open().unwrap();
        conn.ensure_migrations_table().unwrap();
        for version in ["002", "001", "003"] {
            conn.insert_version(version).unwrap();
        }
        assert_eq!(
            conn.select_applied_versions(None).unwrap(),
            vec!["003", "002", "001"]
        );
        assert_eq!(conn.select_applied_versions(Some(1)).unwrap(), vec!["003"]);

        conn.delete_version("003").unwrap();
        assert_eq!(conn.select_applied_versions(Some(1)).unwrap(), vec!["002"]);
    }

    #[test]
    fn execute_reports_rows_and_insert_id() {
        let dir = MigrationDir::new().unwrap();
        let backend = SqliteBackend::new(dir.path().join("test.sqlite3"), "schema_history");
        let mut conn = backend.open().unwrap();
        conn.execute("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT);").unwrap();
        let result = conn
            .execute("INSERT INTO t (v) VALUES ('a'); INSERT INTO t (v) VALUES ('b');")
            .unwrap();
        assert_eq!(result.rows_affected, Some(1));
        assert_eq!(result.last_insert_id, Some(2));
    }

    #[test]
    fn dump_includes_schema_and_history() {
        let dir = MigrationDir::new().unwrap();
        dir.add_simple(
            "20210101000000",
            "users",
            "CREATE TABLE users (id INTEGER PRIMARY KEY);",
            "DROP TABLE users;",
        )
        .unwrap();
        let (migrator, _) = migrator(&dir);
        let schema = dir.path().join("out").join("schema.sql");
        let mut migrator = migrator.with_schema_file(&schema);
        migrator.migrate().unwrap();

        assert_eq!(migrator.dump_schema().unwrap(), schema);
        let dumped = fs::read_to_string(&schema).unwrap();
        assert!(dumped.contains("CREATE TABLE users (id INTEGER PRIMARY KEY);"));
        assert!(dumped.contains("\"schema_history\" (version VARCHAR(255) PRIMARY KEY);"));
        assert!(dumped.contains("INSERT INTO \"schema_history\" (version) VALUES\n    ('20210101000000');"));
    }

    #[test]
    fn custom_history_table_name_is_quoted() {
        let dir = MigrationDir::new().unwrap();
        let backend = SqliteBackend::new(dir.path().join("test.sqlite3"), "my history");
        let mut conn = backend.open().unwrap();
        conn.ensure_migrations_table().unwrap();
        conn.insert_version("001").unwrap();
        assert_eq!(table_names(backend.path()), vec!["my history"]);
    }

    #[test]
    fn create_and_drop_database() {
        let dir = MigrationDir::new().unwrap();
        let backend = SqliteBackend::new(dir.path().join("nested").join("app.sqlite3"), "h");

        assert!(!backend.database_exists().unwrap());
        backend.create_database().unwrap();
        assert!(backend.database_exists().unwrap());
        backend.drop_database().unwrap();
        assert!(!backend.database_exists().unwrap());
        // dropping a missing database is not an error
        backend.drop_database().unwrap();
    }

    #[test]
    fn resolves_from_default_registry() {
        let dir = MigrationDir::new().unwrap();
        dir.add_simple("001", "t", "CREATE TABLE t (id INTEGER);", "DROP TABLE t;")
            .unwrap();
        let config = MigratorConfig {
            database_url: Some(format!("sqlite3:{}", dir.path().join("app.db").display())),
            migrations_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let mut migrator = Migrator::new(&config, &BackendRegistry::with_default_drivers())
            .unwrap()
            .with_output(io::sink());
        assert_eq!(migrator.backend().name(), "sqlite");
        assert_eq!(migrator.migrate().unwrap().migrations_run, vec!["001"]);
    }
}
