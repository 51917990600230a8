use crate::backend::{Backend, BackendRegistry, Connection, ExecResult, Executor};
use crate::config::MigratorConfig;
use crate::core::{Direction, MigrationReport, StatusResult, MIGRATION_TEMPLATE};
use crate::error::Error;
use crate::files::{
    ensure_dir, find_migration_file, find_migration_files, migration_filename, new_version,
    MigrationFile,
};
use crate::parser::{parse_migration, Migration};
use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

type StartHook = Box<dyn Fn(&str, &str) + Send + Sync>;
type CompleteHook = Box<dyn Fn(&str, &str, Duration) + Send + Sync>;
type ErrorHook = Box<dyn Fn(&str, &str, &Error) + Send + Sync>;

/// The entrypoint for creating, applying, inspecting and rolling back migration files.
///
/// A migrator holds no migration state of its own: every call re-reads the migrations
/// directory and the history table, and opens one connection that is released before the
/// call returns.
///
/// Concurrent migrators pointed at the same database are not coordinated. Two of them running
/// at once can apply the same file twice.
///
/// ```
/// use migrator::{BackendRegistry, Migrator, MigratorConfig};
///
/// let dir = tempfile::tempdir()?;
/// let migrations = dir.path().join("migrations");
/// std::fs::create_dir(&migrations)?;
/// std::fs::write(
///     migrations.join("001_create_users.sql"),
///     "-- migrate:up\ncreate table users (id int);\n\n-- migrate:down\ndrop table users;\n",
/// )?;
///
/// let config = MigratorConfig {
///     database_url: Some(format!("sqlite:{}", dir.path().join("app.sqlite3").display())),
///     migrations_dir: migrations,
///     ..Default::default()
/// };
/// let mut migrator = Migrator::new(&config, &BackendRegistry::with_default_drivers())?
///     .with_output(std::io::sink());
///
/// let report = migrator.migrate()?;
/// assert_eq!(report.migrations_run, vec!["001"]);
/// assert_eq!(migrator.status(true)?, 0);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Migrator {
    backend: Box<dyn Backend>,
    migrations_dir: PathBuf,
    schema_file: PathBuf,
    auto_dump_schema: bool,
    verbose: bool,
    output: Box<dyn Write + Send>,
    on_migration_start: Option<StartHook>,
    on_migration_complete: Option<CompleteHook>,
    on_migration_error: Option<ErrorHook>,
}

// Manual Debug impl since closures don't implement Debug
impl std::fmt::Debug for Migrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migrator")
            .field("backend", &self.backend.name())
            .field("migrations_dir", &self.migrations_dir)
            .field("schema_file", &self.schema_file)
            .field("auto_dump_schema", &self.auto_dump_schema)
            .field("verbose", &self.verbose)
            .field("on_migration_start", &self.on_migration_start.is_some())
            .field(
                "on_migration_complete",
                &self.on_migration_complete.is_some(),
            )
            .field("on_migration_error", &self.on_migration_error.is_some())
            .finish()
    }
}

impl Migrator {
    /// Build a migrator from `config`, resolving its driver from `registry` by URL scheme.
    pub fn new(config: &MigratorConfig, registry: &BackendRegistry) -> Result<Self, Error> {
        let backend = registry.resolve(&config.backend_config()?)?;
        Ok(Self::with_backend(backend).with_config(config))
    }

    /// Build a migrator around an already constructed backend, with default settings.
    pub fn with_backend(backend: Box<dyn Backend>) -> Self {
        let defaults = MigratorConfig::default();
        Self {
            backend,
            migrations_dir: defaults.migrations_dir,
            schema_file: defaults.schema_file,
            auto_dump_schema: defaults.auto_dump_schema,
            verbose: defaults.verbose,
            output: Box::new(io::stdout()),
            on_migration_start: None,
            on_migration_complete: None,
            on_migration_error: None,
        }
    }

    /// Apply the directory, schema-file, dump and verbosity settings of `config`.
    pub fn with_config(self, config: &MigratorConfig) -> Self {
        self.with_migrations_dir(&config.migrations_dir)
            .with_schema_file(&config.schema_file)
            .with_auto_dump_schema(config.auto_dump_schema)
            .with_verbose(config.verbose)
    }

    pub fn with_migrations_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.migrations_dir = dir.into();
        self
    }

    pub fn with_schema_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.schema_file = path.into();
        self
    }

    /// Dump the schema after every successful migrate or rollback. Dump failures are ignored.
    pub fn with_auto_dump_schema(mut self, enabled: bool) -> Self {
        self.auto_dump_schema = enabled;
        self
    }

    /// Report rows affected / last insert id after each executed block.
    pub fn with_verbose(mut self, enabled: bool) -> Self {
        self.verbose = enabled;
        self
    }

    /// Where progress lines are written. Defaults to stdout.
    pub fn with_output(mut self, output: impl Write + Send + 'static) -> Self {
        self.output = Box::new(output);
        self
    }

    /// Set a callback to be invoked when a migration starts.
    /// The callback receives the migration version and filename.
    pub fn on_migration_start<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.on_migration_start = Some(Box::new(callback));
        self
    }

    /// Set a callback to be invoked when a migration completes successfully.
    /// The callback receives the migration version, filename, and duration.
    pub fn on_migration_complete<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, &str, Duration) + Send + Sync + 'static,
    {
        self.on_migration_complete = Some(Box::new(callback));
        self
    }

    /// Set a callback to be invoked when a migration fails.
    /// The callback receives the migration version, filename, and error.
    pub fn on_migration_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, &str, &Error) + Send + Sync + 'static,
    {
        self.on_migration_error = Some(Box::new(callback));
        self
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    pub fn migrations_dir(&self) -> &Path {
        &self.migrations_dir
    }

    pub fn schema_file(&self) -> &Path {
        &self.schema_file
    }

    /// Create a new, empty migration file named `<timestamp>_<name>.sql`.
    pub fn new_migration(&mut self, name: &str) -> Result<PathBuf, Error> {
        self.create_migration(&new_version(), name)
    }

    pub(crate) fn create_migration(&mut self, version: &str, name: &str) -> Result<PathBuf, Error> {
        write_migration(&self.migrations_dir, version, name, &mut self.output)
    }

    /// Apply every pending migration.
    pub fn migrate(&mut self) -> Result<MigrationReport, Error> {
        self.up(0)
    }

    /// Apply pending migrations in version order. `step == 0` applies all of them, otherwise at
    /// most `step`.
    ///
    /// Each file's up block and its history insert run in one transaction unless the block sets
    /// `transaction:false`. The first failure stops the run and is returned; files applied before
    /// it stay applied.
    pub fn up(&mut self, step: usize) -> Result<MigrationReport, Error> {
        let files = find_migration_files(&self.migrations_dir)?;
        let mut conn = self.open_for_migration()?;
        let applied: HashSet<String> = conn.select_applied_versions(None)?.into_iter().collect();

        let mut pending = Vec::new();
        for file in files {
            if applied.contains(&file.version) {
                #[cfg(feature = "tracing")]
                tracing::debug!(version = %file.version, "Skipping migration (already applied)");
                continue;
            }
            pending.push(file);
        }
        if step > 0 {
            pending.truncate(step);
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            applied = applied.len(),
            pending = ?pending.iter().map(|f| f.version.as_str()).collect::<Vec<_>>(),
            step = step,
            "Considering migrations to run"
        );

        let mut report = MigrationReport::default();
        for file in &pending {
            self.run_file(conn.as_mut(), file, Direction::Up)?;
            report.migrations_run.push(file.version.clone());
        }

        report.schema_dumped = self.auto_dump(conn.as_mut());
        Ok(report)
    }

    /// Roll back the most recently applied migration.
    pub fn rollback(&mut self) -> Result<MigrationReport, Error> {
        self.down(1)
    }

    /// Roll back the `step` most recently applied migrations, newest first.
    ///
    /// Each step is independent: if step `k` fails, steps before it stay rolled back.
    pub fn down(&mut self, step: usize) -> Result<MigrationReport, Error> {
        let mut conn = self.open_for_migration()?;
        let mut report = MigrationReport::default();

        for _ in 0..step {
            let latest = conn
                .select_applied_versions(Some(1))?
                .into_iter()
                .next()
                .ok_or(Error::NothingToRollback)?;

            let file = match find_migration_file(&self.migrations_dir, &latest) {
                Err(Error::NoMigrationsFound(_)) => Err(Error::FileNotFound(latest.clone())),
                other => other,
            }?;

            self.run_file(conn.as_mut(), &file, Direction::Down)?;
            report.migrations_run.push(latest);
        }

        report.schema_dumped = self.auto_dump(conn.as_mut());
        Ok(report)
    }

    /// Pair every migration file with whether it has been applied.
    pub fn check_status(&mut self) -> Result<Vec<StatusResult>, Error> {
        let files = find_migration_files(&self.migrations_dir)?;
        let mut conn = self.open_for_migration()?;
        let applied: HashSet<String> = conn.select_applied_versions(None)?.into_iter().collect();

        Ok(files
            .into_iter()
            .map(|file| {
                let applied = applied.contains(&file.version);
                StatusResult { file, applied }
            })
            .collect())
    }

    /// Print every migration file with its state, followed by totals, and return the number of
    /// pending migrations. `quiet` suppresses all output.
    pub fn status(&mut self, quiet: bool) -> Result<usize, Error> {
        let results = self.check_status()?;
        let applied = results.iter().filter(|r| r.applied).count();
        let pending = results.len() - applied;

        if !quiet {
            for result in &results {
                let mark = if result.applied { "X" } else { " " };
                writeln!(self.output, "[{}] {}", mark, result.file.filename)?;
            }
            writeln!(self.output)?;
            writeln!(self.output, "Applied: {}", applied)?;
            writeln!(self.output, "Pending: {}", pending)?;
        }

        Ok(pending)
    }

    /// Write the database schema to the configured schema file.
    pub fn dump_schema(&mut self) -> Result<PathBuf, Error> {
        let mut conn = self.open_for_migration()?;
        self.dump_schema_with(conn.as_mut())
    }

    /// Check the database is reachable.
    pub fn ping(&self) -> Result<(), Error> {
        self.backend.ping()
    }

    fn open_for_migration(&self) -> Result<Box<dyn Connection>, Error> {
        let mut conn = self.backend.open()?;
        conn.ensure_migrations_table()?;
        Ok(conn)
    }

    fn run_file(
        &mut self,
        conn: &mut dyn Connection,
        file: &MigrationFile,
        direction: Direction,
    ) -> Result<(), Error> {
        #[cfg(feature = "tracing")]
        let _span = tracing::info_span!(
            "migration",
            direction = direction.as_str(),
            version = %file.version,
            file = %file.filename
        )
        .entered();

        match direction {
            Direction::Up => writeln!(self.output, "Applying: {}", file.filename)?,
            Direction::Down => writeln!(self.output, "Rolling back: {}", file.filename)?,
        }

        if let Some(ref callback) = self.on_migration_start {
            callback(&file.version, &file.filename);
        }
        let started = Instant::now();

        match self.execute_file(conn, file, direction) {
            Ok(()) => {
                let duration = started.elapsed();

                #[cfg(feature = "tracing")]
                tracing::info!(
                    duration_ms = duration.as_millis(),
                    "Migration {} completed",
                    direction.as_str()
                );

                if let Some(ref callback) = self.on_migration_complete {
                    callback(&file.version, &file.filename, duration);
                }
                Ok(())
            }
            Err(error) => {
                #[cfg(feature = "tracing")]
                tracing::error!(error = %error, "Migration {} failed", direction.as_str());

                if let Some(ref callback) = self.on_migration_error {
                    callback(&file.version, &file.filename, &error);
                }
                Err(error)
            }
        }
    }

    fn execute_file(
        &mut self,
        conn: &mut dyn Connection,
        file: &MigrationFile,
        direction: Direction,
    ) -> Result<(), Error> {
        let (up, down) = parse_migration(&file.read()?)?;
        let migration = match direction {
            Direction::Up => up,
            Direction::Down => down,
        };

        if direction == Direction::Down && !migration.has_statements() {
            return Err(Error::MalformedMigration(format!(
                "{} has no '-- migrate:down' statements to roll back",
                file.filename
            )));
        }

        if !migration.options.transaction() {
            // The SQL and the history write are separate calls here. If the history write fails
            // the SQL stays applied and the file is still pending.
            return self.execute_block(conn, &migration, &file.version, direction);
        }

        let mut tx = conn.begin()?;
        match self.execute_block(tx.as_mut(), &migration, &file.version, direction) {
            Ok(()) => tx.commit(),
            Err(error) => {
                if let Err(_rollback_error) = tx.rollback() {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(error = %_rollback_error, "Failed to roll back transaction");
                }
                Err(error)
            }
        }
    }

    fn execute_block<E: Executor + ?Sized>(
        &mut self,
        executor: &mut E,
        migration: &Migration,
        version: &str,
        direction: Direction,
    ) -> Result<(), Error> {
        if migration.has_statements() {
            let result = executor.execute(&migration.contents)?;
            if self.verbose {
                self.print_verbose(&result)?;
            }
        }

        match direction {
            Direction::Up => executor.insert_version(version),
            Direction::Down => executor.delete_version(version),
        }
    }

    fn print_verbose(&mut self, result: &ExecResult) -> Result<(), Error> {
        if let Some(id) = result.last_insert_id {
            writeln!(self.output, "Last insert ID: {}", id)?;
        }
        if let Some(rows) = result.rows_affected {
            writeln!(self.output, "Rows affected: {}", rows)?;
        }
        Ok(())
    }

    fn dump_schema_with(&mut self, conn: &mut dyn Connection) -> Result<PathBuf, Error> {
        let schema = conn.dump_schema()?;

        writeln!(self.output, "Writing: {}", self.schema_file.display())?;
        if let Some(parent) = self
            .schema_file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
        {
            ensure_dir(parent)?;
        }
        fs::write(&self.schema_file, schema)?;

        Ok(self.schema_file.clone())
    }

    fn auto_dump(&mut self, conn: &mut dyn Connection) -> bool {
        if !self.auto_dump_schema {
            return false;
        }
        match self.dump_schema_with(conn) {
            Ok(_) => true,
            Err(_error) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %_error, "Schema dump failed, ignoring");
                false
            }
        }
    }
}

/// Create a new, empty migration file in `dir` without touching any database.
///
/// This is what [Migrator::new_migration] does; it is exposed separately for callers that have
/// no database URL yet.
pub fn new_migration_file(
    dir: &Path,
    name: &str,
    output: &mut dyn Write,
) -> Result<PathBuf, Error> {
    write_migration(dir, &new_version(), name, output)
}

fn write_migration(
    dir: &Path,
    version: &str,
    name: &str,
    output: &mut dyn Write,
) -> Result<PathBuf, Error> {
    if name.trim().is_empty() {
        return Err(Error::Argument(
            "please specify a name for the new migration".to_string(),
        ));
    }
    if name.contains(['/', '\\']) {
        return Err(Error::Argument(format!(
            "migration name `{}` must not contain path separators",
            name
        )));
    }

    ensure_dir(dir)?;

    let path = dir.join(migration_filename(version, name));
    writeln!(output, "Creating migration: {}", path.display())?;

    let mut file = match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
    {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            return Err(Error::AlreadyExists(path.display().to_string()));
        }
        Err(e) => return Err(e.into()),
    };
    file.write_all(MIGRATION_TEMPLATE.as_bytes())?;

    #[cfg(feature = "tracing")]
    tracing::info!(path = %path.display(), "Created migration file");

    Ok(path)
}
