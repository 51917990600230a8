//! Discovery and ordering of migration files on disk.
//!
//! A migration file is any regular file in the migrations directory whose name starts with a
//! digit and ends in `.sql`, e.g. `20210101120000_create_users.sql`. The leading run of digits is
//! the file's version. Files are ordered by name, which orders them by version as long as every
//! version has the same width (the timestamps produced by [new_version] always do).

use crate::error::Error;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static MIGRATION_FILE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d.*\.sql$").expect("valid migration file regex"));

static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+").expect("valid version regex"));

/// Format of the timestamp prefix given to new migration files.
pub const VERSION_FORMAT: &str = "%Y%m%d%H%M%S";

/// A migration file discovered in the migrations directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationFile {
    /// The numeric prefix of the filename, kept as a string and compared lexically.
    pub version: String,
    pub filename: String,
    pub path: PathBuf,
}

impl MigrationFile {
    /// Build a [MigrationFile] from a path, returning `None` if the filename does not look like a
    /// migration.
    pub fn from_path(path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        let filename = path.file_name()?.to_str()?.to_string();
        if !MIGRATION_FILE_RE.is_match(&filename) {
            return None;
        }
        let version = migration_version(&filename)?.to_string();
        Some(Self {
            version,
            filename,
            path,
        })
    }

    /// Read the file as UTF-8 text.
    pub fn read(&self) -> Result<String, Error> {
        Ok(fs::read_to_string(&self.path)?)
    }
}

/// Extract the version (leading digits) from a migration filename.
pub fn migration_version(filename: &str) -> Option<&str> {
    VERSION_RE.find(filename).map(|m| m.as_str())
}

/// Compute the version for a migration created at `now`.
pub fn version_at(now: DateTime<Utc>) -> String {
    now.format(VERSION_FORMAT).to_string()
}

/// Compute the version for a migration created right now.
pub fn new_version() -> String {
    version_at(Utc::now())
}

/// Build the filename for a new migration, e.g. `20210101120000_create_users.sql`.
pub fn migration_filename(version: &str, name: &str) -> String {
    format!("{}_{}.sql", version, name)
}

/// List every migration file in `dir`, sorted by filename.
///
/// Fails with [Error::NoMigrationsFound] when the directory cannot be read or holds no migration
/// files, and with [Error::DuplicateVersion] when two files share a version.
pub fn find_migration_files(dir: &Path) -> Result<Vec<MigrationFile>, Error> {
    let entries =
        fs::read_dir(dir).map_err(|_| Error::NoMigrationsFound(dir.display().to_string()))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(file) = MigrationFile::from_path(entry.path()) {
            files.push(file);
        }
    }

    if files.is_empty() {
        return Err(Error::NoMigrationsFound(dir.display().to_string()));
    }

    files.sort_by(|a, b| a.filename.cmp(&b.filename));

    let mut by_version: Vec<&str> = files.iter().map(|f| f.version.as_str()).collect();
    by_version.sort_unstable();
    if let Some(pair) = by_version.windows(2).find(|pair| pair[0] == pair[1]) {
        return Err(Error::DuplicateVersion(pair[0].to_string()));
    }

    Ok(files)
}

/// Find the migration file in `dir` whose version is exactly `version`.
pub fn find_migration_file(dir: &Path, version: &str) -> Result<MigrationFile, Error> {
    if version.is_empty() {
        return Err(Error::Argument("migration version is required".to_string()));
    }

    find_migration_files(dir)?
        .into_iter()
        .find(|f| f.version == version)
        .ok_or_else(|| Error::FileNotFound(version.to_string()))
}

/// Create `dir` and any missing parents.
pub fn ensure_dir(dir: &Path) -> Result<(), Error> {
    fs::create_dir_all(dir).map_err(|e| {
        Error::Io(std::io::Error::new(
            e.kind(),
            format!("unable to create directory `{}`: {}", dir.display(), e),
        ))
    })
}
