//! Throwaway migration directories and captured output for tests.

use crate::error::Error;
use crate::files::migration_filename;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tempfile::TempDir;

/// A migrations directory in a temp dir, removed on drop.
///
/// ```
/// use migrator::testing::MigrationDir;
///
/// let dir = MigrationDir::new().unwrap();
/// dir.add("001", "create_users", "-- migrate:up\ncreate table users (id int);\n").unwrap();
/// assert!(dir.path().join("001_create_users.sql").exists());
/// ```
#[derive(Debug)]
pub struct MigrationDir {
    dir: TempDir,
}

impl MigrationDir {
    pub fn new() -> Result<Self, Error> {
        Ok(Self {
            dir: TempDir::new()?,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `<version>_<name>.sql` with `contents`.
    pub fn add(&self, version: &str, name: &str, contents: &str) -> Result<PathBuf, Error> {
        let path = self.dir.path().join(migration_filename(version, name));
        fs::write(&path, contents)?;
        Ok(path)
    }

    /// Write a migration with a plain up and down block.
    pub fn add_simple(&self, version: &str, name: &str, up: &str, down: &str) -> Result<PathBuf, Error> {
        self.add(
            version,
            name,
            &format!("-- migrate:up\n{}\n\n-- migrate:down\n{}\n", up, down),
        )
    }

    /// Delete the file for `version`, e.g. to simulate orphaned history.
    pub fn remove(&self, version: &str) -> Result<(), Error> {
        for entry in fs::read_dir(self.dir.path())? {
            let path = entry?.path();
            let is_match = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(crate::files::migration_version)
                == Some(version);
            if is_match {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}

/// A cloneable in-memory writer for capturing [Migrator](crate::Migrator) output.
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer(Arc<Mutex<Vec<u8>>>);

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, lossily decoded as UTF-8.
    pub fn contents(&self) -> String {
        let bytes = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).is_empty()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl Write for OutputBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
