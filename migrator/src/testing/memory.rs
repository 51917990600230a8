//! An in-memory [Backend] for exercising the migration engine without a database.

use crate::backend::{
    quote_identifier, versions_insert, Backend, Connection, ExecResult, Executor, Transaction,
};
use crate::error::Error;
use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct State {
    table_created: bool,
    applied: BTreeSet<String>,
    executed: Vec<String>,
    fail_statements: Vec<String>,
    fail_inserts: HashSet<String>,
    fail_deletes: HashSet<String>,
    fail_open: bool,
    fail_dump: bool,
    opened: usize,
    live_connections: usize,
    commits: usize,
    rollbacks: usize,
}

impl State {
    fn check_statement(&self, sql: &str) -> Result<(), Error> {
        match self.fail_statements.iter().find(|needle| sql.contains(needle.as_str())) {
            Some(needle) => Err(Error::Generic(format!(
                "simulated failure executing statement containing `{}`",
                needle
            ))),
            None => Ok(()),
        }
    }

    fn check_insert(&self, version: &str, pending: &[String]) -> Result<(), Error> {
        if self.fail_inserts.contains(version) {
            return Err(Error::Record {
                version: version.to_string(),
                message: "simulated insert failure".to_string(),
            });
        }
        if self.applied.contains(version) || pending.iter().any(|v| v == version) {
            return Err(Error::Record {
                version: version.to_string(),
                message: "duplicate primary key".to_string(),
            });
        }
        Ok(())
    }

    fn check_delete(&self, version: &str) -> Result<(), Error> {
        if self.fail_deletes.contains(version) {
            return Err(Error::Record {
                version: version.to_string(),
                message: "simulated delete failure".to_string(),
            });
        }
        Ok(())
    }
}

/// A [Backend] that keeps the history table and the log of executed SQL in memory.
///
/// Clones share state, so a test can hand one clone to a [Migrator](crate::Migrator) and inspect
/// the other. Transactions buffer their work until commit, so a rolled-back migration leaves no
/// trace in [MemoryBackend::executed] or [MemoryBackend::applied_versions].
///
/// Failures can be injected with [MemoryBackend::failing_on], [MemoryBackend::failing_insert],
/// [MemoryBackend::failing_delete], [MemoryBackend::failing_open] and
/// [MemoryBackend::failing_dump].
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<State>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with `versions` already recorded as applied.
    pub fn with_applied<I, S>(versions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let backend = Self::new();
        {
            let mut state = backend.lock();
            state.table_created = true;
            state.applied = versions.into_iter().map(Into::into).collect();
        }
        backend
    }

    /// Fail any `execute` whose SQL contains `needle`.
    pub fn failing_on(self, needle: impl Into<String>) -> Self {
        self.lock().fail_statements.push(needle.into());
        self
    }

    /// Fail recording `version` as applied.
    pub fn failing_insert(self, version: impl Into<String>) -> Self {
        self.lock().fail_inserts.insert(version.into());
        self
    }

    /// Fail removing `version` from the history.
    pub fn failing_delete(self, version: impl Into<String>) -> Self {
        self.lock().fail_deletes.insert(version.into());
        self
    }

    /// Fail every attempt to open a connection.
    pub fn failing_open(self) -> Self {
        self.lock().fail_open = true;
        self
    }

    /// Fail every schema dump.
    pub fn failing_dump(self) -> Self {
        self.lock().fail_dump = true;
        self
    }

    /// Remove all injected failures.
    pub fn clear_failures(&self) {
        let mut state = self.lock();
        state.fail_statements.clear();
        state.fail_inserts.clear();
        state.fail_deletes.clear();
        state.fail_open = false;
        state.fail_dump = false;
    }

    /// Applied versions in ascending order.
    pub fn applied_versions(&self) -> Vec<String> {
        self.lock().applied.iter().cloned().collect()
    }

    /// Every block of SQL that took effect, in execution order.
    pub fn executed(&self) -> Vec<String> {
        self.lock().executed.clone()
    }

    /// Whether the history table has been created.
    pub fn migrations_table_created(&self) -> bool {
        self.lock().table_created
    }

    /// Number of connections opened so far.
    pub fn connections_opened(&self) -> usize {
        self.lock().opened
    }

    /// Number of connections currently open.
    pub fn live_connections(&self) -> usize {
        self.lock().live_connections
    }

    pub fn commits(&self) -> usize {
        self.lock().commits
    }

    pub fn rollbacks(&self) -> usize {
        self.lock().rollbacks
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        lock(&self.state)
    }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Backend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn open(&self) -> Result<Box<dyn Connection>, Error> {
        let mut state = self.lock();
        if state.fail_open {
            return Err(Error::Connection("simulated connection failure".to_string()));
        }
        state.opened += 1;
        state.live_connections += 1;
        Ok(Box::new(MemoryConnection {
            state: Arc::clone(&self.state),
        }))
    }
}

struct MemoryConnection {
    state: Arc<Mutex<State>>,
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        lock(&self.state).live_connections -= 1;
    }
}

impl Executor for MemoryConnection {
    fn execute(&mut self, sql: &str) -> Result<ExecResult, Error> {
        let mut state = lock(&self.state);
        state.check_statement(sql)?;
        state.executed.push(sql.to_string());
        Ok(ExecResult {
            rows_affected: Some(0),
            last_insert_id: None,
        })
    }

    fn insert_version(&mut self, version: &str) -> Result<(), Error> {
        let mut state = lock(&self.state);
        state.check_insert(version, &[])?;
        state.applied.insert(version.to_string());
        Ok(())
    }

    fn delete_version(&mut self, version: &str) -> Result<(), Error> {
        let mut state = lock(&self.state);
        state.check_delete(version)?;
        state.applied.remove(version);
        Ok(())
    }
}

impl Connection for MemoryConnection {
    fn ensure_migrations_table(&mut self) -> Result<(), Error> {
        lock(&self.state).table_created = true;
        Ok(())
    }

    fn select_applied_versions(&mut self, limit: Option<usize>) -> Result<Vec<String>, Error> {
        let state = lock(&self.state);
        if !state.table_created {
            return Err(Error::Generic("no such table: schema_history".to_string()));
        }
        let newest_first = state.applied.iter().rev().cloned();
        Ok(match limit {
            Some(limit) => newest_first.take(limit).collect(),
            None => newest_first.collect(),
        })
    }

    fn begin(&mut self) -> Result<Box<dyn Transaction + '_>, Error> {
        Ok(Box::new(MemoryTransaction {
            state: &self.state,
            executed: Vec::new(),
            inserted: Vec::new(),
            deleted: Vec::new(),
            finished: false,
        }))
    }

    fn dump_schema(&mut self) -> Result<Vec<u8>, Error> {
        let state = lock(&self.state);
        if state.fail_dump {
            return Err(Error::Generic("simulated dump failure".to_string()));
        }
        let mut schema = state.executed.join("\n");
        let applied: Vec<String> = state.applied.iter().cloned().collect();
        schema.push_str(&versions_insert(
            &quote_identifier("schema_history", '"'),
            &applied,
        ));
        Ok(schema.into_bytes())
    }

    fn ping(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

struct MemoryTransaction<'conn> {
    state: &'conn Arc<Mutex<State>>,
    executed: Vec<String>,
    inserted: Vec<String>,
    deleted: Vec<String>,
    finished: bool,
}

impl Executor for MemoryTransaction<'_> {
    fn execute(&mut self, sql: &str) -> Result<ExecResult, Error> {
        lock(self.state).check_statement(sql)?;
        self.executed.push(sql.to_string());
        Ok(ExecResult {
            rows_affected: Some(0),
            last_insert_id: None,
        })
    }

    fn insert_version(&mut self, version: &str) -> Result<(), Error> {
        lock(self.state).check_insert(version, &self.inserted)?;
        self.inserted.push(version.to_string());
        Ok(())
    }

    fn delete_version(&mut self, version: &str) -> Result<(), Error> {
        lock(self.state).check_delete(version)?;
        self.deleted.push(version.to_string());
        Ok(())
    }
}

impl Transaction for MemoryTransaction<'_> {
    fn commit(mut self: Box<Self>) -> Result<(), Error> {
        let mut state = lock(self.state);
        state.executed.append(&mut self.executed);
        for version in self.inserted.drain(..) {
            state.applied.insert(version);
        }
        for version in self.deleted.drain(..) {
            state.applied.remove(&version);
        }
        state.commits += 1;
        self.finished = true;
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> Result<(), Error> {
        lock(self.state).rollbacks += 1;
        self.finished = true;
        Ok(())
    }
}

impl Drop for MemoryTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            lock(self.state).rollbacks += 1;
        }
    }
}
