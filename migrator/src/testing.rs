//! Test doubles for migration development: an in-memory backend, temporary migration
//! directories, and an output capture buffer.

pub mod fixtures;
pub mod memory;

pub use fixtures::{MigrationDir, OutputBuffer};
pub use memory::MemoryBackend;
