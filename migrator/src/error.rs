/// Error type for the migrator crate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Bad caller input, such as an empty migration name or a missing database URL.
    #[error("{0}")]
    Argument(String),
    /// A migration file could not be split into its up / down blocks.
    #[error("malformed migration: {0}")]
    MalformedMigration(String),
    #[error("no migration files found in `{0}`")]
    NoMigrationsFound(String),
    #[error("migration version {0} is used by more than one file")]
    DuplicateVersion(String),
    #[error("unable to connect to database: {0}")]
    Connection(String),
    /// The history table rejected an insert or delete of `version`.
    #[error("unable to record migration {version}: {message}")]
    Record { version: String, message: String },
    #[error("file already exists: {0}")]
    AlreadyExists(String),
    #[error("can't rollback: no migrations have been applied")]
    NothingToRollback,
    /// The history table references a version with no file on disk.
    #[error("no migration file found for version {0}")]
    FileNotFound(String),
    #[error("no database driver registered for scheme `{0}`")]
    UnknownDriver(String),
    #[error("{operation} is not supported by the {driver} driver")]
    Unsupported {
        operation: &'static str,
        driver: String,
    },
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "sqlite")]
    #[error("{0}")]
    Sqlite(rusqlite::Error),
    #[cfg(feature = "mysql")]
    #[error("{0}")]
    Mysql(String),
    #[cfg(feature = "postgres")]
    #[error("{0}")]
    Postgres(#[from] postgres::Error),
    #[error("{0}")]
    Generic(String),
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

#[cfg(feature = "mysql")]
impl From<mysql::Error> for Error {
    fn from(value: mysql::Error) -> Self {
        Self::Mysql(value.to_string())
    }
}

impl From<String> for Error {
    fn from(value: String) -> Self {
        Self::Generic(value)
    }
}

// Manual PartialEq implementation because io::Error and postgres::Error don't implement PartialEq
impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Argument(a), Self::Argument(b)) => a == b,
            (Self::MalformedMigration(a), Self::MalformedMigration(b)) => a == b,
            (Self::NoMigrationsFound(a), Self::NoMigrationsFound(b)) => a == b,
            (Self::DuplicateVersion(a), Self::DuplicateVersion(b)) => a == b,
            (Self::Connection(a), Self::Connection(b)) => a == b,
            (
                Self::Record {
                    version: va,
                    message: ma,
                },
                Self::Record {
                    version: vb,
                    message: mb,
                },
            ) => va == vb && ma == mb,
            (Self::AlreadyExists(a), Self::AlreadyExists(b)) => a == b,
            (Self::NothingToRollback, Self::NothingToRollback) => true,
            (Self::FileNotFound(a), Self::FileNotFound(b)) => a == b,
            (Self::UnknownDriver(a), Self::UnknownDriver(b)) => a == b,
            (
                Self::Unsupported {
                    operation: oa,
                    driver: da,
                },
                Self::Unsupported {
                    operation: ob,
                    driver: db,
                },
            ) => oa == ob && da == db,
            (Self::Io(a), Self::Io(b)) => a.kind() == b.kind(),
            #[cfg(feature = "sqlite")]
            (Self::Sqlite(a), Self::Sqlite(b)) => a == b,
            #[cfg(feature = "mysql")]
            (Self::Mysql(a), Self::Mysql(b)) => a == b,
            #[cfg(feature = "postgres")]
            (Self::Postgres(a), Self::Postgres(b)) => a.to_string() == b.to_string(),
            (Self::Generic(a), Self::Generic(b)) => a == b,
            _ => false,
        }
    }
}
