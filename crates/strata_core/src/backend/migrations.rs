//! Schema migration executor for the SQLite backend.
//!
//! # Responsibility
//! - Apply caller-supplied schema steps in strictly increasing order.
//! - Track the applied version in `PRAGMA user_version`.
//!
//! # Invariants
//! - Step version = 1-based position in the list; the order never changes
//!   once published.
//! - Pending steps apply atomically: one transaction for the whole run.
//! - A database versioned ahead of the known steps is rejected, never
//!   downgraded.

use log::info;
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type MigrationResult<T> = Result<T, MigrationError>;

#[derive(Debug)]
pub enum MigrationError {
    Sqlite(rusqlite::Error),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    StepFailed {
        version: u32,
        source: rusqlite::Error,
    },
}

impl Display for MigrationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "database schema version {db_version} is newer than supported {latest_supported}"
            ),
            Self::StepFailed { version, source } => {
                write!(f, "migration step #{version} failed: {source}")
            }
        }
    }
}

impl Error for MigrationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) | Self::StepFailed { source: err, .. } => Some(err),
            Self::UnsupportedSchemaVersion { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for MigrationError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

/// One schema step; its version is its position in the migrator's list.
#[derive(Debug, Clone)]
pub struct Migration {
    pub up: String,
}

impl Migration {
    pub fn up(sql: impl Into<String>) -> Self {
        Self { up: sql.into() }
    }
}

/// Ordered list of schema steps with a versioned executor.
#[derive(Debug, Clone, Default)]
pub struct Migrator {
    migrations: Vec<Migration>,
}

impl Migrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_migrations(migrations: Vec<Migration>) -> Self {
        Self { migrations }
    }

    pub fn push(&mut self, migration: Migration) {
        self.migrations.push(migration);
    }

    /// Latest version this migrator knows about.
    pub fn latest_version(&self) -> u32 {
        self.migrations.len() as u32
    }

    /// Applies all pending steps on the connection.
    pub fn apply(&self, conn: &mut Connection) -> MigrationResult<()> {
        let current = current_user_version(conn)?;
        let latest = self.latest_version();

        if current > latest {
            return Err(MigrationError::UnsupportedSchemaVersion {
                db_version: current,
                latest_supported: latest,
            });
        }
        if current == latest {
            return Ok(());
        }

        let tx = conn.transaction()?;
        for (index, migration) in self.migrations.iter().enumerate() {
            let version = index as u32 + 1;
            if version <= current {
                continue;
            }
            tx.execute_batch(&migration.up)
                .map_err(|source| MigrationError::StepFailed { version, source })?;
            tx.execute_batch(&format!("PRAGMA user_version = {version};"))?;
        }
        tx.commit()?;
        info!(
            "event=migrations_applied module=backend_sqlite from_version={current} to_version={latest}"
        );
        Ok(())
    }
}

fn current_user_version(conn: &Connection) -> MigrationResult<u32> {
    let version = conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?;
    Ok(version)
}
