//! Embedded document store shared by the node registry and the reading log.
//!
//! A `Store` is one SQLite database behind a mutex. The mutex is the only
//! write-serialisation point: every query runs inside [`Store::with_conn`], and
//! a single `UPDATE` is atomic per document.

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use log::{debug, info};
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use crate::error::{Error, Result};

pub const NODE_MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/nodes");
pub const READING_MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/readings");

const FILE_PRAGMAS: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    PRAGMA busy_timeout = 5000;
";

/// Where a store keeps its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    File(PathBuf),
    /// Private to the opened connection and gone once the store is dropped.
    Memory,
}

pub struct Store {
    label: String,
    location: Location,
    conn: Mutex<SqliteConnection>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("label", &self.label)
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Open (creating if needed) the database at `location` and bring its schema up to date.
    pub fn open(label: impl Into<String>, location: Location, migrations: EmbeddedMigrations) -> Result<Self> {
        let label = label.into();
        let mut conn = match &location {
            Location::File(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent)?;
                }
                let url = path.to_str().ok_or_else(|| {
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("database path is not valid UTF-8: {}", path.display()),
                    )
                })?;
                let mut conn = SqliteConnection::establish(url)?;
                conn.batch_execute(FILE_PRAGMAS)?;
                conn
            }
            Location::Memory => SqliteConnection::establish(":memory:")?,
        };
        apply_migrations(&label, &mut conn, migrations)?;
        debug!("Store `{}` open at {:?}", label, location);

        Ok(Store {
            label,
            location,
            conn: Mutex::new(conn),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Run `f` with exclusive access to the connection.
    pub fn with_conn<T>(&self, f: impl FnOnce(&mut SqliteConnection) -> Result<T>) -> Result<T> {
        let mut conn = self.lock()?;
        f(&mut conn)
    }

    /// Fold the write-ahead log back into the main database file and truncate it.
    /// Memory stores have nothing to compact.
    pub fn compact(&self) -> Result<()> {
        match self.location {
            Location::Memory => Ok(()),
            Location::File(_) => self.with_conn(|conn| {
                conn.batch_execute("PRAGMA wal_checkpoint(TRUNCATE);")?;
                Ok(())
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, SqliteConnection>> {
        self.conn.lock().map_err(|_| Error::poisoned(self.label.clone()))
    }
}

fn apply_migrations(label: &str, conn: &mut SqliteConnection, migrations: EmbeddedMigrations) -> Result<()> {
    match conn.run_pending_migrations(migrations) {
        Ok(applied) => {
            if applied.is_empty() {
                debug!("Store `{}` schema is up to date", label);
            } else {
                let names = applied.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ");
                info!("Store `{}`: applied {} migration(s): {}", label, applied.len(), names);
            }
            Ok(())
        }
        Err(e) => Err(Error::migration(format!("store `{}`: {}", label, e))),
    }
}
