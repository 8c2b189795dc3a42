//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! The cache and the scenario engines call store methods; they never
//! execute SQL directly.

mod aggregate;
mod cache;
mod policies;
mod rows;
mod rules;
pub mod sql;

pub use aggregate::ProducerTotals;
pub use cache::CacheMeta;

use crate::error::FeeResult;
use rusqlite::Connection;

pub struct FeeStore {
    conn: Connection,
    path: Option<String>, // None for :memory:
}

impl FeeStore {
    pub fn open(path: &str) -> FeeResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL only takes effect on real files.
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: Some(path.to_string()) })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> FeeResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// A second connection to the same database file. An in-memory store
    /// reopens as a fresh, empty database.
    pub fn reopen(&self) -> FeeResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> FeeResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_fee_core.sql"))?;
        Ok(())
    }

    /// Run raw SQL against the store. Tooling and tests only.
    pub fn execute_raw(&self, sql: &str) -> FeeResult<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }
}
