//! Rule Store: SQLite-backed rule table
//!
//! One connection shared by every request handler. The mutex serializes single
//! calls; nothing here spans the multi-step add/remove sequences.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

use crate::rule::{NewRule, Rule};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open rule store at {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("rule store lock poisoned")]
    Poisoned,
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS rules (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        rule_name TEXT NOT NULL,
        listen_address TEXT NOT NULL,
        listen_port TEXT NOT NULL,
        connect_address TEXT NOT NULL,
        connect_port TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_rules_name ON rules(rule_name);";

/// SQLite-backed rule table
pub struct RuleStore {
    conn: Mutex<Connection>,
}

impl RuleStore {
    /// Open (or create) the database file and bootstrap the schema
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path).map_err(|source| StoreError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|source| StoreError::Open {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Append a rule and return the id SQLite assigned to it
    pub fn insert(&self, rule: &NewRule) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO rules (rule_name, listen_address, listen_port, connect_address, connect_port)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                rule.name,
                rule.listen_address,
                rule.listen_port,
                rule.connect_address,
                rule.connect_port,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Oldest rule carrying `name`, if any.
    ///
    /// Names are not unique in the schema; the lowest id wins so that
    /// [`RuleStore::delete_by_name`] removes exactly the row returned here.
    pub fn find_by_name(&self, name: &str) -> Result<Option<Rule>, StoreError> {
        let conn = self.conn()?;
        let rule = conn
            .query_row(
                "SELECT id, rule_name, listen_address, listen_port, connect_address, connect_port
                 FROM rules WHERE rule_name = ?1 ORDER BY id ASC LIMIT 1",
                params![name],
                row_to_rule,
            )
            .optional()?;
        Ok(rule)
    }

    /// Remove the oldest rule carrying `name`. Returns the number of rows removed (0 or 1).
    pub fn delete_by_name(&self, name: &str) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM rules WHERE id = (SELECT MIN(id) FROM rules WHERE rule_name = ?1)",
            params![name],
        )?;
        Ok(removed)
    }

    /// All rules in insertion order
    pub fn list_all(&self) -> Result<Vec<Rule>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, rule_name, listen_address, listen_port, connect_address, connect_port
             FROM rules ORDER BY id ASC",
        )?;

        let rules = stmt
            .query_map([], row_to_rule)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rules)
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM rules", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Flush and close the connection
    pub fn close(self) -> Result<(), StoreError> {
        let conn = self.conn.into_inner().map_err(|_| StoreError::Poisoned)?;
        conn.close().map_err(|(_, e)| StoreError::Sqlite(e))
    }
}

fn row_to_rule(row: &rusqlite::Row<'_>) -> rusqlite::Result<Rule> {
    Ok(Rule {
        id: row.get(0)?,
        name: row.get(1)?,
        listen_address: row.get(2)?,
        listen_port: row.get(3)?,
        connect_address: row.get(4)?,
        connect_port: row.get(5)?,
    })
}
