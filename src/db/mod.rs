pub mod migrations;
pub mod schema;

use anyhow::{anyhow, Context, Result};
use duckdb::{params, Connection};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::DatabaseSettings;
use crate::models::{Header, Height};

/// Extension trait for optional query results
pub trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>, duckdb::Error>;
}

impl<T> OptionalExt<T> for Result<T, duckdb::Error> {
    fn optional(self) -> Result<Option<T>, duckdb::Error> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Shared handle to the embedded database. Cheap to clone; every writer
/// goes through the same connection so transactions are serialized.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(settings: &DatabaseSettings) -> Result<Self> {
        let conn = Connection::open(&settings.path).context("Failed to open database")?;

        conn.execute_batch(&format!(
            "SET threads={};
             SET memory_limit='{}';",
            settings.threads, settings.memory_limit
        ))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection mutex poisoned"))
    }

    pub fn execute<P: duckdb::Params>(&self, sql: &str, params: P) -> Result<usize> {
        let conn = self.lock()?;
        Ok(conn.execute(sql, params)?)
    }

    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        let conn = self.lock()?;
        Ok(conn.execute_batch(sql)?)
    }

    pub fn query_one<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<Option<T>>
    where
        P: duckdb::Params,
        F: FnOnce(&duckdb::Row<'_>) -> Result<T, duckdb::Error>,
    {
        let conn = self.lock()?;
        let result = conn.query_row(sql, params, f).optional()?;
        Ok(result)
    }

    pub fn query_all<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<Vec<T>>
    where
        P: duckdb::Params,
        F: FnMut(&duckdb::Row<'_>) -> Result<T, duckdb::Error>,
    {
        let conn = self.lock()?;
        query_all(&conn, sql, params, f)
    }

    /// Run `f` inside a single transaction. Any error rolls the whole
    /// transaction back.
    pub fn execute_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;
        let value = f(&tx)?;
        tx.commit().context("Failed to commit transaction")?;
        Ok(value)
    }

    /// Read-only access outside of an explicit transaction
    pub fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Flush the WAL to the database file
    pub fn checkpoint(&self) -> Result<()> {
        self.execute_batch("CHECKPOINT;")
    }

    pub fn tip(&self) -> Result<Option<Header>> {
        let conn = self.lock()?;
        tip(&conn)
    }
}

pub fn query_all<T, P, F>(conn: &Connection, sql: &str, params: P, mut f: F) -> Result<Vec<T>>
where
    P: duckdb::Params,
    F: FnMut(&duckdb::Row<'_>) -> Result<T, duckdb::Error>,
{
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut results = Vec::new();
    while let Some(row) = rows.next()? {
        results.push(f(row)?);
    }
    Ok(results)
}

const SELECT_HEADER: &str = "
    SELECT height, id, parent_id, timestamp, difficulty
    FROM core.headers";

fn header_from_row(row: &duckdb::Row<'_>) -> Result<Header, duckdb::Error> {
    Ok(Header {
        height: row.get(0)?,
        id: row.get(1)?,
        parent_id: row.get(2)?,
        timestamp: row.get(3)?,
        difficulty: row.get(4)?,
    })
}

/// Highest stored header, if any
pub fn tip(conn: &Connection) -> Result<Option<Header>> {
    Ok(conn
        .query_row(
            &format!("{SELECT_HEADER} ORDER BY height DESC LIMIT 1"),
            [],
            header_from_row,
        )
        .optional()?)
}

pub fn header_at(conn: &Connection, height: Height) -> Result<Option<Header>> {
    Ok(conn
        .query_row(
            &format!("{SELECT_HEADER} WHERE height = ?"),
            params![height],
            header_from_row,
        )
        .optional()?)
}

/// Timestamp of the block at `height`, if stored
pub fn timestamp_at(conn: &Connection, height: Height) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT timestamp FROM core.headers WHERE height = ?",
            params![height],
            |row| row.get(0),
        )
        .optional()?)
}
