//! Number of unspent boxes

use anyhow::Result;
use duckdb::{params, Connection};

use crate::db::OptionalExt;
use crate::models::BlockData;

pub fn include(conn: &Connection, block: &BlockData) -> Result<()> {
    let height = block.height();
    let previous: Option<i64> = conn
        .query_row(
            "SELECT value FROM mtr.utxos WHERE height = ?",
            params![height.prev()],
            |row| row.get(0),
        )
        .optional()?;

    // The first block of the ledger starts from nothing
    let value = previous.unwrap_or(0) + block.output_count() as i64 - block.input_count() as i64;

    conn.execute(
        "INSERT INTO mtr.utxos (height, value) VALUES (?, ?)",
        params![height, value],
    )?;
    Ok(())
}
