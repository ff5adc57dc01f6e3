//! Daily transaction counts and transfer volume
//!
//! `daily_1d` is the sum over the 24 hours up to the block, `daily_7d` and
//! `daily_28d` the mean daily sums over 7 and 28 days.

use anyhow::Result;
use duckdb::{params, Connection};

use crate::models::BlockData;

const DAY_MS: i64 = 86_400_000;

pub fn include(conn: &Connection, block: &BlockData) -> Result<()> {
    let height = block.height();
    let timestamp = block.timestamp();

    for (table, column) in [("mtr.transactions", "tx_count"), ("mtr.volume", "volume")] {
        let (sum_1d, sum_7d, sum_28d): (i64, i64, i64) = conn.query_row(
            &format!(
                "SELECT
                    coalesce(sum(s.{column}) FILTER (WHERE h.timestamp > ?), 0)::BIGINT,
                    coalesce(sum(s.{column}) FILTER (WHERE h.timestamp > ?), 0)::BIGINT,
                    coalesce(sum(s.{column}), 0)::BIGINT
                FROM blk.stats s
                JOIN core.headers h ON h.height = s.height
                WHERE s.height <= ? AND h.timestamp > ?"
            ),
            params![
                timestamp - DAY_MS,
                timestamp - 7 * DAY_MS,
                height,
                timestamp - 28 * DAY_MS
            ],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        conn.execute(
            &format!("INSERT INTO {table} (height, daily_1d, daily_7d, daily_28d) VALUES (?, ?, ?, ?)"),
            params![height, sum_1d, sum_7d as f64 / 7.0, sum_28d as f64 / 28.0],
        )?;
    }
    Ok(())
}
