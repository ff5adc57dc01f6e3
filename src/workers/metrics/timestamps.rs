//! Timestamp to height index for resampled series
//!
//! One row per hour and per day, pointing at the first block seen in that
//! interval.

use anyhow::Result;
use duckdb::{params, Connection};

use crate::models::{BlockData, Height};

const HOUR_MS: i64 = 3_600_000;
const DAY_MS: i64 = 24 * HOUR_MS;

const INTERVALS: [(&str, i64); 2] = [("mtr.timestamps_hourly", HOUR_MS), ("mtr.timestamps_daily", DAY_MS)];

/// Start of the interval containing `timestamp`
pub fn floor(timestamp: i64, interval: i64) -> i64 {
    timestamp - timestamp.rem_euclid(interval)
}

pub fn include(conn: &Connection, block: &BlockData) -> Result<()> {
    for (table, interval) in INTERVALS {
        let slot = floor(block.timestamp(), interval);
        conn.execute(
            &format!(
                "INSERT INTO {table} (timestamp, height)
                 SELECT ?, ?
                 WHERE NOT EXISTS (SELECT 1 FROM {table} WHERE timestamp = ?)"
            ),
            params![slot, block.height(), slot],
        )?;
    }
    Ok(())
}

pub fn rollback(conn: &Connection, height: Height) -> Result<()> {
    for (table, _) in INTERVALS {
        conn.execute(&format!("DELETE FROM {table} WHERE height = ?"), params![height])?;
    }
    Ok(())
}
