//! Summary tables: latest value of each series column and its change over
//! standard windows
//!
//! A window's reference is the series row at the last height whose block
//! is at least that old. When the series does not go back that far the
//! oldest row is used instead.

use anyhow::Result;
use duckdb::{params, Connection};

use crate::db::OptionalExt;
use crate::models::Height;

const DAY_MS: i64 = 86_400_000;

/// 1d, 1w, 4w, 6m, 1y
const WINDOWS: [i64; 5] = [DAY_MS, 7 * DAY_MS, 28 * DAY_MS, 182 * DAY_MS, 365 * DAY_MS];

pub struct Series {
    pub table: &'static str,
    pub columns: &'static [&'static str],
}

const ADDRESS_COUNTS: &[&str] = &[
    "total", "ge_0p001", "ge_0p01", "ge_0p1", "ge_1", "ge_10", "ge_100", "ge_1k", "ge_10k", "ge_100k", "ge_1m",
];
const TOP_ADDRESSES: &[&str] = &["top_1_prc", "top_1k", "top_100", "top_10"];
const DAILY: &[&str] = &["daily_1d", "daily_7d", "daily_28d"];

pub const SERIES: &[Series] = &[
    Series {
        table: "mtr.utxos",
        columns: &["value"],
    },
    Series {
        table: "mtr.address_counts_by_balance_p2pks",
        columns: ADDRESS_COUNTS,
    },
    Series {
        table: "mtr.address_counts_by_balance_contracts",
        columns: ADDRESS_COUNTS,
    },
    Series {
        table: "mtr.address_counts_by_balance_miners",
        columns: ADDRESS_COUNTS,
    },
    Series {
        table: "mtr.supply_on_top_addresses_p2pks",
        columns: TOP_ADDRESSES,
    },
    Series {
        table: "mtr.supply_on_top_addresses_contracts",
        columns: TOP_ADDRESSES,
    },
    Series {
        table: "mtr.supply_on_top_addresses_miners",
        columns: TOP_ADDRESSES,
    },
    Series {
        table: "mtr.supply_composition",
        columns: &["p2pks", "cex_main", "cex_deposits", "contracts", "miners", "treasury"],
    },
    Series {
        table: "mtr.supply_age_days",
        columns: &["overall", "p2pks", "cexs", "contracts", "miners"],
    },
    Series {
        table: "mtr.transactions",
        columns: DAILY,
    },
    Series {
        table: "mtr.volume",
        columns: DAILY,
    },
];

impl Series {
    fn select(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(|c| format!("{c}::DOUBLE"))
            .collect::<Vec<_>>()
            .join(", ");
        format!("SELECT {columns} FROM {}", self.table)
    }

    fn read(&self, row: &duckdb::Row<'_>) -> Result<Vec<f64>, duckdb::Error> {
        (0..self.columns.len()).map(|i| row.get(i)).collect()
    }

    /// Row at the highest height not above `height`, or the oldest row
    fn values_at_or_before(&self, conn: &Connection, height: Option<Height>) -> Result<Option<Vec<f64>>> {
        let found = match height {
            Some(height) => conn
                .query_row(
                    &format!("{} WHERE height <= ? ORDER BY height DESC LIMIT 1", self.select()),
                    params![height],
                    |row| self.read(row),
                )
                .optional()?,
            None => None,
        };
        match found {
            Some(values) => Ok(Some(values)),
            None => Ok(conn
                .query_row(&format!("{} ORDER BY height LIMIT 1", self.select()), [], |row| self.read(row))
                .optional()?),
        }
    }

    fn refresh(&self, conn: &Connection) -> Result<()> {
        let summary = format!("{}_summary", self.table);
        conn.execute(&format!("DELETE FROM {summary}"), [])?;

        let latest = conn
            .query_row(
                &format!(
                    "SELECT s.height, h.timestamp
                     FROM {} s
                     JOIN core.headers h ON h.height = s.height
                     ORDER BY s.height DESC
                     LIMIT 1",
                    self.table
                ),
                [],
                |row| Ok((row.get::<_, Height>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;
        let Some((latest_height, latest_timestamp)) = latest else {
            return Ok(());
        };
        let Some(current) = self.values_at_or_before(conn, Some(latest_height))? else {
            return Ok(());
        };

        let mut references = Vec::with_capacity(WINDOWS.len());
        for window in WINDOWS {
            let height: Option<Height> = conn.query_row(
                "SELECT max(height) FROM core.headers WHERE timestamp <= ? AND height <= ?",
                params![latest_timestamp - window, latest_height],
                |row| row.get(0),
            )?;
            references.push(self.values_at_or_before(conn, height)?.unwrap_or_else(|| current.clone()));
        }

        for (i, label) in self.columns.iter().enumerate() {
            let diffs: Vec<f64> = references.iter().map(|r| current[i] - r[i]).collect();
            conn.execute(
                &format!(
                    "INSERT INTO {summary} (label, current, diff_1d, diff_1w, diff_4w, diff_6m, diff_1y)
                     VALUES (?, ?, ?, ?, ?, ?, ?)"
                ),
                params![label, current[i], diffs[0], diffs[1], diffs[2], diffs[3], diffs[4]],
            )?;
        }
        Ok(())
    }
}

/// Rebuild every summary table from the latest series rows.
pub fn refresh_summaries(conn: &Connection) -> Result<()> {
    for series in SERIES {
        series.refresh(conn)?;
    }
    Ok(())
}
