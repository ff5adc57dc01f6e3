//! Number of addresses per class holding at least a given balance
//!
//! Rows are derived from the previous height by looking only at the
//! addresses touched by the block: an address enters a band when its new
//! balance reaches the threshold and leaves it when its old one did.

use anyhow::Result;
use duckdb::{params, Connection};

use super::AddressClass;
use crate::db::OptionalExt;
use crate::models::{Height, COIN};

/// Column names and thresholds in nanoERG. `total` counts any positive
/// balance.
pub const BANDS: [(&str, i64); 11] = [
    ("total", 1),
    ("ge_0p001", COIN / 1_000),
    ("ge_0p01", COIN / 100),
    ("ge_0p1", COIN / 10),
    ("ge_1", COIN),
    ("ge_10", 10 * COIN),
    ("ge_100", 100 * COIN),
    ("ge_1k", 1_000 * COIN),
    ("ge_10k", 10_000 * COIN),
    ("ge_100k", 100_000 * COIN),
    ("ge_1m", 1_000_000 * COIN),
];

fn table(class: AddressClass) -> String {
    format!("mtr.address_counts_by_balance_{}", class.suffix())
}

fn column_list() -> String {
    BANDS.iter().map(|(name, _)| *name).collect::<Vec<_>>().join(", ")
}

fn read_counts(row: &duckdb::Row<'_>) -> Result<Vec<i64>, duckdb::Error> {
    (0..BANDS.len()).map(|i| row.get(i)).collect()
}

/// Stored row at `height`
pub fn row_at(conn: &Connection, class: AddressClass, height: Height) -> Result<Option<Vec<i64>>> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM {} WHERE height = ?", column_list(), table(class)),
            params![height],
            read_counts,
        )
        .optional()?)
}

/// Counts over every current balance of the class
pub fn count_all(conn: &Connection, class: AddressClass) -> Result<Vec<i64>> {
    let counts = BANDS
        .iter()
        .map(|(_, threshold)| format!("count(*) FILTER (WHERE value >= {threshold})"))
        .collect::<Vec<_>>()
        .join(", ");
    Ok(conn.query_row(
        &format!("SELECT {counts} FROM adr.erg WHERE {}", class.predicate("address")),
        [],
        read_counts,
    )?)
}

/// Change in counts caused by the diffs at `height`
fn count_changes(conn: &Connection, class: AddressClass, height: Height) -> Result<Vec<i64>> {
    let changes = BANDS
        .iter()
        .map(|(_, threshold)| {
            format!(
                "count(*) FILTER (WHERE new >= {threshold}) - count(*) FILTER (WHERE old >= {threshold})"
            )
        })
        .collect::<Vec<_>>()
        .join(", ");
    Ok(conn.query_row(
        &format!(
            "WITH changes AS (
                SELECT d.address,
                    coalesce(max(b.value), 0) AS new,
                    coalesce(max(b.value), 0) - sum(d.value) AS old
                FROM adr.erg_diffs d
                LEFT JOIN adr.erg b ON b.address = d.address
                WHERE d.height = ? AND {}
                GROUP BY d.address
            )
            SELECT {changes} FROM changes",
            class.predicate("d.address")
        ),
        params![height],
        read_counts,
    )?)
}

pub fn include(conn: &Connection, height: Height) -> Result<()> {
    for class in AddressClass::ALL {
        let counts = match row_at(conn, class, height.prev())? {
            Some(previous) => previous
                .iter()
                .zip(count_changes(conn, class, height)?)
                .map(|(prev, change)| prev + change)
                .collect(),
            None => count_all(conn, class)?,
        };

        let placeholders = vec!["?"; BANDS.len() + 1].join(", ");
        let mut values: Vec<i64> = vec![height.0 as i64];
        values.extend(counts);
        conn.execute(
            &format!(
                "INSERT INTO {} (height, {}) VALUES ({placeholders})",
                table(class),
                column_list()
            ),
            duckdb::params_from_iter(values),
        )?;
    }
    Ok(())
}
