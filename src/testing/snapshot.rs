//! Order independent dumps of whole schemas, for comparing database states

use duckdb::params;

use crate::db::Database;

pub type TableDump = (String, Vec<String>);

/// Every base table of `schema` with its rows rendered as `|` separated
/// text, tables by name and rows sorted.
pub fn schema(db: &Database, schema: &str) -> Vec<TableDump> {
    let tables: Vec<String> = db
        .query_all(
            "SELECT table_name FROM information_schema.tables
             WHERE table_schema = ? AND table_type = 'BASE TABLE'
             ORDER BY table_name",
            params![schema],
            |row| row.get(0),
        )
        .expect("list tables");

    tables
        .into_iter()
        .map(|table| {
            let rows = table_rows(db, schema, &table);
            (format!("{schema}.{table}"), rows)
        })
        .collect()
}

/// All schemas holding indexed or derived data
pub fn all(db: &Database) -> Vec<TableDump> {
    ["core", "adr", "blk", "mtr", "cex", "ew"]
        .into_iter()
        .flat_map(|name| schema(db, name))
        .collect()
}

fn table_rows(db: &Database, schema: &str, table: &str) -> Vec<String> {
    let columns: Vec<String> = db
        .query_all(
            "SELECT column_name FROM information_schema.columns
             WHERE table_schema = ? AND table_name = ?
             ORDER BY ordinal_position",
            params![schema, table],
            |row| row.get(0),
        )
        .expect("list columns");

    let rendered = columns
        .iter()
        .map(|column| format!("coalesce(CAST(\"{column}\" AS VARCHAR), 'NULL')"))
        .collect::<Vec<_>>()
        .join(" || '|' || ");
    let mut rows: Vec<String> = db
        .query_all(
            &format!("SELECT {rendered} FROM {schema}.\"{table}\""),
            [],
            |row| row.get(0),
        )
        .expect("dump table");
    rows.sort();
    rows
}
