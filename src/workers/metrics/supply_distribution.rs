//! Supply held by the richest addresses of each class
//!
//! Only the top `max(1000, n / 100)` balances of a class matter, `n` being
//! its address count. The smallest of them is kept as the class cutoff.
//! A block whose touched addresses stay strictly below the cutoff, and
//! which leaves `n / 100` unchanged, cannot move the top sums, so the
//! previous row is carried over. Otherwise the top balances are read
//! again with a bounded query.

use anyhow::Result;
use duckdb::{params, Connection};

use super::{address_counts, AddressClass};
use crate::db::OptionalExt;
use crate::models::Height;
use crate::workers::balances::BalanceChange;

const LARGEST_BUCKET: i64 = 1000;

/// Top balance sums of a class, plus its cutoff. The cutoff is 0 while
/// the class holds fewer addresses than it ranks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Row {
    top_1_prc: i64,
    top_1k: i64,
    top_100: i64,
    top_10: i64,
    cutoff: i64,
}

fn table(class: AddressClass) -> String {
    format!("mtr.supply_on_top_addresses_{}", class.suffix())
}

fn row_at(conn: &Connection, class: AddressClass, height: Height) -> Result<Option<Row>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT t.top_1_prc, t.top_1k, t.top_100, t.top_10, c.{}
                 FROM {} t
                 JOIN mtr.supply_on_top_addresses_cutoffs c ON c.height = t.height
                 WHERE t.height = ?",
                class.suffix(),
                table(class)
            ),
            params![height],
            |row| {
                Ok(Row {
                    top_1_prc: row.get(0)?,
                    top_1k: row.get(1)?,
                    top_100: row.get(2)?,
                    top_10: row.get(3)?,
                    cutoff: row.get(4)?,
                })
            },
        )
        .optional()?)
}

/// Addresses in the class at `height`
fn address_count(conn: &Connection, class: AddressClass, height: Height) -> Result<Option<i64>> {
    Ok(address_counts::row_at(conn, class, height)?.and_then(|counts| counts.first().copied()))
}

fn rank(conn: &Connection, class: AddressClass, addresses: i64) -> Result<Row> {
    let one_percent = addresses / 100;
    let ranked = one_percent.max(LARGEST_BUCKET);
    Ok(conn.query_row(
        &format!(
            "WITH top AS (
                SELECT value, row_number() OVER (ORDER BY value DESC, address) AS rank
                FROM (
                    SELECT address, value FROM adr.erg
                    WHERE {}
                    ORDER BY value DESC, address
                    LIMIT {ranked}
                )
            )
            SELECT
                coalesce(sum(value) FILTER (WHERE rank <= {one_percent}), 0)::BIGINT,
                coalesce(sum(value) FILTER (WHERE rank <= 1000), 0)::BIGINT,
                coalesce(sum(value) FILTER (WHERE rank <= 100), 0)::BIGINT,
                coalesce(sum(value) FILTER (WHERE rank <= 10), 0)::BIGINT,
                CASE WHEN count(*) = {ranked} THEN min(value) ELSE 0 END::BIGINT
            FROM top",
            class.predicate("address")
        ),
        [],
        |row| {
            Ok(Row {
                top_1_prc: row.get(0)?,
                top_1k: row.get(1)?,
                top_100: row.get(2)?,
                top_10: row.get(3)?,
                cutoff: row.get(4)?,
            })
        },
    )?)
}

/// Whether the changes leave the top balances of `class` untouched
fn below_cutoff(class: AddressClass, changes: &[BalanceChange], cutoff: i64) -> bool {
    changes
        .iter()
        .filter(|change| AddressClass::of(&change.address) == Some(class))
        .all(|change| change.old.value < cutoff as i128 && change.new.value < cutoff as i128)
}

pub fn include(conn: &Connection, height: Height, changes: &[BalanceChange]) -> Result<()> {
    let mut cutoffs = Vec::with_capacity(AddressClass::ALL.len());
    for class in AddressClass::ALL {
        let addresses = address_count(conn, class, height)?.unwrap_or(0);
        let previous = match (row_at(conn, class, height.prev())?, address_count(conn, class, height.prev())?) {
            (Some(row), Some(before)) if before / 100 == addresses / 100 => Some(row),
            _ => None,
        };
        let row = match previous {
            Some(row) if below_cutoff(class, changes, row.cutoff) => row,
            _ => rank(conn, class, addresses)?,
        };

        conn.execute(
            &format!(
                "INSERT INTO {} (height, top_1_prc, top_1k, top_100, top_10) VALUES (?, ?, ?, ?, ?)",
                table(class)
            ),
            params![height, row.top_1_prc, row.top_1k, row.top_100, row.top_10],
        )?;
        cutoffs.push(row.cutoff);
    }
    conn.execute(
        "INSERT INTO mtr.supply_on_top_addresses_cutoffs (height, p2pks, contracts, miners) VALUES (?, ?, ?, ?)",
        params![height, cutoffs[0], cutoffs[1], cutoffs[2]],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::COIN;
    use crate::testing::fixtures::{self, out, tx, Chain};
    use crate::workers::Phase;
    use pretty_assertions::assert_eq;

    /// 1000 whales holding 10 ERG each, then small transfers between
    /// fresh addresses and one whale spending down.
    fn whales() -> Chain {
        let mut outputs = vec![out("base", 1000), out("pub0", 5)];
        outputs.extend((0..1000).map(|i| out(&format!("whale{i}"), 10 * COIN)));
        let mut chain = Chain::seeded(outputs);
        let base = fixtures::output_id(&chain.seed, 0, 0);
        chain.push("block-a", vec![tx("a0", &[base], vec![out("pub1", 400), out("base", 600)])]);
        let whale = fixtures::output_id(&chain.seed, 0, 2);
        chain.push("block-b", vec![tx("b0", &[whale], vec![out("pub2", 3), out("whale0", 10 * COIN - 3)])]);
        chain
    }

    #[test]
    fn carried_rows_match_a_fresh_ranking() {
        let chain = whales();
        let (db, mut pipeline) = fixtures::pipeline_db(&chain);
        for block in &chain.blocks {
            pipeline.include(&db, block, Phase::Live, false).unwrap();
            let height = block.header.height;
            db.with_conn(|conn| {
                let addresses = address_count(conn, AddressClass::P2pks, height)?.unwrap();
                let stored = row_at(conn, AddressClass::P2pks, height)?.unwrap();
                assert_eq!(stored, rank(conn, AddressClass::P2pks, addresses)?, "height {height}");
                Ok(())
            })
            .unwrap();
        }

        let cutoffs: Vec<i64> = db
            .query_all(
                "SELECT p2pks FROM mtr.supply_on_top_addresses_cutoffs ORDER BY height",
                [],
                |row| row.get(0),
            )
            .unwrap();
        // the poorest whale sets the cutoff once whale0 spends down
        assert_eq!(cutoffs, vec![10 * COIN, 10 * COIN, 10 * COIN - 3]);
    }

    #[test]
    fn small_classes_rank_everything() {
        let chain = Chain::scenario_a();
        let (db, mut pipeline) = fixtures::pipeline_db(&chain);
        for block in &chain.blocks {
            pipeline.include(&db, block, Phase::Live, false).unwrap();
        }
        let row = db
            .with_conn(|conn| row_at(conn, AddressClass::Contracts, Height(600_002)))
            .unwrap()
            .unwrap();
        assert_eq!(
            row,
            Row {
                top_1_prc: 0,
                top_1k: 41,
                top_100: 41,
                top_10: 41,
                cutoff: 0,
            }
        );
    }
}
