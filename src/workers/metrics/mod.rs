//! Metric series derived from the ledger and balances
//!
//! Every series holds one row per height and is rolled back by deleting
//! that row. Summary tables are rebuilt from the latest rows once a live
//! block has gone through every worker.

pub mod address_counts;
pub mod summary;
pub mod supply_age;
pub mod supply_composition;
pub mod supply_distribution;
pub mod timestamps;
pub mod transactions;
pub mod utxos;

use anyhow::Result;
use duckdb::{params, Connection};

use super::cex::holdings::Holdings;
use super::{BlockEvent, Context, Worker};
use crate::models::address::sql;
use crate::models::{Address, AddressKind};

pub use summary::refresh_summaries;

/// Address groups most series are split by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressClass {
    P2pks,
    Contracts,
    Miners,
}

impl AddressClass {
    pub const ALL: [AddressClass; 3] = [AddressClass::P2pks, AddressClass::Contracts, AddressClass::Miners];

    /// Suffix of the per-class series tables
    pub fn suffix(self) -> &'static str {
        match self {
            AddressClass::P2pks => "p2pks",
            AddressClass::Contracts => "contracts",
            AddressClass::Miners => "miners",
        }
    }

    pub fn of(address: &Address) -> Option<AddressClass> {
        match address.kind() {
            AddressKind::P2PK => Some(AddressClass::P2pks),
            AddressKind::OtherContract => Some(AddressClass::Contracts),
            AddressKind::MinerContract => Some(AddressClass::Miners),
            AddressKind::Special(_) => None,
        }
    }

    /// SQL predicate selecting the class on column `col`
    pub fn predicate(self, col: &str) -> String {
        match self {
            AddressClass::P2pks => sql::is_p2pk(col),
            AddressClass::Contracts => sql::is_other_contract(col),
            AddressClass::Miners => sql::is_miner(col),
        }
    }
}

/// Tables holding one row per height
const HEIGHT_KEYED: &[&str] = &[
    "mtr.utxos",
    "mtr.address_counts_by_balance_p2pks",
    "mtr.address_counts_by_balance_contracts",
    "mtr.address_counts_by_balance_miners",
    "mtr.supply_on_top_addresses_p2pks",
    "mtr.supply_on_top_addresses_contracts",
    "mtr.supply_on_top_addresses_miners",
    "mtr.supply_on_top_addresses_cutoffs",
    "mtr.supply_composition",
    "mtr.supply_age_timestamps",
    "mtr.supply_age_days",
    "mtr.supply_age_sums",
    "mtr.transactions",
    "mtr.volume",
    "mtr.ergusd",
    "mtr.ergusd_provisional",
];

pub struct MetricsWorker;

impl Worker for MetricsWorker {
    fn name(&self) -> &'static str {
        "metrics"
    }

    fn process(&mut self, conn: &Connection, event: BlockEvent<'_>, ctx: &mut Context) -> Result<()> {
        match event {
            BlockEvent::Include(block) => {
                let height = block.height();
                timestamps::include(conn, block)?;
                utxos::include(conn, block)?;
                address_counts::include(conn, height)?;
                supply_distribution::include(conn, height, &ctx.erg_changes)?;
                let holdings = Holdings::current(conn)?;
                supply_composition::include(conn, height, &ctx.erg_changes, holdings.split())?;
                supply_age::include(conn, block, &ctx.erg_changes, &holdings)?;
                transactions::include(conn, block)?;
            }
            BlockEvent::Rollback(header) => {
                for table in HEIGHT_KEYED {
                    conn.execute(&format!("DELETE FROM {table} WHERE height = ?"), params![header.height])?;
                }
                timestamps::rollback(conn, header.height)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::Height;
    use crate::testing::fixtures::{self, Chain};
    use crate::testing::snapshot;
    use crate::workers::Phase;
    use pretty_assertions::assert_eq;

    fn synced() -> (Database, Chain) {
        let chain = Chain::scenario_a();
        let (db, mut pipeline) = fixtures::pipeline_db(&chain);
        for block in &chain.blocks {
            pipeline.include(&db, block, Phase::Live, false).unwrap();
        }
        (db, chain)
    }

    fn ints(db: &Database, sql: &str) -> Vec<i64> {
        db.query_all(sql, [], |row| row.get(0)).unwrap()
    }

    #[test]
    fn utxo_counts_follow_unspent_index() {
        let (db, _) = synced();
        assert_eq!(ints(&db, "SELECT value FROM mtr.utxos ORDER BY height"), vec![1, 2, 3, 5]);
        assert_eq!(ints(&db, "SELECT count(*) FROM core.unspent"), vec![5]);
    }

    #[test]
    fn address_counts_by_class() {
        let (db, _) = synced();
        assert_eq!(
            ints(&db, "SELECT total FROM mtr.address_counts_by_balance_p2pks ORDER BY height"),
            vec![1, 1, 1, 3]
        );
        assert_eq!(
            ints(&db, "SELECT total FROM mtr.address_counts_by_balance_contracts ORDER BY height"),
            vec![0, 1, 2, 2]
        );
        // all balances are below 0.001 ERG
        assert_eq!(
            ints(&db, "SELECT ge_0p001 FROM mtr.address_counts_by_balance_p2pks ORDER BY height"),
            vec![0, 0, 0, 0]
        );
    }

    #[test]
    fn incremental_counts_match_recount() {
        let (db, _) = synced();
        for class in AddressClass::ALL {
            let stored = db
                .with_conn(|conn| address_counts::row_at(conn, class, Height(600_002)))
                .unwrap()
                .unwrap();
            let recount = db.with_conn(|conn| address_counts::count_all(conn, class)).unwrap();
            assert_eq!(stored, recount, "{}", class.suffix());
        }
    }

    #[test]
    fn top_addresses_supply() {
        let (db, _) = synced();
        let p2pks: Vec<(i64, i64, i64, i64)> = db
            .query_all(
                "SELECT top_1_prc, top_1k, top_100, top_10
                 FROM mtr.supply_on_top_addresses_p2pks
                 WHERE height = 600002",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .unwrap();
        // fewer than 100 addresses: top 1% is empty
        assert_eq!(p2pks, vec![(0, 959, 959, 959)]);
    }

    #[test]
    fn supply_composition_splits_by_class() {
        let (db, _) = synced();
        let row: (i64, i64, i64, i64, i64, i64) = db
            .query_one(
                "SELECT p2pks, cex_main, cex_deposits, contracts, miners, treasury
                 FROM mtr.supply_composition WHERE height = 600002",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?)),
            )
            .unwrap()
            .unwrap();
        assert_eq!(row, (959, 0, 0, 41, 0, 0));
    }

    #[test]
    fn transactions_and_volume_windows() {
        let (db, _) = synced();
        assert_eq!(
            ints(&db, "SELECT daily_1d FROM mtr.transactions ORDER BY height"),
            vec![1, 2, 3, 5]
        );
        assert_eq!(
            ints(&db, "SELECT daily_1d FROM mtr.volume ORDER BY height"),
            vec![0, 50, 90, 101]
        );
        let mean_7d: f64 = db
            .query_one("SELECT daily_7d FROM mtr.transactions WHERE height = 600002", [], |row| row.get(0))
            .unwrap()
            .unwrap();
        assert!((mean_7d - 5.0 / 7.0).abs() < 1e-9);
    }

    #[test]
    fn summaries_cover_latest_rows() {
        let (db, _) = synced();
        let utxos: Vec<(String, f64, f64)> = db
            .query_all(
                "SELECT label, current, diff_1d FROM mtr.utxos_summary",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        // every row is within a day: the diff is taken from the oldest row
        assert_eq!(utxos, vec![("value".to_string(), 5.0, 4.0)]);

        let labels = ints(&db, "SELECT count(*) FROM mtr.supply_composition_summary");
        assert_eq!(labels, vec![6]);
    }

    #[test]
    fn rollback_restores_metrics() {
        let chain = Chain::scenario_a();
        let (db, mut pipeline) = fixtures::pipeline_db(&chain);
        pipeline.include(&db, &chain.blocks[0], Phase::Live, false).unwrap();
        pipeline.include(&db, &chain.blocks[1], Phase::Live, false).unwrap();
        let before = snapshot::schema(&db, "mtr");

        let data = pipeline.include(&db, &chain.blocks[2], Phase::Live, false).unwrap();
        pipeline.rollback(&db, &data.header, Phase::Live).unwrap();
        assert_eq!(snapshot::schema(&db, "mtr"), before);
    }
}
