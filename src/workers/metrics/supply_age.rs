//! Mean supply age per address class
//!
//! The age of a class is the balance-weighted mean of the mean age
//! timestamps of its addresses, rounded half up to the millisecond.
//! `supply_age_days` expresses it in days before the block.
//!
//! Classes other than exchanges keep running sums in
//! `mtr.supply_age_sums`, moved on each block by the balance changes it
//! made. Exchange membership changes over time, so that column is taken
//! from the exchange holdings instead.

use anyhow::{Context, Result};
use duckdb::{params, Connection};

use crate::db::{self, OptionalExt};
use crate::models::address::sql;
use crate::models::{Address, AddressKind, BlockData, Height};
use crate::workers::balances::{Balance, BalanceChange};
use crate::workers::cex::holdings::Holdings;

const DAY_MS: f64 = 86_400_000.0;

/// Weighted mean of timestamps, 0 for an empty class
pub fn weighted_timestamp(value_times_ts: i128, value: i128) -> i64 {
    if value <= 0 {
        return 0;
    }
    ((2 * value_times_ts + value) / (2 * value)) as i64
}

pub fn age_days(timestamp: i64, age_timestamp: i64) -> f64 {
    if age_timestamp == 0 {
        return 0.0;
    }
    (timestamp - age_timestamp) as f64 / DAY_MS
}

/// Running sums of a set of balances
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Weights {
    pub value: i128,
    pub value_times_ts: i128,
}

impl Weights {
    pub fn timestamp(&self) -> i64 {
        weighted_timestamp(self.value_times_ts, self.value)
    }

    pub fn add(&mut self, balance: &Balance) {
        self.value += balance.value;
        self.value_times_ts += balance.value * balance.mean_age as i128;
    }

    pub fn remove(&mut self, balance: &Balance) {
        self.value -= balance.value;
        self.value_times_ts -= balance.value * balance.mean_age as i128;
    }
}

/// Sums of the classes with a fixed membership
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Sums {
    overall: Weights,
    p2pks: Weights,
    contracts: Weights,
    miners: Weights,
}

const SUM_COLUMNS: [&str; 8] = [
    "overall_value",
    "overall_weight",
    "p2pks_value",
    "p2pks_weight",
    "contracts_value",
    "contracts_weight",
    "miners_value",
    "miners_weight",
];

fn parse_sum(text: String) -> Result<i128> {
    text.parse().with_context(|| format!("Invalid aggregate {text}"))
}

impl Sums {
    fn from_texts(texts: Vec<String>) -> Result<Sums> {
        let sums = texts.into_iter().map(parse_sum).collect::<Result<Vec<i128>>>()?;
        let weights = |i: usize| Weights {
            value: sums[2 * i],
            value_times_ts: sums[2 * i + 1],
        };
        Ok(Sums {
            overall: weights(0),
            p2pks: weights(1),
            contracts: weights(2),
            miners: weights(3),
        })
    }

    /// Classes of `address`, among the tracked ones
    fn classes_mut(&mut self, address: &Address) -> Vec<&mut Weights> {
        let kind = address.kind();
        let mut classes = vec![];
        let Sums {
            overall,
            p2pks,
            contracts,
            miners,
        } = self;
        if !matches!(kind, AddressKind::Special(special) if special.is_non_circulating()) {
            classes.push(overall);
        }
        match kind {
            AddressKind::P2PK => classes.push(p2pks),
            AddressKind::OtherContract => classes.push(contracts),
            AddressKind::MinerContract => classes.push(miners),
            AddressKind::Special(_) => {}
        }
        classes
    }

    fn after(mut self, changes: &[BalanceChange]) -> Sums {
        for change in changes {
            for weights in self.classes_mut(&change.address) {
                weights.remove(&change.old);
                weights.add(&change.new);
            }
        }
        self
    }

    /// Sums over every current balance
    fn scan(conn: &Connection) -> Result<Sums> {
        let predicates = [
            format!("not {}", sql::is_non_circulating("address")),
            sql::is_p2pk("address"),
            sql::is_other_contract("address"),
            sql::is_miner("address"),
        ];
        let columns = predicates
            .iter()
            .map(|predicate| {
                format!(
                    "coalesce(sum(value::HUGEINT) FILTER (WHERE {predicate}), 0)::VARCHAR,
                     coalesce(sum(value::HUGEINT * mean_age_timestamp) FILTER (WHERE {predicate}), 0)::VARCHAR"
                )
            })
            .collect::<Vec<_>>()
            .join(",\n");
        let texts: Vec<String> = conn.query_row(&format!("SELECT {columns} FROM adr.erg"), [], |row| {
            (0..SUM_COLUMNS.len()).map(|i| row.get(i)).collect()
        })?;
        Sums::from_texts(texts)
    }

    fn at(conn: &Connection, height: Height) -> Result<Option<Sums>> {
        let columns = SUM_COLUMNS
            .iter()
            .map(|c| format!("{c}::VARCHAR"))
            .collect::<Vec<_>>()
            .join(", ");
        let texts: Option<Vec<String>> = conn
            .query_row(
                &format!("SELECT {columns} FROM mtr.supply_age_sums WHERE height = ?"),
                params![height],
                |row| (0..SUM_COLUMNS.len()).map(|i| row.get(i)).collect(),
            )
            .optional()?;
        texts.map(Sums::from_texts).transpose()
    }

    fn store(&self, conn: &Connection, height: Height) -> Result<()> {
        let values = [self.overall, self.p2pks, self.contracts, self.miners]
            .iter()
            .flat_map(|w| [w.value.to_string(), w.value_times_ts.to_string()])
            .collect::<Vec<_>>();
        let placeholders = vec!["CAST(? AS HUGEINT)"; SUM_COLUMNS.len()].join(", ");
        conn.execute(
            &format!(
                "INSERT INTO mtr.supply_age_sums (height, {}) VALUES ({}, {placeholders})",
                SUM_COLUMNS.join(", "),
                height.value()
            ),
            duckdb::params_from_iter(values),
        )?;
        Ok(())
    }
}

pub fn include(conn: &Connection, block: &BlockData, changes: &[BalanceChange], holdings: &Holdings) -> Result<()> {
    let height = block.height();
    let sums = match Sums::at(conn, height.prev())? {
        Some(previous) => previous.after(changes),
        None => Sums::scan(conn)?,
    };
    sums.store(conn, height)?;

    let timestamps = [
        sums.overall.timestamp(),
        sums.p2pks.timestamp(),
        holdings.age_weights().timestamp(),
        sums.contracts.timestamp(),
        sums.miners.timestamp(),
    ];
    let days: Vec<f64> = timestamps.iter().map(|ts| age_days(block.timestamp(), *ts)).collect();

    conn.execute(
        "INSERT INTO mtr.supply_age_timestamps (height, overall, p2pks, cexs, contracts, miners)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![height, timestamps[0], timestamps[1], timestamps[2], timestamps[3], timestamps[4]],
    )?;
    conn.execute(
        "INSERT INTO mtr.supply_age_days (height, overall, p2pks, cexs, contracts, miners)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![height, days[0], days[1], days[2], days[3], days[4]],
    )?;
    Ok(())
}

/// Rewrite the exchange column of the rows at `height` from the
/// exchange `weights` as of that height.
pub fn reclassify(conn: &Connection, height: Height, weights: Weights) -> Result<()> {
    let exists: Option<i32> = conn
        .query_row(
            "SELECT height FROM mtr.supply_age_timestamps WHERE height = ?",
            params![height],
            |row| row.get(0),
        )
        .optional()?;
    let (Some(_), Some(block_timestamp)) = (exists, db::timestamp_at(conn, height)?) else {
        return Ok(());
    };

    let timestamp = weights.timestamp();
    conn.execute(
        "UPDATE mtr.supply_age_timestamps SET cexs = ? WHERE height = ?",
        params![timestamp, height],
    )?;
    conn.execute(
        "UPDATE mtr.supply_age_days SET cexs = ? WHERE height = ?",
        params![age_days(block_timestamp, timestamp), height],
    )?;
    Ok(())
}
