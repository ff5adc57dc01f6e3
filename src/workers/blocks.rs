//! Per-block aggregates: emission, reward, fees, volume and supply

use anyhow::Result;
use duckdb::{params, Connection};

use super::balances::erg_diffs;
use super::{BlockEvent, Context, Worker};
use crate::models::{AddressKind, BlockData, Height, SpecialAddress, COIN};

const FIXED_RATE_PERIOD: i64 = 525_600;
const EPOCH_LENGTH: i64 = 64_800;
const FIXED_RATE: i64 = 75 * COIN;
const EPOCH_REDUCTION: i64 = 3 * COIN;
const MINERS_SHARE: i64 = 67 * COIN + COIN / 2;
const REEMISSION_START: i64 = 777_217;
const REEMISSION_CHARGE: i64 = 12 * COIN;
const BASIC_CHARGE: i64 = 3 * COIN;

/// New nanoERG created at `height`
pub fn emission(height: Height) -> i64 {
    let h = height.0 as i64;
    if h < 1 {
        0
    } else if h < FIXED_RATE_PERIOD {
        FIXED_RATE
    } else {
        let epoch = 1 + (h - FIXED_RATE_PERIOD) / EPOCH_LENGTH;
        (FIXED_RATE - epoch * EPOCH_REDUCTION).max(0)
    }
}

/// Part of the emission paid to the treasury
pub fn treasury(height: Height) -> i64 {
    let h = height.0 as i64;
    if h < FIXED_RATE_PERIOD + 2 * EPOCH_LENGTH {
        (emission(height) - MINERS_SHARE).max(0)
    } else {
        0
    }
}

/// Part of the emission locked into re-emission contracts
pub fn reemission(height: Height) -> i64 {
    let h = height.0 as i64;
    let emitted = emission(height);
    if h < REEMISSION_START {
        0
    } else if emitted >= REEMISSION_CHARGE + BASIC_CHARGE {
        REEMISSION_CHARGE
    } else {
        (emitted - BASIC_CHARGE).max(0)
    }
}

pub fn reward(height: Height) -> i64 {
    emission(height) - treasury(height) - reemission(height)
}

/// Last height sharing the emission and re-emission of `h`
fn segment_end(h: i64) -> i64 {
    let end = if h < FIXED_RATE_PERIOD {
        FIXED_RATE_PERIOD - 1
    } else {
        let epoch = (h - FIXED_RATE_PERIOD) / EPOCH_LENGTH;
        FIXED_RATE_PERIOD + (epoch + 1) * EPOCH_LENGTH - 1
    };
    if h < REEMISSION_START {
        end.min(REEMISSION_START - 1)
    } else {
        end
    }
}

/// Sum of `emission - reemission` over heights `1..=height`
pub fn circulating_supply(height: Height) -> i64 {
    let last = height.0 as i64;
    let mut supply = 0;
    let mut start = 1;
    while start <= last {
        let end = segment_end(start).min(last);
        let h = Height(start as i32);
        supply += (end - start + 1) * (emission(h) - reemission(h));
        start = end + 1;
    }
    supply
}

pub struct BlockStatsWorker;

impl Worker for BlockStatsWorker {
    fn name(&self) -> &'static str {
        "block stats"
    }

    fn process(&mut self, conn: &Connection, event: BlockEvent<'_>, _ctx: &mut Context) -> Result<()> {
        match event {
            BlockEvent::Include(block) => include(conn, block),
            BlockEvent::Rollback(header) => {
                conn.execute("DELETE FROM blk.stats WHERE height = ?", params![header.height])?;
                Ok(())
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
struct Stats {
    tx_fees: i64,
    tx_count: i64,
    volume: i64,
}

fn stats(block: &BlockData) -> Stats {
    let mut tx_fees = 0;
    let mut volume: i128 = 0;
    for tx in &block.transactions {
        tx_fees += tx
            .outputs
            .iter()
            .filter(|o| o.address.kind() == AddressKind::Special(SpecialAddress::Fees))
            .map(|o| o.value)
            .sum::<i64>();
        volume += erg_diffs(tx)
            .into_iter()
            .filter(|(address, diff)| {
                *diff < 0
                    && !matches!(
                        address.kind(),
                        AddressKind::Special(SpecialAddress::Coinbase | SpecialAddress::Fees)
                    )
            })
            .map(|(_, diff)| -diff)
            .sum::<i128>();
    }
    Stats {
        tx_fees,
        tx_count: block.transactions.len() as i64,
        volume: volume.min(i64::MAX as i128) as i64,
    }
}

fn include(conn: &Connection, block: &BlockData) -> Result<()> {
    let height = block.height();
    let stats = stats(block);
    conn.execute(
        "INSERT INTO blk.stats (height, circulating_supply, emission, reward, tx_fees, tx_count, volume)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
            height,
            circulating_supply(height),
            emission(height),
            reward(height),
            stats.tx_fees,
            stats.tx_count,
            stats.volume
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures::{self, Chain};
    use crate::workers::Phase;
    use pretty_assertions::assert_eq;

    fn naive_supply(height: i32) -> i64 {
        (1..=height).map(|h| emission(Height(h)) - reemission(Height(h))).sum()
    }

    #[test]
    fn emission_schedule() {
        assert_eq!(emission(Height(0)), 0);
        assert_eq!(emission(Height(1)), 75 * COIN);
        assert_eq!(emission(Height(525_599)), 75 * COIN);
        assert_eq!(emission(Height(525_600)), 72 * COIN);
        assert_eq!(emission(Height(600_000)), 69 * COIN);
        assert_eq!(emission(Height(2_080_799)), 3 * COIN);
        assert_eq!(emission(Height(2_080_800)), 0);
    }

    #[test]
    fn treasury_and_reemission_shares() {
        assert_eq!(treasury(Height(1)), 7 * COIN + COIN / 2);
        assert_eq!(treasury(Height(600_000)), COIN + COIN / 2);
        assert_eq!(treasury(Height(655_200)), 0);

        assert_eq!(reemission(Height(777_216)), 0);
        assert_eq!(reemission(Height(777_217)), 12 * COIN);
        // emission of 12 ERG leaves 9 for re-emission
        let h = Height(1_821_600);
        assert_eq!(emission(h), 12 * COIN);
        assert_eq!(reemission(h), 9 * COIN);

        assert_eq!(reward(Height(600_000)), 67 * COIN + COIN / 2);
        assert_eq!(reward(Height(800_000)), emission(Height(800_000)) - 12 * COIN);
    }

    #[test]
    fn closed_form_supply_matches_running_sum() {
        for h in [0, 1, 10, 525_599, 525_600, 525_601, 590_400, 777_216, 777_217, 777_300] {
            assert_eq!(circulating_supply(Height(h)), naive_supply(h), "height {h}");
        }
        assert_eq!(circulating_supply(Height(525_599)), 525_599 * 75 * COIN);
    }

    #[test]
    fn stats_of_scenario_blocks() {
        let chain = Chain::scenario_a();
        let (db, mut pipeline) = fixtures::pipeline_db(&chain);
        for block in &chain.blocks {
            pipeline.include(&db, block, Phase::Live, false).unwrap();
        }

        let rows: Vec<(i32, i64, i64, i64)> = db
            .query_all(
                "SELECT height, tx_count, volume, circulating_supply FROM blk.stats ORDER BY height",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .unwrap();
        let supply = |h: i32| circulating_supply(Height(h));
        assert_eq!(
            rows,
            vec![
                (599_999, 1, 0, supply(599_999)),
                (600_000, 1, 50, supply(600_000)),
                (600_001, 1, 40, supply(600_001)),
                (600_002, 2, 11, supply(600_002)),
            ]
        );
    }

    #[test]
    fn rollback_deletes_row() {
        let chain = Chain::scenario_a();
        let (db, mut pipeline) = fixtures::pipeline_db(&chain);
        let data = pipeline.include(&db, &chain.blocks[0], Phase::Live, false).unwrap();
        pipeline.rollback(&db, &data.header, Phase::Live).unwrap();

        let count: i64 = db
            .query_one("SELECT count(*) FROM blk.stats WHERE height = 600000", [], |row| row.get(0))
            .unwrap()
            .unwrap();
        assert_eq!(count, 0);
    }
}
