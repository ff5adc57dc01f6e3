//! Exchange address tracking
//!
//! A P2PK address sending to an exchange's main address is taken to be a
//! deposit address of that exchange. An address found sending to a second
//! exchange is moved to `cex.addresses_conflicts` and no longer counts as
//! a deposit. Both events change the classification of past heights, so
//! the block records an invalidation height from which derived metrics
//! must be repaired.

pub mod catalogue;
pub mod holdings;

use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use duckdb::{params, Connection};
use tracing::{debug, info};

use super::metrics::{supply_age, supply_composition};
use super::{BlockEvent, Context, Phase, Worker};
use crate::db::{self, OptionalExt};
use crate::models::{Address, BlockData, Header, Height};
use holdings::{Holdings, Supply};

pub struct CexWorker;

impl Worker for CexWorker {
    fn name(&self) -> &'static str {
        "cex"
    }

    fn process(&mut self, conn: &Connection, event: BlockEvent<'_>, ctx: &mut Context) -> Result<()> {
        match event {
            BlockEvent::Include(block) => include(conn, block, ctx),
            BlockEvent::Rollback(header) => rollback(conn, header, ctx),
        }
    }
}

fn main_addresses(conn: &Connection) -> Result<HashMap<Address, i32>> {
    Ok(db::query_all(
        conn,
        "SELECT address, cex_id FROM cex.addresses WHERE type = 'main'",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?
    .into_iter()
    .collect())
}

/// Exchanges each input address of the block sent to, in order of
/// appearance.
fn deposit_candidates(block: &BlockData, mains: &HashMap<Address, i32>) -> BTreeMap<Address, Vec<i32>> {
    let mut candidates: BTreeMap<Address, Vec<i32>> = BTreeMap::new();
    for tx in &block.transactions {
        let mut cexs: Vec<i32> = vec![];
        for output in &tx.outputs {
            if let Some(cex_id) = mains.get(&output.address) {
                if !cexs.contains(cex_id) {
                    cexs.push(*cex_id);
                }
            }
        }
        if cexs.is_empty() {
            continue;
        }
        // Only P2PK senders qualify, which leaves out miners and
        // protocol contracts.
        for input in tx.inputs.iter().filter(|i| i.address.is_p2pk() && !mains.contains_key(&i.address)) {
            let linked = candidates.entry(input.address.clone()).or_default();
            for cex_id in &cexs {
                if !linked.contains(cex_id) {
                    linked.push(*cex_id);
                }
            }
        }
    }
    candidates
}

fn is_conflicted(conn: &Connection, address: &Address) -> Result<bool> {
    let found: Option<i32> = conn
        .query_row(
            "SELECT first_cex_id FROM cex.addresses_conflicts WHERE address = ?",
            params![address],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Height of the first balance change of `address`
fn first_activity(conn: &Connection, address: &Address) -> Result<Option<Height>> {
    Ok(conn.query_row(
        "SELECT min(height) FROM adr.erg_diffs WHERE address = ?",
        params![address],
        |row| row.get(0),
    )?)
}

fn include(conn: &Connection, block: &BlockData, ctx: &mut Context) -> Result<()> {
    let height = block.height();
    let mains = main_addresses(conn)?;
    let mut invalidation: Option<Height> = None;

    for (address, cexs) in deposit_candidates(block, &mains) {
        if is_conflicted(conn, &address)? {
            continue;
        }
        let existing: Option<(i32, Option<Height>)> = conn
            .query_row(
                "SELECT cex_id, spot_height FROM cex.addresses WHERE address = ? AND type = 'deposit'",
                params![address],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let first_cex_id = existing.map(|(cex_id, _)| cex_id).unwrap_or(cexs[0]);

        if cexs.iter().any(|cex_id| *cex_id != first_cex_id) {
            let spot_height = existing.and_then(|(_, spot)| spot).unwrap_or(height);
            info!(
                address = %address,
                height = %height,
                "Deposit address linked to more than one exchange"
            );
            conn.execute(
                "INSERT INTO cex.addresses_conflicts (address, first_cex_id, type, spot_height, conflict_spot_height)
                 VALUES (?, ?, 'deposit', ?, ?)",
                params![address, first_cex_id, spot_height, height],
            )?;
            if existing.is_some() {
                conn.execute("DELETE FROM cex.addresses WHERE address = ?", params![address])?;
                let since = first_activity(conn, &address)?.unwrap_or(height);
                invalidation = Some(invalidation.map_or(since, |h| h.min(since)));
            }
        } else if existing.is_none() {
            debug!(address = %address, cex_id = first_cex_id, height = %height, "New deposit address");
            conn.execute(
                "INSERT INTO cex.addresses (address, cex_id, type, spot_height) VALUES (?, ?, 'deposit', ?)",
                params![address, first_cex_id, height],
            )?;
            let since = first_activity(conn, &address)?.unwrap_or(height);
            invalidation = Some(invalidation.map_or(since, |h| h.min(since)));
        }
    }

    let status = match ctx.phase {
        Phase::Bootstrap => "pending",
        Phase::Live => "processed",
    };
    conn.execute(
        "INSERT INTO cex.block_processing_log (header_id, height, invalidation_height, status)
         VALUES (?, ?, ?, ?)",
        params![block.header.id, height, invalidation, status],
    )?;

    let holdings = Holdings::current(conn)?;
    record_supply(conn, height, holdings.supply())?;

    if let Some(since) = invalidation {
        // The current height is brought up to date right away, earlier
        // ones by the repair pass.
        supply_composition::reclassify(conn, height, holdings.split())?;
        supply_age::reclassify(conn, height, holdings.age_weights())?;
        if ctx.phase == Phase::Live {
            ctx.request_repair(since, height.prev());
        }
    }
    Ok(())
}

/// Write one `cex.supply` row per exchange at `height`
fn record_supply(conn: &Connection, height: Height, supply: Supply) -> Result<()> {
    for (cex_id, main, deposit) in supply {
        let updated = conn.execute(
            "UPDATE cex.supply SET main = ?, deposit = ? WHERE cex_id = ? AND height = ?",
            params![main, deposit, cex_id, height],
        )?;
        if updated == 0 {
            conn.execute(
                "INSERT INTO cex.supply (height, cex_id, main, deposit) VALUES (?, ?, ?, ?)",
                params![height, cex_id, main, deposit],
            )?;
        }
    }
    Ok(())
}

/// Redo the exchange supply rows at `height` from the holdings as of
/// that height.
pub fn reclassify(conn: &Connection, height: Height, supply: Supply) -> Result<()> {
    record_supply(conn, height, supply)
}

fn rollback(conn: &Connection, header: &Header, ctx: &mut Context) -> Result<()> {
    let height = header.height;
    let invalidation: Option<Height> = conn
        .query_row(
            "SELECT invalidation_height FROM cex.block_processing_log WHERE header_id = ?",
            params![header.id],
            |row| row.get(0),
        )
        .optional()?
        .flatten();

    conn.execute("DELETE FROM cex.supply WHERE height = ?", params![height])?;
    conn.execute(
        "DELETE FROM cex.addresses WHERE type = 'deposit' AND spot_height = ?",
        params![height],
    )?;
    conn.execute(
        "INSERT INTO cex.addresses (address, cex_id, type, spot_height)
         SELECT address, first_cex_id, type, spot_height
         FROM cex.addresses_conflicts
         WHERE conflict_spot_height = ? AND spot_height < ?
         ORDER BY address",
        params![height, height],
    )?;
    conn.execute(
        "DELETE FROM cex.addresses_conflicts WHERE conflict_spot_height = ?",
        params![height],
    )?;
    conn.execute(
        "DELETE FROM cex.block_processing_log WHERE header_id = ?",
        params![header.id],
    )?;

    if let Some(since) = invalidation {
        ctx.request_repair(since, height.prev());
    }
    Ok(())
}
