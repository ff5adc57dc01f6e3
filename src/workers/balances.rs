//! ERG and token balances per address
//!
//! Diffs are recorded per transaction and address. Balances are updated
//! once per block from the net diff of each address, which is also what
//! drives the mean age timestamp:
//!
//! - net inflow Δ on balance B with mean age τ at block time t gives
//!   τ' = (B·τ + Δ·t) / (B + Δ), rounded half up
//! - net outflow leaves τ unchanged
//! - a balance dropping to zero removes the row, so a later inflow starts
//!   over from the block time

use std::collections::BTreeMap;

use anyhow::Result;
use duckdb::{params, Connection};

use super::{BlockEvent, Context, Worker};
use crate::db::{self, OptionalExt};
use crate::error::IntegrityError;
use crate::models::{Address, BlockData, Header, Height, TokenId, TxData};

pub struct BalancesWorker;

impl Worker for BalancesWorker {
    fn name(&self) -> &'static str {
        "balances"
    }

    fn process(&mut self, conn: &Connection, event: BlockEvent<'_>, ctx: &mut Context) -> Result<()> {
        match event {
            BlockEvent::Include(block) => include(conn, block, ctx),
            BlockEvent::Rollback(header) => rollback(conn, header),
        }
    }
}

/// Net nanoERG change per address in a transaction, zero entries dropped
pub fn erg_diffs(tx: &TxData) -> BTreeMap<Address, i128> {
    let mut diffs: BTreeMap<Address, i128> = BTreeMap::new();
    for input in &tx.inputs {
        *diffs.entry(input.address.clone()).or_default() -= input.value as i128;
    }
    for output in &tx.outputs {
        *diffs.entry(output.address.clone()).or_default() += output.value as i128;
    }
    diffs.retain(|_, v| *v != 0);
    diffs
}

fn token_diffs(tx: &TxData) -> BTreeMap<(Address, TokenId), i128> {
    let mut diffs: BTreeMap<(Address, TokenId), i128> = BTreeMap::new();
    for input in &tx.inputs {
        for asset in &input.assets {
            *diffs.entry((input.address.clone(), asset.token_id)).or_default() -= asset.amount as i128;
        }
    }
    for output in &tx.outputs {
        for asset in &output.assets {
            *diffs.entry((output.address.clone(), asset.token_id)).or_default() += asset.amount as i128;
        }
    }
    diffs.retain(|_, v| *v != 0);
    diffs
}

/// Weighted average of the current mean age and the block time, rounded
/// half up.
pub fn mean_age_after_inflow(balance: i128, mean_age: i64, inflow: i128, timestamp: i64) -> i64 {
    if balance <= 0 {
        return timestamp;
    }
    let total = balance + inflow;
    let weighted = balance * mean_age as i128 + inflow * timestamp as i128;
    ((2 * weighted + total) / (2 * total)) as i64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Balance {
    pub value: i128,
    pub mean_age: i64,
}

impl Balance {
    pub const ZERO: Balance = Balance { value: 0, mean_age: 0 };

    /// Balance after a block with net change `delta` at `timestamp`
    pub fn apply(self, delta: i128, timestamp: i64) -> Balance {
        let value = self.value + delta;
        if value == 0 {
            return Balance::ZERO;
        }
        let mean_age = if delta > 0 {
            mean_age_after_inflow(self.value, self.mean_age, delta, timestamp)
        } else {
            self.mean_age
        };
        Balance { value, mean_age }
    }
}

/// ERG balance of an address before and after a block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceChange {
    pub address: Address,
    pub old: Balance,
    pub new: Balance,
}

impl BalanceChange {
    pub fn value_delta(&self) -> i128 {
        self.new.value - self.old.value
    }
}

fn to_i64(value: i128, height: Height) -> Result<i64, IntegrityError> {
    i64::try_from(value).map_err(|_| IntegrityError::Overflow { height })
}

fn load_erg(conn: &Connection, address: &Address) -> Result<Option<Balance>> {
    Ok(conn
        .query_row(
            "SELECT value, mean_age_timestamp FROM adr.erg WHERE address = ?",
            params![address],
            |row| {
                Ok(Balance {
                    value: row.get::<_, i64>(0)? as i128,
                    mean_age: row.get(1)?,
                })
            },
        )
        .optional()?)
}

/// Write `new` over `old`, touching each address at most once.
fn store_erg(conn: &Connection, address: &Address, old: Option<Balance>, new: Balance, height: Height) -> Result<()> {
    if new.value < 0 {
        return Err(IntegrityError::NegativeBalance {
            address: address.clone(),
            value: new.value,
            height,
        }
        .into());
    }
    match (old, new.value) {
        (None, 0) => {}
        (Some(_), 0) => {
            conn.execute("DELETE FROM adr.erg WHERE address = ?", params![address])?;
        }
        (None, _) => {
            conn.execute(
                "INSERT INTO adr.erg (address, value, mean_age_timestamp) VALUES (?, ?, ?)",
                params![address, to_i64(new.value, height)?, new.mean_age],
            )?;
        }
        (Some(_), _) => {
            conn.execute(
                "UPDATE adr.erg SET value = ?, mean_age_timestamp = ? WHERE address = ?",
                params![to_i64(new.value, height)?, new.mean_age, address],
            )?;
        }
    }
    Ok(())
}

fn load_token(conn: &Connection, address: &Address, token_id: &TokenId) -> Result<Option<i128>> {
    Ok(conn
        .query_row(
            "SELECT value FROM adr.tokens WHERE address = ? AND token_id = ?",
            params![address, token_id],
            |row| row.get::<_, i64>(0),
        )
        .optional()?
        .map(i128::from))
}

fn store_token(
    conn: &Connection,
    address: &Address,
    token_id: &TokenId,
    old: Option<i128>,
    new: i128,
    height: Height,
) -> Result<()> {
    if new < 0 {
        return Err(IntegrityError::NegativeTokenBalance {
            address: address.clone(),
            token_id: *token_id,
            value: new,
            height,
        }
        .into());
    }
    match (old, new) {
        (None, 0) => {}
        (Some(_), 0) => {
            conn.execute(
                "DELETE FROM adr.tokens WHERE address = ? AND token_id = ?",
                params![address, token_id],
            )?;
        }
        (None, _) => {
            conn.execute(
                "INSERT INTO adr.tokens (address, token_id, value) VALUES (?, ?, ?)",
                params![address, token_id, to_i64(new, height)?],
            )?;
        }
        (Some(_), _) => {
            conn.execute(
                "UPDATE adr.tokens SET value = ? WHERE address = ? AND token_id = ?",
                params![to_i64(new, height)?, address, token_id],
            )?;
        }
    }
    Ok(())
}

fn include(conn: &Connection, block: &BlockData, ctx: &mut Context) -> Result<()> {
    let height = block.height();
    let mut net_erg: BTreeMap<Address, i128> = BTreeMap::new();
    let mut net_tokens: BTreeMap<(Address, TokenId), i128> = BTreeMap::new();

    for tx in &block.transactions {
        for (address, value) in erg_diffs(tx) {
            conn.execute(
                "INSERT INTO adr.erg_diffs (address, height, tx_id, value) VALUES (?, ?, ?, ?)",
                params![address, height, tx.id, to_i64(value, height)?],
            )?;
            *net_erg.entry(address).or_default() += value;
        }
        for ((address, token_id), value) in token_diffs(tx) {
            conn.execute(
                "INSERT INTO adr.tokens_diffs (address, token_id, height, tx_id, value)
                 VALUES (?, ?, ?, ?, ?)",
                params![address, token_id, height, tx.id, to_i64(value, height)?],
            )?;
            *net_tokens.entry((address, token_id)).or_default() += value;
        }
    }

    for (address, delta) in net_erg.into_iter().filter(|(_, d)| *d != 0) {
        let old = load_erg(conn, &address)?;
        let new = old.unwrap_or(Balance::ZERO).apply(delta, block.timestamp());
        store_erg(conn, &address, old, new, height)?;
        ctx.erg_changes.push(BalanceChange {
            address,
            old: old.unwrap_or(Balance::ZERO),
            new,
        });
    }

    for ((address, token_id), delta) in net_tokens.into_iter().filter(|(_, d)| *d != 0) {
        let old = load_token(conn, &address, &token_id)?;
        let new = old.unwrap_or(0) + delta;
        store_token(conn, &address, &token_id, old, new, height)?;
    }
    Ok(())
}

/// Net diff per address at `height`
fn net_erg_at(conn: &Connection, height: Height) -> Result<Vec<(Address, i64)>> {
    db::query_all(
        conn,
        "SELECT address, sum(value)::BIGINT
         FROM adr.erg_diffs
         WHERE height = ?
         GROUP BY address
         ORDER BY address",
        params![height],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
}

/// Rebuild an address' balance from its diffs below `height`.
fn replay_erg(conn: &Connection, address: &Address, height: Height) -> Result<Balance> {
    let steps = db::query_all(
        conn,
        "SELECT h.timestamp, sum(d.value)::BIGINT
         FROM adr.erg_diffs d
         JOIN core.headers h ON h.height = d.height
         WHERE d.address = ? AND d.height < ?
         GROUP BY d.height, h.timestamp
         ORDER BY d.height",
        params![address, height],
        |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
    )?;
    Ok(steps
        .into_iter()
        .filter(|(_, delta)| *delta != 0)
        .fold(Balance::ZERO, |balance, (timestamp, delta)| {
            balance.apply(delta as i128, timestamp)
        }))
}

fn rollback(conn: &Connection, header: &Header) -> Result<()> {
    let height = header.height;

    for (address, net) in net_erg_at(conn, height)? {
        let current = load_erg(conn, &address)?;
        let restored_value = current.map(|b| b.value).unwrap_or(0) - net as i128;
        let restored = match current {
            // An outflow did not move the mean age
            Some(balance) if net < 0 => Balance {
                value: restored_value,
                mean_age: balance.mean_age,
            },
            _ if restored_value == 0 => Balance::ZERO,
            _ => replay_erg(conn, &address, height)?,
        };
        if restored.value != restored_value {
            return Err(IntegrityError::NegativeBalance {
                address,
                value: restored_value,
                height,
            }
            .into());
        }
        store_erg(conn, &address, current, restored, height)?;
    }

    let token_nets = db::query_all(
        conn,
        "SELECT address, token_id, sum(value)::BIGINT
         FROM adr.tokens_diffs
         WHERE height = ?
         GROUP BY address, token_id
         ORDER BY address, token_id",
        params![height],
        |row| Ok((row.get::<_, Address>(0)?, row.get::<_, TokenId>(1)?, row.get::<_, i64>(2)?)),
    )?;
    for (address, token_id, net) in token_nets {
        let current = load_token(conn, &address, &token_id)?;
        let restored = current.unwrap_or(0) - net as i128;
        store_token(conn, &address, &token_id, current, restored, height)?;
    }

    conn.execute("DELETE FROM adr.erg_diffs WHERE height = ?", params![height])?;
    conn.execute("DELETE FROM adr.tokens_diffs WHERE height = ?", params![height])?;
    Ok(())
}
