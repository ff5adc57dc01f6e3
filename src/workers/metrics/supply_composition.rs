//! Supply split across address classes
//!
//! Exchange addresses are carved out of the P2PK share. Since deposit
//! addresses are discovered after the fact, past rows are reclassified by
//! the repair pass; the P2PK total (`p2pks + cex_main + cex_deposits`) of a
//! row never changes.

use anyhow::Result;
use duckdb::{params, Connection};

use crate::db::OptionalExt;
use crate::models::address::sql;
use crate::models::{AddressKind, Height, SpecialAddress};
use crate::workers::balances::BalanceChange;

/// ERG held by exchange addresses of P2PK type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CexSplit {
    pub main: i64,
    pub deposits: i64,
}

/// Class totals, exchanges included in `p2pks`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Totals {
    p2pks: i64,
    contracts: i64,
    miners: i64,
    treasury: i64,
}

impl Totals {
    fn at(conn: &Connection, height: Height) -> Result<Option<Totals>> {
        Ok(conn
            .query_row(
                "SELECT p2pks + cex_main + cex_deposits, contracts, miners, treasury
                 FROM mtr.supply_composition WHERE height = ?",
                params![height],
                |row| {
                    Ok(Totals {
                        p2pks: row.get(0)?,
                        contracts: row.get(1)?,
                        miners: row.get(2)?,
                        treasury: row.get(3)?,
                    })
                },
            )
            .optional()?)
    }

    fn scan(conn: &Connection) -> Result<Totals> {
        Ok(conn.query_row(
            &format!(
                "SELECT
                    coalesce(sum(value) FILTER (WHERE {}), 0)::BIGINT,
                    coalesce(sum(value) FILTER (WHERE {}), 0)::BIGINT,
                    coalesce(sum(value) FILTER (WHERE {}), 0)::BIGINT,
                    coalesce(sum(value) FILTER (WHERE {}), 0)::BIGINT
                FROM adr.erg",
                sql::is_p2pk("address"),
                sql::is_other_contract("address"),
                sql::is_miner("address"),
                sql::is_treasury("address"),
            ),
            [],
            |row| {
                Ok(Totals {
                    p2pks: row.get(0)?,
                    contracts: row.get(1)?,
                    miners: row.get(2)?,
                    treasury: row.get(3)?,
                })
            },
        )?)
    }

    fn after(mut self, changes: &[BalanceChange]) -> Totals {
        for change in changes {
            let delta = change.value_delta() as i64;
            match change.address.kind() {
                AddressKind::P2PK => self.p2pks += delta,
                AddressKind::OtherContract => self.contracts += delta,
                AddressKind::MinerContract => self.miners += delta,
                AddressKind::Special(SpecialAddress::Treasury) => self.treasury += delta,
                AddressKind::Special(_) => {}
            }
        }
        self
    }
}

pub fn include(conn: &Connection, height: Height, changes: &[BalanceChange], split: CexSplit) -> Result<()> {
    let totals = match Totals::at(conn, height.prev())? {
        Some(previous) => previous.after(changes),
        None => Totals::scan(conn)?,
    };

    conn.execute(
        "INSERT INTO mtr.supply_composition (height, p2pks, cex_main, cex_deposits, contracts, miners, treasury)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
            height,
            totals.p2pks - split.main - split.deposits,
            split.main,
            split.deposits,
            totals.contracts,
            totals.miners,
            totals.treasury
        ],
    )?;
    Ok(())
}

/// Redo the exchange split of the row at `height` with the split as of
/// that height.
pub fn reclassify(conn: &Connection, height: Height, split: CexSplit) -> Result<()> {
    let total: Option<i64> = conn
        .query_row(
            "SELECT p2pks + cex_main + cex_deposits FROM mtr.supply_composition WHERE height = ?",
            params![height],
            |row| row.get(0),
        )
        .optional()?;
    let Some(total) = total else {
        return Ok(());
    };

    conn.execute(
        "UPDATE mtr.supply_composition
         SET p2pks = ?, cex_main = ?, cex_deposits = ?
         WHERE height = ?",
        params![total - split.main - split.deposits, split.main, split.deposits, height],
    )?;
    Ok(())
}
