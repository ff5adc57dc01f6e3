//! Balances of the known exchange addresses
//!
//! The exchange address set is small next to `adr.erg`, so its balances
//! are read straight from the balance table at the tip. Past heights are
//! replayed from the diffs once, then carried forward one height at a
//! time over a repair window.

use std::collections::BTreeMap;

use anyhow::Result;
use duckdb::{params, Connection};

use crate::db;
use crate::models::{Address, Height};
use crate::workers::balances::Balance;
use crate::workers::metrics::supply_age::Weights;
use crate::workers::metrics::supply_composition::CexSplit;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Main,
    Deposit,
}

#[derive(Debug, Clone, Copy)]
struct Member {
    cex_id: i32,
    role: Role,
    p2pk: bool,
}

/// (cex id, main, deposit) for every exchange
pub type Supply = Vec<(i32, i64, i64)>;

#[derive(Debug)]
pub struct Holdings {
    cex_ids: Vec<i32>,
    members: BTreeMap<Address, Member>,
    balances: BTreeMap<Address, Balance>,
}

impl Holdings {
    fn empty(conn: &Connection) -> Result<Holdings> {
        let cex_ids = db::query_all(conn, "SELECT id FROM cex.cexs ORDER BY id", [], |row| row.get(0))?;
        let members = db::query_all(
            conn,
            "SELECT address, cex_id, type FROM cex.addresses",
            [],
            |row| Ok((row.get::<_, Address>(0)?, row.get::<_, i32>(1)?, row.get::<_, String>(2)?)),
        )?
        .into_iter()
        .map(|(address, cex_id, role)| {
            let member = Member {
                cex_id,
                role: if role == "main" { Role::Main } else { Role::Deposit },
                p2pk: address.is_p2pk(),
            };
            (address, member)
        })
        .collect();
        Ok(Holdings {
            cex_ids,
            members,
            balances: BTreeMap::new(),
        })
    }

    /// Holdings at the current tip
    pub fn current(conn: &Connection) -> Result<Holdings> {
        let mut holdings = Holdings::empty(conn)?;
        let balances = db::query_all(
            conn,
            "SELECT b.address, b.value, b.mean_age_timestamp
             FROM cex.addresses a
             JOIN adr.erg b ON b.address = a.address",
            [],
            |row| {
                Ok((
                    row.get::<_, Address>(0)?,
                    Balance {
                        value: row.get::<_, i64>(1)? as i128,
                        mean_age: row.get(2)?,
                    },
                ))
            },
        )?;
        holdings.balances.extend(balances);
        Ok(holdings)
    }

    /// Holdings as they were at `height`, with the current address tables
    pub fn replay(conn: &Connection, height: Height) -> Result<Holdings> {
        let mut holdings = Holdings::empty(conn)?;
        let steps = db::query_all(
            conn,
            "SELECT d.address, h.timestamp, sum(d.value)::BIGINT
             FROM adr.erg_diffs d
             JOIN core.headers h ON h.height = d.height
             WHERE d.height <= ? AND d.address IN (SELECT address FROM cex.addresses)
             GROUP BY d.address, d.height, h.timestamp
             ORDER BY d.address, d.height",
            params![height],
            |row| Ok((row.get::<_, Address>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?)),
        )?;
        for (address, timestamp, delta) in steps {
            holdings.apply(address, delta, timestamp);
        }
        Ok(holdings)
    }

    /// Apply the diffs at `height`, the height after the last one
    /// replayed.
    pub fn advance(&mut self, conn: &Connection, height: Height) -> Result<()> {
        let Some(timestamp) = db::timestamp_at(conn, height)? else {
            return Ok(());
        };
        let deltas = db::query_all(
            conn,
            "SELECT address, sum(value)::BIGINT
             FROM adr.erg_diffs
             WHERE height = ? AND address IN (SELECT address FROM cex.addresses)
             GROUP BY address
             ORDER BY address",
            params![height],
            |row| Ok((row.get::<_, Address>(0)?, row.get::<_, i64>(1)?)),
        )?;
        for (address, delta) in deltas {
            self.apply(address, delta, timestamp);
        }
        Ok(())
    }

    fn apply(&mut self, address: Address, delta: i64, timestamp: i64) {
        if delta == 0 {
            return;
        }
        let balance = self.balances.entry(address).or_insert(Balance::ZERO);
        *balance = balance.apply(delta as i128, timestamp);
    }

    fn held(&self) -> impl Iterator<Item = (&Member, &Balance)> {
        self.balances
            .iter()
            .filter_map(|(address, balance)| self.members.get(address).map(|m| (m, balance)))
    }

    /// Main and deposit ERG of the P2PK exchange addresses
    pub fn split(&self) -> CexSplit {
        let mut split = CexSplit::default();
        for (member, balance) in self.held().filter(|(m, _)| m.p2pk) {
            match member.role {
                Role::Main => split.main += balance.value as i64,
                Role::Deposit => split.deposits += balance.value as i64,
            }
        }
        split
    }

    pub fn supply(&self) -> Supply {
        self.cex_ids
            .iter()
            .map(|cex_id| {
                let (mut main, mut deposit) = (0i64, 0i64);
                for (member, balance) in self.held().filter(|(m, _)| m.cex_id == *cex_id) {
                    match member.role {
                        Role::Main => main += balance.value as i64,
                        Role::Deposit => deposit += balance.value as i64,
                    }
                }
                (*cex_id, main, deposit)
            })
            .collect()
    }

    /// Age weights over every exchange address
    pub fn age_weights(&self) -> Weights {
        let mut weights = Weights::default();
        for (_, balance) in self.held() {
            weights.add(balance);
        }
        weights
    }
}
