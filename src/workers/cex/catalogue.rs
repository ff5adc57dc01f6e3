//! Known exchanges
//!
//! Ids and names are fixed. Main addresses come from the configuration
//! and are written to `cex.addresses` at startup.

use anyhow::Result;
use duckdb::{params, Connection};
use tracing::info;

use crate::config::CexSettings;
use crate::models::Address;

pub const CEXS: &[(i32, &str)] = &[
    (1, "Coinex"),
    (2, "Gate.io"),
    (3, "KuCoin"),
    (4, "ProBit"),
    (5, "TradeOgre"),
    (6, "Huobi"),
    (7, "Xeggex"),
    (8, "Bitmart"),
    (9, "NonKYC"),
];

pub fn name(id: i32) -> Option<&'static str> {
    CEXS.iter().find(|(cex_id, _)| *cex_id == id).map(|(_, name)| *name)
}

/// Write the catalogue and configured main addresses. Existing rows are
/// left untouched.
pub fn seed(conn: &Connection, cexs: &[CexSettings]) -> Result<()> {
    for (id, name) in CEXS {
        conn.execute(
            "INSERT INTO cex.cexs (id, name)
             SELECT ?, ?
             WHERE NOT EXISTS (SELECT 1 FROM cex.cexs WHERE id = ?)",
            params![id, name, id],
        )?;
    }

    let mut added = 0;
    for cex in cexs {
        for address in &cex.main_addresses {
            let address = Address::new(address.as_str());
            added += conn.execute(
                "INSERT INTO cex.addresses (address, cex_id, type, spot_height)
                 SELECT ?, ?, 'main', NULL
                 WHERE NOT EXISTS (SELECT 1 FROM cex.addresses WHERE address = ?)",
                params![address, cex.id, address],
            )?;
        }
    }
    if added > 0 {
        info!("Registered {} exchange main address(es)", added);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{migrations, Database};

    #[test]
    fn names_by_id() {
        assert_eq!(name(1), Some("Coinex"));
        assert_eq!(name(3), Some("KuCoin"));
        assert_eq!(name(42), None);
    }

    #[test]
    fn seeding_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        migrations::run(&db, false).unwrap();
        let cexs = vec![CexSettings {
            id: 1,
            main_addresses: vec!["9main".to_string()],
        }];
        db.execute_transaction(|conn| seed(conn, &cexs)).unwrap();
        db.execute_transaction(|conn| seed(conn, &cexs)).unwrap();

        let counts: (i64, i64) = db
            .query_one(
                "SELECT (SELECT count(*) FROM cex.cexs), (SELECT count(*) FROM cex.addresses)",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap()
            .unwrap();
        assert_eq!(counts, (CEXS.len() as i64, 1));
    }
}
