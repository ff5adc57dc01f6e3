//! Repair sessions
//!
//! Discovering an exchange address changes how past heights should have
//! been classified. A session rebuilds the affected rows over
//! `[from_height, last_height]` with the current address tables, one
//! batch between two live blocks. The `next_height` cursor is stored in
//! `ew.repairs` so an interrupted session can be picked up again.

use anyhow::Result;
use duckdb::{params, Connection};
use tracing::{debug, info};

use super::cex::{self, holdings::Holdings};
use super::metrics::{self, supply_age, supply_composition};
use crate::db::{self, Database, OptionalExt};
use crate::models::Height;
use crate::utils::now_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub started: i64,
    pub from_height: Height,
    pub last_height: Height,
    pub next_height: Height,
}

/// Outcome of a repair step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// No session pending
    Idle,
    /// Heights up to `next_height - 1` are repaired
    Advanced { next_height: Height },
    Done { from_height: Height, last_height: Height },
}

pub fn current(conn: &Connection) -> Result<Option<Session>> {
    Ok(conn
        .query_row(
            "SELECT started, from_height, last_height, next_height FROM ew.repairs",
            [],
            |row| {
                Ok(Session {
                    started: row.get(0)?,
                    from_height: row.get(1)?,
                    last_height: row.get(2)?,
                    next_height: row.get(3)?,
                })
            },
        )
        .optional()?)
}

/// Add `[from, to]` to the pending work. Heights below genesis are
/// dropped and a non-zero `max_window` caps the window to its last
/// `max_window` heights.
pub fn schedule(conn: &Connection, from: Height, to: Height, max_window: i32) -> Result<()> {
    let from = from.max(Height::GENESIS);
    let from = if max_window > 0 && to.value() - from.value() + 1 > max_window {
        to - (max_window - 1)
    } else {
        from
    };
    if from > to {
        return Ok(());
    }

    match current(conn)? {
        Some(session) => {
            let merged = Session {
                started: session.started,
                from_height: session.from_height.min(from),
                last_height: session.last_height.max(to),
                next_height: session.next_height.min(from),
            };
            debug!(
                from = %merged.from_height,
                last = %merged.last_height,
                next = %merged.next_height,
                "Extending repair session"
            );
            conn.execute(
                "UPDATE ew.repairs SET from_height = ?, last_height = ?, next_height = ?",
                params![merged.from_height, merged.last_height, merged.next_height],
            )?;
        }
        None => {
            debug!(from = %from, last = %to, "Scheduling repair");
            conn.execute(
                "INSERT INTO ew.repairs (started, from_height, last_height, next_height) VALUES (?, ?, ?, ?)",
                params![now_ms(), from, to, from],
            )?;
        }
    }
    Ok(())
}

/// Deal with a session left over by a previous run. With `resume` the
/// session continues from its cursor, otherwise it is dropped.
pub fn on_startup(db: &Database, resume: bool) -> Result<Option<Session>> {
    db.execute_transaction(|conn| {
        let Some(session) = current(conn)? else {
            return Ok(None);
        };
        if !resume {
            info!("Discarding existing repair session");
            conn.execute("DELETE FROM ew.repairs", [])?;
            return Ok(None);
        }
        info!("Resuming existing repair session");
        conn.execute(
            "UPDATE ew.repairs SET from_height = next_height",
            [],
        )?;
        Ok(Some(Session {
            from_height: session.next_height,
            ..session
        }))
    })
}

/// Repair up to `batch_size` heights of the pending session in one
/// transaction.
pub fn step(db: &Database, batch_size: i32) -> Result<Progress> {
    db.execute_transaction(|conn| {
        let Some(session) = current(conn)? else {
            return Ok(Progress::Idle);
        };

        let end = (session.next_height + (batch_size.max(1) - 1)).min(session.last_height);
        let mut height = session.next_height;
        let mut holdings = Holdings::replay(conn, height.prev())?;
        while height <= end {
            holdings.advance(conn, height)?;
            repair_height(conn, height, &holdings)?;
            height = height.next();
        }

        if height > session.last_height {
            finish(conn, &session)?;
            return Ok(Progress::Done {
                from_height: session.from_height,
                last_height: session.last_height,
            });
        }
        conn.execute("UPDATE ew.repairs SET next_height = ?", params![height])?;
        Ok(Progress::Advanced { next_height: height })
    })
}

/// Run steps until no session is left.
pub fn run_to_completion(db: &Database, batch_size: i32) -> Result<()> {
    while step(db, batch_size)? != Progress::Idle {}
    Ok(())
}

/// Rebuild the classification dependent rows of one height from the
/// exchange holdings as of that height. Heights no longer in the ledger
/// are skipped.
fn repair_height(conn: &Connection, height: Height, holdings: &Holdings) -> Result<()> {
    if db::header_at(conn, height)?.is_none() {
        return Ok(());
    }
    supply_composition::reclassify(conn, height, holdings.split())?;
    supply_age::reclassify(conn, height, holdings.age_weights())?;
    cex::reclassify(conn, height, holdings.supply())?;
    Ok(())
}

fn finish(conn: &Connection, session: &Session) -> Result<()> {
    conn.execute("DELETE FROM ew.repairs", [])?;
    conn.execute(
        "UPDATE cex.block_processing_log SET status = 'processed'
         WHERE status = 'pending' AND height <= ?",
        params![session.last_height],
    )?;
    metrics::refresh_summaries(conn)?;
    info!(
        "Done repairing heights {} to {}",
        session.from_height, session.last_height
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CexSettings, Settings};
    use crate::testing::fixtures::{self, out, tx, Chain};
    use crate::testing::{logs, snapshot};
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

    fn schedule_now(db: &Database, from: i32, to: i32, max_window: i32) {
        db.execute_transaction(|conn| schedule(conn, Height(from), Height(to), max_window))
            .unwrap();
    }

    fn session(db: &Database) -> Option<Session> {
        db.with_conn(current).unwrap()
    }

    #[test]
    fn schedule_caps_and_merges_windows() {
        let (db, _) = synced();

        schedule_now(&db, 600_000, 600_010, 4);
        let s = session(&db).unwrap();
        assert_eq!((s.from_height, s.last_height, s.next_height), (Height(600_007), Height(600_010), Height(600_007)));

        schedule_now(&db, 600_002, 600_003, 0);
        let s = session(&db).unwrap();
        assert_eq!((s.from_height, s.last_height, s.next_height), (Height(600_002), Height(600_010), Height(600_002)));

        // empty window is ignored
        schedule_now(&db, 600_005, 600_004, 0);
        assert_eq!(session(&db).unwrap().from_height, Height(600_002));
    }

    #[test]
    fn windows_below_genesis_are_clamped() {
        let (db, _) = synced();

        schedule_now(&db, -10, -1, 0);
        assert_eq!(session(&db), None);

        schedule_now(&db, -5, 3, 0);
        let s = session(&db).unwrap();
        assert_eq!((s.from_height, s.last_height), (Height::GENESIS, Height(3)));
    }

    #[test]
    fn steps_advance_cursor_in_batches() {
        let (db, _) = synced();
        schedule_now(&db, 599_999, 600_002, 0);

        assert_eq!(step(&db, 2).unwrap(), Progress::Advanced { next_height: Height(600_001) });
        assert_eq!(session(&db).unwrap().next_height, Height(600_001));
        assert_eq!(
            step(&db, 2).unwrap(),
            Progress::Done {
                from_height: Height(599_999),
                last_height: Height(600_002)
            }
        );
        assert_eq!(session(&db), None);
        assert_eq!(step(&db, 2).unwrap(), Progress::Idle);
    }

    #[test]
    fn repair_matches_original_computation() {
        let (db, _) = synced();
        let before = snapshot::all(&db);

        schedule_now(&db, 599_999, 600_002, 0);
        run_to_completion(&db, 100).unwrap();
        assert_eq!(snapshot::all(&db), before);
    }

    #[test]
    fn repair_is_idempotent() {
        let (db, _) = synced();
        schedule_now(&db, 600_000, 600_002, 0);
        run_to_completion(&db, 1).unwrap();
        let once = snapshot::all(&db);

        schedule_now(&db, 600_000, 600_002, 0);
        run_to_completion(&db, 1).unwrap();
        assert_eq!(snapshot::all(&db), once);
    }

    #[test]
    fn skips_heights_beyond_tip() {
        let (db, _) = synced();
        schedule_now(&db, 600_001, 600_020, 0);
        run_to_completion(&db, 5).unwrap();
        assert_eq!(session(&db), None);
    }

    #[test]
    fn resumes_interrupted_session() {
        let (db, _) = synced();
        db.execute(
            "INSERT INTO ew.repairs (started, from_height, last_height, next_height) VALUES (0, 599999, 600002, 600001)",
            [],
        )
        .unwrap();

        let captured = logs::capture();
        let resumed = on_startup(&db, true).unwrap().unwrap();
        assert_eq!(resumed.from_height, Height(600_001));
        run_to_completion(&db, 100).unwrap();

        assert!(captured.contains("Resuming existing repair session"));
        assert!(captured.contains("Done repairing heights 600001 to 600002"));
    }

    #[test]
    fn resumed_session_matches_a_rebuild() {
        let settings = Settings {
            cexs: vec![CexSettings {
                id: 1,
                main_addresses: vec![fixtures::address("cex1").to_string()],
            }],
            ..Settings::default()
        };
        // con1 pays pub1, pub1 forwards to cex1 and is paid again
        let mut chain = Chain::seeded(vec![out("con1", 100)]);
        let seed_box = fixtures::output_id(&chain.seed, 0, 0);
        chain.push("block-a", vec![tx("a0", &[seed_box], vec![out("pub1", 10), out("con1", 90)])]);
        let a_pub1 = fixtures::output_id(chain.tip(), 0, 0);
        let a_con1 = fixtures::output_id(chain.tip(), 0, 1);
        chain.push("block-b", vec![tx("b0", &[a_pub1], vec![out("cex1", 4), out("pub1", 6)])]);
        chain.push("block-c", vec![tx("c0", &[a_con1], vec![out("pub1", 5), out("con1", 85)])]);

        // history replayed without repairs, then a session cut short
        let (db, mut pipeline) = fixtures::pipeline_db_with(&chain, settings.clone());
        for block in &chain.blocks {
            pipeline.include(&db, block, Phase::Bootstrap, false).unwrap();
        }
        schedule_now(&db, 599_999, 600_002, 0);
        assert_eq!(step(&db, 2).unwrap(), Progress::Advanced { next_height: Height(600_001) });

        let captured = logs::capture();
        on_startup(&db, true).unwrap();
        run_to_completion(&db, 100).unwrap();
        assert!(captured.contains("Done repairing heights 600001 to 600002"));

        let (rebuilt, mut pipeline) = fixtures::pipeline_db_with(&chain, settings);
        for block in &chain.blocks {
            pipeline.include(&rebuilt, block, Phase::Live, false).unwrap();
            fixtures::drain_repairs(&rebuilt);
        }
        assert_eq!(snapshot::all(&db), snapshot::all(&rebuilt));
    }

    #[test]
    fn discards_session_without_resume_flag() {
        let (db, _) = synced();
        schedule_now(&db, 600_000, 600_002, 0);

        let captured = logs::capture();
        assert_eq!(on_startup(&db, false).unwrap(), None);
        assert_eq!(session(&db), None);
        assert!(captured.contains("Discarding existing repair session"));
    }

    #[test]
    fn finishing_marks_pending_log_rows() {
        let chain = Chain::scenario_a();
        let (db, mut pipeline) = fixtures::pipeline_db(&chain);
        for block in &chain.blocks {
            pipeline.include(&db, block, Phase::Bootstrap, false).unwrap();
        }
        schedule_now(&db, 600_000, 600_001, 0);
        run_to_completion(&db, 100).unwrap();

        let statuses: Vec<(i32, String)> = db
            .query_all(
                "SELECT height, status FROM cex.block_processing_log WHERE height >= 600000 ORDER BY height",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(
            statuses,
            vec![
                (600_000, "processed".to_string()),
                (600_001, "processed".to_string()),
                (600_002, "pending".to_string()),
            ]
        );
    }
}
