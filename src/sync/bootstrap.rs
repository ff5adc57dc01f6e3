//! Bootstrap phase
//!
//! A fresh database is first filled with core tables only, without
//! unique indexes. Derived workers then replay every stored height, the
//! constraints are created and one repair covers every exchange address
//! discovered along the way.

use anyhow::{bail, Result};
use tracing::{info, warn};

use super::{BlockSource, Watcher};
use crate::db::{migrations, Database};
use crate::error::StartupError;
use crate::models::Height;
use crate::workers::{repair, Phase};

/// Heights replayed between two progress lines
const PROGRESS_EVERY: i32 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupMode {
    Bootstrap,
    Live,
}

/// Decide how to start from the constraint flag and the command line.
pub fn startup_mode(db: &Database, bootstrap: bool, no_bootstrap: bool) -> Result<StartupMode> {
    if bootstrap && no_bootstrap {
        return Err(StartupError::ConflictingBootstrapFlags.into());
    }
    if migrations::constraints_set(db)? {
        if bootstrap {
            warn!("Database is already bootstrapped, ignoring --bootstrap");
        }
        return Ok(StartupMode::Live);
    }
    if no_bootstrap {
        if db.tip()?.is_some() {
            return Err(StartupError::UnconstrainedDatabase.into());
        }
        migrations::set_constraints(db)?;
        return Ok(StartupMode::Live);
    }
    if !bootstrap {
        return Err(StartupError::BootstrapRequired.into());
    }
    Ok(StartupMode::Bootstrap)
}

impl<S: BlockSource> Watcher<S> {
    /// Run the bootstrap phase up to the node's current tip. Returns early,
    /// with the database still unconstrained, if shutdown is requested.
    pub async fn bootstrap(&mut self) -> Result<()> {
        info!("Bootstrapping core tables");
        let report = self.sync_with(Phase::Bootstrap, true).await?;
        info!("Core tables hold {} new block(s)", report.included);
        if self.shutdown_requested() {
            return Ok(());
        }

        let Some(tip) = self.db.tip()? else {
            bail!("Node served no block to bootstrap from");
        };
        let start = self.replay_start()?;
        if start <= tip.height {
            info!("Replaying derived tables from height {} to {}", start, tip.height);
        }
        let mut height = start;
        while height <= tip.height {
            if self.shutdown_requested() {
                return Ok(());
            }
            self.pipeline.replay(&self.db, height)?;
            if height.value() % PROGRESS_EVERY == 0 || height == tip.height {
                info!("Replayed height {} of {}", height, tip.height);
            }
            height = height.next();
        }

        let since: Option<Height> = self
            .db
            .query_one(
                "SELECT min(invalidation_height) FROM cex.block_processing_log WHERE status = 'pending'",
                [],
                |row| row.get(0),
            )?
            .flatten();
        self.db.execute_transaction(|conn| {
            match since {
                Some(since) => repair::schedule(conn, since, tip.height, 0)?,
                None => {
                    conn.execute(
                        "UPDATE cex.block_processing_log SET status = 'processed' WHERE status = 'pending'",
                        [],
                    )?;
                }
            }
            Ok(())
        })?;
        migrations::set_constraints(&self.db)?;
        self.pipeline.refresh_summaries(&self.db)?;
        info!("Bootstrap done at height {}", tip.height);
        Ok(())
    }

    /// First height without derived rows
    fn replay_start(&self) -> Result<Height> {
        let replayed: Option<Height> = self
            .db
            .query_one("SELECT max(height) FROM blk.stats", [], |row| row.get(0))?
            .flatten();
        if let Some(height) = replayed {
            return Ok(height.next());
        }
        let lowest: Option<Height> = self
            .db
            .query_one("SELECT min(height) FROM core.headers", [], |row| row.get(0))?
            .flatten();
        Ok(lowest.unwrap_or(Height::GENESIS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CexSettings, Settings};
    use crate::testing::fixtures::{self, out, tx, Chain};
    use crate::testing::{snapshot, MockNode};
    use crate::workers::cex::catalogue;
    use crate::workers::Pipeline;
    use pretty_assertions::assert_eq;
    use tokio::sync::watch;

    fn settings() -> Settings {
        let mut settings = Settings::default();
        settings.sync.poll_interval_secs = 0;
        settings.repair.interval = 0;
        settings
    }

    /// Unconstrained database holding the seed block in core tables only
    fn unconstrained_db(chain: &Chain, settings: &Settings) -> Database {
        let db = Database::open_in_memory().unwrap();
        migrations::run(&db, false).unwrap();
        db.execute_transaction(|conn| catalogue::seed(conn, &settings.cexs))
            .unwrap();
        Pipeline::new(settings)
            .include(&db, &chain.seed, Phase::Bootstrap, true)
            .unwrap();
        db
    }

    fn live_synced(chain: &Chain, settings: Settings) -> Database {
        let (db, mut pipeline) = fixtures::pipeline_db_with(chain, settings);
        for block in &chain.blocks {
            pipeline.include(&db, block, Phase::Live, false).unwrap();
        }
        fixtures::drain_repairs(&db);
        db
    }

    async fn bootstrapped(chain: &Chain, settings: Settings) -> Database {
        let db = unconstrained_db(chain, &settings);
        let node = MockNode::new();
        node.serve(&chain.blocks.iter().collect::<Vec<_>>());
        let (_tx, rx) = watch::channel(false);
        let mut watcher = Watcher::new(node, db.clone(), &settings, true, rx);
        watcher.bootstrap().await.unwrap();
        db
    }

    #[test]
    fn conflicting_flags_are_refused() {
        let db = Database::open_in_memory().unwrap();
        migrations::run(&db, false).unwrap();
        let err = startup_mode(&db, true, true).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StartupError>(),
            Some(StartupError::ConflictingBootstrapFlags)
        ));
    }

    #[test]
    fn fresh_database_bootstraps_on_request() {
        let db = Database::open_in_memory().unwrap();
        migrations::run(&db, false).unwrap();
        assert_eq!(startup_mode(&db, true, false).unwrap(), StartupMode::Bootstrap);
    }

    #[test]
    fn unconstrained_database_requires_a_bootstrap_flag() {
        let db = Database::open_in_memory().unwrap();
        migrations::run(&db, false).unwrap();
        let err = startup_mode(&db, false, false).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StartupError>(),
            Some(StartupError::BootstrapRequired)
        ));

        let chain = Chain::scenario_a();
        let filled = unconstrained_db(&chain, &settings());
        let err = startup_mode(&filled, false, false).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StartupError>(),
            Some(StartupError::BootstrapRequired)
        ));
        assert_eq!(startup_mode(&filled, true, false).unwrap(), StartupMode::Bootstrap);
        assert!(!migrations::constraints_set(&filled).unwrap());
    }

    #[test]
    fn no_bootstrap_on_empty_database_sets_constraints() {
        let db = Database::open_in_memory().unwrap();
        migrations::run(&db, false).unwrap();
        assert_eq!(startup_mode(&db, false, true).unwrap(), StartupMode::Live);
        assert!(migrations::constraints_set(&db).unwrap());
        // constrained databases start live without any flag
        assert_eq!(startup_mode(&db, false, false).unwrap(), StartupMode::Live);
    }

    #[test]
    fn no_bootstrap_on_filled_database_is_misuse() {
        let chain = Chain::scenario_a();
        let db = unconstrained_db(&chain, &settings());
        let err = startup_mode(&db, false, true).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StartupError>(),
            Some(StartupError::UnconstrainedDatabase)
        ));
    }

    #[tokio::test]
    async fn bootstrap_matches_live_sync() {
        let chain = Chain::scenario_a();
        let db = bootstrapped(&chain, settings()).await;

        assert!(migrations::constraints_set(&db).unwrap());
        assert_eq!(db.with_conn(repair::current).unwrap(), None);
        assert_eq!(snapshot::all(&db), snapshot::all(&live_synced(&chain, settings())));
    }

    #[tokio::test]
    async fn bootstrap_schedules_one_repair_for_discoveries() {
        let mut chain = Chain::seeded(vec![out("con1", 100)]);
        let seed_box = fixtures::output_id(&chain.seed, 0, 0);
        chain.push("block-a", vec![tx("a0", &[seed_box], vec![out("pub1", 10), out("con1", 90)])]);
        let pub1_box = fixtures::output_id(chain.tip(), 0, 0);
        chain.push("block-b", vec![tx("b0", &[pub1_box], vec![out("cex1", 10)])]);

        let mut settings = settings();
        settings.cexs = vec![CexSettings {
            id: 1,
            main_addresses: vec![fixtures::address("cex1").to_string()],
        }];
        let db = bootstrapped(&chain, settings.clone()).await;

        let session = db.with_conn(repair::current).unwrap().unwrap();
        assert_eq!((session.from_height, session.last_height), (Height(600_000), Height(600_001)));

        fixtures::drain_repairs(&db);
        let pending: i64 = db
            .query_one(
                "SELECT count(*) FROM cex.block_processing_log WHERE status = 'pending'",
                [],
                |row| row.get(0),
            )
            .unwrap()
            .unwrap();
        assert_eq!(pending, 0);
        assert_eq!(snapshot::all(&db), snapshot::all(&live_synced(&chain, settings)));
    }

    #[tokio::test]
    async fn interrupted_replay_resumes_where_it_stopped() {
        let chain = Chain::scenario_a();
        let settings = settings();
        let db = unconstrained_db(&chain, &settings);
        let mut pipeline = Pipeline::new(&settings);
        for block in &chain.blocks {
            pipeline.include(&db, block, Phase::Bootstrap, true).unwrap();
        }
        pipeline.replay(&db, fixtures::SEED_HEIGHT).unwrap();
        pipeline.replay(&db, Height(600_000)).unwrap();

        let node = MockNode::new();
        node.serve(&chain.blocks.iter().collect::<Vec<_>>());
        let (_tx, rx) = watch::channel(false);
        let mut watcher = Watcher::new(node, db.clone(), &settings, true, rx);
        assert_eq!(watcher.replay_start().unwrap(), Height(600_001));
        watcher.bootstrap().await.unwrap();

        assert_eq!(snapshot::all(&db), snapshot::all(&live_synced(&chain, settings)));
    }
}
