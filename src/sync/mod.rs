//! Chain tracking
//!
//! The watcher follows the node's main chain one block at a time. A block
//! that does not extend the local tip makes the watcher roll the tip back
//! and retry one height lower, until the fork point is reached.

mod bootstrap;
mod node_client;
mod source;

use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use futures::future::try_join_all;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub use bootstrap::{startup_mode, StartupMode};
pub use node_client::NodeClient;
pub use source::{
    BlockSource, BlockTransactions, FullBlock, NodeAsset, NodeHeader, NodeInput, NodeOutput, NodeTransaction,
};

use crate::config::{RepairSettings, Settings, SyncSettings};
use crate::db::{self, Database};
use crate::error::{NodeError, Retryable};
use crate::models::{Header, HeaderId, Height, TxId, GENESIS_TIMESTAMP};
use crate::workers::{repair, Phase, Pipeline};

/// Blocks included between two WAL checkpoints
const CHECKPOINT_INTERVAL: u32 = 500;

/// Synthetic block holding the boxes that exist before the first block
pub fn genesis_block(boxes: Vec<NodeOutput>) -> FullBlock {
    FullBlock {
        header: NodeHeader {
            id: HeaderId::default(),
            parent_id: HeaderId::default(),
            height: Height::GENESIS,
            timestamp: GENESIS_TIMESTAMP,
            difficulty: 0,
        },
        block_transactions: BlockTransactions {
            transactions: vec![NodeTransaction {
                id: TxId::default(),
                inputs: vec![],
                data_inputs: vec![],
                outputs: boxes,
            }],
        },
    }
}

/// What a single sync step did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Included(Height),
    RolledBack,
    CaughtUp,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub included: u32,
    pub rolled_back: u32,
}

pub struct Watcher<S: BlockSource> {
    source: S,
    db: Database,
    pipeline: Pipeline,
    sync: SyncSettings,
    repair: RepairSettings,
    exit_when_synced: bool,
    shutdown: watch::Receiver<bool>,
    /// Header to prefer at the next height after a rollback
    parent_hint: Option<HeaderId>,
    fork_depth: u32,
    failures: u32,
    since_checkpoint: u32,
}

impl<S: BlockSource> Watcher<S> {
    pub fn new(
        source: S,
        db: Database,
        settings: &Settings,
        exit_when_synced: bool,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            source,
            db,
            pipeline: Pipeline::new(settings),
            sync: settings.sync.clone(),
            repair: settings.repair.clone(),
            exit_when_synced,
            shutdown,
            parent_hint: None,
            fork_depth: 0,
            failures: 0,
            since_checkpoint: 0,
        }
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Bring the local chain up to the node's tip with every worker.
    pub async fn sync_once(&mut self) -> Result<SyncReport> {
        self.sync_with(Phase::Live, false).await
    }

    async fn sync_with(&mut self, phase: Phase, core_only: bool) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        while !self.shutdown_requested() {
            match self.step(phase, core_only).await? {
                Step::Included(height) => {
                    report.included += 1;
                    if phase == Phase::Live {
                        self.after_block(height)?;
                    }
                }
                Step::RolledBack => report.rolled_back += 1,
                Step::CaughtUp => break,
            }
        }
        Ok(report)
    }

    async fn step(&mut self, phase: Phase, core_only: bool) -> Result<Step> {
        let Some(tip) = self.db.tip()? else {
            let boxes = self.source.genesis_boxes().await?;
            info!("Including genesis block with {} box(es)", boxes.len());
            self.pipeline
                .include(&self.db, &genesis_block(boxes), phase, core_only)?;
            return Ok(Step::Included(Height::GENESIS));
        };

        let best = self.source.best_height().await?;
        let next = tip.height.next();
        if next > best {
            return Ok(Step::CaughtUp);
        }
        let ids = self.source.headers_at(next).await?;
        if ids.is_empty() {
            debug!(height = %next, "Node lists no header yet");
            return Ok(Step::CaughtUp);
        }

        let id = self.pick_candidate(&tip, &ids).await?;
        let block = self.source.block(&id).await?;

        if block.header.parent_id != tip.id {
            self.roll_back(&tip, phase)?;
            self.parent_hint = Some(block.header.parent_id);
            return Ok(Step::RolledBack);
        }

        let header = Header::from(&block.header);
        info!("Including block {}", header.label());
        self.pipeline
            .include(&self.db, &block, phase, core_only)
            .with_context(|| format!("Failed to include block {}", header.label()))?;
        self.fork_depth = 0;
        Ok(Step::Included(header.height))
    }

    /// Header id to fetch at the height above `tip`.
    ///
    /// A header named by a rejected child wins, then a lone listed header,
    /// then the only listed child of the tip. Otherwise the first listed
    /// header is taken and a wrong pick gets rolled back later.
    async fn pick_candidate(&mut self, tip: &Header, ids: &[HeaderId]) -> Result<HeaderId> {
        if let Some(hint) = self.parent_hint.take() {
            if ids.contains(&hint) {
                return Ok(hint);
            }
        }
        if let [only] = ids {
            return Ok(*only);
        }

        let headers = try_join_all(ids.iter().map(|id| self.source.header(id))).await?;
        let children: Vec<&NodeHeader> = headers.iter().filter(|h| h.parent_id == tip.id).collect();
        match children.as_slice() {
            [child] => Ok(child.id),
            _ => Ok(ids[0]),
        }
    }

    fn roll_back(&mut self, tip: &Header, phase: Phase) -> Result<()> {
        self.fork_depth += 1;
        if self.fork_depth > self.sync.max_fork_depth {
            bail!(
                "Fork deeper than {} blocks below height {}",
                self.sync.max_fork_depth,
                tip.height
            );
        }
        let below = self.db.with_conn(|conn| db::header_at(conn, tip.height.prev()))?;
        if below.is_none() {
            bail!("Cannot roll back block {}: no earlier block is stored", tip.label());
        }

        info!("Rolling back block {}", tip.label());
        self.pipeline.rollback(&self.db, tip, phase)?;
        Ok(())
    }

    /// Housekeeping after a live block: periodic trailing repairs, one
    /// repair batch and WAL checkpoints.
    fn after_block(&mut self, height: Height) -> Result<()> {
        let settings = &self.repair;
        if settings.interval > 0 && height.value() % settings.interval == 0 {
            self.db.execute_transaction(|conn| {
                repair::schedule(conn, height - settings.trailing, height.prev(), settings.max_window)
            })?;
        }
        repair::step(&self.db, self.repair.batch_size)?;

        self.since_checkpoint += 1;
        if self.since_checkpoint >= CHECKPOINT_INTERVAL {
            self.since_checkpoint = 0;
            if let Err(e) = self.db.checkpoint() {
                warn!("Checkpoint failed: {}", e);
            }
        }
        Ok(())
    }

    /// Follow the node until shutdown, or until caught up when running
    /// with `--exit`.
    pub async fn run(&mut self) -> Result<()> {
        info!("Watching node for new blocks");
        loop {
            if self.shutdown_requested() {
                info!("Shutdown requested, stopping at height {}", self.local_height()?);
                return Ok(());
            }

            match self.sync_once().await {
                Ok(report) => {
                    self.failures = 0;
                    if report.included > 0 || report.rolled_back > 0 {
                        continue;
                    }
                    if self.shutdown_requested() {
                        continue;
                    }
                    if self.db.with_conn(repair::current)?.is_some() {
                        repair::step(&self.db, self.repair.batch_size)?;
                        continue;
                    }
                    if self.exit_when_synced {
                        info!("Caught up at height {}, exiting", self.local_height()?);
                        return Ok(());
                    }
                }
                Err(e) if is_transient(&e) => {
                    warn!("Node unavailable: {:#}", e);
                }
                Err(e) => {
                    self.failures += 1;
                    error!(attempt = self.failures, "Sync failed: {:#}", e);
                    if self.failures >= self.sync.max_block_failures {
                        return Err(e.context(format!("Giving up after {} consecutive failures", self.failures)));
                    }
                }
            }
            self.idle().await;
        }
    }

    /// Sleep for a poll interval unless shutdown comes first.
    async fn idle(&mut self) {
        let delay = Duration::from_secs(self.sync.poll_interval_secs);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = self.shutdown.changed() => {}
        }
    }

    fn local_height(&self) -> Result<String> {
        Ok(self
            .db
            .tip()?
            .map(|h| h.height.to_string())
            .unwrap_or_else(|| "none".to_string()))
    }
}

fn is_transient(e: &anyhow::Error) -> bool {
    e.downcast_ref::<NodeError>().is_some_and(Retryable::is_transient)
}
