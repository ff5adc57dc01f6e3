//! Block processing pipeline
//!
//! The core ingester writes the ledger, then derived workers run in
//! dependency order, all inside the block's transaction. Rollbacks run the
//! derived workers in reverse order and the core ingester last.

pub mod balances;
pub mod blocks;
pub mod cex;
pub mod core;
pub mod metrics;
pub mod repair;

use anyhow::{Context as _, Result};
use duckdb::Connection;

use crate::config::Settings;
use crate::db::{self, Database};
use crate::error::IntegrityError;
use crate::models::{BlockData, Header, Height};
use crate::sync::FullBlock;

pub use balances::BalanceChange;

/// What happens to the chain, as seen by a worker.
#[derive(Debug, Clone, Copy)]
pub enum BlockEvent<'a> {
    Include(&'a BlockData),
    Rollback(&'a Header),
}

impl BlockEvent<'_> {
    pub fn height(&self) -> Height {
        match self {
            BlockEvent::Include(block) => block.height(),
            BlockEvent::Rollback(header) => header.height,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Replaying history before constraints are set. Summaries are not
    /// refreshed and cex invalidations are left for a single repair.
    Bootstrap,
    Live,
}

/// Per-event state shared by the workers of one transaction.
#[derive(Debug)]
pub struct Context {
    pub phase: Phase,
    /// Height windows needing a repair once the block commits
    pub repairs: Vec<(Height, Height)>,
    /// ERG balances touched by an included block, before and after
    pub erg_changes: Vec<BalanceChange>,
}

impl Context {
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            repairs: vec![],
            erg_changes: vec![],
        }
    }

    pub fn request_repair(&mut self, from: Height, to: Height) {
        if from <= to {
            self.repairs.push((from, to));
        }
    }
}

pub trait Worker: Send {
    fn name(&self) -> &'static str;

    fn process(&mut self, conn: &Connection, event: BlockEvent<'_>, ctx: &mut Context) -> Result<()>;
}

pub struct Pipeline {
    derived: Vec<Box<dyn Worker>>,
    max_repair_window: i32,
}

impl Pipeline {
    pub fn new(settings: &Settings) -> Self {
        Self {
            derived: vec![
                Box::new(balances::BalancesWorker),
                Box::new(blocks::BlockStatsWorker),
                Box::new(metrics::MetricsWorker),
                Box::new(cex::CexWorker),
            ],
            max_repair_window: settings.repair.max_window,
        }
    }

    /// Include a block in the ledger and, unless `core_only`, in every
    /// derived table.
    pub fn include(&mut self, db: &Database, block: &FullBlock, phase: Phase, core_only: bool) -> Result<BlockData> {
        db.execute_transaction(|conn| {
            check_extends_tip(conn, block)?;
            let data = core::include(conn, block)?;
            if !core_only {
                self.run_derived(conn, BlockEvent::Include(&data), phase)?;
                if phase == Phase::Live {
                    metrics::refresh_summaries(conn)?;
                }
            }
            Ok(data)
        })
    }

    /// Run derived workers for a block already present in the ledger.
    pub fn replay(&mut self, db: &Database, height: Height) -> Result<()> {
        db.execute_transaction(|conn| {
            let data = core::load_block_data(conn, height)?
                .with_context(|| format!("No block at height {height} to replay"))?;
            self.run_derived(conn, BlockEvent::Include(&data), Phase::Bootstrap)
        })
    }

    /// Undo `header`, which must be the current tip.
    pub fn rollback(&mut self, db: &Database, header: &Header, phase: Phase) -> Result<()> {
        db.execute_transaction(|conn| {
            let tip = db::tip(conn)?.context("Nothing to roll back")?;
            if tip.id != header.id {
                return Err(IntegrityError::RollbackNotAtTip {
                    height: header.height,
                    tip_height: tip.height,
                }
                .into());
            }
            let header = &tip;
            let mut ctx = Context::new(phase);
            for worker in self.derived.iter_mut().rev() {
                worker
                    .process(conn, BlockEvent::Rollback(header), &mut ctx)
                    .with_context(|| format!("{} rollback failed", worker.name()))?;
            }
            core::rollback(conn, header)?;
            self.schedule_repairs(conn, &ctx)?;
            if phase == Phase::Live {
                metrics::refresh_summaries(conn)?;
            }
            Ok(())
        })
    }

    fn run_derived(&mut self, conn: &Connection, event: BlockEvent<'_>, phase: Phase) -> Result<()> {
        let mut ctx = Context::new(phase);
        for worker in self.derived.iter_mut() {
            worker
                .process(conn, event, &mut ctx)
                .with_context(|| format!("{} failed at height {}", worker.name(), event.height()))?;
        }
        self.schedule_repairs(conn, &ctx)
    }

    fn schedule_repairs(&self, conn: &Connection, ctx: &Context) -> Result<()> {
        for (from, to) in &ctx.repairs {
            repair::schedule(conn, *from, *to, self.max_repair_window)?;
        }
        Ok(())
    }

    /// Refresh every summary table from the latest series rows.
    pub fn refresh_summaries(&self, db: &Database) -> Result<()> {
        db.execute_transaction(metrics::refresh_summaries)
    }
}

fn check_extends_tip(conn: &Connection, block: &FullBlock) -> Result<()> {
    let header = &block.header;
    // An empty ledger accepts any first block as its anchor
    if let Some(tip) = db::tip(conn)? {
        if header.height != tip.height.next() {
            return Err(IntegrityError::HeightGap {
                height: header.height,
                tip_height: tip.height,
            }
            .into());
        }
        if header.parent_id != tip.id {
            return Err(IntegrityError::ParentMismatch {
                height: header.height,
                header_id: header.id,
                tip_height: tip.height,
                tip_id: tip.id,
            }
            .into());
        }
    }
    Ok(())
}
