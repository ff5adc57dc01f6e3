//! In-memory [`BlockSource`] serving a chain that tests can reshape

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::NodeError;
use crate::models::{HeaderId, Height};
use crate::sync::{BlockSource, FullBlock, NodeHeader, NodeOutput};

#[derive(Default)]
struct State {
    /// Every block ever served, for header and block lookups
    known: HashMap<HeaderId, FullBlock>,
    /// Blocks listed by height, in serving order
    served: Vec<HeaderId>,
    genesis: Vec<NodeOutput>,
    /// Upcoming `best_height` calls failing transiently
    failures: u32,
}

#[derive(Default)]
pub struct MockNode {
    state: Mutex<State>,
}

impl MockNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve exactly `blocks`. Blocks served earlier stay resolvable by id
    /// but are no longer listed.
    pub fn serve(&self, blocks: &[&FullBlock]) {
        let mut state = self.state.lock().unwrap();
        state.served = blocks.iter().map(|b| b.header.id).collect();
        for block in blocks {
            state.known.insert(block.header.id, (*block).clone());
        }
    }

    pub fn set_genesis(&self, boxes: Vec<NodeOutput>) {
        self.state.lock().unwrap().genesis = boxes;
    }

    pub fn fail_next(&self, times: u32) {
        self.state.lock().unwrap().failures = times;
    }
}

#[async_trait]
impl BlockSource for MockNode {
    async fn best_height(&self) -> Result<Height, NodeError> {
        let mut state = self.state.lock().unwrap();
        if state.failures > 0 {
            state.failures -= 1;
            return Err(NodeError::Transient("connection refused".into()));
        }
        state
            .served
            .iter()
            .filter_map(|id| state.known.get(id))
            .map(|b| b.header.height)
            .max()
            .ok_or_else(|| NodeError::Transient("node has no full blocks yet".into()))
    }

    async fn headers_at(&self, height: Height) -> Result<Vec<HeaderId>, NodeError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .served
            .iter()
            .filter(|id| state.known.get(id).is_some_and(|b| b.header.height == height))
            .copied()
            .collect())
    }

    async fn header(&self, id: &HeaderId) -> Result<NodeHeader, NodeError> {
        let state = self.state.lock().unwrap();
        state
            .known
            .get(id)
            .map(|b| b.header.clone())
            .ok_or_else(|| NodeError::NotFound(format!("header {id}")))
    }

    async fn block(&self, id: &HeaderId) -> Result<FullBlock, NodeError> {
        let state = self.state.lock().unwrap();
        state
            .known
            .get(id)
            .cloned()
            .ok_or_else(|| NodeError::NotFound(format!("block {id}")))
    }

    async fn genesis_boxes(&self) -> Result<Vec<NodeOutput>, NodeError> {
        Ok(self.state.lock().unwrap().genesis.clone())
    }
}
