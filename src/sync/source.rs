//! Node API data and the block source abstraction the watcher pulls from

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};

use crate::error::NodeError;
use crate::models::{BoxId, Header, HeaderId, Height, TokenId, TxId};

/// Anything able to serve the main chain, block by block.
#[async_trait]
pub trait BlockSource: Send + Sync {
    /// Height of the best full block
    async fn best_height(&self) -> Result<Height, NodeError>;

    /// Ids of all known headers at `height`, in the order the node lists them
    async fn headers_at(&self, height: Height) -> Result<Vec<HeaderId>, NodeError>;

    async fn header(&self, id: &HeaderId) -> Result<NodeHeader, NodeError>;

    async fn block(&self, id: &HeaderId) -> Result<FullBlock, NodeError>;

    /// Boxes existing before the first block
    async fn genesis_boxes(&self) -> Result<Vec<NodeOutput>, NodeError>;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub full_height: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeHeader {
    pub id: HeaderId,
    pub parent_id: HeaderId,
    pub height: Height,
    pub timestamp: i64,
    #[serde(deserialize_with = "number_or_string")]
    pub difficulty: i64,
}

impl From<&NodeHeader> for Header {
    fn from(h: &NodeHeader) -> Self {
        Header {
            height: h.height,
            id: h.id,
            parent_id: h.parent_id,
            timestamp: h.timestamp,
            difficulty: h.difficulty,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullBlock {
    pub header: NodeHeader,
    pub block_transactions: BlockTransactions,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockTransactions {
    pub transactions: Vec<NodeTransaction>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeTransaction {
    pub id: TxId,
    pub inputs: Vec<NodeInput>,
    #[serde(default)]
    pub data_inputs: Vec<NodeInput>,
    pub outputs: Vec<NodeOutput>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInput {
    pub box_id: BoxId,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeOutput {
    pub box_id: BoxId,
    pub value: i64,
    pub ergo_tree: String,
    pub creation_height: i32,
    #[serde(default)]
    pub assets: Vec<NodeAsset>,
    #[serde(default)]
    pub additional_registers: BTreeMap<String, RegisterValue>,
    pub transaction_id: Option<TxId>,
    pub index: Option<i32>,
}

impl NodeOutput {
    /// Registers as (number, serialized hex), R4 first
    pub fn registers(&self) -> Vec<(u8, &str)> {
        self.additional_registers
            .iter()
            .filter_map(|(key, value)| {
                let id = key.strip_prefix('R')?.parse::<u8>().ok()?;
                Some((id, value.serialized()))
            })
            .collect()
    }

    pub fn register(&self, id: u8) -> Option<&str> {
        self.additional_registers
            .get(&format!("R{id}"))
            .map(RegisterValue::serialized)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeAsset {
    pub token_id: TokenId,
    pub amount: i64,
}

/// Registers come either as plain hex or as an object carrying the
/// serialized value alongside a rendered one.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RegisterValue {
    Hex(String),
    #[serde(rename_all = "camelCase")]
    Rich { serialized_value: String },
}

impl RegisterValue {
    pub fn serialized(&self) -> &str {
        match self {
            RegisterValue::Hex(s) => s,
            RegisterValue::Rich { serialized_value } => serialized_value,
        }
    }
}

fn number_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(i64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}
