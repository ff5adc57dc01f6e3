//! Resolved block data handed from the core ingester to derived workers

use super::{Address, BoxId, HeaderId, Height, TokenId, TxId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub height: Height,
    pub id: HeaderId,
    pub parent_id: HeaderId,
    pub timestamp: i64,
    pub difficulty: i64,
}

impl Header {
    /// Human-readable label used in sync logs.
    pub fn label(&self) -> String {
        format!("{} [{}]", self.height, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub token_id: TokenId,
    pub amount: i64,
}

/// An output, either created by a transaction of the block or resolved
/// from storage when spent by one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoxData {
    pub box_id: BoxId,
    pub tx_id: TxId,
    pub creation_height: Height,
    pub address: Address,
    pub index: i32,
    pub value: i64,
    pub size: i32,
    pub assets: Vec<Asset>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxData {
    pub id: TxId,
    pub index: i32,
    pub inputs: Vec<BoxData>,
    pub data_inputs: Vec<BoxId>,
    pub outputs: Vec<BoxData>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockData {
    pub header: Header,
    pub transactions: Vec<TxData>,
}

impl BlockData {
    pub fn height(&self) -> Height {
        self.header.height
    }

    pub fn timestamp(&self) -> i64 {
        self.header.timestamp
    }

    pub fn input_count(&self) -> usize {
        self.transactions.iter().map(|tx| tx.inputs.len()).sum()
    }

    pub fn output_count(&self) -> usize {
        self.transactions.iter().map(|tx| tx.outputs.len()).sum()
    }
}
