//! Chains built from labels
//!
//! Labels map to deterministic ergo trees: `con*` to a contract, `miner*`
//! to a miner reward contract, `fees` to the fee contract and anything
//! else to a P2PK tree. Box ids follow the chain rule so that blocks look
//! exactly like node responses.

use std::collections::BTreeMap;

use crate::config::Settings;
use crate::db::{migrations, Database};
use crate::models::{Address, BoxId, HeaderId, Height, TokenId, TxId};
use crate::sync::{BlockTransactions, FullBlock, NodeAsset, NodeHeader, NodeInput, NodeOutput, NodeTransaction};
use crate::utils::box_id::BoxCandidate;
use crate::utils::{blake2b256, ergo_tree};
use crate::workers::cex::catalogue;
use crate::workers::{repair, Phase, Pipeline};

pub const SEED_HEIGHT: Height = Height(599_999);
/// Timestamp of the block at height 600 000
pub const BASE_TIMESTAMP: i64 = 1_634_000_000_000;
pub const BLOCK_INTERVAL: i64 = 120_000;

const FEES_TREE: &str = "1005040004000e36100204a00b08cd0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798ea02d192a39a8cc7a701730073011001020402d19683030193a38cc7b2a57300000193c2b2a57301007473027303830108cdeeac93b1a57304";

pub fn tree(label: &str) -> String {
    let hash = hex::encode(blake2b256(label.as_bytes()));
    if label == "fees" {
        FEES_TREE.to_string()
    } else if label.starts_with("con") {
        format!("10010e20{hash}d17300")
    } else if label.starts_with("miner") {
        format!("100204a00b08cd02{hash}ea02d192a39a8cc7a70173007301")
    } else {
        let mut pk = [0x02; 33];
        pk[1..].copy_from_slice(&blake2b256(label.as_bytes()));
        hex::encode(ergo_tree::p2pk_tree(&pk))
    }
}

pub fn address(label: &str) -> Address {
    Address::new(ergo_tree::ergo_tree_to_address(&tree(label)).expect("fixture trees have addresses"))
}

pub fn tx_id(label: &str) -> TxId {
    TxId::from(blake2b256(label.as_bytes()))
}

pub fn header_id(label: &str) -> HeaderId {
    HeaderId::from(blake2b256(format!("header:{label}").as_bytes()))
}

pub fn timestamp_at(height: Height) -> i64 {
    BASE_TIMESTAMP + (height.value() as i64 - 600_000) * BLOCK_INTERVAL
}

/// Output to the owner of a label
#[derive(Debug, Clone)]
pub struct Out {
    pub label: String,
    pub value: i64,
    pub assets: Vec<(TokenId, i64)>,
}

pub fn out(label: &str, value: i64) -> Out {
    Out {
        label: label.to_string(),
        value,
        assets: vec![],
    }
}

impl Out {
    pub fn token(mut self, token_id: TokenId, amount: i64) -> Self {
        self.assets.push((token_id, amount));
        self
    }
}

#[derive(Debug, Clone)]
pub struct TxSpec {
    pub label: String,
    pub inputs: Vec<BoxId>,
    pub outputs: Vec<Out>,
}

pub fn tx(label: &str, inputs: &[BoxId], outputs: Vec<Out>) -> TxSpec {
    TxSpec {
        label: label.to_string(),
        inputs: inputs.to_vec(),
        outputs,
    }
}

/// Id of output `index` of transaction `tx_label` in a block at `height`
pub fn box_id(tx_label: &str, height: Height, index: usize, out: &Out) -> BoxId {
    let tree = tree(&out.label);
    BoxCandidate {
        value: out.value,
        ergo_tree: &tree,
        creation_height: height.value(),
        tokens: out.assets.clone(),
        registers: vec![],
    }
    .box_id(&tx_id(tx_label), index as u16)
    .expect("fixture boxes serialize")
}

pub fn block(label: &str, height: Height, parent_id: HeaderId, txs: Vec<TxSpec>) -> FullBlock {
    let transactions = txs
        .into_iter()
        .map(|spec| {
            let id = tx_id(&spec.label);
            let outputs = spec
                .outputs
                .iter()
                .enumerate()
                .map(|(i, out)| NodeOutput {
                    box_id: box_id(&spec.label, height, i, out),
                    value: out.value,
                    ergo_tree: tree(&out.label),
                    creation_height: height.value(),
                    assets: out
                        .assets
                        .iter()
                        .map(|(token_id, amount)| NodeAsset {
                            token_id: *token_id,
                            amount: *amount,
                        })
                        .collect(),
                    additional_registers: BTreeMap::new(),
                    transaction_id: Some(id),
                    index: Some(i as i32),
                })
                .collect();
            NodeTransaction {
                id,
                inputs: spec.inputs.iter().map(|box_id| NodeInput { box_id: *box_id }).collect(),
                data_inputs: vec![],
                outputs,
            }
        })
        .collect();

    FullBlock {
        header: NodeHeader {
            id: header_id(label),
            parent_id,
            height,
            timestamp: timestamp_at(height),
            difficulty: 1,
        },
        block_transactions: BlockTransactions { transactions },
    }
}

/// Id of an output of a built block
pub fn output_id(block: &FullBlock, tx_index: usize, output_index: usize) -> BoxId {
    block.block_transactions.transactions[tx_index].outputs[output_index].box_id
}

/// A seed block followed by a linear chain
#[derive(Debug, Clone)]
pub struct Chain {
    pub seed: FullBlock,
    pub blocks: Vec<FullBlock>,
}

impl Chain {
    /// Chain whose seed block creates `outputs` out of nothing
    pub fn seeded(outputs: Vec<Out>) -> Chain {
        let seed = block("seed", SEED_HEIGHT, header_id("before-seed"), vec![tx("seed", &[], outputs)]);
        Chain { seed, blocks: vec![] }
    }

    pub fn tip(&self) -> &FullBlock {
        self.blocks.last().unwrap_or(&self.seed)
    }

    pub fn next_height(&self) -> Height {
        self.tip().header.height.next()
    }

    pub fn push(&mut self, label: &str, txs: Vec<TxSpec>) {
        let next = block(label, self.next_height(), self.tip().header.id, txs);
        self.blocks.push(next);
    }

    /// base holds 1000 at the seed, then:
    /// - a: base 1000 -> base 950 + con1 50
    /// - b: con1 50 -> con2 40 + con1 10, minting 2000 tokens split 1500/500
    /// - c: con1 10 -> pub1 5 + pub2 4 + pub1 1, and the 1 straight on to con1
    pub fn scenario_a() -> Chain {
        let mut chain = Chain::seeded(vec![out("base", 1000)]);
        let seed_box = output_id(&chain.seed, 0, 0);

        chain.push("block-a", vec![tx("a0", &[seed_box], vec![out("base", 950), out("con1", 50)])]);
        let a_con1 = output_id(chain.tip(), 0, 1);
        let token = TokenId::from(a_con1);

        chain.push(
            "block-b",
            vec![tx(
                "b0",
                &[a_con1],
                vec![out("con2", 40).token(token, 1500), out("con1", 10).token(token, 500)],
            )],
        );
        let b_con1 = output_id(chain.tip(), 0, 1);

        let change = out("pub1", 1).token(token, 100);
        let change_box = box_id("c0", chain.next_height(), 2, &change);
        chain.push(
            "block-c",
            vec![
                tx(
                    "c0",
                    &[b_con1],
                    vec![out("pub1", 5), out("pub2", 4).token(token, 400), change],
                ),
                tx("c1", &[change_box], vec![out("con1", 1).token(token, 100)]),
            ],
        );
        chain
    }
}

/// Migrated in-memory database holding the seed block of `chain`,
/// constraints set.
pub fn seeded_db(chain: &Chain) -> Database {
    pipeline_db(chain).0
}

pub fn pipeline_db(chain: &Chain) -> (Database, Pipeline) {
    pipeline_db_with(chain, Settings::default())
}

pub fn pipeline_db_with(chain: &Chain, settings: Settings) -> (Database, Pipeline) {
    let db = Database::open_in_memory().expect("in-memory database");
    migrations::run(&db, false).expect("migrations");
    db.execute_transaction(|conn| catalogue::seed(conn, &settings.cexs))
        .expect("cex catalogue");
    let mut pipeline = Pipeline::new(&settings);
    pipeline
        .include(&db, &chain.seed, Phase::Live, false)
        .expect("seed block");
    migrations::set_constraints(&db).expect("constraints");
    (db, pipeline)
}

/// Run pending repair sessions to completion.
pub fn drain_repairs(db: &Database) {
    repair::run_to_completion(db, 100).expect("repair");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AddressKind, SpecialAddress};

    #[test]
    fn labels_map_to_address_kinds() {
        assert_eq!(address("pub1").kind(), AddressKind::P2PK);
        assert_eq!(address("con1").kind(), AddressKind::OtherContract);
        assert_eq!(address("miner1").kind(), AddressKind::MinerContract);
        assert_eq!(address("fees").kind(), AddressKind::Special(SpecialAddress::Fees));
        assert_ne!(address("pub1"), address("pub2"));
    }

    #[test]
    fn chain_links_headers() {
        let chain = Chain::scenario_a();
        assert_eq!(chain.seed.header.height, SEED_HEIGHT);
        assert_eq!(chain.blocks[0].header.parent_id, chain.seed.header.id);
        assert_eq!(chain.blocks[2].header.height, Height(600_002));
        assert_eq!(chain.blocks[2].header.timestamp, BASE_TIMESTAMP + 2 * BLOCK_INTERVAL);
        // the second tx of block c spends the third output of the first
        let c = &chain.blocks[2].block_transactions.transactions;
        assert_eq!(c[1].inputs[0].box_id, output_id(&chain.blocks[2], 0, 2));
    }
}
