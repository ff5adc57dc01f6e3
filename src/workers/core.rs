//! Core ledger: headers, transactions, boxes, tokens and the unspent index

use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::{Context, Result};
use duckdb::{params, Connection};

use crate::db::{self, OptionalExt};
use crate::error::IntegrityError;
use crate::models::{Address, Asset, BlockData, BoxData, BoxId, Header, Height, TokenId, TxData, TxId};
use crate::sync::{FullBlock, NodeOutput, NodeTransaction};
use crate::utils::box_id::BoxCandidate;
use crate::utils::{ergo_tree, registers};

const EIP4: &str = "EIP-004";

/// Write a block to the ledger and return it with all inputs resolved.
pub fn include(conn: &Connection, block: &FullBlock) -> Result<BlockData> {
    let header = Header::from(&block.header);
    let height = header.height;

    conn.execute(
        "INSERT INTO core.headers (height, id, parent_id, timestamp, difficulty)
         VALUES (?, ?, ?, ?, ?)",
        params![height, header.id, header.parent_id, header.timestamp, header.difficulty],
    )?;

    // Outputs created so far in this block, for intra-block spends
    let mut created: HashMap<BoxId, BoxData> = HashMap::new();
    let mut spent: HashSet<BoxId> = HashSet::new();
    let mut transactions = Vec::with_capacity(block.block_transactions.transactions.len());

    for (tx_index, tx) in block.block_transactions.transactions.iter().enumerate() {
        let tx_index = tx_index as i32;
        conn.execute(
            "INSERT INTO core.transactions (id, header_id, height, index) VALUES (?, ?, ?, ?)",
            params![tx.id, header.id, height, tx_index],
        )?;

        let mut inputs = Vec::with_capacity(tx.inputs.len());
        for (i, input) in tx.inputs.iter().enumerate() {
            let resolved = match created.get(&input.box_id) {
                Some(data) => data.clone(),
                None => resolve_box(conn, &input.box_id)?.ok_or(IntegrityError::UnknownInputBox {
                    box_id: input.box_id,
                    height,
                })?,
            };
            conn.execute(
                "INSERT INTO core.inputs (box_id, tx_id, header_id, index) VALUES (?, ?, ?, ?)",
                params![input.box_id, tx.id, header.id, i as i32],
            )?;
            spent.insert(input.box_id);
            inputs.push(resolved);
        }

        for (i, data_input) in tx.data_inputs.iter().enumerate() {
            conn.execute(
                "INSERT INTO core.data_inputs (box_id, tx_id, header_id, index) VALUES (?, ?, ?, ?)",
                params![data_input.box_id, tx.id, header.id, i as i32],
            )?;
        }

        let mut outputs = Vec::with_capacity(tx.outputs.len());
        for (i, output) in tx.outputs.iter().enumerate() {
            let data = insert_output(conn, &header, tx, output, i)?;
            created.insert(data.box_id, data.clone());
            outputs.push(data);
        }

        if let Some(first_input) = tx.inputs.first() {
            insert_minted_token(conn, tx, TokenId::from(first_input.box_id), height)?;
        }

        transactions.push(TxData {
            id: tx.id,
            index: tx_index,
            inputs,
            data_inputs: tx.data_inputs.iter().map(|d| d.box_id).collect(),
            outputs,
        });
    }

    // Boxes created and spent within the block never enter the index
    for box_id in &spent {
        if !created.contains_key(box_id) {
            conn.execute("DELETE FROM core.unspent WHERE box_id = ?", params![box_id])?;
        }
    }
    for tx in &transactions {
        for output in &tx.outputs {
            if !spent.contains(&output.box_id) {
                conn.execute("INSERT INTO core.unspent (box_id) VALUES (?)", params![output.box_id])?;
            }
        }
    }

    Ok(BlockData {
        header,
        transactions,
    })
}

fn insert_output(
    conn: &Connection,
    header: &Header,
    tx: &NodeTransaction,
    output: &NodeOutput,
    position: usize,
) -> Result<BoxData> {
    let index = output.index.unwrap_or(position as i32);
    let address = ergo_tree::ergo_tree_to_address(&output.ergo_tree)
        .map(Address::new)
        .with_context(|| format!("Cannot derive address of box {}", output.box_id))?;

    let candidate = BoxCandidate {
        value: output.value,
        ergo_tree: &output.ergo_tree,
        creation_height: output.creation_height,
        tokens: output.assets.iter().map(|a| (a.token_id, a.amount)).collect(),
        registers: output.registers(),
    };
    let size = candidate
        .serialize(&tx.id, index as u16)
        .with_context(|| format!("Cannot serialize box {}", output.box_id))?
        .len() as i32;

    conn.execute(
        "INSERT INTO core.outputs (box_id, tx_id, header_id, creation_height, address, index, value, size)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            output.box_id,
            tx.id,
            header.id,
            output.creation_height,
            address,
            index,
            output.value,
            size
        ],
    )?;

    for (id, serialized) in output.registers() {
        let rendered = registers::render(serialized);
        conn.execute(
            "INSERT INTO core.box_registers (id, box_id, value_type, serialized_value, rendered_value)
             VALUES (?, ?, ?, ?, ?)",
            params![id as i16, output.box_id, rendered.value_type, serialized, rendered.rendered],
        )?;
    }

    for asset in &output.assets {
        conn.execute(
            "INSERT INTO core.box_assets (box_id, token_id, amount) VALUES (?, ?, ?)",
            params![output.box_id, asset.token_id, asset.amount],
        )?;
    }

    Ok(BoxData {
        box_id: output.box_id,
        tx_id: tx.id,
        creation_height: Height(output.creation_height),
        address,
        index,
        value: output.value,
        size,
        assets: output
            .assets
            .iter()
            .map(|a| Asset {
                token_id: a.token_id,
                amount: a.amount,
            })
            .collect(),
    })
}

/// A transaction mints at most one token, whose id is the id of its
/// first input.
fn insert_minted_token(conn: &Connection, tx: &NodeTransaction, token_id: TokenId, height: Height) -> Result<()> {
    let mut emission: i64 = 0;
    let mut minting_box: Option<&NodeOutput> = None;
    for output in &tx.outputs {
        for asset in output.assets.iter().filter(|a| a.token_id == token_id) {
            emission = emission
                .checked_add(asset.amount)
                .ok_or(IntegrityError::Overflow { height })?;
            minting_box.get_or_insert(output);
        }
    }
    let Some(minting_box) = minting_box else {
        return Ok(());
    };

    let name = minting_box.register(4).and_then(registers::decode_utf8);
    let description = minting_box.register(5).and_then(registers::decode_utf8);
    let decimals = minting_box.register(6).and_then(registers::decode_decimals);
    let standard = (name.is_some() && description.is_some() && decimals.is_some()).then_some(EIP4);

    conn.execute(
        "INSERT INTO core.tokens (id, box_id, emission_amount, name, description, decimals, standard)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![token_id, minting_box.box_id, emission, name, description, decimals, standard],
    )?;
    Ok(())
}

/// Remove every ledger row of the given block and restore the unspent
/// index to its state before the block.
pub fn rollback(conn: &Connection, header: &Header) -> Result<()> {
    let id = &header.id;

    conn.execute(
        "DELETE FROM core.unspent
         WHERE box_id IN (SELECT box_id FROM core.outputs WHERE header_id = ?)",
        params![id],
    )?;
    conn.execute(
        "INSERT INTO core.unspent (box_id)
         SELECT i.box_id
         FROM core.inputs i
         JOIN core.outputs o ON o.box_id = i.box_id
         WHERE i.header_id = ? AND o.header_id <> ?
         ORDER BY i.tx_id, i.index",
        params![id, id],
    )?;

    for table in ["core.box_assets", "core.box_registers", "core.tokens"] {
        conn.execute(
            &format!(
                "DELETE FROM {table}
                 WHERE box_id IN (SELECT box_id FROM core.outputs WHERE header_id = ?)"
            ),
            params![id],
        )?;
    }
    for table in ["core.inputs", "core.data_inputs", "core.outputs", "core.transactions"] {
        conn.execute(&format!("DELETE FROM {table} WHERE header_id = ?"), params![id])?;
    }
    conn.execute("DELETE FROM core.headers WHERE id = ?", params![id])?;
    Ok(())
}

const SELECT_BOX: &str = "SELECT o.box_id, o.tx_id, o.creation_height, o.address, o.index, o.value, o.size";

fn box_from_row(row: &duckdb::Row<'_>, offset: usize) -> Result<BoxData, duckdb::Error> {
    Ok(BoxData {
        box_id: row.get(offset)?,
        tx_id: row.get(offset + 1)?,
        creation_height: row.get(offset + 2)?,
        address: row.get(offset + 3)?,
        index: row.get(offset + 4)?,
        value: row.get(offset + 5)?,
        size: row.get(offset + 6)?,
        assets: vec![],
    })
}

/// Look up a stored output, assets included
pub fn resolve_box(conn: &Connection, box_id: &BoxId) -> Result<Option<BoxData>> {
    let found = conn
        .query_row(
            &format!("{SELECT_BOX} FROM core.outputs o WHERE o.box_id = ?"),
            params![box_id],
            |row| box_from_row(row, 0),
        )
        .optional()?;
    let Some(mut data) = found else {
        return Ok(None);
    };
    data.assets = db::query_all(
        conn,
        "SELECT token_id, amount FROM core.box_assets WHERE box_id = ? ORDER BY rowid",
        params![box_id],
        |row| {
            Ok(Asset {
                token_id: row.get(0)?,
                amount: row.get(1)?,
            })
        },
    )?;
    Ok(Some(data))
}

/// Rebuild the resolved block at `height` from the ledger tables.
pub fn load_block_data(conn: &Connection, height: Height) -> Result<Option<BlockData>> {
    let Some(header) = db::header_at(conn, height)? else {
        return Ok(None);
    };
    let id = &header.id;

    let mut assets: HashMap<BoxId, Vec<Asset>> = HashMap::new();
    for (box_id, asset) in db::query_all(
        conn,
        "SELECT box_id, token_id, amount
         FROM core.box_assets
         WHERE box_id IN (
             SELECT box_id FROM core.outputs WHERE header_id = ?
             UNION ALL
             SELECT box_id FROM core.inputs WHERE header_id = ?
         )
         ORDER BY rowid",
        params![id, id],
        |row| {
            Ok((
                row.get::<_, BoxId>(0)?,
                Asset {
                    token_id: row.get(1)?,
                    amount: row.get(2)?,
                },
            ))
        },
    )? {
        assets.entry(box_id).or_default().push(asset);
    }
    let with_assets = |mut data: BoxData| {
        data.assets = assets.get(&data.box_id).cloned().unwrap_or_default();
        data
    };

    let mut inputs: BTreeMap<TxId, Vec<BoxData>> = BTreeMap::new();
    for (tx_id, data) in db::query_all(
        conn,
        &format!(
            "{SELECT_BOX}, i.tx_id
             FROM core.inputs i
             JOIN core.outputs o ON o.box_id = i.box_id
             WHERE i.header_id = ?
             ORDER BY i.index"
        ),
        params![id],
        |row| Ok((row.get::<_, TxId>(7)?, box_from_row(row, 0)?)),
    )? {
        inputs.entry(tx_id).or_default().push(with_assets(data));
    }

    let mut data_inputs: BTreeMap<TxId, Vec<BoxId>> = BTreeMap::new();
    for (tx_id, box_id) in db::query_all(
        conn,
        "SELECT tx_id, box_id FROM core.data_inputs WHERE header_id = ? ORDER BY index",
        params![id],
        |row| Ok((row.get::<_, TxId>(0)?, row.get::<_, BoxId>(1)?)),
    )? {
        data_inputs.entry(tx_id).or_default().push(box_id);
    }

    let mut outputs: BTreeMap<TxId, Vec<BoxData>> = BTreeMap::new();
    for data in db::query_all(
        conn,
        &format!("{SELECT_BOX} FROM core.outputs o WHERE o.header_id = ? ORDER BY o.index"),
        params![id],
        |row| box_from_row(row, 0),
    )? {
        outputs.entry(data.tx_id).or_default().push(with_assets(data));
    }

    let transactions = db::query_all(
        conn,
        "SELECT id, index FROM core.transactions WHERE header_id = ? ORDER BY index",
        params![id],
        |row| Ok((row.get::<_, TxId>(0)?, row.get::<_, i32>(1)?)),
    )?
    .into_iter()
    .map(|(tx_id, index)| TxData {
        id: tx_id,
        index,
        inputs: inputs.remove(&tx_id).unwrap_or_default(),
        data_inputs: data_inputs.remove(&tx_id).unwrap_or_default(),
        outputs: outputs.remove(&tx_id).unwrap_or_default(),
    })
    .collect();

    Ok(Some(BlockData {
        header,
        transactions,
    }))
}
