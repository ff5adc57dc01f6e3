//! Box serialization and id computation
//!
//! A box id is the Blake2b256 digest of the serialized box: the output
//! candidate (value, tree, creation height, tokens, registers) followed by
//! the id of the producing transaction and the output index.

use crate::models::{BoxId, TokenId, TxId};

use super::blake2b256;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BoxSerializationError {
    #[error("invalid hex in {0}")]
    Hex(&'static str),
    #[error("negative value or amount")]
    Negative,
    #[error("too many tokens ({0})")]
    TooManyTokens(usize),
    #[error("registers must be densely packed from R4, missing R{0}")]
    SparseRegisters(u8),
}

/// Output content as found in node responses.
#[derive(Debug, Clone)]
pub struct BoxCandidate<'a> {
    pub value: i64,
    pub ergo_tree: &'a str,
    pub creation_height: i32,
    pub tokens: Vec<(TokenId, i64)>,
    /// Serialized register constants keyed by register number (4..=9)
    pub registers: Vec<(u8, &'a str)>,
}

impl BoxCandidate<'_> {
    pub fn serialize(&self, tx_id: &TxId, index: u16) -> Result<Vec<u8>, BoxSerializationError> {
        let mut out = Vec::with_capacity(128);

        put_u64(&mut out, u64::try_from(self.value).map_err(|_| BoxSerializationError::Negative)?);
        out.extend(hex::decode(self.ergo_tree).map_err(|_| BoxSerializationError::Hex("ergo tree"))?);
        put_u64(
            &mut out,
            u64::try_from(self.creation_height).map_err(|_| BoxSerializationError::Negative)?,
        );

        let n_tokens = u8::try_from(self.tokens.len())
            .map_err(|_| BoxSerializationError::TooManyTokens(self.tokens.len()))?;
        out.push(n_tokens);
        for (token_id, amount) in &self.tokens {
            out.extend_from_slice(token_id.as_bytes());
            put_u64(&mut out, u64::try_from(*amount).map_err(|_| BoxSerializationError::Negative)?);
        }

        let mut registers = self.registers.clone();
        registers.sort_by_key(|(id, _)| *id);
        for (expected, (id, _)) in (4u8..).zip(registers.iter()) {
            if *id != expected {
                return Err(BoxSerializationError::SparseRegisters(expected));
            }
        }
        out.push(registers.len() as u8);
        for (_, value) in &registers {
            out.extend(hex::decode(value).map_err(|_| BoxSerializationError::Hex("register"))?);
        }

        out.extend_from_slice(tx_id.as_bytes());
        put_u64(&mut out, index as u64);
        Ok(out)
    }

    pub fn box_id(&self, tx_id: &TxId, index: u16) -> Result<BoxId, BoxSerializationError> {
        Ok(BoxId::from(blake2b256(&self.serialize(tx_id, index)?)))
    }
}

/// Unsigned VLQ
fn put_u64(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}
