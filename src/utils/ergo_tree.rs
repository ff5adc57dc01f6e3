//! ErgoTree utilities for address derivation
//!
//! Only the mainnet encodings are produced. P2PK trees map to P2PK
//! addresses, every other tree to a P2S address over the full tree bytes.

use super::blake2b256;

const MAINNET_P2PK_PREFIX: u8 = 0x01; // network 0x00 + type 0x01
const MAINNET_P2S_PREFIX: u8 = 0x03; // network 0x00 + type 0x03

/// ErgoTree header + ProveDlog(GroupElement) opcodes of a P2PK tree
const P2PK_TREE_PREFIX: [u8; 3] = [0x00, 0x08, 0xcd];
const P2PK_TREE_LEN: usize = 36;

/// Base58 alphabet used by Ergo
const BASE58_ALPHABET: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Convert ErgoTree hex to human-readable address
pub fn ergo_tree_to_address(ergo_tree: &str) -> Option<String> {
    let bytes = hex::decode(ergo_tree).ok()?;
    tree_bytes_to_address(&bytes)
}

pub fn tree_bytes_to_address(bytes: &[u8]) -> Option<String> {
    if bytes.is_empty() {
        return None;
    }

    if bytes.len() == P2PK_TREE_LEN && bytes[..3] == P2PK_TREE_PREFIX {
        return Some(encode_address(MAINNET_P2PK_PREFIX, &bytes[3..]));
    }

    Some(encode_address(MAINNET_P2S_PREFIX, bytes))
}

/// ErgoTree of a P2PK address for the given compressed public key.
pub fn p2pk_tree(pk: &[u8; 33]) -> Vec<u8> {
    let mut tree = P2PK_TREE_PREFIX.to_vec();
    tree.extend_from_slice(pk);
    tree
}

/// prefix_byte || content || checksum(4 bytes)
fn encode_address(prefix: u8, content: &[u8]) -> String {
    let mut bytes = Vec::with_capacity(content.len() + 5);
    bytes.push(prefix);
    bytes.extend_from_slice(content);

    let checksum = blake2b256(&bytes);
    bytes.extend_from_slice(&checksum[..4]);

    base58_encode(&bytes)
}

fn base58_encode(data: &[u8]) -> String {
    let leading_zeros = data.iter().take_while(|&&b| b == 0).count();

    let mut result = Vec::new();
    let mut num = data.to_vec();

    while !num.is_empty() && !(num.len() == 1 && num[0] == 0) {
        let mut remainder = 0u32;
        let mut quotient_digits = Vec::with_capacity(num.len());

        for &byte in &num {
            let acc = (remainder << 8) + byte as u32;
            let quotient = acc / 58;
            remainder = acc % 58;

            if !quotient_digits.is_empty() || quotient > 0 {
                quotient_digits.push(quotient as u8);
            }
        }

        result.push(BASE58_ALPHABET[remainder as usize]);
        num = quotient_digits;
    }

    result.extend(std::iter::repeat(b'1').take(leading_zeros));
    result.reverse();
    result.into_iter().map(char::from).collect()
}
