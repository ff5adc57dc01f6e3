//! Domain types shared by the node client, the core ingester and derived workers

pub mod address;
mod block;
mod ids;

pub use address::{AddressKind, SpecialAddress};
pub use block::{Asset, BlockData, BoxData, Header, TxData};
pub use ids::{Address, BoxId, HeaderId, Height, TokenId, TxId};

/// Timestamp assigned to the synthetic genesis header (2019-07-01 UTC).
pub const GENESIS_TIMESTAMP: i64 = 1_561_978_800_000;

/// One ERG in nanoERG.
pub const COIN: i64 = 1_000_000_000;
