//! Address classification

use super::Address;

pub const COINBASE_ADDRESS: &str = "2Z4YBkDsDvQj8BX7xiySFewjitqp2ge9c99jfes2whbtKitZTxdBYqbrVZUvZvKv6aqn9by4kp3LE1c26LCyosFnVnm6b6U1JYvWpYmL2ZnixJbXLjWAWuBThV1D6dLpqZJYQHYDznJCk49g5TUiS4q8khpag2aNmHwREV7JSsypHdHLgJT7MGaw51aJfNubyzSKxZ4AJXFS27EfXwyCLzW1K6GVqwkJtCoPvrcLqmqwacAWJPkmh78nke9H4oT88XmSbRt2n9aWZjosiZCafZ4osUDxmZcc5QVEeTWn8drSraY3eFKe8Mu9MSCcVU";
pub const REEMISSION_ADDRESS: &str = "22WkKcVUvboYCZJe1urbmvBL3j67LKb5KEAvFhJXqA6ubYvHpSCvbvwvEY3xzUr7QvxpEtqjzMAPMsVdZh1VGWmZphvKoJdVzL1ayhsMftTtEFoA3YYdq3zKeeYXavVrrPUmK3fRXJ2HWEbZexewtBWcgAnHBw5tKvYFy9dEUi645gE2fYMUvVBtbvMExE9mjZ2W9goWkqu1VtThAsMZWZWjHxDjX116HpeQKu9b9neEUBj4kE5sX8QXaV6ZeReXxYHFJFg2rmaTknSPMxHXA8NpQKgzryBwLssp5EJ1QTqn5R6xuvGgFCEUZicCEo8qk8UNbE7e2d4WqW5qzpQPzJkKoPa5UtJEPYDWNhaCKmCpzdSc77";
pub const PAY_TO_REEMISSION_ADDRESS: &str =
    "6KxusedL87PBibr1t1f4ggzAyTAmWEPqSpqXbkdoybNwHVw5Nb7cUESBmQw5XK8TyvbQiueyqkR9XMNaUgpWx3jT54p";
pub const TREASURY_ADDRESS: &str = "4L1ktFSzm3SH1UioDuUf5hyaraHird4D2dEACwQ1qHGjSKtA6KaNvSzRCZXZGf9jkfNAEC1SrYaZmCuvb2BKiXk5zW9xuvrXFT7FdNe2KqbymiZvo5UQLAm5jQY8ZBRhTZ4AFtZa1UF5nd4aofwPiL7YkJuyiL5hDHMZL1ZnyL746tHmRYMjAhCgE7d698dRhkdSeVy";
pub const FEES_ADDRESS: &str = "2iHkR7CWvD1R4j1yZg5bkeDRQavjAaVPeTDFGGLZduHyfWMuYpmhHocX8GJoaieTx78FntzJbCBVL6rf96ocJoZdmWBL2fci7NqWgAirppPQmZ7fN9V6z13Ay6brPriBKYqLp1bT2Fk4FkFLCfdPpe";

const MINER_PREFIX: &str = "88dhgz";
const P2PK_LENGTH: usize = 51;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialAddress {
    Coinbase,
    Fees,
    Treasury,
    Reemission,
    Pay2Reemission,
}

impl SpecialAddress {
    pub const ALL: [SpecialAddress; 5] = [
        SpecialAddress::Coinbase,
        SpecialAddress::Fees,
        SpecialAddress::Treasury,
        SpecialAddress::Reemission,
        SpecialAddress::Pay2Reemission,
    ];

    pub fn address(self) -> &'static str {
        match self {
            SpecialAddress::Coinbase => COINBASE_ADDRESS,
            SpecialAddress::Fees => FEES_ADDRESS,
            SpecialAddress::Treasury => TREASURY_ADDRESS,
            SpecialAddress::Reemission => REEMISSION_ADDRESS,
            SpecialAddress::Pay2Reemission => PAY_TO_REEMISSION_ADDRESS,
        }
    }

    fn lookup(address: &str) -> Option<SpecialAddress> {
        SpecialAddress::ALL
            .into_iter()
            .find(|special| special.address() == address)
    }

    /// Protocol-held funds that are not part of circulating supply.
    pub fn is_non_circulating(self) -> bool {
        matches!(
            self,
            SpecialAddress::Coinbase | SpecialAddress::Reemission | SpecialAddress::Pay2Reemission
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressKind {
    P2PK,
    MinerContract,
    Special(SpecialAddress),
    OtherContract,
}

impl AddressKind {
    pub fn of(address: &str) -> AddressKind {
        if let Some(special) = SpecialAddress::lookup(address) {
            return AddressKind::Special(special);
        }
        if address.starts_with('9') && address.len() == P2PK_LENGTH {
            AddressKind::P2PK
        } else if address.starts_with(MINER_PREFIX) {
            AddressKind::MinerContract
        } else {
            AddressKind::OtherContract
        }
    }
}

impl Address {
    pub fn kind(&self) -> AddressKind {
        AddressKind::of(self.as_str())
    }

    pub fn is_p2pk(&self) -> bool {
        self.kind() == AddressKind::P2PK
    }
}

/// SQL predicates mirroring [`AddressKind`] for set-based metric queries.
pub mod sql {
    use super::{SpecialAddress, MINER_PREFIX, P2PK_LENGTH};

    fn quoted_list<I: IntoIterator<Item = &'static str>>(addresses: I) -> String {
        addresses
            .into_iter()
            .map(|a| format!("'{a}'"))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn is_p2pk(col: &str) -> String {
        format!("(starts_with({col}, '9') and length({col}) = {P2PK_LENGTH})")
    }

    pub fn is_miner(col: &str) -> String {
        format!("starts_with({col}, '{MINER_PREFIX}')")
    }

    pub fn is_treasury(col: &str) -> String {
        format!("{col} = '{}'", SpecialAddress::Treasury.address())
    }

    /// Any special address (coinbase, fees, treasury, re-emission).
    pub fn is_special(col: &str) -> String {
        let all = quoted_list(SpecialAddress::ALL.into_iter().map(SpecialAddress::address));
        format!("{col} in ({all})")
    }

    /// Emission and re-emission contracts.
    pub fn is_non_circulating(col: &str) -> String {
        let list = quoted_list(
            SpecialAddress::ALL
                .into_iter()
                .filter(|s| s.is_non_circulating())
                .map(SpecialAddress::address),
        );
        format!("{col} in ({list})")
    }

    /// Contracts other than miners and special addresses.
    pub fn is_other_contract(col: &str) -> String {
        format!(
            "(not {} and not {} and not {})",
            is_p2pk(col),
            is_miner(col),
            is_special(col)
        )
    }
}
