//! Typed identifiers
//!
//! Heights, digests and addresses are distinct types so that a header id
//! can never be passed where a box id is expected.

use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;

use duckdb::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Value, ValueRef};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Block height. Genesis boxes live at height 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Height(pub i32);

impl Height {
    pub const GENESIS: Height = Height(0);

    pub fn next(self) -> Height {
        Height(self.0 + 1)
    }

    pub fn prev(self) -> Height {
        Height(self.0 - 1)
    }

    pub fn value(self) -> i32 {
        self.0
    }
}

impl fmt::Display for Height {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add<i32> for Height {
    type Output = Height;

    fn add(self, rhs: i32) -> Height {
        Height(self.0 + rhs)
    }
}

impl Sub<i32> for Height {
    type Output = Height;

    fn sub(self, rhs: i32) -> Height {
        Height(self.0 - rhs)
    }
}

impl ToSql for Height {
    fn to_sql(&self) -> duckdb::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Owned(Value::Int(self.0)))
    }
}

impl FromSql for Height {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        i32::column_result(value).map(Height)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DigestParseError {
    #[error("expected 64 hex characters, got {0}")]
    Length(usize),
    #[error("invalid hex: {0}")]
    Hex(String),
}

/// 32-byte Blake2b digest, hex encoded on the wire and in the database.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Digest32(pub [u8; 32]);

impl Digest32 {
    pub const ZERO: Digest32 = Digest32([0u8; 32]);

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for Digest32 {
    type Err = DigestParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 64 {
            return Err(DigestParseError::Length(s.len()));
        }
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes).map_err(|e| DigestParseError::Hex(e.to_string()))?;
        Ok(Digest32(bytes))
    }
}

impl fmt::Display for Digest32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest32({})", self.to_hex())
    }
}

/// Declares a newtype over [`Digest32`] with hex (de)serialization and
/// database conversions.
macro_rules! digest_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        pub struct $name(pub Digest32);

        impl $name {
            pub fn to_hex(&self) -> String {
                self.0.to_hex()
            }

            pub fn as_bytes(&self) -> &[u8; 32] {
                self.0.as_bytes()
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                $name(Digest32(bytes))
            }
        }

        impl FromStr for $name {
            type Err = DigestParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse().map($name)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0.to_hex())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> duckdb::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::Owned(Value::Text(self.to_hex())))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let s = String::column_result(value)?;
                s.parse()
                    .map_err(|e: DigestParseError| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

digest_id!(
    /// Block header id.
    HeaderId
);
digest_id!(
    /// Transaction id.
    TxId
);
digest_id!(
    /// Box (output) id.
    BoxId
);
digest_id!(
    /// Token id. Equals the id of the first input box of the minting transaction.
    TokenId
);

impl From<BoxId> for TokenId {
    fn from(box_id: BoxId) -> Self {
        TokenId(box_id.0)
    }
}

/// Base58 encoded Ergo address.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(s: impl Into<String>) -> Self {
        Address(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Address(s.to_string())
    }
}

impl ToSql for Address {
    fn to_sql(&self) -> duckdb::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Owned(Value::Text(self.0.clone())))
    }
}

impl FromSql for Address {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        String::column_result(value).map(Address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_hex_round_trip() {
        let hex = "0fa8b8f6e8d2e3f4a5b6c7d8e9f0a1b2c3d4e5f6a7b8c9d0e1f2a3b4c5d6e7f8";
        let id: HeaderId = hex.parse().unwrap();
        assert_eq!(id.to_hex(), hex);
        assert_eq!(id.to_string(), hex);
    }

    #[test]
    fn digest_rejects_bad_input() {
        assert_eq!("abc".parse::<BoxId>(), Err(DigestParseError::Length(3)));
        let bad = "zz".repeat(32);
        assert!(matches!(bad.parse::<BoxId>(), Err(DigestParseError::Hex(_))));
    }

    #[test]
    fn digest_deserializes_from_json_string() {
        let json = format!("\"{}\"", "11".repeat(32));
        let id: TxId = serde_json::from_str(&json).unwrap();
        assert_eq!(id.as_bytes(), &[0x11; 32]);
    }

    #[test]
    fn height_arithmetic() {
        let h = Height(600_000);
        assert_eq!(h.next(), Height(600_001));
        assert_eq!(h.prev(), Height(599_999));
        assert_eq!(h + 5, Height(600_005));
        assert_eq!(h - 720, Height(599_280));
    }

    #[test]
    fn height_binds_as_integer() {
        let conn = duckdb::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (height INTEGER)").unwrap();
        conn.execute("INSERT INTO t VALUES (?)", [Height(600_000)]).unwrap();
        let height: Height = conn
            .query_row("SELECT height FROM t WHERE height = ?", [Height(600_000)], |row| row.get(0))
            .unwrap();
        assert_eq!(height, Height(600_000));
    }
}
