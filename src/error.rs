//! Error kinds shared across the watcher

use thiserror::Error;

use crate::models::{Address, BoxId, HeaderId, Height, TokenId};

/// Failures talking to the full node.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Connection errors, timeouts and 5xx responses. Worth retrying.
    #[error("transient node error: {0}")]
    Transient(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Response could not be understood. Retrying won't help.
    #[error("invalid node response: {0}")]
    Invalid(String),
}

/// Failures that may clear up on a later attempt
pub trait Retryable: std::fmt::Display {
    fn is_transient(&self) -> bool;
}

impl Retryable for NodeError {
    fn is_transient(&self) -> bool {
        matches!(self, NodeError::Transient(_))
    }
}

impl From<reqwest::Error> for NodeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            NodeError::Invalid(e.to_string())
        } else {
            NodeError::Transient(e.to_string())
        }
    }
}

/// Failures talking to the price oracle.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("transient oracle error: {0}")]
    Transient(String),

    #[error("invalid oracle response: {0}")]
    Invalid(String),
}

impl Retryable for OracleError {
    fn is_transient(&self) -> bool {
        matches!(self, OracleError::Transient(_))
    }
}

impl From<reqwest::Error> for OracleError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            OracleError::Invalid(e.to_string())
        } else {
            OracleError::Transient(e.to_string())
        }
    }
}

/// Violations of ledger invariants detected while applying a block.
///
/// Any of these aborts the block's transaction.
#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("block {header_id} at height {height} does not extend local tip {tip_id} at height {tip_height}")]
    ParentMismatch {
        height: Height,
        header_id: HeaderId,
        tip_height: Height,
        tip_id: HeaderId,
    },

    #[error("block at height {height} does not follow local tip at height {tip_height}")]
    HeightGap { height: Height, tip_height: Height },

    #[error("input box {box_id} of transaction at height {height} is unknown")]
    UnknownInputBox { box_id: BoxId, height: Height },

    #[error("balance of {address} would become negative ({value}) at height {height}")]
    NegativeBalance {
        address: Address,
        value: i128,
        height: Height,
    },

    #[error("token {token_id} balance of {address} would become negative ({value}) at height {height}")]
    NegativeTokenBalance {
        address: Address,
        token_id: TokenId,
        value: i128,
        height: Height,
    },

    #[error("cannot roll back height {height}: local tip is at {tip_height}")]
    RollbackNotAtTip { height: Height, tip_height: Height },

    #[error("value overflow at height {height}")]
    Overflow { height: Height },
}

/// Outcome of comparing stored and compiled schema revisions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MigrationError {
    #[error("DB was created by a more recent version (revision {stored}, binary supports {compiled})")]
    NewerDatabase { stored: i32, compiled: i32 },

    #[error("Database is {0} revision(s) behind. Run with -m to allow migrations.")]
    PendingMigrations(i32),
}

/// Configuration and database misuse detected at startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("database is not constrained but already holds data; drop --no-bootstrap to finish the bootstrap phase")]
    UnconstrainedDatabase,

    #[error("database is not constrained; run with --bootstrap, or with --no-bootstrap on an empty database")]
    BootstrapRequired,

    #[error("--bootstrap and --no-bootstrap cannot be used together")]
    ConflictingBootstrapFlags,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
