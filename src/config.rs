//! Runtime settings
//!
//! Parsed once at startup from an optional TOML file layered with `EW_`
//! prefixed environment variables (`EW_NODE__URL`, `EW_DATABASE__PATH`, ...).

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::StartupError;
use crate::workers::cex::catalogue;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub node: NodeSettings,
    pub sync: SyncSettings,
    pub repair: RepairSettings,
    pub price: PriceSettings,
    pub cexs: Vec<CexSettings>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: String,
    pub threads: u32,
    pub memory_limit: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: "./data/ergowatch.duckdb".to_string(),
            threads: 4,
            memory_limit: "512MB".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeSettings {
    pub url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_ms: u64,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:9053".to_string(),
            api_key: None,
            timeout_secs: 30,
            max_retries: 5,
            backoff_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Sleep between polls once the local tip matches the node
    pub poll_interval_secs: u64,
    /// Consecutive rollbacks allowed before giving up on a fork
    pub max_fork_depth: u32,
    /// Consecutive failures of the same block before the watcher halts
    pub max_block_failures: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            max_fork_depth: 100,
            max_block_failures: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RepairSettings {
    /// Schedule a trailing-window repair every `interval` blocks (0 disables)
    pub interval: i32,
    /// Size of the periodic trailing window
    pub trailing: i32,
    /// Cap on the size of a repair window (0 means unbounded)
    pub max_window: i32,
    /// Heights repaired between two live blocks
    pub batch_size: i32,
}

impl Default for RepairSettings {
    fn default() -> Self {
        Self {
            interval: 100,
            trailing: 10,
            max_window: 0,
            batch_size: 100,
        }
    }
}

/// What to store for blocks newer than the latest oracle quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionalPolicy {
    /// Use the latest known quote and flag the row as provisional
    CarryForward,
    /// Leave the block without a quote until the oracle catches up
    LeaveMissing,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PriceSettings {
    pub enabled: bool,
    pub url: String,
    pub interval_secs: u64,
    pub provisional: ProvisionalPolicy,
    /// Replace provisional quotes once real ones are available
    pub backfill: bool,
}

impl Default for PriceSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "https://api.coingecko.com/api/v3".to_string(),
            interval_secs: 600,
            provisional: ProvisionalPolicy::CarryForward,
            backfill: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CexSettings {
    pub id: i32,
    #[serde(default)]
    pub main_addresses: Vec<String>,
}

impl Settings {
    /// Load settings from `path` (if any) and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings: Settings = builder
            .add_source(
                config::Environment::with_prefix("EW")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), StartupError> {
        if self.node.url.trim().is_empty() {
            return Err(StartupError::InvalidConfig("node.url is empty".into()));
        }
        if self.database.path.trim().is_empty() {
            return Err(StartupError::InvalidConfig("database.path is empty".into()));
        }
        if self.repair.batch_size < 1 {
            return Err(StartupError::InvalidConfig(
                "repair.batch_size must be at least 1".into(),
            ));
        }
        if self.repair.interval < 0 || self.repair.trailing < 0 || self.repair.max_window < 0 {
            return Err(StartupError::InvalidConfig(
                "repair windows cannot be negative".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for cex in &self.cexs {
            if catalogue::name(cex.id).is_none() {
                return Err(StartupError::InvalidConfig(format!("unknown cex id {}", cex.id)));
            }
            for address in &cex.main_addresses {
                if !seen.insert(address.as_str()) {
                    return Err(StartupError::InvalidConfig(format!(
                        "address {address} is listed as main address more than once"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.node.url, "http://localhost:9053");
        assert_eq!(settings.repair.max_window, 0);
        assert_eq!(settings.price.provisional, ProvisionalPolicy::CarryForward);
    }

    #[test]
    fn reads_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[database]
path = "/tmp/ew.duckdb"

[node]
url = "http://node:9053"
api_key = "hello"

[price]
provisional = "leave_missing"

[[cexs]]
id = 1
main_addresses = ["9fAAA", "9fBBB"]
"#
        )
        .unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.database.path, "/tmp/ew.duckdb");
        assert_eq!(settings.database.threads, 4);
        assert_eq!(settings.node.url, "http://node:9053");
        assert_eq!(settings.node.api_key.as_deref(), Some("hello"));
        assert_eq!(settings.price.provisional, ProvisionalPolicy::LeaveMissing);
        assert_eq!(settings.cexs.len(), 1);
        assert_eq!(settings.cexs[0].main_addresses, vec!["9fAAA", "9fBBB"]);
    }

    #[test]
    fn environment_overrides_file() {
        std::env::set_var("EW_SYNC__MAX_FORK_DEPTH", "7");
        let settings = Settings::load(None).unwrap();
        std::env::remove_var("EW_SYNC__MAX_FORK_DEPTH");
        assert_eq!(settings.sync.max_fork_depth, 7);
    }

    #[test]
    fn rejects_unknown_cex_and_duplicate_mains() {
        let mut settings = Settings::default();
        settings.cexs = vec![CexSettings {
            id: 999,
            main_addresses: vec![],
        }];
        assert!(matches!(settings.validate(), Err(StartupError::InvalidConfig(_))));

        settings.cexs = vec![
            CexSettings {
                id: 1,
                main_addresses: vec!["9fAAA".into()],
            },
            CexSettings {
                id: 2,
                main_addresses: vec!["9fAAA".into()],
            },
        ];
        assert!(matches!(settings.validate(), Err(StartupError::InvalidConfig(_))));
    }
}
