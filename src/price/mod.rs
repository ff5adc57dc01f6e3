//! ERG/USD quotes
//!
//! A background task pulls quotes from an oracle and stores, for every
//! block, the latest quote not newer than the block. Blocks newer than
//! the latest quote, or older than the earliest one, are handled by
//! [`ProvisionalPolicy`]: carried rows use the nearest quote and stay
//! provisional.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use duckdb::params;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{PriceSettings, ProvisionalPolicy};
use crate::db::Database;
use crate::error::OracleError;
use crate::models::{HeaderId, Height};
use crate::utils::now_ms;
use crate::utils::retry::Backoff;

const DAY_MS: i64 = 86_400_000;
/// Headers priced per update
const MAX_BLOCKS_PER_UPDATE: i64 = 2_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quote {
    pub timestamp: i64,
    pub usd: f64,
}

#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Quotes within `[from_ms, to_ms]`, oldest first
    async fn quotes(&self, from_ms: i64, to_ms: i64) -> Result<Vec<Quote>, OracleError>;
}

pub struct CoinGecko {
    url: String,
    client: Client,
    backoff: Backoff,
}

#[derive(Deserialize)]
struct MarketChart {
    prices: Vec<(f64, f64)>,
}

impl CoinGecko {
    pub fn new(settings: &PriceSettings) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            url: settings.url.trim_end_matches('/').to_string(),
            client,
            backoff: Backoff::default(),
        })
    }

    async fn fetch_once(&self, path: &str) -> Result<Vec<Quote>, OracleError> {
        let resp = self.client.get(format!("{}{}", self.url, path)).send().await?;
        match resp.status() {
            StatusCode::OK => {}
            status if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS => {
                return Err(OracleError::Transient(format!("{path}: {status}")))
            }
            status => return Err(OracleError::Invalid(format!("{path}: {status}"))),
        }
        let chart: MarketChart = resp.json().await?;
        let mut quotes: Vec<Quote> = chart
            .prices
            .into_iter()
            .map(|(timestamp, usd)| Quote {
                timestamp: timestamp as i64,
                usd,
            })
            .collect();
        quotes.sort_by_key(|q| q.timestamp);
        Ok(quotes)
    }
}

#[async_trait]
impl QuoteSource for CoinGecko {
    async fn quotes(&self, from_ms: i64, to_ms: i64) -> Result<Vec<Quote>, OracleError> {
        let path = format!(
            "/coins/ergo/market_chart/range?vs_currency=usd&from={}&to={}",
            from_ms / 1000,
            to_ms / 1000
        );
        self.backoff.retry(&path, || self.fetch_once(&path)).await
    }
}

pub struct PriceFeed<Q: QuoteSource> {
    source: Q,
    db: Database,
    settings: PriceSettings,
}

struct PendingHeader {
    height: Height,
    id: HeaderId,
    timestamp: i64,
}

impl<Q: QuoteSource> PriceFeed<Q> {
    pub fn new(source: Q, db: Database, settings: PriceSettings) -> Self {
        Self { source, db, settings }
    }

    /// Price the headers above the last settled quote. Returns the number
    /// of block quotes written.
    pub async fn update(&self) -> Result<usize> {
        let pending = self.pending_headers()?;
        let (Some(first), Some(last)) = (pending.first(), pending.last()) else {
            return Ok(0);
        };

        let from = first.timestamp - DAY_MS;
        let to = (last.timestamp + DAY_MS).min(now_ms()).max(last.timestamp);
        let quotes = self.source.quotes(from, to).await?;
        let Some(latest) = quotes.last().map(|q| q.timestamp) else {
            debug!("Oracle returned no quotes for {} to {}", from, to);
            return Ok(0);
        };

        let policy = self.settings.provisional;
        self.db.execute_transaction(|conn| {
            let mut written = 0;
            for header in &pending {
                let earlier = quotes.iter().rev().find(|q| q.timestamp <= header.timestamp);
                let Some(quote) = earlier.or(quotes.first()) else {
                    break;
                };
                let provisional = earlier.is_none() || header.timestamp > latest;
                if provisional && policy == ProvisionalPolicy::LeaveMissing {
                    break;
                }

                conn.execute("DELETE FROM mtr.ergusd WHERE height = ?", params![header.height])?;
                conn.execute(
                    "DELETE FROM mtr.ergusd_provisional WHERE height = ?",
                    params![header.height],
                )?;
                let inserted = conn.execute(
                    "INSERT INTO mtr.ergusd (height, value)
                     SELECT ?, ?
                     WHERE EXISTS (SELECT 1 FROM core.headers WHERE height = ? AND id = ?)",
                    params![header.height, quote.usd, header.height, header.id],
                )?;
                if inserted > 0 && provisional {
                    conn.execute(
                        "INSERT INTO mtr.ergusd_provisional (height) VALUES (?)",
                        params![header.height],
                    )?;
                }
                written += inserted;
            }

            let mut day = None;
            for quote in &quotes {
                let start = quote.timestamp - quote.timestamp.rem_euclid(DAY_MS);
                // days cut by the lookback are incomplete
                if start < from || day == Some(start) {
                    continue;
                }
                day = Some(start);
                conn.execute(
                    "INSERT INTO mtr.ergusd_daily (timestamp, value)
                     SELECT ?, ?
                     WHERE NOT EXISTS (SELECT 1 FROM mtr.ergusd_daily WHERE timestamp = ?)",
                    params![start, quote.usd, start],
                )?;
            }
            Ok(written)
        })
    }

    fn pending_headers(&self) -> Result<Vec<PendingHeader>> {
        let settled = if self.settings.backfill {
            "SELECT max(height) FROM mtr.ergusd
             WHERE height NOT IN (SELECT height FROM mtr.ergusd_provisional)"
        } else {
            "SELECT max(height) FROM mtr.ergusd"
        };
        let floor: Option<Height> = self.db.query_one(settled, [], |row| row.get(0))?.flatten();
        let floor = floor.map_or(-1, Height::value);

        self.db.query_all(
            "SELECT height, id, timestamp FROM core.headers
             WHERE height > ?
             ORDER BY height
             LIMIT ?",
            params![floor, MAX_BLOCKS_PER_UPDATE],
            |row| {
                Ok(PendingHeader {
                    height: row.get(0)?,
                    id: row.get(1)?,
                    timestamp: row.get(2)?,
                })
            },
        )
    }
}

/// Run `feed` every `interval_secs` until shutdown.
pub fn spawn<Q: QuoteSource + 'static>(feed: PriceFeed<Q>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    let interval = Duration::from_secs(feed.settings.interval_secs);
    tokio::spawn(async move {
        info!("Price feed started");
        loop {
            match feed.update().await {
                Ok(0) => debug!("No new ERG/USD quotes"),
                Ok(n) => info!("Stored ERG/USD quotes for {} block(s)", n),
                Err(e) => warn!("Price update failed: {:#}", e),
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {}
            }
            if *shutdown.borrow() {
                info!("Price feed stopped");
                return;
            }
        }
    })
}
