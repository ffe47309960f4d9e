use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::debug;

use super::{ExpiryListing, QuoteSource, lenient_f64, occ};
use crate::error::FetchError;
use crate::model::ChainEntry;

const API_URL: &str = "https://cdn.cboe.com/api/global/delayed_quotes/options";

/// Cash-settled indices are published under an underscore-prefixed name.
const INDEX_SYMBOLS: &[&str] = &["SPX", "XSP", "NDX", "RUT", "VIX", "DJX", "OEX"];

// ── API response types ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct FeedResponse {
    data: Option<FeedData>,
}

#[derive(Debug, Deserialize)]
struct FeedData {
    #[serde(default)]
    options: Vec<FeedOption>,
}

#[derive(Debug, Deserialize)]
struct FeedOption {
    /// Fixed-width contract symbol, e.g. `AAPL250620C00200000`.
    option: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    bid: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    ask: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    last_trade_price: Option<f64>,
}

// ── Source ───────────────────────────────────────────────────────────

/// CBOE delayed-quote feed. The whole book for an underlying arrives in one
/// document, so expiry discovery and chain lookups share a single request
/// per underlying per run.
pub struct CboeSource {
    client: reqwest::Client,
    books: Mutex<HashMap<String, Vec<ChainEntry>>>,
}

impl CboeSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            books: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, underlying: &str) -> Option<Vec<ChainEntry>> {
        self.books
            .lock()
            .ok()
            .and_then(|books| books.get(underlying).cloned())
    }

    async fn book(&self, underlying: &str) -> Result<Vec<ChainEntry>, FetchError> {
        if let Some(entries) = self.cached(underlying) {
            return Ok(entries);
        }

        let url = format!("{API_URL}/{}.json", feed_symbol(underlying));
        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        let entries = if status == reqwest::StatusCode::NOT_FOUND {
            Vec::new()
        } else if !status.is_success() {
            return Err(FetchError::from_status(status, &format!("cboe {underlying}")));
        } else {
            let feed: FeedResponse = resp
                .json()
                .await
                .map_err(|e| FetchError::other(format!("cboe {underlying}: decoding feed: {e}")))?;
            decode_feed(underlying, feed)
        };

        if let Ok(mut books) = self.books.lock() {
            books.insert(underlying.to_string(), entries.clone());
        }
        Ok(entries)
    }
}

#[async_trait]
impl QuoteSource for CboeSource {
    fn name(&self) -> &'static str {
        "cboe"
    }

    async fn list_expiries(&self, underlying: &str) -> Result<ExpiryListing, FetchError> {
        let book = self.book(underlying).await?;
        Ok(ExpiryListing::from_pairs(
            book.iter().map(|e| (e.option_type, e.expiry)),
        ))
    }

    async fn fetch_chain(
        &self,
        underlying: &str,
        expiry: NaiveDate,
    ) -> Result<Vec<ChainEntry>, FetchError> {
        let book = self.book(underlying).await?;
        Ok(book.into_iter().filter(|e| e.expiry == expiry).collect())
    }
}

// ── Internal helpers ─────────────────────────────────────────────────

fn feed_symbol(underlying: &str) -> String {
    if INDEX_SYMBOLS.contains(&underlying) {
        format!("_{underlying}")
    } else {
        underlying.to_string()
    }
}

/// Decode every feed row; rows whose symbol fails the grammar are dropped.
fn decode_feed(underlying: &str, feed: FeedResponse) -> Vec<ChainEntry> {
    let rows = feed.data.map(|d| d.options).unwrap_or_default();
    let total = rows.len();

    let entries: Vec<ChainEntry> = rows
        .into_iter()
        .filter_map(|row| {
            let sym = occ::decode(row.option.as_deref()?)?;
            Some(ChainEntry {
                underlying: underlying.to_string(),
                expiry: sym.expiry,
                option_type: sym.option_type,
                strike: sym.strike,
                bid: row.bid,
                ask: row.ask,
                last: row.last_trade_price,
            })
        })
        .collect();

    if entries.len() < total {
        debug!(
            underlying,
            dropped = total - entries.len(),
            "discarded malformed feed rows"
        );
    }
    entries
}
