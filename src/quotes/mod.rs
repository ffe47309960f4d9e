pub mod cboe;
pub mod occ;
pub mod yahoo;

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::FetchError;
use crate::model::{ChainEntry, OptionType};

// ── Source trait ────────────────────────────────────────────────────

/// A delayed option-quote provider.
///
/// `Ok(vec![])` means the provider answered and has nothing; only `Err` is
/// treated as a fault worth retrying.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Expiries quoted for `underlying`.
    async fn list_expiries(&self, underlying: &str) -> Result<ExpiryListing, FetchError>;

    /// Every quoted contract (calls and puts) for one expiry.
    async fn fetch_chain(
        &self,
        underlying: &str,
        expiry: NaiveDate,
    ) -> Result<Vec<ChainEntry>, FetchError>;
}

/// Listed expiries for one underlying, per option type. Providers that do
/// not segregate by type report the same dates for both.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpiryListing {
    pub calls: Vec<NaiveDate>,
    pub puts: Vec<NaiveDate>,
}

impl ExpiryListing {
    pub fn uniform(mut expiries: Vec<NaiveDate>) -> Self {
        expiries.sort();
        expiries.dedup();
        Self {
            calls: expiries.clone(),
            puts: expiries,
        }
    }

    /// Build from (type, expiry) pairs, sorted and deduplicated.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (OptionType, NaiveDate)>) -> Self {
        let mut listing = ExpiryListing::default();
        for (option_type, expiry) in pairs {
            match option_type {
                OptionType::Call => listing.calls.push(expiry),
                OptionType::Put => listing.puts.push(expiry),
            }
        }
        for list in [&mut listing.calls, &mut listing.puts] {
            list.sort();
            list.dedup();
        }
        listing
    }

    pub fn for_type(&self, option_type: OptionType) -> &[NaiveDate] {
        match option_type {
            OptionType::Call => &self.calls,
            OptionType::Put => &self.puts,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty() && self.puts.is_empty()
    }
}

/// Which provider to query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SourceKind {
    /// Ticker-style chain API with expiry discovery.
    Yahoo,
    /// Symbol-encoded delayed-quote feed, one document per underlying.
    Cboe,
}

impl SourceKind {
    pub fn name(self) -> &'static str {
        match self {
            SourceKind::Yahoo => "yahoo",
            SourceKind::Cboe => "cboe",
        }
    }
}

/// HTTP client shared by every request of a run. Keeps cookies so session
/// handshakes (Yahoo's consent cookie) carry over to data requests.
pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .cookie_store(true)
        .user_agent("options-tracker/0.1")
        .build()
        .context("creating HTTP client")
}

pub fn build_source(kind: SourceKind, client: reqwest::Client) -> Box<dyn QuoteSource> {
    match kind {
        SourceKind::Yahoo => Box::new(yahoo::YahooSource::new(client)),
        SourceKind::Cboe => Box::new(cboe::CboeSource::new(client)),
    }
}

// ── Payload helpers ─────────────────────────────────────────────────

/// Decode a numeric field that upstream may send as a number, a numeric
/// string, null, or garbage. Anything non-finite becomes `None`.
pub(crate) fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(coerce_f64))
}

fn coerce_f64(value: &Value) -> Option<f64> {
    let x = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    x.is_finite().then_some(x)
}

/// Send a GET and decode JSON, mapping non-2xx statuses to a classified error.
pub(crate) async fn get_json<T>(request: reqwest::RequestBuilder, what: &str) -> Result<T, FetchError>
where
    T: for<'de> Deserialize<'de>,
{
    let resp = request.send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(FetchError::from_status(status, what));
    }
    resp.json::<T>()
        .await
        .map_err(|e| FetchError::other(format!("{what}: decoding response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Quote {
        #[serde(default, deserialize_with = "lenient_f64")]
        bid: Option<f64>,
    }

    fn bid(json: &str) -> Option<f64> {
        serde_json::from_str::<Quote>(json).unwrap().bid
    }

    #[test]
    fn test_lenient_f64() {
        assert_eq!(bid(r#"{"bid": 1.25}"#), Some(1.25));
        assert_eq!(bid(r#"{"bid": "1.25"}"#), Some(1.25));
        assert_eq!(bid(r#"{"bid": 3}"#), Some(3.0));
        assert_eq!(bid(r#"{"bid": null}"#), None);
        assert_eq!(bid(r#"{"bid": "-"}"#), None);
        assert_eq!(bid(r#"{"bid": "NaN"}"#), None);
        assert_eq!(bid(r#"{"bid": [1]}"#), None);
        assert_eq!(bid(r#"{}"#), None);
    }
}
