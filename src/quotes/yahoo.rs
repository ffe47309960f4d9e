use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use serde::Deserialize;
use tracing::{debug, warn};

use super::{ExpiryListing, QuoteSource, get_json, lenient_f64};
use crate::error::{ErrorKind, FetchError};
use crate::model::{ChainEntry, OptionType};

const API_URL: &str = "https://query2.finance.yahoo.com/v7/finance/options";

/// Answers 404 but sets the session cookie the crumb is tied to.
const COOKIE_URL: &str = "https://fc.yahoo.com";
const CRUMB_URL: &str = "https://query2.finance.yahoo.com/v1/test/getcrumb";

// ── API response types ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct OptionsResponse {
    #[serde(rename = "optionChain")]
    option_chain: Option<OptionChain>,
    /// Error envelope used for throttling and bad symbols.
    finance: Option<FinanceEnvelope>,
}

#[derive(Debug, Deserialize)]
struct OptionChain {
    #[serde(default)]
    result: Vec<ChainResult>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct FinanceEnvelope {
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChainResult {
    #[serde(rename = "expirationDates", default)]
    expiration_dates: Vec<i64>,
    #[serde(default)]
    options: Vec<ExpiryBlock>,
}

#[derive(Debug, Deserialize)]
struct ExpiryBlock {
    #[serde(rename = "expirationDate")]
    expiration_date: Option<i64>,
    #[serde(default)]
    calls: Vec<RawContract>,
    #[serde(default)]
    puts: Vec<RawContract>,
}

#[derive(Debug, Deserialize)]
struct RawContract {
    #[serde(default, deserialize_with = "lenient_f64")]
    strike: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    bid: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    ask: Option<f64>,
    #[serde(rename = "lastPrice", default, deserialize_with = "lenient_f64")]
    last_price: Option<f64>,
}

// ── Source ───────────────────────────────────────────────────────────

/// Yahoo Finance options endpoint. One request lists expiries, one more per
/// expiry returns the chain.
///
/// Every data request carries a session crumb. The cookie and crumb are
/// fetched once and reused until Yahoo refuses them, after which the next
/// request starts a fresh session. The client must keep cookies.
pub struct YahooSource {
    client: reqwest::Client,
    crumb: Mutex<Option<String>>,
}

impl YahooSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            crumb: Mutex::new(None),
        }
    }

    async fn crumb(&self) -> Result<String, FetchError> {
        if let Some(crumb) = self.crumb.lock().ok().and_then(|c| c.clone()) {
            return Ok(crumb);
        }

        self.client.get(COOKIE_URL).send().await?;
        let resp = self.client.get(CRUMB_URL).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::from_status(status, "yahoo crumb"));
        }
        let body = resp.text().await?;
        let crumb = parse_crumb(&body)
            .ok_or_else(|| FetchError::other("yahoo crumb: unexpected response body"))?;

        debug!("opened yahoo session");
        if let Ok(mut cached) = self.crumb.lock() {
            *cached = Some(crumb.clone());
        }
        Ok(crumb)
    }

    fn forget_crumb(&self) {
        if let Ok(mut cached) = self.crumb.lock() {
            cached.take();
        }
    }

    async fn query(
        &self,
        underlying: &str,
        expiry: Option<NaiveDate>,
    ) -> Result<ChainResult, FetchError> {
        let crumb = self.crumb().await?;
        let url = format!("{API_URL}/{underlying}");
        let mut request = self.client.get(&url).query(&[("crumb", crumb.as_str())]);
        if let Some(expiry) = expiry {
            request = request.query(&[("date", expiry_epoch(expiry))]);
        }

        let result = get_json::<OptionsResponse>(request, &format!("yahoo {underlying}"))
            .await
            .and_then(|resp| into_result(resp, underlying));
        match &result {
            Err(e) if e.kind == ErrorKind::Unauthorized => {
                warn!(underlying, error = %e, "yahoo refused the session, renewing on next request");
                self.forget_crumb();
            }
            _ => {}
        }
        result
    }
}

#[async_trait]
impl QuoteSource for YahooSource {
    fn name(&self) -> &'static str {
        "yahoo"
    }

    async fn list_expiries(&self, underlying: &str) -> Result<ExpiryListing, FetchError> {
        let result = self.query(underlying, None).await?;
        let listing = expiry_listing(&result);
        debug!(underlying, count = listing.calls.len(), "listed expiries");
        Ok(listing)
    }

    async fn fetch_chain(
        &self,
        underlying: &str,
        expiry: NaiveDate,
    ) -> Result<Vec<ChainEntry>, FetchError> {
        let result = self.query(underlying, Some(expiry)).await?;
        Ok(chain_entries(underlying, expiry, result))
    }
}

// ── Internal helpers ─────────────────────────────────────────────────

/// Unwrap the envelope, surfacing in-body errors with a classified kind.
fn into_result(resp: OptionsResponse, underlying: &str) -> Result<ChainResult, FetchError> {
    let OptionsResponse {
        option_chain,
        finance,
    } = resp;
    let (results, chain_error) = match option_chain {
        Some(chain) => (chain.result, chain.error),
        None => (Vec::new(), None),
    };

    if let Some(err) = finance.and_then(|f| f.error).or(chain_error) {
        let code = err.code.as_deref().unwrap_or("");
        // Unknown symbol: the provider answered, there is just nothing to quote.
        if code.eq_ignore_ascii_case("Not Found") {
            return Ok(empty_result());
        }
        let text = format!(
            "yahoo {underlying}: {} {}",
            code,
            err.description.as_deref().unwrap_or("")
        );
        return Err(if code.eq_ignore_ascii_case("Too Many Requests") {
            FetchError::rate_limited(text)
        } else if code.eq_ignore_ascii_case("Unauthorized") {
            FetchError::new(ErrorKind::Unauthorized, text)
        } else {
            FetchError::other(text)
        });
    }

    Ok(results.into_iter().next().unwrap_or_else(empty_result))
}

/// The crumb endpoint answers with the bare token. Anything that looks like
/// markup or an error document is rejected.
fn parse_crumb(body: &str) -> Option<String> {
    let crumb = body.trim();
    let plausible = !crumb.is_empty()
        && crumb.len() <= 64
        && !crumb.chars().any(|c| c.is_whitespace() || matches!(c, '<' | '{' | '"'));
    plausible.then(|| crumb.to_string())
}

fn empty_result() -> ChainResult {
    ChainResult {
        expiration_dates: Vec::new(),
        options: Vec::new(),
    }
}

/// Yahoo lists one set of dates for calls and puts alike.
fn expiry_listing(result: &ChainResult) -> ExpiryListing {
    ExpiryListing::uniform(
        result
            .expiration_dates
            .iter()
            .filter_map(|&ts| epoch_to_date(ts))
            .collect(),
    )
}

fn chain_entries(underlying: &str, expiry: NaiveDate, result: ChainResult) -> Vec<ChainEntry> {
    let mut entries = Vec::new();
    for block in result.options {
        let block_expiry = block.expiration_date.and_then(epoch_to_date).unwrap_or(expiry);
        let sides = [
            (OptionType::Call, block.calls),
            (OptionType::Put, block.puts),
        ];
        for (option_type, contracts) in sides {
            for c in contracts {
                // A contract without a strike cannot be matched.
                let Some(strike) = c.strike else { continue };
                entries.push(ChainEntry {
                    underlying: underlying.to_string(),
                    expiry: block_expiry,
                    option_type,
                    strike,
                    bid: c.bid,
                    ask: c.ask,
                    last: c.last_price,
                });
            }
        }
    }
    entries
}

/// Yahoo keys expiries by midnight UTC of the expiration date.
fn expiry_epoch(expiry: NaiveDate) -> i64 {
    expiry
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or_default()
}

fn epoch_to_date(ts: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp(ts, 0).map(|dt| dt.date_naive())
}
