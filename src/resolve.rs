//! Nearest-match contract resolution.
//!
//! A declared contract often does not exist verbatim upstream: the expiry
//! rolled, the strike is quoted at a slightly different increment, or the
//! provider rounds. Resolution picks the closest real contract in two
//! stages (expiry, then strike) and never fails while any candidate exists.

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::model::{ChainEntry, OptionType, Position, ResolvedQuote};

/// Strike differences up to this are rounding noise, not a mismatch.
pub const STRIKE_TOLERANCE: f64 = 0.02;

/// Pick the available expiry closest to `requested` in calendar days.
/// Exact matches win; equal distances go to the earlier date.
pub fn resolve_expiry(requested: NaiveDate, available: &[NaiveDate]) -> Option<NaiveDate> {
    available
        .iter()
        .copied()
        .min_by_key(|d| ((*d - requested).num_days().abs(), *d))
}

/// Every available expiry, nearest first, ordered the same way as
/// `resolve_expiry` so the head of the list is its answer.
pub fn expiries_by_distance(requested: NaiveDate, available: &[NaiveDate]) -> Vec<NaiveDate> {
    let mut ordered = available.to_vec();
    ordered.sort_by_key(|d| ((*d - requested).num_days().abs(), *d));
    ordered.dedup();
    ordered
}

/// Pick the entry of `option_type` whose strike is closest to `requested`.
/// Candidates are scanned in ascending strike order, so a tie goes to the
/// lower strike.
pub fn resolve_strike(
    requested: f64,
    option_type: OptionType,
    entries: &[ChainEntry],
) -> Option<&ChainEntry> {
    let mut candidates: Vec<&ChainEntry> = entries
        .iter()
        .filter(|e| e.option_type == option_type && e.strike.is_finite())
        .collect();
    candidates.sort_by(|a, b| a.strike.total_cmp(&b.strike));

    let mut best: Option<&ChainEntry> = None;
    for entry in candidates {
        let distance = (entry.strike - requested).abs();
        match best {
            Some(b) if (b.strike - requested).abs() <= distance => {}
            _ => best = Some(entry),
        }
    }
    best
}

/// Resolve a position against a chain already narrowed to one expiry.
/// Logs when the expiry moved or the strike is off by more than the tolerance.
pub fn resolve_in_chain(position: &Position, chain: &[ChainEntry]) -> Option<ResolvedQuote> {
    let entry = resolve_strike(position.strike, position.option_type, chain)?;
    let quote = ResolvedQuote {
        entry: entry.clone(),
        requested_expiry: position.expiry,
        requested_strike: position.strike,
    };

    if !quote.expiry_exact() {
        info!(
            position = %position.symbol_key(),
            resolved_expiry = %quote.entry.expiry,
            "expiry not listed, using nearest"
        );
    }
    if quote.strike_distance() > STRIKE_TOLERANCE {
        warn!(
            position = %position.symbol_key(),
            resolved_strike = quote.entry.strike,
            distance = quote.strike_distance(),
            "strike not listed, using nearest"
        );
    }
    Some(quote)
}

/// Both stages against a full book for one underlying (all expiries).
pub fn resolve(position: &Position, book: &[ChainEntry]) -> Option<ResolvedQuote> {
    let mut expiries: Vec<NaiveDate> = book
        .iter()
        .filter(|e| e.option_type == position.option_type)
        .map(|e| e.expiry)
        .collect();
    expiries.sort();
    expiries.dedup();

    let expiry = resolve_expiry(position.expiry, &expiries)?;
    let chain: Vec<ChainEntry> = book.iter().filter(|e| e.expiry == expiry).cloned().collect();
    resolve_in_chain(position, &chain)
}
