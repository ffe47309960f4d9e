use chrono::NaiveDate;

use super::position::OptionType;

/// One quoted contract from an upstream chain. Missing or non-numeric
/// upstream fields are `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainEntry {
    pub underlying: String,
    pub expiry: NaiveDate,
    pub option_type: OptionType,
    pub strike: f64,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub last: Option<f64>,
}

/// The chain entry chosen for a position, with what was asked for.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedQuote {
    pub entry: ChainEntry,
    pub requested_expiry: NaiveDate,
    pub requested_strike: f64,
}

impl ResolvedQuote {
    pub fn expiry_exact(&self) -> bool {
        self.entry.expiry == self.requested_expiry
    }

    pub fn strike_distance(&self) -> f64 {
        (self.entry.strike - self.requested_strike).abs()
    }
}
