use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Call or put.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    Call,
    Put,
}

impl OptionType {
    /// Single-letter flag used in symbol keys and OCC-style symbols.
    pub fn flag(self) -> char {
        match self {
            OptionType::Call => 'C',
            OptionType::Put => 'P',
        }
    }

    pub fn from_flag(c: char) -> Option<Self> {
        match c {
            'C' | 'c' => Some(OptionType::Call),
            'P' | 'p' => Some(OptionType::Put),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OptionType::Call => "call",
            OptionType::Put => "put",
        }
    }
}

impl fmt::Display for OptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts "call"/"put" and any prefix abbreviation ("c", "P", "Calls").
impl FromStr for OptionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        if lower.starts_with('c') {
            Ok(OptionType::Call)
        } else if lower.starts_with('p') {
            Ok(OptionType::Put)
        } else {
            Err(format!("unknown option type `{s}` (expected call or put)"))
        }
    }
}

/// A user-declared option position. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub underlying: String,
    pub expiry: NaiveDate,
    pub option_type: OptionType,
    pub strike: f64,
    /// Signed: positive is long, negative is short.
    pub contracts: i64,
    pub cost_per_contract: f64,
}

impl Position {
    /// Human-readable identity, e.g. `AAPL 2025-09-19 C 200`.
    ///
    /// Whole strikes print without a fractional part; anything else keeps
    /// its shortest decimal form (`MSFT 2025-06-20 P 412.5`).
    pub fn symbol_key(&self) -> String {
        format!(
            "{} {} {} {}",
            self.underlying,
            self.expiry.format("%Y-%m-%d"),
            self.option_type.flag(),
            format_strike(self.strike)
        )
    }

    /// Cost basis of the whole position (`cost_per_contract × contracts × 100`).
    pub fn cost_basis(&self) -> f64 {
        self.cost_per_contract * self.contracts as f64 * 100.0
    }
}

fn format_strike(strike: f64) -> String {
    if strike.fract() == 0.0 {
        format!("{strike:.0}")
    } else {
        format!("{strike}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(strike: f64) -> Position {
        Position {
            underlying: "AAPL".to_string(),
            expiry: NaiveDate::from_ymd_opt(2025, 9, 19).unwrap(),
            option_type: OptionType::Call,
            strike,
            contracts: 2,
            cost_per_contract: 3.5,
        }
    }

    #[test]
    fn test_symbol_key() {
        assert_eq!(position(200.0).symbol_key(), "AAPL 2025-09-19 C 200");
        assert_eq!(position(412.5).symbol_key(), "AAPL 2025-09-19 C 412.5");
    }

    #[test]
    fn test_option_type_abbreviations() {
        assert_eq!("call".parse::<OptionType>().unwrap(), OptionType::Call);
        assert_eq!("C".parse::<OptionType>().unwrap(), OptionType::Call);
        assert_eq!(" Puts ".parse::<OptionType>().unwrap(), OptionType::Put);
        assert!("straddle".parse::<OptionType>().is_err());
    }

    #[test]
    fn test_cost_basis_is_signed() {
        let mut pos = position(200.0);
        assert_eq!(pos.cost_basis(), 700.0);
        pos.contracts = -1;
        assert_eq!(pos.cost_basis(), -350.0);
    }
}
