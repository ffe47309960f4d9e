//! Fixed-width option symbol decoding: `ROOT YYMMDD C|P SSSSSSSS`.
//!
//! The strike field is the strike × 1000, zero padded to 8 digits, so
//! `AAPL250620C00200000` is the AAPL 2025-06-20 200 call. Roots may be
//! space padded (`SPY   251219P00500000`).

use chrono::NaiveDate;

use crate::model::OptionType;

/// Length of the `YYMMDD` + flag + strike tail.
const TAIL_LEN: usize = 15;

#[derive(Debug, Clone, PartialEq)]
pub struct OccSymbol {
    pub root: String,
    pub expiry: NaiveDate,
    pub option_type: OptionType,
    pub strike: f64,
}

/// Decode one symbol. `None` for anything that does not fit the grammar,
/// including impossible calendar dates.
pub fn decode(symbol: &str) -> Option<OccSymbol> {
    let symbol = symbol.trim();
    if !symbol.is_ascii() || symbol.len() <= TAIL_LEN {
        return None;
    }

    let (root, tail) = symbol.split_at(symbol.len() - TAIL_LEN);
    let root = root.trim_end();
    if root.is_empty() || !root.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }

    let date = &tail[0..6];
    let flag = tail[6..7].chars().next()?;
    let strike = &tail[7..];
    if !date.bytes().all(|b| b.is_ascii_digit()) || !strike.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let year = 2000 + date[0..2].parse::<i32>().ok()?;
    let month = date[2..4].parse::<u32>().ok()?;
    let day = date[4..6].parse::<u32>().ok()?;
    let expiry = NaiveDate::from_ymd_opt(year, month, day)?;

    let option_type = OptionType::from_flag(flag)?;
    let strike = strike.parse::<u64>().ok()? as f64 / 1000.0;

    Some(OccSymbol {
        root: root.to_string(),
        expiry,
        option_type,
        strike,
    })
}
