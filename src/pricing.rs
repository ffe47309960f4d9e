//! Mark price derivation and position valuation.
//!
//! The mark is the bid/ask midpoint less a flat $0.05 haircut, falling back
//! to the last trade less the same haircut when either side of the book is
//! missing. Quotes are delayed, so this is a conservative liquidation
//! estimate rather than a market-accurate valuation.

use crate::model::{Position, PricedPosition, ResolvedQuote};

/// Flat deduction applied to every mark.
pub const MARK_HAIRCUT: f64 = 0.05;

/// Option contract multiplier.
pub const CONTRACT_MULTIPLIER: f64 = 100.0;

/// Derive a mark price from bid/ask/last. Never negative, rounded to cents.
pub fn mark(bid: Option<f64>, ask: Option<f64>, last: Option<f64>) -> f64 {
    let px = match (usable(bid), usable(ask), usable(last)) {
        (Some(bid), Some(ask), _) => (bid + ask) / 2.0 - MARK_HAIRCUT,
        (_, _, Some(last)) => last - MARK_HAIRCUT,
        _ => return 0.0,
    };
    round2(px.max(0.0))
}

/// Value a position against its resolved quote. No quote prices at zero,
/// which books the full cost basis as a loss.
pub fn price_position(position: &Position, quote: Option<ResolvedQuote>) -> PricedPosition {
    let price = quote
        .as_ref()
        .map(|q| mark(q.entry.bid, q.entry.ask, q.entry.last))
        .unwrap_or(0.0);

    let value = price * position.contracts as f64 * CONTRACT_MULTIPLIER;
    let cost_basis = position.cost_basis();
    let pnl = value - cost_basis;
    let pnl_pct = if cost_basis > 0.0 {
        pnl / cost_basis * 100.0
    } else {
        0.0
    };

    PricedPosition {
        position: position.clone(),
        quote,
        price,
        value,
        cost_basis,
        pnl,
        pnl_pct,
    }
}

/// Round half away from zero to two decimals.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn usable(x: Option<f64>) -> Option<f64> {
    x.filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::model::{ChainEntry, OptionType};

    fn position(contracts: i64, cost: f64) -> Position {
        Position {
            underlying: "SPY".to_string(),
            expiry: NaiveDate::from_ymd_opt(2025, 12, 19).unwrap(),
            option_type: OptionType::Put,
            strike: 500.0,
            contracts,
            cost_per_contract: cost,
        }
    }

    fn quote(bid: Option<f64>, ask: Option<f64>, last: Option<f64>) -> ResolvedQuote {
        let expiry = NaiveDate::from_ymd_opt(2025, 12, 19).unwrap();
        ResolvedQuote {
            entry: ChainEntry {
                underlying: "SPY".to_string(),
                expiry,
                option_type: OptionType::Put,
                strike: 500.0,
                bid,
                ask,
                last,
            },
            requested_expiry: expiry,
            requested_strike: 500.0,
        }
    }

    #[test]
    fn test_mark_midpoint_path() {
        assert_eq!(mark(Some(1.00), Some(1.20), Some(5.00)), 1.05);
    }

    #[test]
    fn test_mark_last_fallback() {
        assert_eq!(mark(None, None, Some(2.00)), 1.95);
        // One-sided book also falls back to last
        assert_eq!(mark(Some(1.00), None, Some(2.00)), 1.95);
        assert_eq!(mark(Some(f64::NAN), Some(1.0), Some(2.00)), 1.95);
    }

    #[test]
    fn test_mark_nothing_usable() {
        assert_eq!(mark(None, None, None), 0.0);
        assert_eq!(mark(None, None, Some(f64::NAN)), 0.0);
    }

    #[test]
    fn test_mark_floored_at_zero() {
        assert_eq!(mark(Some(0.00), Some(0.02), None), 0.0);
        assert_eq!(mark(None, None, Some(0.01)), 0.0);
    }

    #[test]
    fn test_price_position_arithmetic() {
        let pos = position(3, 2.00);
        let priced = price_position(&pos, Some(quote(Some(2.40), Some(2.60), None)));
        assert_eq!(priced.price, 2.45);
        assert_eq!(priced.value, 2.45 * 3.0 * 100.0);
        assert_eq!(priced.cost_basis, 600.0);
        assert_eq!(priced.pnl, priced.value - priced.cost_basis);
        assert!((priced.pnl_pct - 22.5).abs() < 1e-9);
    }

    #[test]
    fn test_price_position_without_quote_is_full_loss() {
        let pos = position(2, 1.50);
        let priced = price_position(&pos, None);
        assert_eq!(priced.price, 0.0);
        assert_eq!(priced.value, 0.0);
        assert_eq!(priced.pnl, -300.0);
        assert_eq!(priced.pnl_pct, -100.0);
    }

    #[test]
    fn test_pnl_pct_zero_for_non_positive_basis() {
        // Short position: negative cost basis
        let priced = price_position(&position(-1, 1.00), Some(quote(None, None, Some(0.55))));
        assert!(priced.cost_basis < 0.0);
        assert_eq!(priced.pnl_pct, 0.0);

        let free = price_position(&position(1, 0.0), Some(quote(None, None, Some(0.55))));
        assert_eq!(free.pnl_pct, 0.0);
    }
}
