use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::{Duration, NaiveDate};

use crate::ledger::{HistoryRow, Ledger, PortfolioRow};

/// Days back the return comparison looks.
pub const LOOKBACK_DAYS: i64 = 7;

/// Headline numbers and leaders from the recorded series.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub latest: PortfolioRow,
    pub return_pct: f64,
    /// Change in return % against the most recent snapshot at least
    /// `LOOKBACK_DAYS` older. `None` until the history is that long.
    pub return_change: Option<f64>,
    pub positions_date: Option<NaiveDate>,
    pub top: Vec<HistoryRow>,
}

pub fn return_pct(row: &PortfolioRow) -> f64 {
    if row.total_cost_basis > 0.0 {
        row.total_pnl / row.total_cost_basis * 100.0
    } else {
        0.0
    }
}

/// `None` when nothing has been recorded yet.
pub fn summarize(portfolio: &[PortfolioRow], history: &[HistoryRow], top: usize) -> Option<Summary> {
    let latest = portfolio.iter().max_by_key(|r| r.date)?.clone();
    let current = return_pct(&latest);

    let cutoff = latest.date - Duration::days(LOOKBACK_DAYS);
    let return_change = portfolio
        .iter()
        .filter(|r| r.date <= cutoff)
        .max_by_key(|r| r.date)
        .map(|prev| current - return_pct(prev));

    let positions_date = history.iter().map(|r| r.date).max();
    let mut leaders: Vec<HistoryRow> = history
        .iter()
        .filter(|r| Some(r.date) == positions_date)
        .cloned()
        .collect();
    leaders.sort_by(|a, b| b.pnl.total_cmp(&a.pnl));
    leaders.truncate(top);

    Some(Summary {
        latest,
        return_pct: current,
        return_change,
        positions_date,
        top: leaders,
    })
}

/// Entry point for the `summary` command.
pub fn run(data_dir: &Path, top: usize) -> Result<()> {
    if !data_dir.is_dir() {
        bail!(
            "No ledger at {}. Run the tracker first.",
            data_dir.display()
        );
    }
    let ledger = Ledger::existing(data_dir)
        .with_context(|| format!("opening ledger at {}", data_dir.display()))?;
    let portfolio = ledger.load_portfolio().context("reading portfolio series")?;
    let history = ledger.load_history().context("reading position history")?;

    let Some(summary) = summarize(&portfolio, &history, top) else {
        println!("No snapshots recorded yet.");
        return Ok(());
    };

    println!("=== options-tracker summary ({}) ===", summary.latest.date);
    println!("Total value:  {:.2}", summary.latest.total_value);
    println!("Cost basis:   {:.2}", summary.latest.total_cost_basis);
    println!("Total P&L:    {:.2}", summary.latest.total_pnl);
    match summary.return_change {
        Some(change) => println!(
            "Return:       {:.2}% ({:+.2} pts vs {LOOKBACK_DAYS}d)",
            summary.return_pct, change
        ),
        None => println!("Return:       {:.2}%", summary.return_pct),
    }

    if let Some(date) = summary.positions_date {
        println!();
        println!("── Positions {date} (top {} by P&L) ──", summary.top.len());
        println!(
            "  {:<28} {:>9} {:>9} {:>11} {:>11} {:>8}",
            "Symbol", "Contracts", "Price", "Value", "P&L", "P&L %"
        );
        for r in &summary.top {
            println!(
                "  {:<28} {:>9} {:>9.2} {:>11.2} {:>11.2} {:>7.2}%",
                r.symbol_key, r.contracts, r.price, r.value, r.pnl, r.pnl_pct
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OptionType;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn snapshot(d: &str, cost: f64, pnl: f64) -> PortfolioRow {
        PortfolioRow {
            date: date(d),
            total_value: cost + pnl,
            total_cost_basis: cost,
            total_pnl: pnl,
        }
    }

    fn row(d: &str, key: &str, pnl: f64) -> HistoryRow {
        HistoryRow {
            date: date(d),
            symbol_key: key.to_string(),
            underlying: "AAPL".to_string(),
            expiry: date("2025-09-19"),
            option_type: OptionType::Call,
            strike: 200.0,
            contracts: 1,
            cost_per_contract: 1.0,
            price: 1.0,
            value: 100.0,
            pnl,
            pnl_pct: pnl,
        }
    }

    #[test]
    fn test_empty_ledger() {
        assert!(summarize(&[], &[], 12).is_none());
    }

    #[test]
    fn test_run_leaves_data_dir_untouched() {
        let dir = tempfile::tempdir().unwrap();
        run(dir.path(), 12).unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        let missing = dir.path().join("data");
        assert!(run(&missing, 12).is_err());
        assert!(!missing.exists());
    }

    #[test]
    fn test_return_and_lookback() {
        let portfolio = vec![
            snapshot("2025-06-01", 1000.0, 50.0),
            snapshot("2025-06-03", 1000.0, 80.0),
            snapshot("2025-06-10", 1000.0, 200.0),
            snapshot("2025-06-08", 1000.0, 120.0),
        ];
        let summary = summarize(&portfolio, &[], 12).unwrap();
        assert_eq!(summary.latest.date, date("2025-06-10"));
        assert!((summary.return_pct - 20.0).abs() < 1e-9);
        // Cutoff 2025-06-03 is inclusive: 20% - 8%
        assert!((summary.return_change.unwrap() - 12.0).abs() < 1e-9);
        assert!(summary.top.is_empty());
        assert_eq!(summary.positions_date, None);
    }

    #[test]
    fn test_no_lookback_yet_and_zero_cost() {
        let portfolio = vec![snapshot("2025-06-01", 0.0, 0.0), snapshot("2025-06-05", 0.0, -10.0)];
        let summary = summarize(&portfolio, &[], 12).unwrap();
        assert_eq!(summary.return_pct, 0.0);
        assert_eq!(summary.return_change, None);
    }

    #[test]
    fn test_top_positions_latest_day_only() {
        let portfolio = vec![snapshot("2025-06-02", 100.0, 0.0)];
        let history = vec![
            row("2025-06-01", "OLD", 999.0),
            row("2025-06-02", "A", -5.0),
            row("2025-06-02", "B", 30.0),
            row("2025-06-02", "C", 10.0),
        ];
        let summary = summarize(&portfolio, &history, 2).unwrap();
        let keys: Vec<&str> = summary.top.iter().map(|r| r.symbol_key.as_str()).collect();
        assert_eq!(keys, vec!["B", "C"]);
        assert_eq!(summary.positions_date, Some(date("2025-06-02")));
    }
}
