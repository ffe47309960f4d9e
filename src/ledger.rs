//! Append-only daily ledger: `history.csv` (one row per position per day)
//! and `portfolio.csv` (one row per day), plus `last_run.txt`.
//!
//! A commit drops every existing row for the run date from both series and
//! appends the new ones, so re-running a day converges on the latest run.
//! Rows of other dates are copied through untouched. Each series is staged
//! in a temp file next to the target and swapped in with `rename`; both
//! temp files are complete before either swap.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::{OptionType, PortfolioSnapshot, PricedPosition};
use crate::pricing::round2;

pub const HISTORY_FILE: &str = "history.csv";
pub const PORTFOLIO_FILE: &str = "portfolio.csv";
pub const LAST_RUN_FILE: &str = "last_run.txt";

pub const HISTORY_HEADER: [&str; 12] = [
    "date",
    "symbolKey",
    "underlying",
    "expiry",
    "type",
    "strike",
    "contracts",
    "cost_per_contract",
    "price",
    "value",
    "pnl",
    "pnl_pct",
];

pub const PORTFOLIO_HEADER: [&str; 4] = ["date", "total_value", "total_cost_basis", "total_pnl"];

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("{path} has header `{found}`, expected `{expected}`")]
    SchemaMismatch {
        path: PathBuf,
        found: String,
        expected: String,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> LedgerError + '_ {
    move |source| LedgerError::Io {
        path: path.to_path_buf(),
        source,
    }
}

// ── Row types ───────────────────────────────────────────────────────

/// One position on one date. Field order is the column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRow {
    pub date: NaiveDate,
    #[serde(rename = "symbolKey")]
    pub symbol_key: String,
    pub underlying: String,
    pub expiry: NaiveDate,
    #[serde(rename = "type", deserialize_with = "option_type_any")]
    pub option_type: OptionType,
    #[serde(serialize_with = "two_dp")]
    pub strike: f64,
    pub contracts: i64,
    #[serde(serialize_with = "two_dp")]
    pub cost_per_contract: f64,
    #[serde(serialize_with = "two_dp")]
    pub price: f64,
    #[serde(serialize_with = "two_dp")]
    pub value: f64,
    #[serde(serialize_with = "two_dp")]
    pub pnl: f64,
    #[serde(serialize_with = "two_dp")]
    pub pnl_pct: f64,
}

impl HistoryRow {
    pub fn from_priced(date: NaiveDate, priced: &PricedPosition) -> Self {
        let pos = &priced.position;
        HistoryRow {
            date,
            symbol_key: pos.symbol_key(),
            underlying: pos.underlying.clone(),
            expiry: pos.expiry,
            option_type: pos.option_type,
            strike: pos.strike,
            contracts: pos.contracts,
            cost_per_contract: pos.cost_per_contract,
            price: priced.price,
            value: priced.value,
            pnl: priced.pnl,
            pnl_pct: priced.pnl_pct,
        }
    }
}

/// Portfolio totals on one date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioRow {
    pub date: NaiveDate,
    #[serde(serialize_with = "two_dp")]
    pub total_value: f64,
    #[serde(serialize_with = "two_dp")]
    pub total_cost_basis: f64,
    #[serde(serialize_with = "two_dp")]
    pub total_pnl: f64,
}

impl PortfolioRow {
    pub fn from_snapshot(date: NaiveDate, snapshot: &PortfolioSnapshot) -> Self {
        PortfolioRow {
            date,
            total_value: snapshot.total_value,
            total_cost_basis: snapshot.total_cost_basis,
            total_pnl: snapshot.total_pnl,
        }
    }
}

/// Fixed two-decimal rendering. Negative zero prints as `0.00`.
fn two_dp<S: Serializer>(x: &f64, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format!("{:.2}", round2(*x) + 0.0))
}

/// Accept every spelling the position file accepts (`call`, `c`, `PUT`, ...).
fn option_type_any<'de, D: Deserializer<'de>>(d: D) -> Result<OptionType, D::Error> {
    let s = String::deserialize(d)?;
    s.parse().map_err(serde::de::Error::custom)
}

// ── Ledger ──────────────────────────────────────────────────────────

pub struct Ledger {
    dir: PathBuf,
}

impl Ledger {
    /// Open the ledger directory, creating it and any missing series with
    /// just a header row.
    pub fn open(dir: &Path) -> Result<Self, LedgerError> {
        fs::create_dir_all(dir).map_err(io_err(dir))?;
        let ledger = Ledger {
            dir: dir.to_path_buf(),
        };
        ensure_header(&ledger.history_path(), &HISTORY_HEADER)?;
        ensure_header(&ledger.portfolio_path(), &PORTFOLIO_HEADER)?;
        Ok(ledger)
    }

    /// Attach to an existing ledger directory without creating anything.
    /// Missing series read as empty.
    pub fn existing(dir: &Path) -> Result<Self, LedgerError> {
        if !dir.is_dir() {
            return Err(LedgerError::Io {
                path: dir.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
            });
        }
        Ok(Ledger {
            dir: dir.to_path_buf(),
        })
    }

    pub fn history_path(&self) -> PathBuf {
        self.dir.join(HISTORY_FILE)
    }

    pub fn portfolio_path(&self) -> PathBuf {
        self.dir.join(PORTFOLIO_FILE)
    }

    pub fn last_run_path(&self) -> PathBuf {
        self.dir.join(LAST_RUN_FILE)
    }

    /// Replace everything recorded for `date` with `positions` and `snapshot`.
    pub fn commit(
        &self,
        date: NaiveDate,
        positions: &[PricedPosition],
        snapshot: &PortfolioSnapshot,
    ) -> Result<(), LedgerError> {
        let history: Vec<HistoryRow> = positions
            .iter()
            .map(|p| HistoryRow::from_priced(date, p))
            .collect();
        let portfolio = [PortfolioRow::from_snapshot(date, snapshot)];

        let history_path = self.history_path();
        let portfolio_path = self.portfolio_path();

        let history_tmp = stage(&history_path, &HISTORY_HEADER, date, &history)?;
        let portfolio_tmp = match stage(&portfolio_path, &PORTFOLIO_HEADER, date, &portfolio) {
            Ok(tmp) => tmp,
            Err(e) => {
                let _ = fs::remove_file(&history_tmp);
                return Err(e);
            }
        };

        swap_in(&[(history_tmp, history_path), (portfolio_tmp, portfolio_path)])?;

        info!(
            %date,
            rows = history.len(),
            dir = %self.dir.display(),
            "ledger committed"
        );
        Ok(())
    }

    /// Overwrite the last-successful-run marker.
    pub fn record_last_run(&self, at: DateTime<Utc>) -> Result<(), LedgerError> {
        let path = self.last_run_path();
        fs::write(&path, at.to_rfc3339()).map_err(io_err(&path))
    }

    pub fn load_history(&self) -> Result<Vec<HistoryRow>, LedgerError> {
        load_rows(&self.history_path(), &HISTORY_HEADER)
    }

    pub fn load_portfolio(&self) -> Result<Vec<PortfolioRow>, LedgerError> {
        load_rows(&self.portfolio_path(), &PORTFOLIO_HEADER)
    }
}

// ── Internal helpers ────────────────────────────────────────────────

fn ensure_header(path: &Path, header: &[&str]) -> Result<(), LedgerError> {
    if path.exists() {
        return Ok(());
    }
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(header)?;
    wtr.flush().map_err(io_err(path))?;
    debug!(path = %path.display(), "created ledger series");
    Ok(())
}

/// Open `path` and check its header. `None` when the file is missing or empty.
fn open_checked(
    path: &Path,
    header: &[&str],
) -> Result<Option<csv::Reader<fs::File>>, LedgerError> {
    if !path.exists() {
        return Ok(None);
    }
    let mut rdr = csv::Reader::from_path(path)?;
    let found = rdr.headers()?.clone();
    if found.is_empty() {
        return Ok(None);
    }
    if found.iter().ne(header.iter().copied()) {
        return Err(LedgerError::SchemaMismatch {
            path: path.to_path_buf(),
            found: found.iter().collect::<Vec<_>>().join(","),
            expected: header.join(","),
        });
    }
    Ok(Some(rdr))
}

/// Write `path` minus the rows of `date`, plus `rows`, to a sibling temp
/// file. Returns the temp path; the caller renames it into place.
fn stage<T: Serialize>(
    path: &Path,
    header: &[&str],
    date: NaiveDate,
    rows: &[T],
) -> Result<PathBuf, LedgerError> {
    let date_key = date.format("%Y-%m-%d").to_string();

    let mut kept = Vec::new();
    let mut dropped = 0usize;
    if let Some(mut rdr) = open_checked(path, header)? {
        for record in rdr.records() {
            let record = record?;
            if record.get(0) == Some(date_key.as_str()) {
                dropped += 1;
            } else {
                kept.push(record);
            }
        }
    }
    if dropped > 0 {
        debug!(path = %path.display(), dropped, date = %date_key, "replacing same-day rows");
    }

    let tmp = path.with_extension("csv.tmp");
    let result = (|| -> Result<(), LedgerError> {
        let mut wtr = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(&tmp)?;
        wtr.write_record(header)?;
        for record in &kept {
            wtr.write_record(record)?;
        }
        for row in rows {
            wtr.serialize(row)?;
        }
        wtr.flush().map_err(io_err(&tmp))?;
        Ok(())
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(tmp)
}

/// Rename each staged `(tmp, target)` pair in order. On the first failure
/// the remaining temp files are removed.
fn swap_in(staged: &[(PathBuf, PathBuf)]) -> Result<(), LedgerError> {
    for (i, (tmp, target)) in staged.iter().enumerate() {
        if let Err(source) = fs::rename(tmp, target) {
            for (rest, _) in &staged[i..] {
                let _ = fs::remove_file(rest);
            }
            if i > 0 {
                warn!(
                    path = %target.display(),
                    "swap failed after earlier series were replaced; ledger series disagree until the next run of this date"
                );
            }
            return Err(LedgerError::Io {
                path: target.clone(),
                source,
            });
        }
    }
    Ok(())
}

fn load_rows<T>(path: &Path, header: &[&str]) -> Result<Vec<T>, LedgerError>
where
    T: for<'de> Deserialize<'de>,
{
    let Some(mut rdr) = open_checked(path, header)? else {
        return Ok(Vec::new());
    };
    let rows = rdr.deserialize().collect::<Result<Vec<T>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use tempfile::tempdir;

    use super::*;
    use crate::model::Position;
    use crate::pricing::price_position;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn priced(underlying: &str, strike: f64, cost: f64) -> PricedPosition {
        let pos = Position {
            underlying: underlying.to_string(),
            expiry: date("2025-09-19"),
            option_type: OptionType::Call,
            strike,
            contracts: 1,
            cost_per_contract: cost,
        };
        price_position(&pos, None)
    }

    fn snapshot(positions: &[PricedPosition]) -> PortfolioSnapshot {
        crate::portfolio::aggregate(positions)
    }

    #[test]
    fn test_open_creates_headers() {
        let dir = tempdir().unwrap();
        let ledger = Ledger::open(dir.path()).unwrap();
        let history = fs::read_to_string(ledger.history_path()).unwrap();
        assert_eq!(history.trim_end(), HISTORY_HEADER.join(","));
        let portfolio = fs::read_to_string(ledger.portfolio_path()).unwrap();
        assert_eq!(portfolio.trim_end(), PORTFOLIO_HEADER.join(","));
    }

    #[test]
    fn test_row_formatting() {
        let dir = tempdir().unwrap();
        let ledger = Ledger::open(dir.path()).unwrap();
        let rows = vec![priced("AAPL", 200.0, 4.1)];
        ledger.commit(date("2025-06-02"), &rows, &snapshot(&rows)).unwrap();

        let history = fs::read_to_string(ledger.history_path()).unwrap();
        let lines: Vec<&str> = history.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[1],
            "2025-06-02,AAPL 2025-09-19 C 200,AAPL,2025-09-19,call,200.00,1,4.10,0.00,0.00,-410.00,-100.00"
        );

        let portfolio = fs::read_to_string(ledger.portfolio_path()).unwrap();
        assert_eq!(portfolio.lines().nth(1), Some("2025-06-02,0.00,410.00,-410.00"));
    }

    #[test]
    fn test_same_day_commit_replaces() {
        let dir = tempdir().unwrap();
        let ledger = Ledger::open(dir.path()).unwrap();

        let yesterday = vec![priced("AAPL", 200.0, 1.0)];
        ledger.commit(date("2025-06-01"), &yesterday, &snapshot(&yesterday)).unwrap();

        let first = vec![priced("AAPL", 200.0, 1.0), priced("MSFT", 400.0, 2.0)];
        ledger.commit(date("2025-06-02"), &first, &snapshot(&first)).unwrap();

        let second = vec![priced("SPY", 500.0, 3.0)];
        for _ in 0..3 {
            ledger.commit(date("2025-06-02"), &second, &snapshot(&second)).unwrap();
        }

        let history = ledger.load_history().unwrap();
        let today: Vec<&HistoryRow> = history.iter().filter(|r| r.date == date("2025-06-02")).collect();
        assert_eq!(today.len(), 1);
        assert_eq!(today[0].underlying, "SPY");

        // Prior day untouched
        let prior: Vec<&HistoryRow> = history.iter().filter(|r| r.date == date("2025-06-01")).collect();
        assert_eq!(prior.len(), 1);
        assert_eq!(prior[0].underlying, "AAPL");

        let portfolio = ledger.load_portfolio().unwrap();
        assert_eq!(portfolio.len(), 2);
        assert_eq!(portfolio[1].total_cost_basis, 300.0);

        // No duplicate keys per date, and no temp files left behind
        let keys: HashSet<(NaiveDate, String)> =
            history.iter().map(|r| (r.date, r.symbol_key.clone())).collect();
        assert_eq!(keys.len(), history.len());
        assert!(!dir.path().join("history.csv.tmp").exists());
    }

    #[test]
    fn test_schema_mismatch_leaves_files_alone() {
        let dir = tempdir().unwrap();
        let ledger = Ledger::open(dir.path()).unwrap();
        fs::write(ledger.history_path(), "date,something_else\n2025-06-01,1\n").unwrap();

        let rows = vec![priced("AAPL", 200.0, 1.0)];
        let err = ledger.commit(date("2025-06-02"), &rows, &snapshot(&rows)).unwrap_err();
        assert!(matches!(err, LedgerError::SchemaMismatch { .. }));

        let history = fs::read_to_string(ledger.history_path()).unwrap();
        assert_eq!(history, "date,something_else\n2025-06-01,1\n");
        let portfolio = fs::read_to_string(ledger.portfolio_path()).unwrap();
        assert_eq!(portfolio.lines().count(), 1);
    }

    #[test]
    fn test_history_accepts_short_type() {
        let dir = tempdir().unwrap();
        let ledger = Ledger::open(dir.path()).unwrap();
        fs::write(
            ledger.history_path(),
            format!(
                "{}\n2025-06-02,AAPL 2025-09-19 C 200,AAPL,2025-09-19,c,200.00,1,4.10,4.00,400.00,-10.00,-2.44\n\
                 2025-06-02,AAPL 2025-09-19 P 180,AAPL,2025-09-19,P,180.00,1,2.00,1.00,100.00,-100.00,-50.00\n",
                HISTORY_HEADER.join(",")
            ),
        )
        .unwrap();

        let history = ledger.load_history().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].option_type, OptionType::Call);
        assert_eq!(history[1].option_type, OptionType::Put);

        // Rewritten rows come out in the canonical spelling
        let rows = vec![priced("MSFT", 400.0, 1.0)];
        ledger.commit(date("2025-06-03"), &rows, &snapshot(&rows)).unwrap();
        let text = fs::read_to_string(ledger.history_path()).unwrap();
        assert!(text.contains(",c,200.00,"));
        assert!(text.contains(",MSFT,2025-09-19,call,400.00,"));
        assert_eq!(ledger.load_history().unwrap().len(), 3);
    }

    #[test]
    fn test_failed_swap_cleans_up_temp_files() {
        let dir = tempdir().unwrap();
        let first_tmp = dir.path().join("a.csv.tmp");
        let first = dir.path().join("a.csv");
        let second_tmp = dir.path().join("b.csv.tmp");
        // A non-empty directory cannot be replaced by a file
        let second = dir.path().join("b.csv");
        fs::create_dir(&second).unwrap();
        fs::write(second.join("keep"), "x").unwrap();
        fs::write(&first_tmp, "new a").unwrap();
        fs::write(&first, "old a").unwrap();
        fs::write(&second_tmp, "new b").unwrap();

        let err = swap_in(&[(first_tmp.clone(), first.clone()), (second_tmp.clone(), second.clone())])
            .unwrap_err();
        assert!(matches!(err, LedgerError::Io { ref path, .. } if *path == second));
        assert_eq!(fs::read_to_string(&first).unwrap(), "new a");
        assert!(!first_tmp.exists());
        assert!(!second_tmp.exists());
        assert!(second.join("keep").exists());
    }

    #[test]
    fn test_existing_creates_nothing() {
        let dir = tempdir().unwrap();
        let ledger = Ledger::existing(dir.path()).unwrap();
        assert!(ledger.load_history().unwrap().is_empty());
        assert!(ledger.load_portfolio().unwrap().is_empty());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);

        let missing = dir.path().join("nope");
        assert!(matches!(Ledger::existing(&missing), Err(LedgerError::Io { .. })));
        assert!(!missing.exists());
    }

    #[test]
    fn test_record_last_run() {
        let dir = tempdir().unwrap();
        let ledger = Ledger::open(dir.path()).unwrap();
        let at = DateTime::parse_from_rfc3339("2025-06-02T21:05:00Z")
            .unwrap()
            .with_timezone(&Utc);
        ledger.record_last_run(at).unwrap();
        ledger.record_last_run(at).unwrap();
        let text = fs::read_to_string(ledger.last_run_path()).unwrap();
        assert_eq!(text, "2025-06-02T21:05:00+00:00");
    }
}
