use anyhow::{Context, Result};
use chrono::Utc;

use crate::config::{TrackerConfig, load_positions};
use crate::ledger::Ledger;
use crate::quotes::{build_source, http_client};
use crate::retry::TokioSleeper;
use crate::tracker::{RunReport, Tracker};

/// Entry point for the `run` command.
pub fn run(config: &TrackerConfig) -> Result<()> {
    // Everything that can fail fatally is checked before the first request.
    let positions = load_positions(&config.positions_path).map_err(|errors| {
        let msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        anyhow::anyhow!(
            "Position file {} is invalid:\n  {}",
            config.positions_path.display(),
            msgs.join("\n  ")
        )
    })?;
    let ledger = Ledger::open(&config.data_dir)
        .with_context(|| format!("opening ledger at {}", config.data_dir.display()))?;

    println!("=== options-tracker run ===");
    println!(
        "Positions: {} ({})",
        positions.len(),
        config.positions_path.display()
    );
    println!("Data dir:  {}", config.data_dir.display());
    println!("Source:    {}", config.source.name());
    println!(
        "Mode:      {:?} ({} attempts, {} ms pause)",
        config.mode,
        config.retry.max_retries,
        config.pacing.underlying_pause.as_millis()
    );
    println!();

    let rt = tokio::runtime::Runtime::new().context("creating tokio runtime")?;
    let report = rt.block_on(async {
        let client = http_client()?;
        let source = build_source(config.source, client);
        let sleeper = TokioSleeper;
        let tracker = Tracker::new(source.as_ref(), &sleeper, &config.retry, &config.pacing);
        tracker
            .track(&positions, &ledger, Utc::now())
            .await
            .context("committing ledger")
    })?;

    print_report(&report);
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("── {} ──", report.date);
    for p in &report.positions {
        let note = match &p.quote {
            None => " (no quote)".to_string(),
            Some(q) if !q.expiry_exact() || q.strike_distance() > 0.0 => {
                format!(" (using {} {})", q.entry.expiry, q.entry.strike)
            }
            Some(_) => String::new(),
        };
        println!(
            "  {:<28} price {:>8.2}  value {:>11.2}  pnl {:>11.2} ({:>7.2}%){}",
            p.symbol_key(),
            p.price,
            p.value,
            p.pnl,
            p.pnl_pct,
            note
        );
    }
    println!();
    println!(
        "Quoted:     {}/{}",
        report.quoted(),
        report.positions.len()
    );
    println!("Value:      {:.2}", report.snapshot.total_value);
    println!("Cost basis: {:.2}", report.snapshot.total_cost_basis);
    println!("P&L:        {:.2}", report.snapshot.total_pnl);
}
