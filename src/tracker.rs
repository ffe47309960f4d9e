//! One tracking run: discover, resolve, price, aggregate, commit.
//!
//! Underlyings are processed one at a time with a politeness pause between
//! them. Per underlying there is exactly one expiry listing call and at most
//! one chain call per expiry, however many positions share it. When the
//! nearest expiry has no contracts of a position's type, the next nearest is
//! tried, so a quote is produced whenever the type trades at all.
//! Any fetch that exhausts its retries prices the affected positions at zero;
//! only ledger I/O can fail the run.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::config::{PacingConfig, RetryConfig};
use crate::ledger::{Ledger, LedgerError};
use crate::model::{ChainEntry, PortfolioSnapshot, Position, PricedPosition};
use crate::portfolio::aggregate;
use crate::pricing::price_position;
use crate::quotes::QuoteSource;
use crate::resolve::{expiries_by_distance, resolve_in_chain};
use crate::retry::{RetryController, Sleeper};

/// Outcome of a committed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub date: NaiveDate,
    pub positions: Vec<PricedPosition>,
    pub snapshot: PortfolioSnapshot,
}

impl RunReport {
    /// Positions that found a live contract.
    pub fn quoted(&self) -> usize {
        self.positions.iter().filter(|p| p.quote.is_some()).count()
    }
}

pub struct Tracker<'a> {
    source: &'a dyn QuoteSource,
    sleeper: &'a dyn Sleeper,
    retry: &'a RetryConfig,
    pacing: &'a PacingConfig,
}

impl<'a> Tracker<'a> {
    pub fn new(
        source: &'a dyn QuoteSource,
        sleeper: &'a dyn Sleeper,
        retry: &'a RetryConfig,
        pacing: &'a PacingConfig,
    ) -> Self {
        Self {
            source,
            sleeper,
            retry,
            pacing,
        }
    }

    /// Price every position and record the result under `now`'s UTC date.
    pub async fn track(
        &self,
        positions: &[Position],
        ledger: &Ledger,
        now: DateTime<Utc>,
    ) -> Result<RunReport, LedgerError> {
        let date = now.date_naive();
        let priced = self.price_all(positions).await;
        let snapshot = aggregate(&priced);

        ledger.commit(date, &priced, &snapshot)?;
        ledger.record_last_run(now)?;

        Ok(RunReport {
            date,
            positions: priced,
            snapshot,
        })
    }

    /// Price positions in declaration order.
    pub async fn price_all(&self, positions: &[Position]) -> Vec<PricedPosition> {
        self.stagger().await;

        let mut priced: Vec<Option<PricedPosition>> = vec![None; positions.len()];
        for (i, (underlying, indices)) in group_by_underlying(positions).into_iter().enumerate() {
            if i > 0 && !self.pacing.underlying_pause.is_zero() {
                self.sleeper.sleep(self.pacing.underlying_pause).await;
            }

            let group: Vec<&Position> = indices.iter().map(|&idx| &positions[idx]).collect();
            let results = self.price_underlying(underlying, &group).await;
            for (idx, result) in indices.into_iter().zip(results) {
                priced[idx] = Some(result);
            }
        }

        priced.into_iter().flatten().collect()
    }

    async fn stagger(&self) {
        let max_ms = self.pacing.stagger_max.as_millis() as u64;
        if max_ms == 0 {
            return;
        }
        let delay = Duration::from_millis(rand::rng().random_range(0..=max_ms));
        info!(delay_ms = delay.as_millis() as u64, "staggering start");
        self.sleeper.sleep(delay).await;
    }

    async fn price_underlying(&self, underlying: &str, positions: &[&Position]) -> Vec<PricedPosition> {
        let retry = RetryController::new(self.retry, self.sleeper);
        let source = self.source;

        let listing = retry
            .execute(&format!("{} expiries {underlying}", source.name()), || {
                source.list_expiries(underlying)
            })
            .await;
        let Some(listing) = listing else {
            warn!(underlying, "no expiry data, pricing at zero");
            return positions.iter().map(|p| price_position(p, None)).collect();
        };
        if listing.is_empty() {
            info!(underlying, "no listed options");
        }

        let mut chains: HashMap<NaiveDate, Option<Vec<ChainEntry>>> = HashMap::new();
        let mut priced = Vec::with_capacity(positions.len());
        for position in positions {
            let candidates =
                expiries_by_distance(position.expiry, listing.for_type(position.option_type));
            if candidates.is_empty() {
                warn!(position = %position.symbol_key(), "no listed expiry for this type");
            }

            // Nearest expiry first. A chain with no contracts of the requested
            // type moves on to the next one; a failed fetch ends the search.
            let mut quote = None;
            for expiry in candidates {
                if !chains.contains_key(&expiry) {
                    let chain = self.fetch_chain(&retry, underlying, expiry).await;
                    chains.insert(expiry, chain);
                }
                let Some(Some(chain)) = chains.get(&expiry) else {
                    break;
                };
                quote = resolve_in_chain(position, chain);
                if quote.is_some() {
                    break;
                }
                debug!(
                    position = %position.symbol_key(),
                    %expiry,
                    "no contracts of this type, trying next expiry"
                );
            }

            if quote.is_none() {
                warn!(position = %position.symbol_key(), "no quote, pricing at zero");
            }
            priced.push(price_position(position, quote));
        }
        priced
    }

    async fn fetch_chain(
        &self,
        retry: &RetryController<'_>,
        underlying: &str,
        expiry: NaiveDate,
    ) -> Option<Vec<ChainEntry>> {
        let source = self.source;
        let chain = retry
            .execute(&format!("{} chain {underlying} {expiry}", source.name()), || {
                source.fetch_chain(underlying, expiry)
            })
            .await;
        debug!(
            underlying,
            %expiry,
            contracts = chain.as_ref().map_or(0, Vec::len),
            "fetched chain"
        );
        chain
    }
}

/// Group position indices by underlying, in order of first appearance.
pub fn group_by_underlying(positions: &[Position]) -> Vec<(&str, Vec<usize>)> {
    let mut groups: Vec<(&str, Vec<usize>)> = Vec::new();
    for (idx, position) in positions.iter().enumerate() {
        match groups.iter_mut().find(|(u, _)| *u == position.underlying) {
            Some((_, indices)) => indices.push(idx),
            None => groups.push((position.underlying.as_str(), vec![idx])),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OptionType;

    fn position(underlying: &str, strike: f64) -> Position {
        Position {
            underlying: underlying.to_string(),
            expiry: NaiveDate::from_ymd_opt(2025, 6, 20).unwrap(),
            option_type: OptionType::Call,
            strike,
            contracts: 1,
            cost_per_contract: 1.0,
        }
    }

    #[test]
    fn test_group_by_underlying_keeps_first_appearance() {
        let positions = vec![
            position("MSFT", 400.0),
            position("AAPL", 200.0),
            position("MSFT", 410.0),
        ];
        let groups = group_by_underlying(&positions);
        assert_eq!(groups, vec![("MSFT", vec![0, 2]), ("AAPL", vec![1])]);
    }
}
