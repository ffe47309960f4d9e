pub mod position;
pub mod quote;

pub use position::{OptionType, Position};
pub use quote::{ChainEntry, ResolvedQuote};

/// A position after pricing. Built once per run and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct PricedPosition {
    pub position: Position,
    pub quote: Option<ResolvedQuote>,
    pub price: f64,
    pub value: f64,
    pub cost_basis: f64,
    pub pnl: f64,
    pub pnl_pct: f64,
}

impl PricedPosition {
    pub fn symbol_key(&self) -> String {
        self.position.symbol_key()
    }
}

/// Portfolio totals for one date.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PortfolioSnapshot {
    pub total_value: f64,
    pub total_cost_basis: f64,
    pub total_pnl: f64,
}
