use crate::model::{PortfolioSnapshot, PricedPosition};

/// Sum value, cost basis and P&L across every priced position of a run.
/// Zero-priced positions count like any other.
pub fn aggregate(positions: &[PricedPosition]) -> PortfolioSnapshot {
    let (total_value, total_cost_basis) = positions
        .iter()
        .fold((0.0, 0.0), |(v, c), p| (v + p.value, c + p.cost_basis));

    PortfolioSnapshot {
        total_value,
        total_cost_basis,
        total_pnl: total_value - total_cost_basis,
    }
}
