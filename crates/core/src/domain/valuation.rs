use crate::domain::recommendation::{ExitReason, RecKind, Recommendation, Status};
use serde::Serialize;
use std::fmt;

/// Engine knobs. The investment amount only matters for the intraday
/// fixed-investment basis; swing valuation is percent-of-price.
#[derive(Debug, Clone, Copy)]
pub struct ValuationConfig {
    pub investment_amount: f64,
}

impl Default for ValuationConfig {
    fn default() -> Self {
        Self {
            investment_amount: crate::config::DEFAULT_INVESTMENT_AMOUNT,
        }
    }
}

/// Projected P&L at one target level, sized by the fixed investment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TargetProfit {
    pub price: f64,
    pub amount: f64,
    pub percent: f64,
}

/// Intraday-only sizing block; swing records carry no position size.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sizing {
    pub quantity: i64,
    pub target_profits: Vec<TargetProfit>,
    pub max_loss: f64,
    pub max_loss_percent: f64,
}

/// Read-only derived view of a recommendation. Never mutates its input and
/// depends on nothing but the record's current fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Valuation {
    pub status: Status,
    pub risk_reward: f64,
    pub sizing: Option<Sizing>,
    /// Currency P&L for intraday; mirrors the percent for swing (display only).
    pub profit_loss: f64,
    pub profit_loss_percent: f64,
}

/// Data-integrity failures. These indicate a corrupt persisted record, not a
/// caller mistake: the store's validation rejects all of them up front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValuationError {
    MissingExitPrice { reason: ExitReason },
    TargetOutOfRange { index: usize, available: usize },
    NoTargets,
}

impl fmt::Display for ValuationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValuationError::MissingExitPrice { reason } => {
                write!(f, "exit reason {} requires an exit price", reason.as_str())
            }
            ValuationError::TargetOutOfRange { index, available } => {
                write!(
                    f,
                    "exit references target {} but record has {available}",
                    index + 1
                )
            }
            ValuationError::NoTargets => write!(f, "record has no targets"),
        }
    }
}

impl std::error::Error for ValuationError {}

pub fn value(rec: &Recommendation, cfg: &ValuationConfig) -> Result<Valuation, ValuationError> {
    let final_target = rec.final_target().ok_or(ValuationError::NoTargets)?;
    match rec.kind {
        RecKind::Intraday => value_intraday(rec, final_target, cfg),
        RecKind::Swing => value_swing(rec, final_target),
    }
}

fn value_intraday(
    rec: &Recommendation,
    final_target: f64,
    cfg: &ValuationConfig,
) -> Result<Valuation, ValuationError> {
    let investment = cfg.investment_amount;
    let quantity = (investment / rec.entry_price).floor();

    let risk = (rec.entry_price - rec.stoploss).abs();
    let reward = (final_target - rec.entry_price).abs();
    let risk_reward = if risk > 0.0 { reward / risk } else { 0.0 };

    let target_profits = rec
        .targets
        .iter()
        .map(|t| {
            let amount = quantity * (t - rec.entry_price).abs();
            TargetProfit {
                price: *t,
                amount: amount.round(),
                percent: round2(amount / investment * 100.0),
            }
        })
        .collect();

    let max_loss = quantity * risk;

    let mut profit_loss = 0.0;
    if let Some(exit) = &rec.exit {
        if exit.reason.counts_as_trade() {
            let reference = exit_reference_price(rec, exit.reason, exit.price)?;
            profit_loss =
                quantity * (reference - rec.entry_price) * rec.trade_side.multiplier();
        }
    }

    Ok(Valuation {
        status: rec.status(),
        risk_reward: round2(risk_reward),
        sizing: Some(Sizing {
            quantity: quantity as i64,
            target_profits,
            max_loss: max_loss.round(),
            max_loss_percent: round2(max_loss / investment * 100.0),
        }),
        profit_loss: profit_loss.round(),
        profit_loss_percent: round2(profit_loss / investment * 100.0),
    })
}

// Swing valuation is percent-of-current-price with no sizing and no
// direction multiplier (long-only).
fn value_swing(rec: &Recommendation, final_target: f64) -> Result<Valuation, ValuationError> {
    let risk = (rec.current_price - rec.stoploss).abs();
    let reward = (final_target - rec.current_price).abs();
    let risk_reward = if risk > 0.0 { reward / risk } else { 0.0 };

    let mut percent = 0.0;
    if let Some(exit) = &rec.exit {
        if exit.reason.counts_as_trade() {
            let reference = exit_reference_price(rec, exit.reason, exit.price)?;
            percent = (reference - rec.current_price) / rec.current_price * 100.0;
        }
    }
    let percent = round2(percent);

    Ok(Valuation {
        status: rec.status(),
        risk_reward: round2(risk_reward),
        sizing: None,
        profit_loss: percent,
        profit_loss_percent: percent,
    })
}

fn exit_reference_price(
    rec: &Recommendation,
    reason: ExitReason,
    exit_price: Option<f64>,
) -> Result<f64, ValuationError> {
    if let Some(index) = reason.target_index() {
        return rec
            .targets
            .get(index)
            .copied()
            .ok_or(ValuationError::TargetOutOfRange {
                index,
                available: rec.targets.len(),
            });
    }
    if reason == ExitReason::StoplossHit {
        return Ok(rec.stoploss);
    }
    // Partial profit/loss books at the supplied price; a missing price on a
    // persisted partial exit is corrupt data, not a zero.
    exit_price.ok_or(ValuationError::MissingExitPrice { reason })
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
