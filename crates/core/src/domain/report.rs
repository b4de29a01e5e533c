use crate::domain::recommendation::{ExitReason, RecKind, Recommendation, Status};
use crate::domain::valuation::{self, ValuationConfig, ValuationError};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub kind: Option<RecKind>,
    pub status: Option<Status>,
    /// Calendar date of creation, UTC.
    pub date: Option<NaiveDate>,
    /// Case-insensitive substring match on the stock symbol.
    pub query: Option<String>,
}

impl ListFilter {
    fn matches(&self, rec: &Recommendation) -> bool {
        if let Some(kind) = self.kind {
            if rec.kind != kind {
                return false;
            }
        }
        if let Some(status) = self.status {
            if rec.status() != status {
                return false;
            }
        }
        if let Some(date) = self.date {
            if rec.created_at.date_naive() != date {
                return false;
            }
        }
        if let Some(q) = &self.query {
            let q = q.trim().to_lowercase();
            if !q.is_empty() && !rec.stock_symbol.to_lowercase().contains(&q) {
                return false;
            }
        }
        true
    }
}

/// Filters and orders newest-first. The input slice is already in insertion
/// order (most recent first), so a stable sort keeps insertion order as the
/// tie-break for equal timestamps.
pub fn filter_and_sort<'a>(
    records: &'a [Recommendation],
    filter: &ListFilter,
) -> Vec<&'a Recommendation> {
    let mut out: Vec<&Recommendation> = records.iter().filter(|r| filter.matches(r)).collect();
    out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    out
}

/// The intraday list only shows recent calls. Full-precision comparison:
/// truncating to whole hours would let anything up to 48h59m through.
pub fn is_within_48_hours(created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now.signed_duration_since(created_at) <= Duration::hours(48)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyReport {
    pub date: Option<NaiveDate>,
    /// Exited trades, excluding NOT_EXECUTED.
    pub total_trades: usize,
    pub successful_trades: usize,
    pub total_profit: f64,
    /// Magnitude of losing trades' P&L.
    pub total_loss: f64,
    pub net_profit_loss: f64,
    pub win_rate: f64,
}

/// Aggregates valuation output over exited records. Callers filter to one
/// kind first; intraday sums currency, swing sums percent points.
pub fn daily_report(
    records: &[&Recommendation],
    cfg: &ValuationConfig,
    date: Option<NaiveDate>,
) -> Result<DailyReport, ValuationError> {
    let mut total_trades = 0usize;
    let mut successful_trades = 0usize;
    let mut total_profit = 0.0;
    let mut total_loss = 0.0;

    for rec in records {
        let Some(exit) = &rec.exit else {
            continue;
        };
        if !exit.reason.counts_as_trade() {
            continue;
        }
        let v = valuation::value(rec, cfg)?;
        total_trades += 1;
        if v.profit_loss > 0.0 {
            successful_trades += 1;
            total_profit += v.profit_loss;
        } else {
            total_loss += v.profit_loss.abs();
        }
    }

    let win_rate = if total_trades > 0 {
        round2(successful_trades as f64 / total_trades as f64 * 100.0)
    } else {
        0.0
    };

    Ok(DailyReport {
        date,
        total_trades,
        successful_trades,
        total_profit,
        total_loss,
        net_profit_loss: total_profit - total_loss,
        win_rate,
    })
}

pub fn format_exit_reason(reason: ExitReason, exit_price: Option<f64>) -> String {
    match reason {
        ExitReason::Target1Hit => "Target 1 Hit".to_string(),
        ExitReason::Target2Hit => "Target 2 Hit".to_string(),
        ExitReason::Target3Hit => "Target 3 Hit".to_string(),
        ExitReason::StoplossHit => "Stoploss Hit".to_string(),
        ExitReason::PartialProfit => match exit_price {
            Some(p) => format!("Partial Profit @ {}", format_currency(p)),
            None => "Partial Profit".to_string(),
        },
        ExitReason::PartialLoss => match exit_price {
            Some(p) => format!("Partial Loss @ {}", format_currency(p)),
            None => "Partial Loss".to_string(),
        },
        ExitReason::NotExecuted => "Not Executed".to_string(),
    }
}

/// Rupee amount with Indian digit grouping: last three digits, then pairs
/// (₹1,00,000.00).
pub fn format_currency(value: f64) -> String {
    let negative = value < 0.0;
    let cents = (value.abs() * 100.0).round() as u128;
    let whole = cents / 100;
    let frac = cents % 100;

    let digits = whole.to_string();
    let mut grouped = String::new();
    let n = digits.len();
    for (i, c) in digits.chars().enumerate() {
        grouped.push(c);
        let remaining = n - i - 1;
        if remaining == 0 {
            continue;
        }
        if remaining == 3 || (remaining > 3 && (remaining - 3) % 2 == 0) {
            grouped.push(',');
        }
    }

    let sign = if negative { "-" } else { "" };
    format!("{sign}\u{20B9}{grouped}.{frac:02}")
}

pub fn format_percent(value: f64) -> String {
    let sign = if value >= 0.0 { "+" } else { "" };
    format!("{sign}{value:.2}%")
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
