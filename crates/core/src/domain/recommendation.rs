use anyhow::ensure;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecKind {
    Intraday,
    Swing,
}

impl RecKind {
    pub fn target_count(self) -> usize {
        match self {
            RecKind::Intraday => 3,
            RecKind::Swing => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RecKind::Intraday => "INTRADAY",
            RecKind::Swing => "SWING",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "INTRADAY" => Ok(RecKind::Intraday),
            "SWING" => Ok(RecKind::Swing),
            other => anyhow::bail!("unknown recommendation kind: {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    /// Direction multiplier applied to price-delta P&L: +1 long, -1 short.
    pub fn multiplier(self) -> f64 {
        match self {
            TradeSide::Buy => 1.0,
            TradeSide::Sell => -1.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "BUY" => Ok(TradeSide::Buy),
            "SELL" => Ok(TradeSide::Sell),
            other => anyhow::bail!("unknown trade side: {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Open,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    #[serde(rename = "TARGET_1_HIT")]
    Target1Hit,
    #[serde(rename = "TARGET_2_HIT")]
    Target2Hit,
    #[serde(rename = "TARGET_3_HIT")]
    Target3Hit,
    #[serde(rename = "STOPLOSS_HIT")]
    StoplossHit,
    #[serde(rename = "PARTIAL_PROFIT")]
    PartialProfit,
    #[serde(rename = "PARTIAL_LOSS")]
    PartialLoss,
    #[serde(rename = "NOT_EXECUTED")]
    NotExecuted,
}

impl ExitReason {
    /// Zero-based index into the record's target list, for target-hit reasons.
    pub fn target_index(self) -> Option<usize> {
        match self {
            ExitReason::Target1Hit => Some(0),
            ExitReason::Target2Hit => Some(1),
            ExitReason::Target3Hit => Some(2),
            _ => None,
        }
    }

    /// Partial exits are booked at an admin-supplied price.
    pub fn requires_exit_price(self) -> bool {
        matches!(self, ExitReason::PartialProfit | ExitReason::PartialLoss)
    }

    /// NOT_EXECUTED closes the record administratively with no P&L and
    /// does not count as a trade in aggregates.
    pub fn counts_as_trade(self) -> bool {
        !matches!(self, ExitReason::NotExecuted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExitReason::Target1Hit => "TARGET_1_HIT",
            ExitReason::Target2Hit => "TARGET_2_HIT",
            ExitReason::Target3Hit => "TARGET_3_HIT",
            ExitReason::StoplossHit => "STOPLOSS_HIT",
            ExitReason::PartialProfit => "PARTIAL_PROFIT",
            ExitReason::PartialLoss => "PARTIAL_LOSS",
            ExitReason::NotExecuted => "NOT_EXECUTED",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "TARGET_1_HIT" => Ok(ExitReason::Target1Hit),
            "TARGET_2_HIT" => Ok(ExitReason::Target2Hit),
            "TARGET_3_HIT" => Ok(ExitReason::Target3Hit),
            "STOPLOSS_HIT" => Ok(ExitReason::StoplossHit),
            "PARTIAL_PROFIT" => Ok(ExitReason::PartialProfit),
            "PARTIAL_LOSS" => Ok(ExitReason::PartialLoss),
            "NOT_EXECUTED" => Ok(ExitReason::NotExecuted),
            other => anyhow::bail!("unknown exit reason: {other}"),
        }
    }
}

/// Terminal exit event. Set exactly once, atomically; never partially present.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExitEvent {
    pub reason: ExitReason,
    pub price: Option<f64>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: Uuid,
    pub kind: RecKind,
    pub stock_symbol: String,
    pub trade_side: TradeSide,
    pub entry_price: f64,
    /// Ordered by intended-hit sequence: away from entry in the trade
    /// direction (ascending for BUY, descending for SELL).
    pub targets: Vec<f64>,
    pub stoploss: f64,
    pub current_price: f64,
    pub allocation: Option<String>,
    pub notes: Option<String>,
    pub image_ref: Option<String>,
    pub exit: Option<ExitEvent>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Recommendation {
    pub fn status(&self) -> Status {
        if self.exit.is_some() {
            Status::Exit
        } else {
            Status::Open
        }
    }

    pub fn final_target(&self) -> Option<f64> {
        self.targets.last().copied()
    }

    /// Invariants shared by creation and edit. Runs on the merged record,
    /// so a patch can never leave a record in a shape creation would reject.
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            !self.stock_symbol.trim().is_empty(),
            "stock symbol must be non-empty"
        );
        ensure!(
            self.entry_price > 0.0,
            "entry price must be positive (got {})",
            self.entry_price
        );
        ensure!(
            self.stoploss > 0.0,
            "stoploss must be positive (got {})",
            self.stoploss
        );
        ensure!(
            self.current_price > 0.0,
            "current price must be positive (got {})",
            self.current_price
        );

        let expected = self.kind.target_count();
        ensure!(
            self.targets.len() == expected,
            "{} recommendations take exactly {expected} targets (got {})",
            self.kind.as_str(),
            self.targets.len()
        );
        for (i, t) in self.targets.iter().enumerate() {
            ensure!(*t > 0.0, "target {} must be positive (got {t})", i + 1);
        }
        for pair in self.targets.windows(2) {
            let ordered = match self.trade_side {
                TradeSide::Buy => pair[0] < pair[1],
                TradeSide::Sell => pair[0] > pair[1],
            };
            ensure!(
                ordered,
                "targets must step away from entry in hit order for {}",
                self.trade_side.as_str()
            );
        }

        if self.kind == RecKind::Swing {
            ensure!(
                self.trade_side == TradeSide::Buy,
                "swing recommendations are long-only"
            );
        }

        if let Some(exit) = &self.exit {
            if exit.reason == ExitReason::Target3Hit {
                ensure!(
                    self.kind == RecKind::Intraday,
                    "TARGET_3_HIT is not valid for a two-target swing record"
                );
            }
            if exit.reason.requires_exit_price() {
                ensure!(
                    exit.price.is_some(),
                    "{} requires an exit price",
                    exit.reason.as_str()
                );
            }
            if let Some(p) = exit.price {
                ensure!(p > 0.0, "exit price must be positive (got {p})");
            }
        }

        Ok(())
    }

    /// Merges a partial edit and re-validates. Identity and timestamps are
    /// the store's concern and are untouched here.
    pub fn apply_patch(&self, patch: &RecommendationPatch) -> anyhow::Result<Recommendation> {
        let mut next = self.clone();
        if let Some(s) = &patch.stock_symbol {
            next.stock_symbol = s.trim().to_string();
        }
        if let Some(side) = patch.trade_side {
            next.trade_side = side;
        }
        if let Some(p) = patch.entry_price {
            next.entry_price = p;
        }
        if let Some(t) = &patch.targets {
            next.targets = t.clone();
        }
        if let Some(p) = patch.stoploss {
            next.stoploss = p;
        }
        if let Some(p) = patch.current_price {
            next.current_price = p;
        }
        if let Some(a) = &patch.allocation {
            next.allocation = Some(a.clone());
        }
        if let Some(n) = &patch.notes {
            next.notes = Some(n.clone());
        }
        if let Some(r) = &patch.image_ref {
            next.image_ref = Some(r.clone());
        }
        // Administrative correction only; the exit operation is one-shot.
        if patch.reset_exit {
            next.exit = None;
        }
        next.validate()?;
        Ok(next)
    }
}

/// Creation input. Everything an admin supplies; identity and timestamps
/// are assigned by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationDraft {
    pub kind: RecKind,
    pub stock_symbol: String,
    #[serde(default = "default_side")]
    pub trade_side: TradeSide,
    pub entry_price: f64,
    pub targets: Vec<f64>,
    pub stoploss: f64,
    pub allocation: Option<String>,
    pub notes: Option<String>,
    pub image_ref: Option<String>,
}

fn default_side() -> TradeSide {
    TradeSide::Buy
}

impl RecommendationDraft {
    pub fn validate_into_recommendation(
        self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Recommendation> {
        let rec = Recommendation {
            id,
            kind: self.kind,
            stock_symbol: self.stock_symbol.trim().to_string(),
            trade_side: self.trade_side,
            entry_price: self.entry_price,
            targets: self.targets,
            stoploss: self.stoploss,
            // Market price starts at the recommended price.
            current_price: self.entry_price,
            allocation: self.allocation,
            notes: self.notes,
            image_ref: self.image_ref,
            exit: None,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        rec.validate()?;
        Ok(rec)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecommendationPatch {
    pub stock_symbol: Option<String>,
    pub trade_side: Option<TradeSide>,
    pub entry_price: Option<f64>,
    pub targets: Option<Vec<f64>>,
    pub stoploss: Option<f64>,
    pub current_price: Option<f64>,
    pub allocation: Option<String>,
    pub notes: Option<String>,
    pub image_ref: Option<String>,
    #[serde(default)]
    pub reset_exit: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intraday_draft() -> RecommendationDraft {
        RecommendationDraft {
            kind: RecKind::Intraday,
            stock_symbol: "RELIANCE".to_string(),
            trade_side: TradeSide::Buy,
            entry_price: 2500.0,
            targets: vec![2550.0, 2600.0, 2650.0],
            stoploss: 2450.0,
            allocation: None,
            notes: None,
            image_ref: None,
        }
    }

    #[test]
    fn creation_sets_current_price_to_entry_and_starts_open() {
        let now = Utc::now();
        let rec = intraday_draft()
            .validate_into_recommendation(Uuid::new_v4(), now)
            .unwrap();
        assert_eq!(rec.current_price, 2500.0);
        assert_eq!(rec.status(), Status::Open);
        assert_eq!(rec.version, 1);
        assert_eq!(rec.created_at, rec.updated_at);
    }

    #[test]
    fn rejects_non_positive_prices() {
        let mut d = intraday_draft();
        d.entry_price = 0.0;
        assert!(d
            .validate_into_recommendation(Uuid::new_v4(), Utc::now())
            .is_err());

        let mut d = intraday_draft();
        d.stoploss = -5.0;
        assert!(d
            .validate_into_recommendation(Uuid::new_v4(), Utc::now())
            .is_err());
    }

    #[test]
    fn rejects_wrong_target_count_per_kind() {
        let mut d = intraday_draft();
        d.targets = vec![2550.0, 2600.0];
        assert!(d
            .validate_into_recommendation(Uuid::new_v4(), Utc::now())
            .is_err());

        let mut d = intraday_draft();
        d.kind = RecKind::Swing;
        d.targets = vec![2550.0, 2600.0];
        assert!(d
            .validate_into_recommendation(Uuid::new_v4(), Utc::now())
            .is_ok());
    }

    #[test]
    fn buy_targets_ascend_sell_targets_descend() {
        let mut d = intraday_draft();
        d.targets = vec![2600.0, 2550.0, 2650.0];
        assert!(d
            .validate_into_recommendation(Uuid::new_v4(), Utc::now())
            .is_err());

        let mut d = intraday_draft();
        d.trade_side = TradeSide::Sell;
        d.targets = vec![2450.0, 2400.0, 2350.0];
        d.stoploss = 2550.0;
        assert!(d
            .validate_into_recommendation(Uuid::new_v4(), Utc::now())
            .is_ok());
    }

    #[test]
    fn swing_is_long_only() {
        let mut d = intraday_draft();
        d.kind = RecKind::Swing;
        d.trade_side = TradeSide::Sell;
        d.targets = vec![2450.0, 2400.0];
        assert!(d
            .validate_into_recommendation(Uuid::new_v4(), Utc::now())
            .is_err());
    }

    #[test]
    fn patch_merge_revalidates() {
        let rec = intraday_draft()
            .validate_into_recommendation(Uuid::new_v4(), Utc::now())
            .unwrap();

        let ok = rec.apply_patch(&RecommendationPatch {
            stoploss: Some(2400.0),
            ..Default::default()
        });
        assert_eq!(ok.unwrap().stoploss, 2400.0);

        let bad = rec.apply_patch(&RecommendationPatch {
            entry_price: Some(-1.0),
            ..Default::default()
        });
        assert!(bad.is_err());
    }

    #[test]
    fn patch_can_reset_exit_as_administrative_correction() {
        let mut rec = intraday_draft()
            .validate_into_recommendation(Uuid::new_v4(), Utc::now())
            .unwrap();
        rec.exit = Some(ExitEvent {
            reason: ExitReason::Target1Hit,
            price: None,
            at: Utc::now(),
        });

        let cleared = rec
            .apply_patch(&RecommendationPatch {
                reset_exit: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(cleared.status(), Status::Open);
        assert!(cleared.exit.is_none());
    }

    #[test]
    fn exit_reason_wire_names_round_trip() {
        let j = serde_json::to_string(&ExitReason::Target2Hit).unwrap();
        assert_eq!(j, "\"TARGET_2_HIT\"");
        for r in [
            ExitReason::Target1Hit,
            ExitReason::Target2Hit,
            ExitReason::Target3Hit,
            ExitReason::StoplossHit,
            ExitReason::PartialProfit,
            ExitReason::PartialLoss,
            ExitReason::NotExecuted,
        ] {
            assert_eq!(ExitReason::parse(r.as_str()).unwrap(), r);
        }
    }
}
