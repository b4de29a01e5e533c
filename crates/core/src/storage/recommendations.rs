use crate::domain::recommendation::{
    ExitEvent, ExitReason, RecKind, Recommendation, TradeSide,
};
use crate::storage::store::RecommendationBackend;
use anyhow::Context;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Postgres persistence: one table per recommendation kind, each row
/// mirroring the record's field set.
#[derive(Debug, Clone)]
pub struct PgBackend {
    pool: sqlx::PgPool,
}

impl PgBackend {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

type IntradayRow = (
    Uuid,
    String,
    String,
    f64,
    f64,
    f64,
    f64,
    f64,
    f64,
    Option<String>,
    Option<f64>,
    Option<DateTime<Utc>>,
    i64,
    DateTime<Utc>,
    DateTime<Utc>,
);

type SwingRow = (
    Uuid,
    String,
    f64,
    f64,
    f64,
    f64,
    f64,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<f64>,
    Option<DateTime<Utc>>,
    i64,
    DateTime<Utc>,
    DateTime<Utc>,
);

fn table_for(kind: RecKind) -> &'static str {
    match kind {
        RecKind::Intraday => "intraday_recommendations",
        RecKind::Swing => "swing_recommendations",
    }
}

fn exit_from_columns(
    id: Uuid,
    reason: Option<String>,
    price: Option<f64>,
    at: Option<DateTime<Utc>>,
) -> anyhow::Result<Option<ExitEvent>> {
    let Some(reason) = reason else {
        anyhow::ensure!(
            price.is_none() && at.is_none(),
            "partial exit state persisted for {id}: reason unset but price/timestamp present"
        );
        return Ok(None);
    };
    let reason = ExitReason::parse(&reason)
        .with_context(|| format!("bad exit_reason in row {id}"))?;
    let at = at.with_context(|| format!("exit_reason set without exited_at in row {id}"))?;
    Ok(Some(ExitEvent { reason, price, at }))
}

fn intraday_from_row(row: IntradayRow) -> anyhow::Result<Recommendation> {
    let (
        id,
        stock_symbol,
        trade_side,
        entry_price,
        target1,
        target2,
        target3,
        stoploss,
        current_price,
        exit_reason,
        exit_price,
        exited_at,
        version,
        created_at,
        updated_at,
    ) = row;

    Ok(Recommendation {
        id,
        kind: RecKind::Intraday,
        stock_symbol,
        trade_side: TradeSide::parse(&trade_side)
            .with_context(|| format!("bad trade_side in row {id}"))?,
        entry_price,
        targets: vec![target1, target2, target3],
        stoploss,
        current_price,
        allocation: None,
        notes: None,
        image_ref: None,
        exit: exit_from_columns(id, exit_reason, exit_price, exited_at)?,
        version,
        created_at,
        updated_at,
    })
}

fn swing_from_row(row: SwingRow) -> anyhow::Result<Recommendation> {
    let (
        id,
        stock_symbol,
        entry_price,
        target1,
        target2,
        stoploss,
        current_price,
        allocation,
        notes,
        image_ref,
        exit_reason,
        exit_price,
        exited_at,
        version,
        created_at,
        updated_at,
    ) = row;

    Ok(Recommendation {
        id,
        kind: RecKind::Swing,
        stock_symbol,
        trade_side: TradeSide::Buy,
        entry_price,
        targets: vec![target1, target2],
        stoploss,
        current_price,
        allocation,
        notes,
        image_ref,
        exit: exit_from_columns(id, exit_reason, exit_price, exited_at)?,
        version,
        created_at,
        updated_at,
    })
}

fn target(rec: &Recommendation, index: usize) -> f64 {
    rec.targets.get(index).copied().unwrap_or(0.0)
}

fn exit_columns(rec: &Recommendation) -> (Option<&'static str>, Option<f64>, Option<DateTime<Utc>>) {
    match &rec.exit {
        Some(exit) => (Some(exit.reason.as_str()), exit.price, Some(exit.at)),
        None => (None, None, None),
    }
}

#[async_trait::async_trait]
impl RecommendationBackend for PgBackend {
    async fn load_all(&self) -> anyhow::Result<Vec<Recommendation>> {
        let intraday_rows = sqlx::query_as::<_, IntradayRow>(
            "SELECT id, stock_symbol, trade_side, entry_price, target1, target2, target3, \
                    stoploss, current_price, exit_reason, exit_price, exited_at, version, \
                    created_at, updated_at \
             FROM intraday_recommendations \
             ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .context("select intraday_recommendations failed")?;

        let swing_rows = sqlx::query_as::<_, SwingRow>(
            "SELECT id, stock_symbol, entry_price, target1, target2, stoploss, current_price, \
                    allocation, notes, image_ref, exit_reason, exit_price, exited_at, version, \
                    created_at, updated_at \
             FROM swing_recommendations \
             ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .context("select swing_recommendations failed")?;

        let mut out = Vec::with_capacity(intraday_rows.len() + swing_rows.len());
        for row in intraday_rows {
            out.push(intraday_from_row(row)?);
        }
        for row in swing_rows {
            out.push(swing_from_row(row)?);
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn insert(&self, rec: &Recommendation) -> anyhow::Result<()> {
        let (exit_reason, exit_price, exited_at) = exit_columns(rec);
        match rec.kind {
            RecKind::Intraday => {
                sqlx::query(
                    "INSERT INTO intraday_recommendations \
                     (id, stock_symbol, trade_side, entry_price, target1, target2, target3, \
                      stoploss, current_price, exit_reason, exit_price, exited_at, version, \
                      created_at, updated_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
                )
                .bind(rec.id)
                .bind(&rec.stock_symbol)
                .bind(rec.trade_side.as_str())
                .bind(rec.entry_price)
                .bind(target(rec, 0))
                .bind(target(rec, 1))
                .bind(target(rec, 2))
                .bind(rec.stoploss)
                .bind(rec.current_price)
                .bind(exit_reason)
                .bind(exit_price)
                .bind(exited_at)
                .bind(rec.version)
                .bind(rec.created_at)
                .bind(rec.updated_at)
                .execute(&self.pool)
                .await
                .context("insert intraday_recommendations failed")?;
            }
            RecKind::Swing => {
                sqlx::query(
                    "INSERT INTO swing_recommendations \
                     (id, stock_symbol, entry_price, target1, target2, stoploss, current_price, \
                      allocation, notes, image_ref, exit_reason, exit_price, exited_at, version, \
                      created_at, updated_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
                )
                .bind(rec.id)
                .bind(&rec.stock_symbol)
                .bind(rec.entry_price)
                .bind(target(rec, 0))
                .bind(target(rec, 1))
                .bind(rec.stoploss)
                .bind(rec.current_price)
                .bind(&rec.allocation)
                .bind(&rec.notes)
                .bind(&rec.image_ref)
                .bind(exit_reason)
                .bind(exit_price)
                .bind(exited_at)
                .bind(rec.version)
                .bind(rec.created_at)
                .bind(rec.updated_at)
                .execute(&self.pool)
                .await
                .context("insert swing_recommendations failed")?;
            }
        }
        Ok(())
    }

    async fn update(&self, rec: &Recommendation, expected_version: i64) -> anyhow::Result<bool> {
        let (exit_reason, exit_price, exited_at) = exit_columns(rec);
        let result = match rec.kind {
            RecKind::Intraday => {
                sqlx::query(
                    "UPDATE intraday_recommendations SET \
                     stock_symbol = $1, trade_side = $2, entry_price = $3, target1 = $4, \
                     target2 = $5, target3 = $6, stoploss = $7, current_price = $8, \
                     exit_reason = $9, exit_price = $10, exited_at = $11, version = $12, \
                     updated_at = $13 \
                     WHERE id = $14 AND version = $15",
                )
                .bind(&rec.stock_symbol)
                .bind(rec.trade_side.as_str())
                .bind(rec.entry_price)
                .bind(target(rec, 0))
                .bind(target(rec, 1))
                .bind(target(rec, 2))
                .bind(rec.stoploss)
                .bind(rec.current_price)
                .bind(exit_reason)
                .bind(exit_price)
                .bind(exited_at)
                .bind(rec.version)
                .bind(rec.updated_at)
                .bind(rec.id)
                .bind(expected_version)
                .execute(&self.pool)
                .await
                .context("update intraday_recommendations failed")?
            }
            RecKind::Swing => {
                sqlx::query(
                    "UPDATE swing_recommendations SET \
                     stock_symbol = $1, entry_price = $2, target1 = $3, target2 = $4, \
                     stoploss = $5, current_price = $6, allocation = $7, notes = $8, \
                     image_ref = $9, exit_reason = $10, exit_price = $11, exited_at = $12, \
                     version = $13, updated_at = $14 \
                     WHERE id = $15 AND version = $16",
                )
                .bind(&rec.stock_symbol)
                .bind(rec.entry_price)
                .bind(target(rec, 0))
                .bind(target(rec, 1))
                .bind(rec.stoploss)
                .bind(rec.current_price)
                .bind(&rec.allocation)
                .bind(&rec.notes)
                .bind(&rec.image_ref)
                .bind(exit_reason)
                .bind(exit_price)
                .bind(exited_at)
                .bind(rec.version)
                .bind(rec.updated_at)
                .bind(rec.id)
                .bind(expected_version)
                .execute(&self.pool)
                .await
                .context("update swing_recommendations failed")?
            }
        };
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, kind: RecKind, id: Uuid) -> anyhow::Result<()> {
        let sql = format!("DELETE FROM {} WHERE id = $1", table_for(kind));
        sqlx::query(&sql)
            .bind(id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("delete from {} failed", table_for(kind)))?;
        Ok(())
    }
}
