use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use tipdesk_core::domain::recommendation::{
    ExitReason, RecKind, Recommendation, RecommendationDraft, RecommendationPatch, Status,
};
use tipdesk_core::domain::report::{self, DailyReport, ListFilter};
use tipdesk_core::domain::valuation::{self, Valuation, ValuationConfig};
use tipdesk_core::storage::error::StoreError;
use tipdesk_core::storage::recommendations::PgBackend;
use tipdesk_core::storage::store::RecommendationStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = tipdesk_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let store = match settings.require_database_url() {
        Ok(db_url) => match sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
        {
            Ok(pool) => match boot_store(pool).await {
                Ok(store) => Some(Arc::new(Mutex::new(store))),
                Err(e) => {
                    sentry_anyhow::capture_anyhow(&e);
                    tracing::error!(error = %e, "store boot failed; starting API in degraded mode");
                    None
                }
            },
            Err(e) => {
                let err = anyhow::Error::new(e);
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(error = %err, "db connect failed; starting API in degraded mode");
                None
            }
        },
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "DATABASE_URL missing; starting API in degraded mode");
            None
        }
    };

    if settings.admin_token.is_none() {
        tracing::warn!("ADMIN_TOKEN not configured; write endpoints are disabled");
    }

    let state = AppState {
        store,
        admin_token: settings.admin_token.map(Arc::new),
        valuation: ValuationConfig {
            investment_amount: settings.investment_amount,
        },
    };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route(
            "/recommendations",
            get(list_recommendations).post(create_recommendation),
        )
        .route(
            "/recommendations/:id",
            get(get_recommendation)
                .patch(update_recommendation)
                .delete(delete_recommendation),
        )
        .route("/recommendations/:id/exit", post(exit_recommendation))
        .route("/recommendations/:id/price", post(update_price))
        .route("/report", get(get_report))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn boot_store(pool: sqlx::PgPool) -> anyhow::Result<RecommendationStore> {
    tipdesk_core::storage::migrate(&pool).await?;
    let store = RecommendationStore::load(Arc::new(PgBackend::new(pool))).await?;
    Ok(store)
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Clone)]
struct AppState {
    store: Option<Arc<Mutex<RecommendationStore>>>,
    admin_token: Option<Arc<String>>,
    valuation: ValuationConfig,
}

impl AppState {
    fn store(&self) -> Result<&Arc<Mutex<RecommendationStore>>, ApiError> {
        self.store
            .as_ref()
            .ok_or((StatusCode::SERVICE_UNAVAILABLE, "store unavailable".into()))
    }

    /// Server-side admin gate on every write. The claim is verified here per
    /// request, never trusted from client state.
    fn require_admin(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        let Some(token) = &self.admin_token else {
            return Err((
                StatusCode::SERVICE_UNAVAILABLE,
                "admin writes are not configured".into(),
            ));
        };
        let supplied = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        match supplied {
            Some(s) if s == token.as_str() => Ok(()),
            Some(_) => Err((StatusCode::FORBIDDEN, "not an admin".into())),
            None => Err((StatusCode::UNAUTHORIZED, "missing bearer token".into())),
        }
    }
}

type ApiError = (StatusCode, String);

fn store_error(err: StoreError) -> ApiError {
    let status = match &err {
        StoreError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::Conflict { .. } => StatusCode::CONFLICT,
        StoreError::Storage(inner) => {
            sentry::capture_error(&err);
            tracing::error!(error = %inner, "store operation failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, err.to_string())
}

fn valued(rec: &Recommendation, cfg: &ValuationConfig) -> Result<ApiRecommendation, ApiError> {
    let valuation = valuation::value(rec, cfg).map_err(|e| {
        sentry::capture_error(&e);
        tracing::error!(id = %rec.id, error = %e, "corrupt record failed valuation");
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;
    Ok(ApiRecommendation {
        record: rec.clone(),
        valuation,
    })
}

#[derive(Debug, Serialize)]
struct ApiRecommendation {
    record: Recommendation,
    valuation: Valuation,
}

#[derive(Debug, Deserialize)]
struct ListParams {
    kind: Option<RecKind>,
    status: Option<Status>,
    date: Option<NaiveDate>,
    q: Option<String>,
    /// Restrict to the last 48 hours (the intraday list view).
    #[serde(default)]
    recent: bool,
}

async fn list_recommendations(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<ApiRecommendation>>, ApiError> {
    let store = state.store()?.lock().await;
    let filter = ListFilter {
        kind: params.kind,
        status: params.status,
        date: params.date,
        query: params.q,
    };
    let now = chrono::Utc::now();
    let mut out = Vec::new();
    for rec in report::filter_and_sort(store.list(), &filter) {
        if params.recent && !report::is_within_48_hours(rec.created_at, now) {
            continue;
        }
        out.push(valued(rec, &state.valuation)?);
    }
    Ok(Json(out))
}

async fn get_recommendation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiRecommendation>, ApiError> {
    let store = state.store()?.lock().await;
    let rec = store
        .get(id)
        .ok_or((StatusCode::NOT_FOUND, format!("recommendation not found: {id}")))?;
    Ok(Json(valued(rec, &state.valuation)?))
}

/// The report aggregates one kind at a time: intraday sums rupees, swing
/// sums percent points, and the two must never land in one total. A missing
/// kind is a 400 at extraction.
#[derive(Debug, Deserialize)]
struct ReportParams {
    kind: RecKind,
    date: Option<NaiveDate>,
}

async fn get_report(
    State(state): State<AppState>,
    Query(params): Query<ReportParams>,
) -> Result<Json<DailyReport>, ApiError> {
    let store = state.store()?.lock().await;
    let filter = ListFilter {
        kind: Some(params.kind),
        date: params.date,
        ..Default::default()
    };
    let records = report::filter_and_sort(store.list(), &filter);
    let daily = report::daily_report(&records, &state.valuation, params.date).map_err(|e| {
        sentry::capture_error(&e);
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;
    Ok(Json(daily))
}

async fn create_recommendation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(draft): Json<RecommendationDraft>,
) -> Result<(StatusCode, Json<ApiRecommendation>), ApiError> {
    state.require_admin(&headers)?;
    let mut store = state.store()?.lock().await;
    let rec = store.create(draft).await.map_err(store_error)?;
    tracing::info!(id = %rec.id, kind = rec.kind.as_str(), symbol = %rec.stock_symbol, "recommendation created");
    Ok((StatusCode::CREATED, Json(valued(&rec, &state.valuation)?)))
}

#[derive(Debug, Deserialize)]
struct UpdateRequest {
    #[serde(flatten)]
    patch: RecommendationPatch,
    expected_version: Option<i64>,
}

async fn update_recommendation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<UpdateRequest>,
) -> Result<Json<ApiRecommendation>, ApiError> {
    state.require_admin(&headers)?;
    let mut store = state.store()?.lock().await;
    let rec = store
        .update(id, &req.patch, req.expected_version)
        .await
        .map_err(store_error)?;
    Ok(Json(valued(&rec, &state.valuation)?))
}

async fn delete_recommendation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    state.require_admin(&headers)?;
    let mut store = state.store()?.lock().await;
    let removed = store.delete(id).await.map_err(store_error)?;
    tracing::info!(%id, removed, "recommendation delete");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct ExitRequest {
    reason: ExitReason,
    exit_price: Option<f64>,
    expected_version: Option<i64>,
}

async fn exit_recommendation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<ExitRequest>,
) -> Result<Json<ApiRecommendation>, ApiError> {
    state.require_admin(&headers)?;
    let mut store = state.store()?.lock().await;
    let rec = store
        .exit(id, req.reason, req.exit_price, req.expected_version)
        .await
        .map_err(store_error)?;
    tracing::info!(%id, reason = req.reason.as_str(), "recommendation exited");
    Ok(Json(valued(&rec, &state.valuation)?))
}

#[derive(Debug, Deserialize)]
struct PriceRequest {
    price: f64,
    expected_version: Option<i64>,
}

async fn update_price(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<PriceRequest>,
) -> Result<Json<ApiRecommendation>, ApiError> {
    state.require_admin(&headers)?;
    let mut store = state.store()?.lock().await;
    let rec = store
        .update_current_price(id, req.price, req.expected_version)
        .await
        .map_err(store_error)?;
    Ok(Json(valued(&rec, &state.valuation)?))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &tipdesk_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn report_requires_a_kind() {
        assert!(serde_json::from_value::<ReportParams>(json!({})).is_err());
        assert!(
            serde_json::from_value::<ReportParams>(json!({"date": "2026-03-02"})).is_err()
        );

        let p: ReportParams = serde_json::from_value(json!({"kind": "SWING"})).unwrap();
        assert_eq!(p.kind, RecKind::Swing);
        assert_eq!(p.date, None);
    }
}
