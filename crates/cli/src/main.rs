use anyhow::Context;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use tipdesk_core::domain::recommendation::{
    ExitReason, RecKind, Recommendation, RecommendationDraft, Status,
};
use tipdesk_core::domain::report::{self, ListFilter};
use tipdesk_core::domain::valuation::{self, ValuationConfig};
use tipdesk_core::storage::recommendations::PgBackend;
use tipdesk_core::storage::store::RecommendationStore;

#[derive(Debug, Parser)]
#[command(name = "tipdesk_cli")]
struct Args {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List recommendations, newest first.
    List {
        /// INTRADAY or SWING.
        #[arg(long)]
        kind: Option<String>,

        /// OPEN or EXIT.
        #[arg(long)]
        status: Option<String>,

        /// Creation date (YYYY-MM-DD, UTC).
        #[arg(long)]
        date: Option<String>,

        /// Symbol substring match.
        #[arg(long)]
        query: Option<String>,
    },

    /// Create a recommendation from a JSON draft.
    Create {
        /// Draft document, e.g. '{"kind":"INTRADAY","stock_symbol":"RELIANCE",...}'.
        #[arg(long)]
        json: String,
    },

    /// Update the current market price.
    Price {
        id: Uuid,
        price: f64,
        #[arg(long)]
        expected_version: Option<i64>,
    },

    /// Exit a recommendation.
    Exit {
        id: Uuid,
        /// TARGET_1_HIT, TARGET_2_HIT, TARGET_3_HIT, STOPLOSS_HIT,
        /// PARTIAL_PROFIT, PARTIAL_LOSS or NOT_EXECUTED.
        reason: String,
        /// Booked price; required for partial reasons.
        #[arg(long)]
        exit_price: Option<f64>,
        #[arg(long)]
        expected_version: Option<i64>,
    },

    /// Permanently delete a recommendation.
    Delete { id: Uuid },

    /// Aggregate P&L report for one kind (intraday totals are rupees,
    /// swing totals are percent points; they never mix).
    Report {
        /// INTRADAY or SWING.
        #[arg(long)]
        kind: String,
        #[arg(long)]
        date: Option<String>,
    },
}

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

    let args = Args::parse();

    let result = run(args, &settings).await;
    if let Err(err) = &result {
        sentry_anyhow::capture_anyhow(err);
        tracing::error!(error = %err, "command failed");
    }
    result
}

async fn run(args: Args, settings: &tipdesk_core::config::Settings) -> anyhow::Result<()> {
    let db_url = settings.require_database_url()?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .context("connect DATABASE_URL failed")?;

    tipdesk_core::storage::migrate(&pool).await?;

    let mut store = RecommendationStore::load(Arc::new(PgBackend::new(pool))).await?;
    let cfg = ValuationConfig {
        investment_amount: settings.investment_amount,
    };

    match args.cmd {
        Command::List {
            kind,
            status,
            date,
            query,
        } => {
            let filter = ListFilter {
                kind: kind.as_deref().map(RecKind::parse).transpose()?,
                status: status.as_deref().map(parse_status).transpose()?,
                date: date.as_deref().map(parse_date).transpose()?,
                query,
            };
            for rec in report::filter_and_sort(store.list(), &filter) {
                print_line(rec, &cfg)?;
            }
        }
        Command::Create { json } => {
            let draft: RecommendationDraft =
                serde_json::from_str(&json).context("draft JSON did not parse")?;
            let rec = store.create(draft).await?;
            tracing::info!(id = %rec.id, symbol = %rec.stock_symbol, "created");
            print_line(&rec, &cfg)?;
        }
        Command::Price {
            id,
            price,
            expected_version,
        } => {
            let rec = store.update_current_price(id, price, expected_version).await?;
            print_line(&rec, &cfg)?;
        }
        Command::Exit {
            id,
            reason,
            exit_price,
            expected_version,
        } => {
            let reason = ExitReason::parse(&reason)?;
            let rec = store.exit(id, reason, exit_price, expected_version).await?;
            tracing::info!(%id, reason = reason.as_str(), "exited");
            print_line(&rec, &cfg)?;
        }
        Command::Delete { id } => {
            let removed = store.delete(id).await?;
            if removed {
                println!("deleted {id}");
            } else {
                println!("{id} not found (nothing to do)");
            }
        }
        Command::Report { kind, date } => {
            let kind = RecKind::parse(&kind)?;
            let date = date.as_deref().map(parse_date).transpose()?;
            let filter = ListFilter {
                kind: Some(kind),
                date,
                ..Default::default()
            };
            let records = report::filter_and_sort(store.list(), &filter);
            let daily = report::daily_report(&records, &cfg, date)?;
            // Intraday totals are rupees; swing totals are percent points.
            let fmt = |v: f64| match kind {
                RecKind::Intraday => report::format_currency(v),
                RecKind::Swing => report::format_percent(v),
            };
            println!(
                "trades: {} | wins: {} | win rate: {}",
                daily.total_trades,
                daily.successful_trades,
                report::format_percent(daily.win_rate)
            );
            println!(
                "profit: {} | loss: {} | net: {}",
                fmt(daily.total_profit),
                fmt(daily.total_loss),
                fmt(daily.net_profit_loss)
            );
        }
    }

    Ok(())
}

fn print_line(rec: &Recommendation, cfg: &ValuationConfig) -> anyhow::Result<()> {
    let v = valuation::value(rec, cfg)?;
    let status = match v.status {
        Status::Open => "OPEN",
        Status::Exit => "EXIT",
    };
    let exit_label = rec
        .exit
        .as_ref()
        .map(|e| report::format_exit_reason(e.reason, e.price))
        .unwrap_or_default();
    println!(
        "{} {:<12} {:<5} entry {:.2} now {:.2} rr {:.2} [{}] {} {}",
        rec.id,
        rec.stock_symbol,
        rec.trade_side.as_str(),
        rec.entry_price,
        rec.current_price,
        v.risk_reward,
        status,
        report::format_percent(v.profit_loss_percent),
        exit_label
    );
    Ok(())
}

fn parse_status(s: &str) -> anyhow::Result<Status> {
    match s {
        "OPEN" => Ok(Status::Open),
        "EXIT" => Ok(Status::Exit),
        other => anyhow::bail!("unknown status: {other}"),
    }
}

fn parse_date(s: &str) -> anyhow::Result<chrono::NaiveDate> {
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("bad date (want YYYY-MM-DD): {s}"))
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
