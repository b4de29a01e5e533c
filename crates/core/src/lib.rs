pub mod domain;
pub mod storage;

pub mod config {
    use anyhow::Context;

    pub const DEFAULT_INVESTMENT_AMOUNT: f64 = 100_000.0;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub sentry_dsn: Option<String>,
        pub admin_token: Option<String>,
        pub investment_amount: f64,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            let investment_amount = match std::env::var("INVESTMENT_AMOUNT").ok() {
                Some(s) => {
                    let v: f64 = s
                        .trim()
                        .parse()
                        .with_context(|| format!("INVESTMENT_AMOUNT is not a number: {s}"))?;
                    anyhow::ensure!(v > 0.0, "INVESTMENT_AMOUNT must be positive (got {v})");
                    v
                }
                None => DEFAULT_INVESTMENT_AMOUNT,
            };

            Ok(Self {
                database_url: std::env::var("DATABASE_URL").ok(),
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
                admin_token: std::env::var("ADMIN_TOKEN").ok(),
                investment_amount,
            })
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }

        pub fn require_admin_token(&self) -> anyhow::Result<&str> {
            self.admin_token
                .as_deref()
                .context("ADMIN_TOKEN is required")
        }
    }
}
