use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use txretry::{
    CartItem, CartService, DbError, InMemoryCartItemDao, RetryConfig, RetryExecutor,
    TokioSleeper, TracingObserver,
};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "txretry")]
#[command(about = "Insert a cart item under the transaction retry policy, with injected failures")]
struct Cli {
    /// JSON retry config; otherwise TXRETRY_* environment variables are used
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    max_attempts: Option<u32>,

    #[arg(long)]
    initial_delay_ms: Option<u64>,

    #[arg(long)]
    backoff_multiplier: Option<f64>,

    /// How many inserts fail before one succeeds
    #[arg(long, default_value_t = 2)]
    failures: usize,

    /// Kind of failure to inject
    #[arg(long, value_enum, default_value_t = FailureKind::Conflict)]
    failure: FailureKind,

    #[arg(long, default_value_t = 1)]
    quantity: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FailureKind {
    /// Driver error with SQLSTATE 40001
    Conflict,
    /// Data access error wrapping SQLSTATE 40001
    WrappedConflict,
    /// Generic SQL error
    Sql,
    /// Validation error
    Validation,
}

impl FailureKind {
    fn to_error(self) -> DbError {
        match self {
            Self::Conflict => DbError::serialization_failure("restart transaction: WriteTooOld"),
            Self::WrappedConflict => DbError::data_access(
                "could not execute statement",
                DbError::serialization_failure("restart transaction: WriteTooOld"),
            ),
            Self::Sql => DbError::Sql("connection reset by peer".into()),
            Self::Validation => DbError::Validation("cart does not exist".into()),
        }
    }
}

fn load_config(cli: &Cli) -> Result<RetryConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            RetryConfig::from_json(&raw)
                .with_context(|| format!("Invalid retry config in {}", path.display()))?
        }
        None => RetryConfig::from_env().context("Invalid TXRETRY_* environment")?,
    };

    if let Some(max_attempts) = cli.max_attempts {
        config = config.max_attempts(max_attempts);
    }
    if let Some(ms) = cli.initial_delay_ms {
        config = config.initial_delay(Duration::from_millis(ms));
    }
    if let Some(multiplier) = cli.backoff_multiplier {
        config = config.backoff_multiplier(multiplier);
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    let executor = RetryExecutor::new(config)
        .context("Invalid retry configuration")?
        .with_sleeper(Arc::new(TokioSleeper::with_shutdown(shutdown_rx)))
        .with_observer(Arc::new(TracingObserver));

    let dao = Arc::new(InMemoryCartItemDao::new());
    for _ in 0..cli.failures {
        dao.fail_next(cli.failure.to_error())?;
    }

    let service = CartService::new(dao.clone(), executor);
    let item = CartItem::new(Uuid::new_v4(), Uuid::new_v4(), cli.quantity, 1_999);

    info!(
        config = ?service.executor().config(),
        retry_generic_errors = service.executor().classifier().retries_generic_errors(),
        line_total_cents = item.total_cents(),
        failures = cli.failures,
        failure = ?cli.failure,
        "adding item to cart"
    );

    match service.add_item_to_cart(&item).await {
        Ok(id) => {
            info!(%id, attempts = dao.insert_calls(), "cart item inserted");
            Ok(())
        }
        Err(err) => bail!(
            "cart insert failed after {} attempts: {}",
            dao.insert_calls(),
            err
        ),
    }
}
