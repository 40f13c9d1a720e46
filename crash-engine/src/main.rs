//! Crash Engine CLI
//!
//! Entry point for the crash engine binary. Provides subcommands for:
//! - `run` - Start the round engine, deposit indexer, payout dispatcher,
//!   health monitor and bet/cashout API as one process
//! - `migrate` - Apply pending database migrations
//! - `version` - Show version information

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use eyre::WrapErr;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crash_engine::api::{self, AppState};
use crash_engine::config::{DatabaseSettings, LoggingSettings, MetricsSettings, Settings};
use crash_engine::engine::{EngineConfig, RoundEngine};
use crash_engine::fanout::EventFanout;
use crash_engine::health::HealthMonitor;
use crash_engine::indexer::{DepositIndexer, RpcChainClient};
use crash_engine::ledger::Ledger;
use crash_engine::payout::PayoutDispatcher;
use crash_engine::ports::SystemClock;
use crash_engine::solvency::{SolvencyGate, SolvencyLimits};
use crash_engine::store::{MemoryCache, PostgresStore};

/// How often the round engine re-checks whether its current phase has
/// elapsed. Well under a second so phase transitions feel immediate without
/// polling tightly enough to matter for CPU.
const TICK_INTERVAL: Duration = Duration::from_millis(250);

/// Crash Engine: server-authoritative crash gambling engine.
#[derive(Parser, Debug)]
#[command(name = "crash-engine")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration environment, selecting `config/{environment}.toml`.
    #[arg(long, env = "CRASH_ENVIRONMENT", default_value = "development")]
    environment: String,

    /// Load settings from this exact file instead of the environment layering.
    #[arg(long, env = "CRASH_CONFIG_FILE")]
    config_file: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the engine, indexer, payout dispatcher, health monitor and API.
    Run {
        /// Raw secp256k1 private key (hex) for the hot wallet. Never logged.
        #[arg(long, env = "HOT_WALLET_PRIVATE_KEY", hide_env_values = true)]
        hot_wallet_key: String,
    },

    /// Apply pending database migrations and exit.
    Migrate,

    /// Print the crate version and exit.
    Version,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let settings = if let Some(path) = &cli.config_file {
        Settings::from_file(path)
    } else {
        Settings::load(&cli.environment)
    }
    .wrap_err("failed to load configuration")?;

    init_logging(&settings.logging)?;

    if let Err(errors) = settings.validate() {
        for err in &errors {
            error!(error = %err, "invalid configuration");
        }
        eyre::bail!("{} configuration error(s), refusing to start", errors.len());
    }

    info!(version = crash_engine::VERSION, environment = %cli.environment, "starting crash engine");

    if settings.metrics.enabled {
        install_metrics(&settings.metrics)?;
    }

    match cli.command {
        Commands::Version => {
            println!("crash-engine {}", crash_engine::VERSION);
            Ok(())
        }
        Commands::Migrate => run_migrations(&settings).await,
        Commands::Run { hot_wallet_key } => run_service(settings, &hot_wallet_key).await,
    }
}

/// Initialize the tracing subscriber. `settings.format == "json"` drives a
/// structured layer; otherwise human-readable `fmt`. `file_path`, if set,
/// redirects output to a non-blocking file writer instead of stdout.
fn init_logging(settings: &LoggingSettings) -> eyre::Result<()> {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level));

    let (writer, guard) = match &settings.file_path {
        Some(path) => {
            let path = std::path::Path::new(path);
            let directory = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path
                .file_name()
                .ok_or_else(|| eyre::eyre!("logging.file_path has no file name component"))?;
            tracing_appender::non_blocking(tracing_appender::rolling::never(directory, file_name))
        }
        None => tracing_appender::non_blocking(std::io::stdout()),
    };
    // Leaked deliberately: the guard must outlive the process, and this
    // function only ever runs once at startup.
    Box::leak(Box::new(guard));

    let registry = tracing_subscriber::registry().with(filter);
    let init_result = if settings.format == "json" {
        registry.with(fmt::layer().json().with_writer(writer)).try_init()
    } else {
        registry.with(fmt::layer().with_writer(writer)).try_init()
    };
    init_result.map_err(|e| eyre::eyre!("failed to install tracing subscriber: {e}"))
}

/// Install the process-wide Prometheus recorder and start its scrape
/// listener on `settings.metrics.host:port`, separate from the API's own
/// bind address.
fn install_metrics(settings: &MetricsSettings) -> eyre::Result<()> {
    let addr: std::net::SocketAddr = settings.socket_addr().parse().wrap_err("invalid metrics.host/port")?;
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| eyre::eyre!("failed to install prometheus exporter: {e}"))?;
    info!(%addr, "metrics exporter listening");
    Ok(())
}

async fn connect_pool(settings: &DatabaseSettings) -> eyre::Result<sqlx::PgPool> {
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(settings.connect_timeout())
        .idle_timeout(settings.idle_timeout())
        .connect(&settings.url)
        .await
        .wrap_err("failed to connect to database")
}

async fn run_migrations(settings: &Settings) -> eyre::Result<()> {
    let pool = connect_pool(&settings.database).await?;
    let store = PostgresStore::new(pool);
    store.run_migrations().await.wrap_err("migration failed")?;
    info!("migrations applied");
    Ok(())
}

#[allow(clippy::too_many_lines)]
async fn run_service(settings: Settings, hot_wallet_key: &str) -> eyre::Result<()> {
    let pool = connect_pool(&settings.database).await?;
    let store = PostgresStore::new(pool);
    store.run_migrations().await.wrap_err("migration failed")?;

    let cache = Arc::new(MemoryCache::with_ttls(
        settings.cache.account_ttl(),
        settings.cache.total_liabilities_ttl(),
    ));
    let chain = Arc::new(
        RpcChainClient::connect(&settings.rpc.url, hot_wallet_key)
            .await
            .wrap_err("failed to connect to chain RPC")?,
    );

    let hot_wallet = chain.hot_wallet_address();
    if let Ok(configured) = settings.wallets.hot_wallet() {
        if configured != hot_wallet {
            warn!(
                %configured,
                derived = %hot_wallet,
                "wallets.hot_wallet_address does not match the signing key's address; using the derived address"
            );
        }
    }

    let solvency = Arc::new(SolvencyGate::new(SolvencyLimits {
        min_reserve_wei: settings.game.min_reserve_wei,
        max_liability_ratio: settings.game.max_liability_ratio,
        emergency_threshold: settings.game.emergency_threshold,
    }));
    let events = Arc::new(EventFanout::new(settings.game.resync_window()));

    let engine_ledger =
        Ledger::new(store.clone(), Arc::clone(&cache)).with_max_retries(settings.game.ledger_max_retries);
    let engine_config = EngineConfig {
        betting_duration_ms: settings.game.betting_duration_ms,
        cashout_duration_ms: settings.game.cashout_duration_ms,
        max_crash: settings.game.max_crash,
        house_edge_divisor: settings.game.house_edge_divisor,
        min_bet_wei: settings.game.min_bet_wei,
        max_bet_wei: settings.game.max_bet_wei,
        bet_cooldown_ms: settings.game.bet_cooldown_ms,
        cashout_buffer_ms: settings.game.cashout_buffer_ms,
    };

    let engine = Arc::new(
        RoundEngine::new(
            store.clone(),
            store.clone(),
            engine_ledger,
            Arc::clone(&chain),
            Arc::clone(&events),
            Arc::clone(&solvency),
            SystemClock::new(),
            engine_config,
            hot_wallet,
        )
        .await
        .wrap_err("failed to start round engine")?,
    );

    let (payout_tx, payout_rx) = mpsc::channel(256);

    let api_ledger = Arc::new(
        Ledger::new(store.clone(), Arc::clone(&cache)).with_max_retries(settings.game.ledger_max_retries),
    );

    let state = AppState {
        engine: Arc::clone(&engine),
        ledger: api_ledger,
        round_store: store.clone(),
        events: Arc::clone(&events),
        payouts: payout_tx,
        house_edge_divisor: settings.game.house_edge_divisor,
        max_crash: settings.game.max_crash,
        cache: Arc::clone(&cache),
        rate_limit_burst: settings.api.rate_limit.burst_size,
    };

    let deposit_indexer = DepositIndexer::new(
        store.clone(),
        Ledger::new(store.clone(), Arc::clone(&cache)).with_max_retries(settings.game.ledger_max_retries),
        Arc::clone(&chain),
        Arc::clone(&events),
        hot_wallet,
        &settings.game,
    );

    let payout_dispatcher = PayoutDispatcher::new(
        payout_rx,
        Arc::clone(&chain),
        Arc::clone(&events),
        hot_wallet,
        settings.game.min_reserve_wei,
    );

    let (health_monitor, health_rx) = HealthMonitor::new(
        store.clone(),
        store.clone(),
        Arc::clone(&chain),
        Arc::clone(&solvency),
        hot_wallet,
        settings.game.indexer_lag_ceiling_blocks,
        Duration::from_millis(settings.game.request_timeout_ms),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let router = api::router(state).merge(health_router(health_rx));
    let listener = tokio::net::TcpListener::bind(settings.api.socket_addr())
        .await
        .wrap_err("failed to bind API listener")?;
    info!(addr = %settings.api.socket_addr(), "API server listening");

    let indexer_rx = shutdown_rx.clone();
    let indexer_handle = tokio::spawn(async move { deposit_indexer.run(indexer_rx).await });
    let payout_handle = tokio::spawn(payout_dispatcher.run());
    let health_handle = tokio::spawn(async move { health_monitor.run().await });
    let tick_handle = tokio::spawn(tick_loop(engine, shutdown_rx));

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .wrap_err("API server error")?;

    info!("shutdown signal received, stopping background tasks");
    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(indexer_handle, payout_handle, health_handle, tick_handle);

    info!("crash engine stopped");
    Ok(())
}

/// Drive `RoundEngine::tick` on a fixed interval until told to stop.
async fn tick_loop<RS, BS, LS, LC, CC, EB, CL>(
    engine: Arc<RoundEngine<RS, BS, LS, LC, CC, EB, CL>>,
    mut shutdown: watch::Receiver<bool>,
) where
    RS: crash_engine::ports::RoundStore,
    BS: crash_engine::ports::BetStore,
    LS: crash_engine::ports::LedgerStore,
    LC: crash_engine::ports::Cache,
    CC: crash_engine::ports::ChainClient,
    EB: crash_engine::ports::EventBus,
    CL: crash_engine::ports::Clock,
{
    let mut interval = tokio::time::interval(TICK_INTERVAL);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(err) = engine.tick().await {
                    error!(error = %err, "round engine tick failed");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("round engine tick loop shutting down");
                    return;
                }
            }
        }
    }
}

/// A tiny router mounting only `GET /health`, merged into the main API
/// router. Kept separate from [`api::router`] so the health snapshot
/// receiver never has to join `AppState`'s own generic signature.
fn health_router(rx: watch::Receiver<crash_engine::health::HealthSnapshot>) -> axum::Router {
    axum::Router::new()
        .route("/health", axum::routing::get(health_handler))
        .with_state(rx)
}

async fn health_handler(
    axum::extract::State(rx): axum::extract::State<watch::Receiver<crash_engine::health::HealthSnapshot>>,
) -> axum::Json<crash_engine::health::HealthSnapshot> {
    axum::Json(rx.borrow().clone())
}

/// Resolves once SIGINT or (on Unix) SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => error!(error = %err, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { warn!("received Ctrl+C, starting graceful shutdown"); }
        () = terminate => { warn!("received SIGTERM, starting graceful shutdown"); }
    }
}
