//! Agri Cache - Offline-first data cache and sync queue for farm advisory apps

use agri_core::{
    BackgroundTasks, CacheManager, ConnectivityMonitor, DataService, HttpFetcher,
    HttpSyncDispatcher, OfflineCoordinator, SyncDispatcher, SyncQueue, SystemClock, TcpProbe,
    TtlPolicy, spawn_sweep_task,
};
use agri_db::{CacheKind, Database, NewField};
use agri_proxy::{MarketClient, RetryPolicy, SoilClient, SyncClient, WeatherClient};
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;

use config::{ApiConfig, Config, LoggingConfig};

/// Agri Cache - Offline-first data cache and sync queue
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    /// Database URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Monitor connectivity, drain the sync queue when online and sweep
    /// expired rows until Ctrl-C (default)
    Run,
    /// Current weather, or a daily forecast with --days
    Weather {
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        lon: f64,
        #[arg(long)]
        days: Option<u32>,
        /// Bypass the cache
        #[arg(long)]
        refresh: bool,
    },
    /// Soil properties at a location
    Soil {
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        lon: f64,
        #[arg(long)]
        refresh: bool,
    },
    /// Mandi prices for a commodity
    Market {
        #[arg(long)]
        commodity: String,
        #[arg(long)]
        state: Option<String>,
        #[arg(long)]
        refresh: bool,
    },
    /// Cache and sync queue statistics
    Stats,
    /// Delete expired cache rows and completed sync items
    Sweep,
    /// Manual offline mode
    Offline {
        #[command(subcommand)]
        command: OfflineCommand,
    },
    /// Sync queue management
    Sync {
        #[command(subcommand)]
        command: SyncCommand,
    },
    /// Queue a local change for delivery
    Enqueue {
        #[arg(long)]
        entity_type: String,
        #[arg(long)]
        entity_id: Option<i64>,
        #[arg(long, value_enum)]
        action: ActionArg,
        /// JSON document
        #[arg(long, default_value = "{}")]
        payload: String,
    },
    /// Farmer's fields
    Field {
        #[command(subcommand)]
        command: FieldCommand,
    },
    /// Write a default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
enum OfflineCommand {
    On,
    Off,
    Status,
}

#[derive(Subcommand, Debug)]
enum SyncCommand {
    /// Per-status counts and failed items
    Status,
    /// Show one queued item
    Show { id: i64 },
    /// Give a failed item a fresh retry budget
    Retry { id: i64 },
    /// Delete failed items
    PurgeFailed,
    /// Deliver pending items now
    Drain,
}

#[derive(Subcommand, Debug)]
enum FieldCommand {
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        size: f64,
        /// "acres" or "hectares"
        #[arg(long, default_value = "acres")]
        unit: String,
        #[arg(long, allow_negative_numbers = true, requires = "lon")]
        lat: Option<f64>,
        #[arg(long, allow_negative_numbers = true, requires = "lat")]
        lon: Option<f64>,
        #[arg(long)]
        crop: Option<String>,
    },
    List,
    /// Delete a field together with its soil and recommendation rows
    Delete { id: i64 },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ActionArg {
    Create,
    Update,
    Delete,
}

impl From<ActionArg> for agri_db::SyncAction {
    fn from(action: ActionArg) -> Self {
        match action {
            ActionArg::Create => agri_db::SyncAction::Create,
            ActionArg::Update => agri_db::SyncAction::Update,
            ActionArg::Delete => agri_db::SyncAction::Delete,
        }
    }
}

/// Services shared by every command
struct App {
    config: Config,
    db: Database,
    cache: Arc<CacheManager>,
    queue: Arc<SyncQueue>,
}

impl App {
    async fn open(config: Config) -> Result<Self> {
        if let Some(dir) = config.database.data_dir() {
            tokio::fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("Failed to create data directory {:?}", dir))?;
        }

        let db = Database::new(&config.database.url)
            .await
            .context("Failed to open database")?;

        let clock = Arc::new(SystemClock);
        let ttl = TtlPolicy::from_config(&config.cache)?;
        let cache = Arc::new(CacheManager::new(db.clone(), ttl, clock.clone()));
        let queue = Arc::new(SyncQueue::new(db.clone(), clock));

        Ok(Self {
            config,
            db,
            cache,
            queue,
        })
    }

    async fn coordinator(&self) -> Arc<OfflineCoordinator> {
        let probe = Arc::new(TcpProbe::new(self.config.connectivity.probe_host.clone()));
        let monitor = Arc::new(ConnectivityMonitor::new(probe));
        OfflineCoordinator::new(self.db.clone(), monitor, self.config.connectivity.clone()).await
    }

    /// Data service for one-shot lookups; probes once so the offline
    /// state is known before fetching
    async fn service(&self) -> Result<DataService<HttpFetcher>> {
        let coordinator = self.coordinator().await;
        if !coordinator.is_manual_offline() {
            coordinator
                .monitor()
                .probe(self.config.connectivity.probe_timeout())
                .await;
        }

        let fetcher = http_fetcher(&self.config.api)?;
        Ok(DataService::new(self.cache.clone(), fetcher).with_offline(coordinator))
    }

    fn dispatcher(&self) -> Result<Option<Arc<dyn SyncDispatcher>>> {
        let Some(endpoint) = &self.config.sync.endpoint else {
            return Ok(None);
        };
        let client = SyncClient::new(endpoint, retry_policy(&self.config.api))?;
        Ok(Some(Arc::new(HttpSyncDispatcher::new(client))))
    }
}

fn retry_policy(api: &ApiConfig) -> RetryPolicy {
    RetryPolicy {
        max_retries: api.max_retries,
        backoff_factor: api.backoff_factor,
        ..RetryPolicy::default()
    }
}

fn http_fetcher(api: &ApiConfig) -> Result<HttpFetcher> {
    let retry = retry_policy(api);

    let weather = match &api.weather_api_key {
        Some(key) => Some(WeatherClient::new(&api.weather_base_url, key, retry.clone())?),
        None => {
            warn!("WEATHER_API_KEY not set, weather is served from cache only");
            None
        }
    };
    let market = match &api.market_api_key {
        Some(key) => Some(MarketClient::new(&api.market_base_url, key, retry.clone())?),
        None => {
            warn!("AGMARKNET_API_KEY not set, market prices are served from cache only");
            None
        }
    };
    let soil = SoilClient::new(&api.soil_base_url, retry)?;

    Ok(HttpFetcher::new(weather, soil, market))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration
    let (mut config, ignored) = Config::load(&args.config)?;
    if let Some(url) = args.database_url {
        config.database.url = url;
    }

    // Initialize logging
    init_logging(&config.logging);
    for message in &ignored {
        warn!("{}", message);
    }

    let command = args.command.unwrap_or(Command::Run);
    if let Command::InitConfig { force } = command {
        return init_config(&args.config, force);
    }

    let app = App::open(config).await?;
    let outcome = execute(&app, command).await;
    app.db.close().await;
    outcome
}

async fn execute(app: &App, command: Command) -> Result<()> {
    match command {
        Command::Run => run(app).await,
        Command::Weather {
            lat,
            lon,
            days,
            refresh,
        } => {
            let service = app.service().await?;
            match days {
                Some(days) => print_json(&service.forecast(lat, lon, days, refresh).await?),
                None => print_json(&service.current_weather(lat, lon, refresh).await?),
            }
        }
        Command::Soil { lat, lon, refresh } => {
            let service = app.service().await?;
            print_json(&service.soil(lat, lon, refresh).await?)
        }
        Command::Market {
            commodity,
            state,
            refresh,
        } => {
            let service = app.service().await?;
            print_json(
                &service
                    .market_prices(&commodity, state.as_deref(), refresh)
                    .await?,
            )
        }
        Command::Stats => print_json(&serde_json::json!({
            "database_healthy": app.db.health_check().await,
            "cache": app.cache.stats().await,
            "ttl_hours": CacheKind::ALL
                .iter()
                .map(|kind| (kind.as_str(), app.cache.ttl().ttl(*kind).num_hours()))
                .collect::<std::collections::BTreeMap<_, _>>(),
            "sync": app.queue.stats().await,
        })),
        Command::Sweep => {
            let swept = app.cache.sweep_all().await;
            let purged = app.queue.purge_completed().await;
            print_json(&serde_json::json!({
                "swept": swept,
                "sync_purged": purged,
            }))
        }
        Command::Offline { command } => offline(app, command).await,
        Command::Sync { command } => sync(app, command).await,
        Command::Enqueue {
            entity_type,
            entity_id,
            action,
            payload,
        } => {
            let payload: serde_json::Value =
                serde_json::from_str(&payload).context("Payload is not valid JSON")?;
            match app
                .queue
                .enqueue(&entity_type, entity_id, action.into(), payload)
                .await?
            {
                Some(item) => print_json(&item),
                None => bail!("Could not queue the change, see the log for details"),
            }
        }
        Command::Field { command } => field(app, command).await,
        Command::InitConfig { .. } => Ok(()),
    }
}

async fn run(app: &App) -> Result<()> {
    info!("Starting Agri Cache v{}", env!("CARGO_PKG_VERSION"));

    let coordinator = app.coordinator().await;
    let mut tasks = BackgroundTasks::new();

    let monitoring = coordinator.start_monitoring(tasks.stop_signal());
    tasks.push("connectivity", monitoring);

    match app.dispatcher()? {
        Some(dispatcher) => {
            let drain = coordinator.spawn_drain_on_online(
                app.queue.clone(),
                dispatcher,
                app.config.sync.retry_limit,
                tasks.stop_signal(),
            );
            tasks.push("sync-drain", drain);
        }
        None => info!("No sync endpoint configured, queued changes stay local"),
    }

    let maintenance = spawn_sweep_task(
        app.cache.clone(),
        Some(app.queue.clone()),
        app.config.maintenance.sweep_interval(),
        tasks.stop_signal(),
    );
    tasks.push("maintenance", maintenance);

    shutdown_signal().await;

    let total = tasks.len();
    let stopped = tasks
        .shutdown(app.config.connectivity.shutdown_timeout())
        .await;
    info!("Stopped {}/{} background tasks", stopped, total);
    Ok(())
}

async fn offline(app: &App, command: OfflineCommand) -> Result<()> {
    let coordinator = app.coordinator().await;
    match command {
        OfflineCommand::On => {
            if !coordinator.enable_manual_offline().await {
                bail!("Could not save offline mode");
            }
        }
        OfflineCommand::Off => {
            if !coordinator.disable_manual_offline().await {
                bail!("Could not save offline mode");
            }
        }
        OfflineCommand::Status => {
            coordinator
                .monitor()
                .probe(app.config.connectivity.probe_timeout())
                .await;
        }
    }
    print_json(&coordinator.status())
}

async fn sync(app: &App, command: SyncCommand) -> Result<()> {
    match command {
        SyncCommand::Status => print_json(&serde_json::json!({
            "stats": app.queue.stats().await,
            "failed": app.queue.failed().await,
        })),
        SyncCommand::Show { id } => match app.queue.get(id).await {
            Some(item) => print_json(&item),
            None => bail!("Sync item {} not found", id),
        },
        SyncCommand::Retry { id } => match app.queue.requeue_failed(id).await {
            Some(item) => print_json(&item),
            None => bail!("Sync item {} is not in the failed state", id),
        },
        SyncCommand::PurgeFailed => print_json(&serde_json::json!({
            "purged": app.queue.purge_failed().await,
        })),
        SyncCommand::Drain => {
            let Some(dispatcher) = app.dispatcher()? else {
                bail!("No sync endpoint configured (set SYNC_ENDPOINT or [sync] endpoint)");
            };
            let coordinator = app.coordinator().await;
            if coordinator.is_manual_offline() {
                bail!("Manual offline mode is on; run `offline off` first");
            }
            let report = app
                .queue
                .drain(dispatcher.as_ref(), app.config.sync.retry_limit)
                .await;
            print_json(&report)
        }
    }
}

async fn field(app: &App, command: FieldCommand) -> Result<()> {
    match command {
        FieldCommand::Add {
            name,
            size,
            unit,
            lat,
            lon,
            crop,
        } => {
            if name.trim().is_empty() || !(size.is_finite() && size > 0.0) {
                bail!("A field needs a name and a positive size");
            }
            if let (Some(lat), Some(lon)) = (lat, lon) {
                agri_core::validate::location(lat, lon)?;
            }
            let field = app
                .db
                .insert_field(NewField {
                    name: name.trim().to_string(),
                    size_value: size,
                    size_unit: unit,
                    latitude: lat,
                    longitude: lon,
                    current_crop: crop,
                })
                .await?;
            print_json(&field)
        }
        FieldCommand::List => print_json(&app.db.list_fields().await?),
        FieldCommand::Delete { id } => {
            if !app.db.delete_field(id).await? {
                bail!("Field {} not found", id);
            }
            print_json(&serde_json::json!({ "deleted": id }))
        }
    }
}

fn init_config(path: &str, force: bool) -> Result<()> {
    if Path::new(path).exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path);
    }
    Config::default().save(path)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", text);
    Ok(())
}

/// Initialize logging; logs go to stderr so command output stays clean
fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let registry = tracing_subscriber::registry().with(filter);

    if config.format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!("Failed to listen for Ctrl-C, shutting down: {}", e),
    }
}
