//! gmaps-grid main entry point
//!
//! This is the command-line interface for the tiled map crawler.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use gmaps_grid::browser::{
    parse_proxy_sources, AnchorDiscoverer, Collaborators, HtmlPlaceExtractor, HttpDriver,
    ProxyPool,
};
use gmaps_grid::config::{load_config_with_hash, validate, Config, ProxyStrategy};
use gmaps_grid::crawler::{CityCrawlDriver, CrawlRequest, Rerunner};
use gmaps_grid::geo::OverpassClient;
use gmaps_grid::state::{PlaceStatus, TileStatus};
use gmaps_grid::storage::{open_storage, FailedPlaceFilter, Storage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// gmaps-grid: a resumable, tiled crawl of map search results
///
/// A city is covered with overlapping map tiles. Each tile is searched, every result is
/// extracted, and progress is kept in SQLite so an interrupted crawl picks up where it
/// stopped.
#[derive(Parser, Debug)]
#[command(name = "gmaps-grid")]
#[command(version)]
#[command(about = "Resumable tiled crawl of map search results", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// SQLite database path (overrides the configuration)
    #[arg(long, global = true, value_name = "PATH")]
    db_path: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl one city for one search query
    RunCity(RunCityArgs),

    /// Re-extract failed places
    RerunFailed(RerunFailedArgs),

    /// Re-extract a single place by id
    RerunPlace {
        /// Place id
        place_id: String,
    },

    /// Show tile and place counts from the database
    Stats {
        city: String,
        query: String,
    },
}

#[derive(Args, Debug)]
struct RunCityArgs {
    city: String,
    query: String,

    /// Country used to disambiguate the city boundary
    #[arg(long)]
    country: Option<String>,

    /// Interface language of the search pages
    #[arg(long)]
    language: Option<String>,

    /// Map zoom level
    #[arg(long)]
    zoom: Option<u8>,

    /// Run the browser headless
    #[arg(long)]
    headless: bool,

    /// Extraction workers (tabs) per tile
    #[arg(long)]
    workers: Option<usize>,

    /// Proxy URL; may be repeated
    #[arg(long = "proxy", value_name = "URL")]
    proxies: Vec<String>,

    /// Comma-separated proxy list
    #[arg(long)]
    proxy_list: Option<String>,

    /// File with one proxy per line
    #[arg(long)]
    proxy_file: Option<PathBuf>,

    /// Proxy rotation: round_robin or random
    #[arg(long)]
    proxy_strategy: Option<ProxyStrategy>,

    /// Explicit cell width in km (requires --cell-height-km)
    #[arg(long, requires = "cell_height_km")]
    cell_width_km: Option<f64>,

    /// Explicit cell height in km (requires --cell-width-km)
    #[arg(long, requires = "cell_width_km")]
    cell_height_km: Option<f64>,

    /// Skip the end-of-run re-extraction of failed places
    #[arg(long)]
    no_retry_failed: bool,
}

#[derive(Args, Debug)]
struct RerunFailedArgs {
    #[arg(long)]
    city: Option<String>,

    #[arg(long)]
    query: Option<String>,

    /// Maximum number of places to re-extract
    #[arg(long)]
    limit: Option<usize>,

    /// Places re-extracted concurrently
    #[arg(long)]
    workers: Option<usize>,

    /// Only places whose last error is one of these codes; may be repeated
    #[arg(long = "only-errors", value_name = "CODE")]
    only_errors: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    let (mut config, config_hash) = load_config_with_hash(cli.config.as_deref())
        .context("failed to load configuration")?;
    if let Some(path) = &cli.config {
        tracing::info!("Configuration loaded from {}", path.display());
    }
    if let Some(db_path) = &cli.db_path {
        config.storage.database_path = db_path.display().to_string();
    }

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    match cli.command {
        Command::RunCity(args) => handle_run_city(config, config_hash, args, cancel).await,
        Command::RerunFailed(args) => handle_rerun_failed(config, args, cancel).await,
        Command::RerunPlace { place_id } => handle_rerun_place(config, &place_id, cancel).await,
        Command::Stats { city, query } => handle_stats(&config, &city, &query),
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("gmaps_grid=info,warn"),
            1 => EnvFilter::new("gmaps_grid=debug,info"),
            2 => EnvFilter::new("gmaps_grid=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Cancels the crawl on the first Ctrl-C
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight work");
            cancel.cancel();
        }
    });
}

fn open_store(config: &Config) -> anyhow::Result<Arc<dyn Storage>> {
    let path = Path::new(&config.storage.database_path);
    let storage = open_storage(path)
        .with_context(|| format!("failed to open database {}", path.display()))?;
    let storage: Arc<dyn Storage> = Arc::new(storage);
    Ok(storage)
}

fn collaborators() -> Collaborators {
    Collaborators {
        driver: Arc::new(HttpDriver::new()),
        discoverer: Arc::new(AnchorDiscoverer),
        extractor: Arc::new(HtmlPlaceExtractor::new()),
    }
}

/// Applies command-line overrides on top of file and environment values
fn apply_run_args(config: &mut Config, args: &RunCityArgs) {
    let crawl = &mut config.crawl;
    if let Some(language) = &args.language {
        crawl.language = language.clone();
    }
    if let Some(zoom) = args.zoom {
        crawl.zoom = zoom;
    }
    if args.headless {
        crawl.headless = true;
    }
    if let Some(workers) = args.workers {
        crawl.workers = workers;
    }
    if args.cell_width_km.is_some() {
        crawl.cell_width_km = args.cell_width_km;
        crawl.cell_height_km = args.cell_height_km;
    }

    if args.no_retry_failed {
        config.rerun.enabled = false;
    }

    let proxy = &mut config.proxy;
    proxy.proxies.extend(args.proxies.iter().cloned());
    if let Some(list) = &args.proxy_list {
        proxy.list = Some(list.clone());
    }
    if let Some(file) = &args.proxy_file {
        proxy.file = Some(file.display().to_string());
    }
    if let Some(strategy) = args.proxy_strategy {
        proxy.strategy = strategy;
    }
}

/// Handles the run-city command
async fn handle_run_city(
    mut config: Config,
    config_hash: Option<String>,
    args: RunCityArgs,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    apply_run_args(&mut config, &args);
    validate(&config).context("invalid command-line settings")?;

    let proxies = parse_proxy_sources(
        &config.proxy.proxies,
        config.proxy.list.as_deref(),
        config.proxy.file.as_deref().map(Path::new),
    )
    .context("failed to read proxy sources")?;
    if !proxies.is_empty() {
        tracing::info!(
            "Loaded {} proxies ({:?} rotation)",
            proxies.len(),
            config.proxy.strategy
        );
    }
    let proxies = Arc::new(ProxyPool::new(proxies, config.proxy.strategy));

    let geocoding = &config.geocoding;
    let bbox_source = OverpassClient::new(
        geocoding.endpoints.clone(),
        geocoding.cache_path.as_ref().map(PathBuf::from),
        Duration::from_secs(geocoding.timeout_secs),
    )
    .context("failed to build boundary lookup client")?;

    let storage = open_store(&config)?;
    let request = CrawlRequest {
        city: args.city,
        country: args.country,
        query: args.query,
        config_hash,
    };

    let driver = CityCrawlDriver::new(
        config,
        collaborators(),
        storage,
        Arc::new(bbox_source),
        proxies,
    );
    let summary = driver
        .run(&request, &cancel)
        .await
        .with_context(|| format!("crawl of {} failed", request.city))?;

    if summary.interrupted {
        tracing::info!("Crawl interrupted; run the same command again to resume");
    } else {
        tracing::info!("Crawl completed successfully");
    }
    Ok(())
}

/// Handles the rerun-failed command
async fn handle_rerun_failed(
    config: Config,
    args: RerunFailedArgs,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let storage = open_store(&config)?;
    let filter = FailedPlaceFilter {
        city: args.city,
        query: args.query,
        error_codes: if args.only_errors.is_empty() {
            config.rerun.only_errors.clone()
        } else {
            args.only_errors
        },
    };
    let limit = args.limit.or(config.rerun.limit);
    let workers = args.workers.unwrap_or(config.rerun.workers);

    let rerunner = Rerunner::new(&config, collaborators(), storage);
    let summary = rerunner
        .rerun_failed(&filter, limit, workers, &cancel)
        .await
        .context("rerun of failed places failed")?;

    println!(
        "selected={} attempted={} succeeded={} failed={}",
        summary.selected, summary.attempted, summary.succeeded, summary.failed
    );
    Ok(())
}

/// Handles the rerun-place command
async fn handle_rerun_place(
    config: Config,
    place_id: &str,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let storage = open_store(&config)?;
    let rerunner = Rerunner::new(&config, collaborators(), storage);
    let status = rerunner
        .rerun_place(place_id, &cancel)
        .await
        .with_context(|| format!("rerun of place {} failed", place_id))?;

    println!("{} {}", place_id, status);
    Ok(())
}

/// Handles the stats command
fn handle_stats(config: &Config, city: &str, query: &str) -> anyhow::Result<()> {
    let storage = open_store(config)?;
    let tiles = storage
        .tile_status_summary(city, query)
        .context("failed to read tile summary")?;

    println!("Database: {}\n", config.storage.database_path);
    println!("Tiles for '{}' in {}:", query, city);
    for status in [
        TileStatus::Pending,
        TileStatus::InProgress,
        TileStatus::Completed,
        TileStatus::Failed,
    ] {
        println!("  {:<12} {}", status, tiles.get(&status).copied().unwrap_or(0));
    }

    println!("\nPlaces (all cities):");
    for status in [PlaceStatus::Success, PlaceStatus::Failed] {
        let count = storage
            .count_places_by_status(status)
            .context("failed to count places")?;
        println!("  {:<12} {}", status, count);
    }
    Ok(())
}
