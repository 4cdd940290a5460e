//! geoseed - jurisdiction and population seeding pipeline
//!
//! One binary serves both roles: `geoseed run` orchestrates a whole run,
//! and the phase subcommands (`population`, `load-tiles`, ...) are what the
//! orchestrator spawns as isolated worker processes. They can also be run
//! by hand.
//!
//! Exit status: 0 completed, 2 completed with per-task failures, 1 fatal.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use geoseed_common::PipelineConfig;
use geoseed_etl::checkpoint::Ledger;
use geoseed_etl::db::{self, jurisdictions};
use geoseed_etl::geometry;
use geoseed_etl::logging;
use geoseed_etl::selection::Selection;
use geoseed_etl::services::pipeline_orchestrator::{WorkerPaths, EXIT_FATAL, EXIT_TASK_FAILURES};
use geoseed_etl::services::{
    population_in_polygon, BoundaryImporter, HierarchyRepair, OverlayOptions, PipelineOrchestrator,
    PopulationOverlay, RunOptions, TileLoader,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info, warn};

/// Command-line arguments for geoseed
#[derive(Parser, Debug)]
#[command(name = "geoseed")]
#[command(about = "Seed the jurisdiction tree from boundary files and population rasters")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, env = "GEOSEED_CONFIG")]
    config: Option<PathBuf>,

    /// Spatial store (SQLite database file)
    #[arg(long, global = true, env = "GEOSEED_DATABASE")]
    database: Option<PathBuf>,

    /// Progress ledger (JSON file)
    #[arg(long, global = true, env = "GEOSEED_LEDGER")]
    ledger: Option<PathBuf>,

    /// Append log output to this file as well as the console
    #[arg(long, global = true, env = "GEOSEED_LOG_FILE")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

/// Country / level scope shared by the phase subcommands
#[derive(Args, Debug, Clone, Default)]
struct ScopeArgs {
    /// ISO3 codes, comma separated (default: every country)
    #[arg(long, value_delimiter = ',')]
    countries: Vec<String>,

    /// Source ADM levels 0-5, comma separated (default: all)
    #[arg(long, value_delimiter = ',', value_parser = clap::value_parser!(u8).range(0..=5))]
    adm_levels: Vec<u8>,
}

impl ScopeArgs {
    fn selection(&self) -> Selection {
        Selection::new(&self.countries, &self.adm_levels)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run Phase 1, then Phase 2 and tile loading in worker processes
    Run {
        #[command(flatten)]
        scope: ScopeArgs,

        /// Stop after Phase 1
        #[arg(long)]
        skip_population: bool,

        /// Also load raster tiles (implies Phase 2)
        #[arg(long)]
        load_tiles: bool,

        /// Purge the scope and start over
        #[arg(long, conflicts_with = "resume")]
        fresh: bool,

        /// Continue from the ledger (default)
        #[arg(long)]
        resume: bool,

        /// Stop Phase 2 after this many chunks
        #[arg(long)]
        max_chunks: Option<usize>,
    },

    /// Phase 1 only: import boundary files
    Boundaries {
        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Phase 2 only: overlay population rasters
    Population {
        #[command(flatten)]
        scope: ScopeArgs,

        /// Stop after this many chunks
        #[arg(long)]
        max_chunks: Option<usize>,
    },

    /// Slice population rasters into stored tiles
    LoadTiles {
        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Re-attach jurisdictions that have no parent
    RepairHierarchy {
        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Rebuild population progress from what the store already holds
    RebuildLedger,

    /// Population of a polygon from stored tiles
    QueryPopulation {
        /// ISO3 code whose tiles are summed
        #[arg(long)]
        country: String,

        /// GeoJSON geometry or feature, inline or as a file path
        #[arg(long)]
        geojson: String,

        /// Raster year (default: configured year)
        #[arg(long)]
        year: Option<i32>,
    },
}

impl Command {
    /// Input folders this command cannot run without
    fn required_dirs(&self, config: &PipelineConfig) -> Vec<(&'static str, PathBuf)> {
        let boundaries = ("boundaries", config.paths.boundaries_dir());
        let population = ("population", config.paths.population_dir());
        match self {
            Command::Run {
                skip_population,
                load_tiles,
                ..
            } => {
                if *skip_population && !*load_tiles {
                    vec![boundaries]
                } else {
                    vec![boundaries, population]
                }
            }
            Command::Boundaries { .. } => vec![boundaries],
            Command::Population { .. } | Command::LoadTiles { .. } => vec![population],
            _ => Vec::new(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init(cli.log_file.as_deref()) {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::from(EXIT_FATAL as u8);
    }

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("Fatal: {:#}", e);
            ExitCode::from(EXIT_FATAL as u8)
        }
    }
}

async fn run(cli: Cli) -> Result<u8> {
    info!("Starting geoseed {}", env!("CARGO_PKG_VERSION"));

    let mut config =
        PipelineConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(database) = &cli.database {
        config.paths.database = Some(database.clone());
    }
    if let Some(ledger) = &cli.ledger {
        config.paths.ledger = Some(ledger.clone());
    }

    for (name, dir) in cli.command.required_dirs(&config) {
        if !dir.is_dir() {
            bail!("{} data directory not found: {}", name, dir.display());
        }
    }

    let ledger_path = config.paths.ledger();
    let mut ledger = Ledger::open_file(&ledger_path)
        .with_context(|| format!("Failed to read ledger {}", ledger_path.display()))?;

    let db_path = config.paths.database();
    info!("Database: {}", db_path.display());
    let pool = db::open_store(&db_path, &config.store)
        .await
        .with_context(|| format!("Failed to open spatial store {}", db_path.display()))?;

    let code = match cli.command {
        Command::Run {
            scope,
            skip_population,
            load_tiles,
            fresh,
            resume: _,
            max_chunks,
        } => {
            let options = RunOptions {
                selection: scope.selection(),
                fresh,
                skip_population,
                load_tiles,
                max_chunks,
                log_file: cli.log_file.clone(),
            };
            let workers = WorkerPaths::current(cli.config.clone(), db_path, ledger_path)?;
            let orchestrator = PipelineOrchestrator::new(pool.clone(), config, workers);
            let summary = orchestrator.execute(&mut ledger, &options).await?;
            summary.outcome().exit_code()
        }
        Command::Boundaries { scope } => {
            let stats = BoundaryImporter::new(&pool, &config)
                .run(&mut ledger, &scope.selection())
                .await?;
            failures_exit(stats.files_failed)
        }
        Command::Population { scope, max_chunks } => {
            let stats = PopulationOverlay::new(&pool, &config)
                .run(&mut ledger, &scope.selection(), &OverlayOptions { max_chunks })
                .await?;
            failures_exit(stats.countries_failed)
        }
        Command::LoadTiles { scope } => {
            let stats = TileLoader::new(&pool, &config)
                .run(&mut ledger, &scope.selection())
                .await?;
            failures_exit(stats.countries_failed)
        }
        Command::RepairHierarchy { scope } => {
            let earth_id = match ledger.earth_id() {
                Some(id) => id.to_string(),
                None => jurisdictions::ensure_earth(&pool).await?,
            };
            let report = HierarchyRepair::new(
                &pool,
                config.population.fetch_chunk_size,
                config.store.max_lock_wait_ms,
            )
            .run(&earth_id, &scope.selection())
            .await?;
            println!("{}", report.display_string());
            if report.unresolved() > 0 {
                warn!(unresolved = report.unresolved(), "Orphans remain");
            }
            0
        }
        Command::RebuildLedger => {
            let pairs = jurisdictions::populated_pairs(&pool).await?;
            let marked = ledger.rebuild_from_store(&pairs)?;
            println!("{} populated (country, level) pairs marked done", marked);
            0
        }
        Command::QueryPopulation {
            country,
            geojson,
            year,
        } => {
            let polygon = read_polygon(&geojson)?;
            let year = year.unwrap_or(config.population.year);
            let population = population_in_polygon(&pool, &country, &polygon, year).await?;
            println!("{}", population);
            0
        }
    };

    pool.close().await;
    Ok(code)
}

fn failures_exit(failed: usize) -> u8 {
    if failed > 0 {
        EXIT_TASK_FAILURES as u8
    } else {
        0
    }
}

/// Inline GeoJSON, or the contents of the file it names
fn read_polygon(arg: &str) -> Result<geo::MultiPolygon<f64>> {
    let path = Path::new(arg);
    let text = if path.is_file() {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?
    } else {
        arg.to_string()
    };
    Ok(geometry::from_geojson_text(&text)?)
}
