//! Pipeline orchestrator
//!
//! Sequences a run over a country / level selection.
//!
//! # State Progression
//! SELECT SCOPE → [FRESH PURGE] → PHASE 1 → [PHASE 2] → [TILE LOAD] → DONE
//!
//! Each state is handled by a dedicated `phase_*` method:
//!
//! - **FRESH PURGE** (`phase_fresh`): clear ledger keys and stored rows of the scope
//! - **PHASE 1** (`phase_boundaries`): boundary import in-process, then orphan repair
//! - **PHASE 2** (`phase_population`): population overlay in a worker process
//! - **TILE LOAD** (`phase_tiles`): raster tile loading in a worker process
//!
//! # Process Isolation
//! Phase 2 and tile loading hold whole rasters and large geometry batches,
//! so they run as child processes of the same executable (`geoseed
//! population`, `geoseed load-tiles`). A worker receives only the scope
//! plus the config, database and ledger paths. The orchestrator saves the
//! ledger before spawning, leaves it alone while the worker runs, and
//! reloads it afterwards; the worker's exit status and the reloaded ledger
//! are the only things it observes.

use crate::checkpoint::Ledger;
use crate::selection::Selection;
use geoseed_common::{Error, PipelineConfig, Result};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::process::ExitStatus;
use tokio::process::Command;

mod phase_boundaries;
mod phase_fresh;
mod phase_population;
mod phase_tiles;
mod summary;

pub use summary::{RunSummary, SectionSummary};

/// Exit status of a worker that finished with per-task failures
pub const EXIT_TASK_FAILURES: i32 = 2;

/// Exit status of a fatal error
pub const EXIT_FATAL: i32 = 1;

/// What a `run` invocation should do
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub selection: Selection,
    /// Purge the scope first instead of resuming
    pub fresh: bool,
    pub skip_population: bool,
    /// Also load raster tiles (implies Phase 2)
    pub load_tiles: bool,
    /// Chunk budget passed to the Phase 2 worker
    pub max_chunks: Option<usize>,
    /// Forwarded to workers so their output lands in the same file
    pub log_file: Option<PathBuf>,
}

impl RunOptions {
    pub fn runs_population(&self) -> bool {
        self.load_tiles || !self.skip_population
    }
}

/// Final classification of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    CompletedWithFailures,
}

impl RunOutcome {
    pub fn exit_code(&self) -> u8 {
        match self {
            RunOutcome::Completed => 0,
            RunOutcome::CompletedWithFailures => EXIT_TASK_FAILURES as u8,
        }
    }
}

/// Paths a worker process is pointed at
#[derive(Debug, Clone)]
pub struct WorkerPaths {
    /// Worker executable (normally the running binary)
    pub executable: PathBuf,
    pub config: Option<PathBuf>,
    pub database: PathBuf,
    pub ledger: PathBuf,
}

impl WorkerPaths {
    /// Paths for workers spawned from the running executable
    pub fn current(
        config: Option<PathBuf>,
        database: PathBuf,
        ledger: PathBuf,
    ) -> Result<Self> {
        let executable = std::env::current_exe()?;
        Ok(Self {
            executable,
            config,
            database,
            ledger,
        })
    }
}

/// Pipeline orchestrator service
pub struct PipelineOrchestrator {
    pool: SqlitePool,
    config: PipelineConfig,
    workers: WorkerPaths,
}

impl PipelineOrchestrator {
    /// Create new pipeline orchestrator
    ///
    /// # Arguments
    /// * `pool` - Spatial store connection pool
    /// * `config` - Pipeline configuration (already resolved)
    /// * `workers` - Executable and paths handed to Phase 2 and tile workers
    pub fn new(pool: SqlitePool, config: PipelineConfig, workers: WorkerPaths) -> Self {
        Self {
            pool,
            config,
            workers,
        }
    }

    /// Execute a complete run
    ///
    /// # Returns
    /// Per-section summary of the scope after the run. Per-task failures
    /// are part of the summary; only fatal errors are returned as `Err`.
    pub async fn execute(&self, ledger: &mut Ledger, options: &RunOptions) -> Result<RunSummary> {
        let start_time = std::time::Instant::now();
        let selection = &options.selection;

        tracing::info!(
            countries = %selection
                .country_list()
                .map_or_else(|| "all".to_string(), |c| c.join(",")),
            adm_levels = ?selection.adm_list(),
            fresh = options.fresh,
            population = options.runs_population(),
            load_tiles = options.load_tiles,
            "Starting pipeline run"
        );

        if options.fresh {
            self.phase_fresh(ledger, selection).await?;
        }

        self.phase_boundaries(ledger, selection).await?;

        let mut worker_failures = 0;
        if options.runs_population() {
            if !self.phase_population(ledger, options).await? {
                worker_failures += 1;
            }
        } else {
            tracing::info!("Phase 2 skipped");
        }

        if options.load_tiles {
            if !self.phase_tiles(ledger, options).await? {
                worker_failures += 1;
            }
        }

        let summary = RunSummary::collect(ledger, selection, worker_failures);
        tracing::info!(
            duration_seconds = start_time.elapsed().as_secs(),
            outcome = ?summary.outcome(),
            "Pipeline run finished: {}",
            summary.display_string()
        );
        Ok(summary)
    }

    /// Spawn `geoseed <subcommand>` for the selection and wait for it
    ///
    /// # Returns
    /// `true` when the worker finished without task failures, `false` when it
    /// exited with [`EXIT_TASK_FAILURES`]. Any other non-zero exit is fatal.
    async fn run_worker(
        &self,
        ledger: &mut Ledger,
        subcommand: &str,
        options: &RunOptions,
        extra_args: &[String],
    ) -> Result<bool> {
        // The worker owns the ledger file until it exits
        ledger.save()?;

        let args = self.worker_args(subcommand, options, extra_args);
        tracing::info!(
            executable = %self.workers.executable.display(),
            args = %args.join(" "),
            "Spawning worker process"
        );

        let status = Command::new(&self.workers.executable)
            .args(&args)
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| Error::Internal(format!("failed to spawn {} worker: {}", subcommand, e)))?;

        ledger.reload()?;
        classify_exit(subcommand, status)
    }

    fn worker_args(&self, subcommand: &str, options: &RunOptions, extra_args: &[String]) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(config) = &self.workers.config {
            args.push("--config".to_string());
            args.push(config.display().to_string());
        }
        args.push("--database".to_string());
        args.push(self.workers.database.display().to_string());
        args.push("--ledger".to_string());
        args.push(self.workers.ledger.display().to_string());
        if let Some(log_file) = &options.log_file {
            args.push("--log-file".to_string());
            args.push(log_file.display().to_string());
        }
        args.push(subcommand.to_string());
        args.extend(options.selection.to_args());
        args.extend(extra_args.iter().cloned());
        args
    }
}

fn classify_exit(subcommand: &str, status: ExitStatus) -> Result<bool> {
    match status.code() {
        Some(0) => Ok(true),
        Some(EXIT_TASK_FAILURES) => {
            tracing::warn!(worker = subcommand, "Worker finished with task failures");
            Ok(false)
        }
        Some(code) => Err(Error::Internal(format!(
            "{} worker exited with status {}",
            subcommand, code
        ))),
        None => Err(Error::Internal(format!(
            "{} worker terminated by signal",
            subcommand
        ))),
    }
}
