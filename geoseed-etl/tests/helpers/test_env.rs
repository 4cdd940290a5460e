//! Temporary data root, store and ledger for one test

use geoseed_common::PipelineConfig;
use geoseed_etl::checkpoint::Ledger;
use geoseed_etl::db::{self, jurisdictions};
use sqlx::SqlitePool;
use std::path::PathBuf;
use tempfile::TempDir;

/// Everything a phase needs, rooted in a temp dir
///
/// The TempDir must be kept alive for the duration of the test.
pub struct TestEnv {
    pub dir: TempDir,
    pub config: PipelineConfig,
    pub pool: SqlitePool,
}

impl TestEnv {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create the environment after adjusting the default config
    pub async fn with_config(adjust: impl FnOnce(&mut PipelineConfig)) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = PipelineConfig::default();
        config.paths.data_root = dir.path().to_path_buf();
        config.store.max_lock_wait_ms = 2000;
        adjust(&mut config);

        std::fs::create_dir_all(config.paths.boundaries_dir()).unwrap();
        std::fs::create_dir_all(config.paths.population_dir()).unwrap();

        let pool = db::open_store(&config.paths.database(), &config.store)
            .await
            .unwrap();
        Self { dir, config, pool }
    }

    pub fn boundaries_dir(&self) -> PathBuf {
        self.config.paths.boundaries_dir()
    }

    pub fn population_dir(&self) -> PathBuf {
        self.config.paths.population_dir()
    }

    pub fn year(&self) -> i32 {
        self.config.population.year
    }

    /// Ledger backed by the environment's ledger file
    pub fn ledger(&self) -> Ledger {
        Ledger::open_file(&self.config.paths.ledger()).unwrap()
    }

    /// (slug, population, note) of every row, ordered by slug
    pub async fn population_snapshot(&self) -> Vec<(String, i64, Option<String>)> {
        sqlx::query_as(
            "SELECT slug, population, population_note FROM jurisdictions ORDER BY slug",
        )
        .fetch_all(&self.pool)
        .await
        .unwrap()
    }

    pub async fn population_of(&self, slug: &str) -> i64 {
        jurisdictions::find_by_slug(&self.pool, slug)
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("no row with slug {}", slug))
            .population
    }
}
