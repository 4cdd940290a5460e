//! Database initialization
//!
//! Opens (creating when absent) the SQLite spatial store and creates the two
//! tables this pipeline owns. Geometry is stored as GeoJSON text with
//! denormalized bounding-box columns so candidate lookups can be prefiltered
//! by index before exact geometry work happens in-process.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Default busy timeout applied when the caller has no configuration
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// Initialize database connection and create tables if needed
///
/// # Arguments
/// * `db_path` - SQLite database file; parent directories are created
/// * `busy_timeout_ms` - How long SQLite itself waits on a locked database
///
/// # Returns
/// Connection pool with WAL journaling and foreign keys enabled
pub async fn init_database(db_path: &Path, busy_timeout_ms: u64) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_millis(busy_timeout_ms));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .min_connections(1)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // Idempotent, safe on every start
    create_jurisdictions_table(&pool).await?;
    create_raster_tiles_table(&pool).await?;

    Ok(pool)
}

async fn create_jurisdictions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jurisdictions (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            slug TEXT NOT NULL UNIQUE,
            iso_code TEXT,
            adm_level INTEGER NOT NULL CHECK (adm_level >= 0),
            parent_id TEXT REFERENCES jurisdictions(id),
            source TEXT NOT NULL,
            boundary_id TEXT,
            official_languages TEXT NOT NULL DEFAULT '["en"]',
            geometry TEXT NOT NULL,
            min_x REAL NOT NULL,
            min_y REAL NOT NULL,
            max_x REAL NOT NULL,
            max_y REAL NOT NULL,
            centroid_x REAL,
            centroid_y REAL,
            population INTEGER NOT NULL DEFAULT 0,
            population_year INTEGER,
            population_note TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_jurisdictions_iso_level ON jurisdictions(iso_code, adm_level)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jurisdictions_parent ON jurisdictions(parent_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_jurisdictions_bbox ON jurisdictions(min_x, max_x, min_y, max_y)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_raster_tiles_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS raster_tiles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            iso_code TEXT NOT NULL,
            year INTEGER NOT NULL,
            resolution_m INTEGER NOT NULL,
            tile_row INTEGER NOT NULL,
            tile_col INTEGER NOT NULL,
            width INTEGER NOT NULL,
            height INTEGER NOT NULL,
            origin_x REAL NOT NULL,
            origin_y REAL NOT NULL,
            pixel_width REAL NOT NULL,
            pixel_height REAL NOT NULL,
            nodata REAL,
            payload BLOB NOT NULL,
            min_x REAL NOT NULL,
            min_y REAL NOT NULL,
            max_x REAL NOT NULL,
            max_y REAL NOT NULL,
            footprint TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_raster_tiles_iso_year ON raster_tiles(iso_code, year)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_raster_tiles_bbox ON raster_tiles(min_x, max_x, min_y, max_y)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
