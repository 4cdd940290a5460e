//! Spatial store client
//!
//! Chunked read/write access to the `jurisdictions` and `raster_tiles`
//! tables. Every scan is paged so memory stays bounded however large a
//! country is.

pub mod jurisdictions;
pub mod raster_tiles;

use geoseed_common::config::StoreConfig;
use geoseed_common::db::{init_database, verify_schema};
use geoseed_common::{Error, Result};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Open the store, retrying transient connection failures, then verify schema
///
/// # Arguments
/// * `db_path` - SQLite database file
/// * `config` - Connection attempts and busy timeout
///
/// # Returns
/// Ready pool. A schema mismatch is returned as `Error::Schema` and is
/// never retried.
pub async fn open_store(db_path: &Path, config: &StoreConfig) -> Result<SqlitePool> {
    let mut delay_ms = 250u64;
    let mut attempt = 0u32;

    let pool = loop {
        attempt += 1;
        match init_database(db_path, config.busy_timeout_ms).await {
            Ok(pool) => break pool,
            Err(Error::Database(e)) if attempt < config.connect_attempts => {
                warn!(
                    attempt,
                    max_attempts = config.connect_attempts,
                    error = %e,
                    "Store connection failed, retrying in {} ms",
                    delay_ms
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms = (delay_ms * 2).min(4000);
            }
            Err(e) => return Err(e),
        }
    };

    verify_schema(&pool).await?;
    info!(database = %db_path.display(), "Spatial store ready");
    Ok(pool)
}
