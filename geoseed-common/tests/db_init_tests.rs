//! Tests for database initialization and schema verification

use geoseed_common::db::{init_database, verify_schema, DEFAULT_BUSY_TIMEOUT_MS};
use geoseed_common::Error;
use sqlx::sqlite::SqlitePoolOptions;
use tempfile::TempDir;

#[tokio::test]
async fn test_database_creation_when_missing() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("nested").join("geoseed.db");

    let result = init_database(&db_path, DEFAULT_BUSY_TIMEOUT_MS).await;

    assert!(result.is_ok(), "Database initialization failed: {:?}", result.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_database_opens_existing() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("geoseed.db");

    let pool1 = init_database(&db_path, DEFAULT_BUSY_TIMEOUT_MS).await.unwrap();
    pool1.close().await;

    let pool2 = init_database(&db_path, DEFAULT_BUSY_TIMEOUT_MS).await;
    assert!(pool2.is_ok(), "Failed to open existing database: {:?}", pool2.err());
}

#[tokio::test]
async fn test_initialized_schema_verifies() {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("geoseed.db"), DEFAULT_BUSY_TIMEOUT_MS)
        .await
        .unwrap();

    verify_schema(&pool).await.unwrap();

    let population_default: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM pragma_table_info('jurisdictions') WHERE name = 'population' AND dflt_value = '0'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(population_default, 1);
}

#[tokio::test]
async fn test_foreign_schema_without_population_columns_is_fatal() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("foreign.db");
    let url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(&url)
        .await
        .unwrap();

    // A store created by another application with an older layout
    sqlx::query(
        "CREATE TABLE jurisdictions (id TEXT PRIMARY KEY, name TEXT NOT NULL, slug TEXT NOT NULL)",
    )
    .execute(&pool)
    .await
    .unwrap();

    let err = verify_schema(&pool).await.unwrap_err();
    match err {
        Error::Schema(msg) => {
            assert!(msg.contains("jurisdictions.population"), "{}", msg);
            assert!(msg.contains("raster_tiles"), "{}", msg);
        }
        other => panic!("expected schema error, got {:?}", other),
    }
}
