//! Raster tile table operations
//!
//! Cell payloads are little-endian `f32` blobs in row-major order.

use crate::geometry::{self, Bbox};
use crate::raster::{GeoTransform, GridRaster, RasterMeta};
use chrono::Utc;
use geo::MultiPolygon;
use geoseed_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

/// Tile ready to store
#[derive(Debug, Clone, PartialEq)]
pub struct NewRasterTile {
    pub iso_code: String,
    pub year: i32,
    pub resolution_m: i32,
    pub tile_row: u32,
    pub tile_col: u32,
    pub meta: RasterMeta,
    pub values: Vec<f32>,
}

/// Tile read back from the store
#[derive(Debug, Clone)]
pub struct StoredTile {
    pub id: i64,
    pub tile_row: u32,
    pub tile_col: u32,
    pub raster: GridRaster,
}

pub fn encode_payload(values: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 4);
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

pub fn decode_payload(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(Error::Raster(format!(
            "tile payload of {} bytes is not a whole number of f32 cells",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn tile_from(row: &SqliteRow) -> Result<StoredTile> {
    let width: i64 = row.get("width");
    let height: i64 = row.get("height");
    let meta = RasterMeta {
        width: width as u32,
        height: height as u32,
        transform: GeoTransform {
            origin_x: row.get("origin_x"),
            origin_y: row.get("origin_y"),
            pixel_width: row.get("pixel_width"),
            pixel_height: row.get("pixel_height"),
        },
        nodata: row.get("nodata"),
    };
    let payload: Vec<u8> = row.get("payload");
    let values = decode_payload(&payload)?;
    Ok(StoredTile {
        id: row.get("id"),
        tile_row: row.get::<i64, _>("tile_row") as u32,
        tile_col: row.get::<i64, _>("tile_col") as u32,
        raster: GridRaster::new(meta, values)?,
    })
}

/// Remove every tile of (country, year)
pub async fn delete_tiles(pool: &SqlitePool, iso_code: &str, year: i32) -> Result<u64> {
    let mut tx = pool.begin().await?;
    let result = sqlx::query("DELETE FROM raster_tiles WHERE iso_code = ? AND year = ?")
        .bind(iso_code)
        .bind(year)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(result.rows_affected())
}

/// Insert a batch of tiles in one transaction
pub async fn insert_tiles(pool: &SqlitePool, tiles: &[NewRasterTile]) -> Result<u64> {
    if tiles.is_empty() {
        return Ok(0);
    }
    let now = Utc::now().to_rfc3339();
    let mut tx = pool.begin().await?;
    let mut inserted = 0;

    for tile in tiles {
        let footprint = tile.meta.extent();
        let footprint_geojson =
            geometry::to_geojson_text(&MultiPolygon::new(vec![footprint.to_polygon()]));
        let t = &tile.meta.transform;

        let result = sqlx::query(
            r#"
            INSERT INTO raster_tiles (
                iso_code, year, resolution_m, tile_row, tile_col, width, height,
                origin_x, origin_y, pixel_width, pixel_height, nodata, payload,
                min_x, min_y, max_x, max_y, footprint, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&tile.iso_code)
        .bind(tile.year)
        .bind(tile.resolution_m)
        .bind(i64::from(tile.tile_row))
        .bind(i64::from(tile.tile_col))
        .bind(i64::from(tile.meta.width))
        .bind(i64::from(tile.meta.height))
        .bind(t.origin_x)
        .bind(t.origin_y)
        .bind(t.pixel_width)
        .bind(t.pixel_height)
        .bind(tile.meta.nodata)
        .bind(encode_payload(&tile.values))
        .bind(footprint.min_x)
        .bind(footprint.min_y)
        .bind(footprint.max_x)
        .bind(footprint.max_y)
        .bind(footprint_geojson)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
        inserted += result.rows_affected();
    }

    tx.commit().await?;
    Ok(inserted)
}

pub async fn count_tiles(pool: &SqlitePool, iso_code: &str, year: i32) -> Result<i64> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM raster_tiles WHERE iso_code = ? AND year = ?")
            .bind(iso_code)
            .bind(year)
            .fetch_one(pool)
            .await?;
    Ok(count)
}

/// Tiles of (country, year) whose footprint intersects `bbox`, after `after_id`
pub async fn fetch_intersecting_page(
    pool: &SqlitePool,
    iso_code: &str,
    year: i32,
    bbox: &Bbox,
    after_id: i64,
    limit: i64,
) -> Result<Vec<StoredTile>> {
    let rows = sqlx::query(
        r#"
        SELECT id, tile_row, tile_col, width, height, origin_x, origin_y,
               pixel_width, pixel_height, nodata, payload
        FROM raster_tiles
        WHERE iso_code = ? AND year = ? AND id > ?
          AND min_x <= ? AND max_x >= ? AND min_y <= ? AND max_y >= ?
        ORDER BY id
        LIMIT ?
        "#,
    )
    .bind(iso_code)
    .bind(year)
    .bind(after_id)
    .bind(bbox.max_x)
    .bind(bbox.min_x)
    .bind(bbox.max_y)
    .bind(bbox.min_y)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.iter().map(tile_from).collect()
}
