//! Population of an arbitrary polygon from stored raster tiles

use crate::db::raster_tiles;
use crate::geometry::Bbox;
use crate::raster::{population_from_sum, zonal_sum, ZonalSettings};
use geo::MultiPolygon;
use geoseed_common::Result;
use sqlx::SqlitePool;

/// Tiles fetched per query page
const TILE_PAGE_SIZE: i64 = 64;

/// Sum stored tiles of `iso3` / `year` under `polygon`
///
/// Uses the same cell-centre rule as the overlay, so for a loaded country
/// the result matches the overlay of the same polygon. No tiles yields 0.
pub async fn population_in_polygon(
    pool: &SqlitePool,
    iso3: &str,
    polygon: &MultiPolygon<f64>,
    year: i32,
) -> Result<i64> {
    let Some(bbox) = Bbox::of(polygon) else {
        return Ok(0);
    };
    // Tiles are small; always read whole
    let settings = ZonalSettings {
        max_bbox_pixels: u64::MAX,
        ..ZonalSettings::default()
    };

    let iso3 = iso3.to_uppercase();
    let mut total = 0.0f64;
    let mut tiles = 0usize;
    let mut after_id = 0i64;

    loop {
        let page =
            raster_tiles::fetch_intersecting_page(pool, &iso3, year, &bbox, after_id, TILE_PAGE_SIZE)
                .await?;
        let Some(last) = page.last() else {
            break;
        };
        after_id = last.id;

        for mut tile in page {
            total += zonal_sum(&mut tile.raster, polygon, &settings)?.sum;
            tiles += 1;
        }
    }

    let population = population_from_sum(total);
    tracing::debug!(country = %iso3, year, tiles, population, "Tile population query");
    Ok(population)
}
