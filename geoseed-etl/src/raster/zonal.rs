//! Zonal population sums
//!
//! A cell counts toward a polygon when its centre lies inside the polygon
//! (even-odd rule over every ring of every member polygon, so holes are
//! excluded). Nodata and NaN cells never count. Inclusion depends only on
//! the cell centre, so summing one large window or a partition of it into
//! tiles selects exactly the same cells.

use super::{GeoTransform, PixelWindow, RasterMeta, RasterSource};
use crate::geometry::Bbox;
use geo::MultiPolygon;
use geoseed_common::{Error, Result};

/// Memory bounds for one aggregation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZonalSettings {
    /// Windows above this many pixels are read tile by tile
    pub max_bbox_pixels: u64,
    /// Tile edge length for the tiled path
    pub tile_pixels: u32,
}

impl Default for ZonalSettings {
    fn default() -> Self {
        Self {
            max_bbox_pixels: 400_000_000,
            tile_pixels: 5000,
        }
    }
}

/// How the sum was computed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZonalPath {
    /// Footprint misses the raster
    Empty,
    Direct,
    Tiled { tiles: usize },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZonalResult {
    pub sum: f64,
    pub cells: u64,
    pub path: ZonalPath,
}

/// Round a raw sum to a non-negative head count
pub fn population_from_sum(sum: f64) -> i64 {
    if sum.is_finite() {
        sum.round().max(0.0) as i64
    } else {
        0
    }
}

/// Polygon edge with y_low <= y_high
#[derive(Debug, Clone, Copy)]
struct Edge {
    x_at_low: f64,
    y_low: f64,
    y_high: f64,
    dx_dy: f64,
}

/// Edges of every ring, sorted by y_high descending for a north-to-south sweep
#[derive(Debug, Clone)]
pub(crate) struct EdgeTable {
    edges: Vec<Edge>,
}

impl EdgeTable {
    pub(crate) fn new(geom: &MultiPolygon<f64>) -> Self {
        let mut edges = Vec::new();
        for polygon in &geom.0 {
            let rings = std::iter::once(polygon.exterior()).chain(polygon.interiors().iter());
            for ring in rings {
                for line in ring.lines() {
                    let (a, b) = (line.start, line.end);
                    if a.y == b.y {
                        continue;
                    }
                    let (low, high) = if a.y < b.y { (a, b) } else { (b, a) };
                    edges.push(Edge {
                        x_at_low: low.x,
                        y_low: low.y,
                        y_high: high.y,
                        dx_dy: (high.x - low.x) / (high.y - low.y),
                    });
                }
            }
        }
        edges.sort_by(|a, b| b.y_high.total_cmp(&a.y_high));
        Self { edges }
    }

    /// Sum cells of `values` (covering `window`) whose centres fall inside
    ///
    /// Returns the sum and the number of contributing cells.
    pub(crate) fn masked_sum(
        &self,
        values: &[f32],
        window: &PixelWindow,
        meta: &RasterMeta,
    ) -> (f64, u64) {
        let t: &GeoTransform = &meta.transform;
        let mut sum = 0.0f64;
        let mut cells = 0u64;
        let mut next_edge = 0usize;
        let mut active: Vec<Edge> = Vec::new();
        let mut crossings: Vec<f64> = Vec::new();

        for row in window.row_off..window.row_end() {
            let y = t.y_center(row);

            // Half-open crossing rule: y_low <= y < y_high
            while next_edge < self.edges.len() && self.edges[next_edge].y_high > y {
                active.push(self.edges[next_edge]);
                next_edge += 1;
            }
            // y only decreases, so an edge lying wholly above y never returns
            active.retain(|e| e.y_low <= y);

            crossings.clear();
            crossings.extend(active.iter().map(|e| e.x_at_low + (y - e.y_low) * e.dx_dy));
            if crossings.len() < 2 {
                continue;
            }
            crossings.sort_by(f64::total_cmp);

            let row_base = (row - window.row_off) as usize * window.width as usize;
            for span in crossings.chunks_exact(2) {
                // Columns whose centre x satisfies span[0] <= x < span[1]
                let first = ((span[0] - t.origin_x) / t.pixel_width - 0.5).ceil();
                let last = ((span[1] - t.origin_x) / t.pixel_width - 0.5).ceil() - 1.0;
                let lo = first.max(f64::from(window.col_off));
                let hi = last.min(f64::from(window.col_end()) - 1.0);
                if hi < lo {
                    continue;
                }
                for col in (lo as u32)..=(hi as u32) {
                    let value = values[row_base + (col - window.col_off) as usize];
                    if meta.is_nodata(value) {
                        continue;
                    }
                    sum += f64::from(value);
                    cells += 1;
                }
            }
        }
        (sum, cells)
    }
}

/// Sum the raster under `geom`
///
/// The pixel window of the polygon's bounding box is read in one piece when
/// it holds at most `max_bbox_pixels` cells, otherwise as row-major tiles of
/// `tile_pixels` x `tile_pixels`. A footprint outside the raster sums to 0.
pub fn zonal_sum(
    raster: &mut dyn RasterSource,
    geom: &MultiPolygon<f64>,
    settings: &ZonalSettings,
) -> Result<ZonalResult> {
    let empty = ZonalResult {
        sum: 0.0,
        cells: 0,
        path: ZonalPath::Empty,
    };

    let Some(bbox) = Bbox::of(geom) else {
        return Ok(empty);
    };
    let meta = *raster.meta();
    let Some(window) = meta.window_for(&bbox) else {
        return Ok(empty);
    };

    let edges = EdgeTable::new(geom);

    if window.pixel_count() <= settings.max_bbox_pixels {
        let values = raster.read_window(&window)?;
        let (sum, cells) = edges.masked_sum(&values, &window, &meta);
        return Ok(ZonalResult {
            sum,
            cells,
            path: ZonalPath::Direct,
        });
    }

    if settings.tile_pixels == 0 {
        return Err(Error::Config("tile_pixels must be greater than 0".to_string()));
    }

    let tiles = window.tiles(settings.tile_pixels);
    let mut sum = 0.0;
    let mut cells = 0;
    for tile in &tiles {
        let values = raster.read_window(tile)?;
        let (s, c) = edges.masked_sum(&values, tile, &meta);
        sum += s;
        cells += c;
    }
    tracing::debug!(
        window_pixels = window.pixel_count(),
        tiles = tiles.len(),
        "Aggregated oversized footprint via tiled reads"
    );
    Ok(ZonalResult {
        sum,
        cells,
        path: ZonalPath::Tiled { tiles: tiles.len() },
    })
}
