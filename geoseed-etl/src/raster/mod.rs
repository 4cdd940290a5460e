//! Population raster access
//!
//! A raster is a north-up grid of `f32` cells in EPSG:4326. All readers go
//! through [`RasterSource::read_window`], so the aggregation code never
//! knows whether cells come from a GeoTIFF on disk or from stored tiles.

pub mod geotiff;
pub mod locate;
pub mod zonal;

pub use geotiff::GeoTiffRaster;
pub use locate::{locate_raster, RasterLocation};
pub use zonal::{population_from_sum, zonal_sum, ZonalPath, ZonalResult, ZonalSettings};

use crate::geometry::Bbox;
use geoseed_common::{Error, Result};

/// Affine mapping between pixel and geographic space (no rotation)
///
/// Pixel (col, row) covers `[origin_x + col*pw, origin_x + (col+1)*pw]` in x
/// and `[origin_y - (row+1)*ph, origin_y - row*ph]` in y.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    /// Positive; rows advance southwards
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn x_center(&self, col: u32) -> f64 {
        self.origin_x + (f64::from(col) + 0.5) * self.pixel_width
    }

    pub fn y_center(&self, row: u32) -> f64 {
        self.origin_y - (f64::from(row) + 0.5) * self.pixel_height
    }

    /// Transform of a sub-window whose top-left pixel is (col_off, row_off)
    pub fn shifted(&self, col_off: u32, row_off: u32) -> Self {
        Self {
            origin_x: self.origin_x + f64::from(col_off) * self.pixel_width,
            origin_y: self.origin_y - f64::from(row_off) * self.pixel_height,
            ..*self
        }
    }

    pub fn window_bbox(&self, window: &PixelWindow) -> Bbox {
        let min_x = self.origin_x + f64::from(window.col_off) * self.pixel_width;
        let max_y = self.origin_y - f64::from(window.row_off) * self.pixel_height;
        Bbox::new(
            min_x,
            max_y - f64::from(window.height) * self.pixel_height,
            min_x + f64::from(window.width) * self.pixel_width,
            max_y,
        )
    }
}

/// Rectangular block of pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelWindow {
    pub col_off: u32,
    pub row_off: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelWindow {
    pub fn new(col_off: u32, row_off: u32, width: u32, height: u32) -> Self {
        Self {
            col_off,
            row_off,
            width,
            height,
        }
    }

    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    pub fn col_end(&self) -> u32 {
        self.col_off + self.width
    }

    pub fn row_end(&self) -> u32 {
        self.row_off + self.height
    }

    /// Split into row-major sub-windows of at most `size` x `size`
    pub fn tiles(&self, size: u32) -> Vec<PixelWindow> {
        let size = size.max(1);
        let mut out = Vec::new();
        let mut row = self.row_off;
        while row < self.row_end() {
            let h = size.min(self.row_end() - row);
            let mut col = self.col_off;
            while col < self.col_end() {
                let w = size.min(self.col_end() - col);
                out.push(PixelWindow::new(col, row, w, h));
                col += w;
            }
            row += h;
        }
        out
    }
}

/// Grid size, placement and nodata marker
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterMeta {
    pub width: u32,
    pub height: u32,
    pub transform: GeoTransform,
    pub nodata: Option<f64>,
}

impl RasterMeta {
    pub fn extent(&self) -> Bbox {
        self.transform
            .window_bbox(&PixelWindow::new(0, 0, self.width, self.height))
    }

    /// Pixels touching `bbox`, clamped to the grid
    ///
    /// `None` when the box misses the grid entirely.
    pub fn window_for(&self, bbox: &Bbox) -> Option<PixelWindow> {
        let t = &self.transform;
        let col_start = ((bbox.min_x - t.origin_x) / t.pixel_width).floor();
        let col_end = ((bbox.max_x - t.origin_x) / t.pixel_width).ceil();
        let row_start = ((t.origin_y - bbox.max_y) / t.pixel_height).floor();
        let row_end = ((t.origin_y - bbox.min_y) / t.pixel_height).ceil();

        let clamp = |v: f64, max: u32| v.max(0.0).min(f64::from(max)) as u32;
        let c0 = clamp(col_start, self.width);
        let c1 = clamp(col_end, self.width);
        let r0 = clamp(row_start, self.height);
        let r1 = clamp(row_end, self.height);

        if c1 <= c0 || r1 <= r0 {
            return None;
        }
        Some(PixelWindow::new(c0, r0, c1 - c0, r1 - r0))
    }

    /// True if `value` should be ignored (nodata marker or NaN)
    pub fn is_nodata(&self, value: f32) -> bool {
        if value.is_nan() {
            return true;
        }
        match self.nodata {
            Some(nd) if nd.is_nan() => false,
            Some(nd) => (f64::from(value) - nd).abs() <= f64::EPSILON * nd.abs().max(1.0),
            None => false,
        }
    }
}

/// Anything cells can be read from
pub trait RasterSource {
    fn meta(&self) -> &RasterMeta;

    /// Cells of `window` in row-major order (`window.width` per row)
    fn read_window(&mut self, window: &PixelWindow) -> Result<Vec<f32>>;
}

/// Fully materialized raster (stored tiles, tests)
#[derive(Debug, Clone, PartialEq)]
pub struct GridRaster {
    meta: RasterMeta,
    data: Vec<f32>,
}

impl GridRaster {
    pub fn new(meta: RasterMeta, data: Vec<f32>) -> Result<Self> {
        let expected = meta.width as usize * meta.height as usize;
        if data.len() != expected {
            return Err(Error::Raster(format!(
                "grid of {}x{} needs {} cells, got {}",
                meta.width,
                meta.height,
                expected,
                data.len()
            )));
        }
        Ok(Self { meta, data })
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }
}

impl RasterSource for GridRaster {
    fn meta(&self) -> &RasterMeta {
        &self.meta
    }

    fn read_window(&mut self, window: &PixelWindow) -> Result<Vec<f32>> {
        if window.col_end() > self.meta.width || window.row_end() > self.meta.height {
            return Err(Error::Raster(format!(
                "window {:?} outside {}x{} grid",
                window, self.meta.width, self.meta.height
            )));
        }
        let stride = self.meta.width as usize;
        let mut out = Vec::with_capacity(window.pixel_count() as usize);
        for row in window.row_off..window.row_end() {
            let start = row as usize * stride + window.col_off as usize;
            out.extend_from_slice(&self.data[start..start + window.width as usize]);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(width: u32, height: u32) -> RasterMeta {
        RasterMeta {
            width,
            height,
            transform: GeoTransform {
                origin_x: 10.0,
                origin_y: 50.0,
                pixel_width: 0.5,
                pixel_height: 0.5,
            },
            nodata: Some(-99999.0),
        }
    }

    #[test]
    fn test_window_for_clamps_to_grid() {
        let m = meta(10, 10); // covers x 10..15, y 45..50
        let w = m.window_for(&Bbox::new(9.0, 49.2, 11.1, 52.0)).unwrap();
        assert_eq!(w, PixelWindow::new(0, 0, 3, 2));
        assert!(m.window_for(&Bbox::new(20.0, 0.0, 21.0, 1.0)).is_none());
    }

    #[test]
    fn test_tiles_partition_window() {
        let w = PixelWindow::new(3, 4, 7, 5);
        let tiles = w.tiles(3);
        let total: u64 = tiles.iter().map(PixelWindow::pixel_count).sum();
        assert_eq!(total, w.pixel_count());
        assert_eq!(tiles[0], PixelWindow::new(3, 4, 3, 3));
        assert_eq!(tiles.last().copied(), Some(PixelWindow::new(9, 7, 1, 2)));
    }

    #[test]
    fn test_grid_read_window_row_major() {
        let data: Vec<f32> = (0..20).map(|v| v as f32).collect();
        let mut grid = GridRaster::new(meta(5, 4), data).unwrap();
        let cells = grid.read_window(&PixelWindow::new(1, 2, 2, 2)).unwrap();
        assert_eq!(cells, vec![11.0, 12.0, 16.0, 17.0]);
        assert!(grid.read_window(&PixelWindow::new(4, 0, 2, 1)).is_err());
    }

    #[test]
    fn test_nodata_detection() {
        let m = meta(1, 1);
        assert!(m.is_nodata(-99999.0));
        assert!(m.is_nodata(f32::NAN));
        assert!(!m.is_nodata(0.0));
    }
}
