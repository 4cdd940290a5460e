//! GeoTIFF reader with windowed, chunk-aligned reads
//!
//! Only the strips or tiles overlapping a requested window are decoded, and
//! a small cache keeps recently used chunks so neighbouring polygons in the
//! same sub-batch do not decode the same chunk twice.
//!
//! Georeferencing comes from the GeoTIFF tags:
//! - ModelPixelScale (33550) + ModelTiepoint (33922), or ModelTransformation (34264)
//! - GeoKeyDirectory (34735): projected model types are rejected
//! - GDAL_NODATA (42113): ASCII nodata marker

use super::{GeoTransform, PixelWindow, RasterMeta, RasterSource};
use geoseed_common::{Error, Result};
use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;
use tiff::ColorType;
use tracing::debug;

const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
const TAG_MODEL_TIEPOINT: u16 = 33922;
const TAG_MODEL_TRANSFORMATION: u16 = 34264;
const TAG_GEO_KEY_DIRECTORY: u16 = 34735;
const TAG_GDAL_NODATA: u16 = 42113;

const GEO_KEY_MODEL_TYPE: u16 = 1024;
const MODEL_TYPE_PROJECTED: u16 = 1;

/// Decoded chunks kept in memory
const MAX_CACHED_CHUNKS: usize = 64;

#[derive(Debug, Clone, Copy)]
enum TiffLayout {
    Stripped { rows_per_strip: u32 },
    Tiled {
        tile_width: u32,
        tile_height: u32,
        tiles_per_row: u32,
    },
}

/// Decoded chunk with its row stride
struct Chunk {
    data: Vec<f32>,
    stride: usize,
}

pub struct GeoTiffRaster {
    path: PathBuf,
    decoder: Decoder<BufReader<File>>,
    meta: RasterMeta,
    layout: TiffLayout,
    cache: HashMap<u32, Chunk>,
    cache_order: VecDeque<u32>,
}

impl std::fmt::Debug for GeoTiffRaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeoTiffRaster")
            .field("path", &self.path)
            .field("meta", &self.meta)
            .field("layout", &self.layout)
            .finish()
    }
}

fn tiff_err(path: &Path, what: &str, err: impl std::fmt::Display) -> Error {
    Error::Raster(format!("{}: {}: {}", path.display(), what, err))
}

impl GeoTiffRaster {
    /// Open a single-band geographic GeoTIFF
    ///
    /// # Returns
    /// Reader positioned on the first image. Fails with [`Error::Raster`] if
    /// the file is not a TIFF, has more than one sample per pixel, or lacks
    /// georeferencing; fails with [`Error::InvalidInput`] for projected CRSs.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| tiff_err(path, "open", e))?;
        let mut decoder = Decoder::new(BufReader::new(file))
            .map_err(|e| tiff_err(path, "decoder init", e))?
            .with_limits(Limits::unlimited());

        let (width, height) = decoder
            .dimensions()
            .map_err(|e| tiff_err(path, "dimensions", e))?;

        match decoder.colortype() {
            Ok(ColorType::Gray(_)) => {}
            Ok(other) => {
                return Err(Error::Raster(format!(
                    "{}: expected single-band raster, found {:?}",
                    path.display(),
                    other
                )))
            }
            Err(e) => return Err(tiff_err(path, "color type", e)),
        }

        let transform = read_transform(&mut decoder, path)?;
        reject_projected(&mut decoder, path)?;
        let nodata = read_nodata(&mut decoder, path)?;

        let (chunk_width, chunk_height) = decoder.chunk_dimensions();
        let layout = if chunk_width == width {
            TiffLayout::Stripped {
                rows_per_strip: chunk_height.max(1),
            }
        } else {
            TiffLayout::Tiled {
                tile_width: chunk_width,
                tile_height: chunk_height,
                tiles_per_row: width.div_ceil(chunk_width),
            }
        };

        debug!(
            path = %path.display(),
            width,
            height,
            chunk_width,
            chunk_height,
            ?nodata,
            "Opened GeoTIFF"
        );

        Ok(Self {
            path: path.to_path_buf(),
            decoder,
            meta: RasterMeta {
                width,
                height,
                transform,
                nodata,
            },
            layout,
            cache: HashMap::new(),
            cache_order: VecDeque::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Chunk index and the pixel rectangle (col0, row0, cols, rows) it covers
    fn chunk_for(&self, col: u32, row: u32) -> (u32, u32, u32, u32, u32) {
        match self.layout {
            TiffLayout::Stripped { rows_per_strip } => {
                let strip = row / rows_per_strip;
                let row0 = strip * rows_per_strip;
                let rows = rows_per_strip.min(self.meta.height - row0);
                (strip, 0, row0, self.meta.width, rows)
            }
            TiffLayout::Tiled {
                tile_width,
                tile_height,
                tiles_per_row,
            } => {
                let tile_col = col / tile_width;
                let tile_row = row / tile_height;
                let col0 = tile_col * tile_width;
                let row0 = tile_row * tile_height;
                (
                    tile_row * tiles_per_row + tile_col,
                    col0,
                    row0,
                    tile_width.min(self.meta.width - col0),
                    tile_height.min(self.meta.height - row0),
                )
            }
        }
    }

    fn load_chunk(&mut self, index: u32, cols: u32, rows: u32) -> Result<()> {
        if self.cache.contains_key(&index) {
            return Ok(());
        }

        let decoded = self
            .decoder
            .read_chunk(index)
            .map_err(|e| tiff_err(&self.path, &format!("read_chunk({})", index), e))?;
        let data = decoding_to_f32(decoded)
            .ok_or_else(|| Error::Raster(format!("{}: unsupported sample format", self.path.display())))?;

        // Edge chunks may come back cropped or padded to the nominal size
        let (nominal_w, nominal_h) = match self.layout {
            TiffLayout::Stripped { rows_per_strip } => (self.meta.width, rows_per_strip),
            TiffLayout::Tiled {
                tile_width,
                tile_height,
                ..
            } => (tile_width, tile_height),
        };
        let stride = if data.len() == (cols as usize) * (rows as usize) {
            cols as usize
        } else if data.len() >= (nominal_w as usize) * (rows as usize)
            && data.len() <= (nominal_w as usize) * (nominal_h as usize)
        {
            nominal_w as usize
        } else {
            return Err(Error::Raster(format!(
                "{}: chunk {} has {} samples, expected {}x{}",
                self.path.display(),
                index,
                data.len(),
                cols,
                rows
            )));
        };

        if self.cache_order.len() >= MAX_CACHED_CHUNKS {
            if let Some(evicted) = self.cache_order.pop_front() {
                self.cache.remove(&evicted);
            }
        }
        self.cache.insert(index, Chunk { data, stride });
        self.cache_order.push_back(index);
        Ok(())
    }
}

impl RasterSource for GeoTiffRaster {
    fn meta(&self) -> &RasterMeta {
        &self.meta
    }

    fn read_window(&mut self, window: &PixelWindow) -> Result<Vec<f32>> {
        if window.col_end() > self.meta.width || window.row_end() > self.meta.height {
            return Err(Error::Raster(format!(
                "{}: window {:?} outside {}x{} raster",
                self.path.display(),
                window,
                self.meta.width,
                self.meta.height
            )));
        }

        let out_width = window.width as usize;
        let mut out = vec![f32::NAN; window.pixel_count() as usize];

        // Walk the window chunk by chunk
        let mut row = window.row_off;
        while row < window.row_end() {
            let mut col = window.col_off;
            let mut next_row = window.row_end();
            while col < window.col_end() {
                let (index, col0, row0, cols, rows) = self.chunk_for(col, row);
                self.load_chunk(index, cols, rows)?;
                let chunk = self
                    .cache
                    .get(&index)
                    .ok_or_else(|| Error::Internal("chunk cache miss".to_string()))?;

                let c_start = col.max(col0);
                let c_end = window.col_end().min(col0 + cols);
                let r_start = row.max(row0);
                let r_end = window.row_end().min(row0 + rows);

                for r in r_start..r_end {
                    let src = (r - row0) as usize * chunk.stride + (c_start - col0) as usize;
                    let dst = (r - window.row_off) as usize * out_width
                        + (c_start - window.col_off) as usize;
                    let n = (c_end - c_start) as usize;
                    out[dst..dst + n].copy_from_slice(&chunk.data[src..src + n]);
                }

                next_row = next_row.min(r_end);
                col = c_end;
            }
            row = next_row;
        }
        Ok(out)
    }
}

fn decoding_to_f32(result: DecodingResult) -> Option<Vec<f32>> {
    Some(match result {
        DecodingResult::F32(v) => v,
        DecodingResult::F64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::U8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(|x| x as f32).collect(),
        _ => return None,
    })
}

fn find_f64s(decoder: &mut Decoder<BufReader<File>>, path: &Path, tag: u16) -> Result<Option<Vec<f64>>> {
    let value = decoder
        .find_tag(Tag::from_u16_exhaustive(tag))
        .map_err(|e| tiff_err(path, &format!("tag {}", tag), e))?;
    match value {
        None => Ok(None),
        Some(v) => v
            .into_f64_vec()
            .map(Some)
            .map_err(|e| tiff_err(path, &format!("tag {}", tag), e)),
    }
}

fn read_transform(decoder: &mut Decoder<BufReader<File>>, path: &Path) -> Result<GeoTransform> {
    let scale = find_f64s(decoder, path, TAG_MODEL_PIXEL_SCALE)?;
    let tiepoint = find_f64s(decoder, path, TAG_MODEL_TIEPOINT)?;

    if let (Some(scale), Some(tie)) = (scale, tiepoint) {
        if scale.len() < 2 || tie.len() < 6 || scale[0] <= 0.0 || scale[1] <= 0.0 {
            return Err(Error::Raster(format!(
                "{}: malformed pixel scale / tiepoint",
                path.display()
            )));
        }
        return Ok(GeoTransform {
            origin_x: tie[3] - tie[0] * scale[0],
            origin_y: tie[4] + tie[1] * scale[1],
            pixel_width: scale[0],
            pixel_height: scale[1],
        });
    }

    if let Some(m) = find_f64s(decoder, path, TAG_MODEL_TRANSFORMATION)? {
        // Row-major 4x4: x = m0*col + m1*row + m3, y = m4*col + m5*row + m7
        if m.len() < 8 || m[1] != 0.0 || m[4] != 0.0 || m[0] <= 0.0 || m[5] >= 0.0 {
            return Err(Error::Raster(format!(
                "{}: rotated or flipped model transformation not supported",
                path.display()
            )));
        }
        return Ok(GeoTransform {
            origin_x: m[3],
            origin_y: m[7],
            pixel_width: m[0],
            pixel_height: -m[5],
        });
    }

    Err(Error::Raster(format!("{}: no georeferencing tags", path.display())))
}

fn reject_projected(decoder: &mut Decoder<BufReader<File>>, path: &Path) -> Result<()> {
    let keys = match decoder
        .find_tag(Tag::from_u16_exhaustive(TAG_GEO_KEY_DIRECTORY))
        .map_err(|e| tiff_err(path, "GeoKeyDirectory", e))?
    {
        Some(v) => v
            .into_u16_vec()
            .map_err(|e| tiff_err(path, "GeoKeyDirectory", e))?,
        None => {
            debug!(path = %path.display(), "No GeoKeyDirectory, assuming EPSG:4326");
            return Ok(());
        }
    };

    // Header: version, revision, minor, key count; then 4-tuples
    let count = keys.get(3).copied().unwrap_or(0) as usize;
    for entry in keys.get(4..).unwrap_or(&[]).chunks_exact(4).take(count) {
        let (key_id, location, value) = (entry[0], entry[1], entry[3]);
        if key_id == GEO_KEY_MODEL_TYPE && location == 0 && value == MODEL_TYPE_PROJECTED {
            return Err(Error::InvalidInput(format!(
                "{}: projected CRS not supported, rasters must be EPSG:4326",
                path.display()
            )));
        }
    }
    Ok(())
}

fn read_nodata(decoder: &mut Decoder<BufReader<File>>, path: &Path) -> Result<Option<f64>> {
    let value = decoder
        .find_tag(Tag::from_u16_exhaustive(TAG_GDAL_NODATA))
        .map_err(|e| tiff_err(path, "GDAL_NODATA", e))?;
    let Some(value) = value else {
        return Ok(None);
    };
    let text = value
        .into_string()
        .map_err(|e| tiff_err(path, "GDAL_NODATA", e))?;
    let text = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    match text.to_ascii_lowercase().as_str() {
        "nan" => Ok(Some(f64::NAN)),
        other => other
            .parse::<f64>()
            .map(Some)
            .map_err(|_| Error::Raster(format!("{}: bad GDAL_NODATA '{}'", path.display(), text))),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use tiff::encoder::{colortype, TiffEncoder};

    /// Write a single-band f32 GeoTIFF with GDAL-style georeferencing
    pub fn write_geotiff(
        path: &Path,
        width: u32,
        height: u32,
        data: &[f32],
        transform: GeoTransform,
        nodata: Option<f64>,
    ) {
        let file = File::create(path).unwrap();
        let mut encoder = TiffEncoder::new(file).unwrap();
        let mut image = encoder
            .new_image::<colortype::Gray32Float>(width, height)
            .unwrap();
        {
            let dir = image.encoder();
            dir.write_tag(
                Tag::Unknown(TAG_MODEL_PIXEL_SCALE),
                &[transform.pixel_width, transform.pixel_height, 0.0][..],
            )
            .unwrap();
            dir.write_tag(
                Tag::Unknown(TAG_MODEL_TIEPOINT),
                &[0.0, 0.0, 0.0, transform.origin_x, transform.origin_y, 0.0][..],
            )
            .unwrap();
            // Geographic model, EPSG:4326
            dir.write_tag(
                Tag::Unknown(TAG_GEO_KEY_DIRECTORY),
                &[1u16, 1, 0, 2, 1024, 0, 1, 2, 2048, 0, 1, 4326][..],
            )
            .unwrap();
            if let Some(nd) = nodata {
                dir.write_tag(Tag::Unknown(TAG_GDAL_NODATA), format!("{}", nd).as_str())
                    .unwrap();
            }
        }
        image.rows_per_strip(3).unwrap();
        image.write_data(data).unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::write_geotiff;
    use super::*;
    use tempfile::TempDir;

    fn transform() -> GeoTransform {
        GeoTransform {
            origin_x: 170.0,
            origin_y: -40.0,
            pixel_width: 0.25,
            pixel_height: 0.25,
        }
    }

    #[test]
    fn test_open_reads_georeferencing_and_nodata() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nzl.tif");
        let data: Vec<f32> = (0..40).map(|v| v as f32).collect();
        write_geotiff(&path, 8, 5, &data, transform(), Some(-99999.0));

        let raster = GeoTiffRaster::open(&path).unwrap();
        let meta = raster.meta();
        assert_eq!((meta.width, meta.height), (8, 5));
        assert_eq!(meta.transform, transform());
        assert_eq!(meta.nodata, Some(-99999.0));
    }

    #[test]
    fn test_window_spanning_strips_matches_source() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nzl.tif");
        let data: Vec<f32> = (0..40).map(|v| v as f32).collect();
        write_geotiff(&path, 8, 5, &data, transform(), None);

        let mut raster = GeoTiffRaster::open(&path).unwrap();
        // Rows 2..5 cross the strip boundary at row 3
        let cells = raster.read_window(&PixelWindow::new(5, 2, 3, 3)).unwrap();
        assert_eq!(cells, vec![21.0, 22.0, 23.0, 29.0, 30.0, 31.0, 37.0, 38.0, 39.0]);
    }

    #[test]
    fn test_not_a_tiff_is_raster_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken.tif");
        std::fs::write(&path, b"definitely not a tiff").unwrap();
        assert!(matches!(GeoTiffRaster::open(&path), Err(Error::Raster(_))));
    }
}
