//! Synthetic boundary and raster fixtures
//!
//! The "NZL" fixture is a 4° x 4° square (x 170..174, y -38..-34) split into
//! two regions (west / east) and four districts (north / south of -36 in
//! each region). Its raster covers exactly the square with 0.25° cells of
//! [`NZL_CELL_VALUE`], so the national total is 16 * 16 * 2 = 512, each
//! region holds 256 and each district 128.

use geoseed_etl::services::boundary_importer::boundary_path;
use serde_json::{json, Value};
use std::fs::File;
use std::path::{Path, PathBuf};
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;

pub const NZL_CELL_VALUE: f32 = 2.0;
pub const NZL_ORIGIN: (f64, f64) = (170.0, -34.0);
pub const NZL_PIXEL: f64 = 0.25;
pub const NZL_CELLS: u32 = 16;

/// Feature of a boundary fixture
#[derive(Debug, Clone)]
pub struct FixtureFeature {
    pub name: String,
    pub shape_id: String,
    pub bounds: (f64, f64, f64, f64),
}

pub fn rect_feature(name: &str, min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> FixtureFeature {
    FixtureFeature {
        name: name.to_string(),
        shape_id: format!("shape-{}", name.to_lowercase().replace(' ', "-")),
        bounds: (min_x, min_y, max_x, max_y),
    }
}

fn feature_json(feature: &FixtureFeature, iso3: &str) -> Value {
    let (x0, y0, x1, y1) = feature.bounds;
    json!({
        "type": "Feature",
        "properties": {
            "shapeName": feature.name,
            "shapeID": feature.shape_id,
            "shapeGroup": iso3,
        },
        "geometry": {
            "type": "Polygon",
            "coordinates": [[[x0, y0], [x1, y0], [x1, y1], [x0, y1], [x0, y0]]],
        }
    })
}

/// Write `<root>/<ISO3>/ADM<n>/geoBoundaries-<ISO3>-ADM<n>.geojson`
pub fn write_boundary_file(root: &Path, iso3: &str, adm: u8, features: &[FixtureFeature]) -> PathBuf {
    let path = boundary_path(root, iso3, adm);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let collection = json!({
        "type": "FeatureCollection",
        "features": features.iter().map(|f| feature_json(f, iso3)).collect::<Vec<_>>(),
    });
    std::fs::write(&path, serde_json::to_string_pretty(&collection).unwrap()).unwrap();
    path
}

/// ADM0-ADM2 files of the NZL fixture
pub fn write_nzl_boundaries(root: &Path) {
    write_square_country(root, "NZL", "New Zealand");
}

/// The NZL fixture's geometry filed under another country code
pub fn write_square_country(root: &Path, iso3: &str, national_name: &str) {
    write_boundary_file(
        root,
        iso3,
        0,
        &[rect_feature(national_name, 170.0, -38.0, 174.0, -34.0)],
    );
    write_boundary_file(
        root,
        iso3,
        1,
        &[
            rect_feature("West", 170.0, -38.0, 172.0, -34.0),
            rect_feature("East", 172.0, -38.0, 174.0, -34.0),
        ],
    );
    write_boundary_file(
        root,
        iso3,
        2,
        &[
            rect_feature("West North", 170.0, -36.0, 172.0, -34.0),
            rect_feature("West South", 170.0, -38.0, 172.0, -36.0),
            rect_feature("East North", 172.0, -36.0, 174.0, -34.0),
            rect_feature("East South", 172.0, -38.0, 174.0, -36.0),
        ],
    );
}

/// Supplementary metadata table with one row per (ISO3, ADM n)
pub fn write_meta_csv(path: &Path, rows: &[(&str, u8, &str, &str)]) {
    let mut text = String::from("boundaryID,boundaryISO,boundaryType,UNSDG-region\n");
    for (iso3, adm, id, region) in rows {
        text.push_str(&format!("{},{},ADM{},{}\n", id, iso3, adm, region));
    }
    std::fs::write(path, text).unwrap();
}

/// Single-band f32 GeoTIFF, EPSG:4326, GDAL-style georeferencing
pub fn write_geotiff(
    path: &Path,
    width: u32,
    height: u32,
    data: &[f32],
    origin: (f64, f64),
    pixel: f64,
    nodata: Option<f64>,
) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let file = File::create(path).unwrap();
    let mut encoder = TiffEncoder::new(file).unwrap();
    let mut image = encoder
        .new_image::<colortype::Gray32Float>(width, height)
        .unwrap();
    {
        let dir = image.encoder();
        // ModelPixelScale
        dir.write_tag(Tag::Unknown(33550), &[pixel, pixel, 0.0][..])
            .unwrap();
        // ModelTiepoint
        dir.write_tag(
            Tag::Unknown(33922),
            &[0.0, 0.0, 0.0, origin.0, origin.1, 0.0][..],
        )
        .unwrap();
        // GeoKeyDirectory: geographic model, EPSG:4326
        dir.write_tag(
            Tag::Unknown(34735),
            &[1u16, 1, 0, 2, 1024, 0, 1, 2, 2048, 0, 1, 4326][..],
        )
        .unwrap();
        if let Some(nd) = nodata {
            // GDAL_NODATA
            dir.write_tag(Tag::Unknown(42113), format!("{}", nd).as_str())
                .unwrap();
        }
    }
    image.rows_per_strip(4).unwrap();
    image.write_data(data).unwrap();
}

/// Raster path the locator finds first for `iso3`
pub fn raster_path(population_dir: &Path, iso3: &str, year: i32) -> PathBuf {
    let lower = iso3.to_lowercase();
    population_dir
        .join(&lower)
        .join(format!("{}_pop_{}_CN_100m_R2025A_v1.tif", lower, year))
}

/// Uniform raster exactly covering the NZL fixture, stored under `iso3`
pub fn write_nzl_raster(population_dir: &Path, iso3: &str, year: i32) -> PathBuf {
    let path = raster_path(population_dir, iso3, year);
    let cells = (NZL_CELLS * NZL_CELLS) as usize;
    write_geotiff(
        &path,
        NZL_CELLS,
        NZL_CELLS,
        &vec![NZL_CELL_VALUE; cells],
        NZL_ORIGIN,
        NZL_PIXEL,
        Some(-99999.0),
    );
    path
}
