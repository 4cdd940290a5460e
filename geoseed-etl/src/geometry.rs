//! Geometry normalization and overlay helpers
//!
//! Stored geometry is always a `MultiPolygon` in EPSG:4326 (x = longitude,
//! y = latitude) with closed rings and no degenerate rings or zero-area
//! polygons. Areas are planar in square degrees; they are only ever compared
//! against each other, never reported.

use geo::{Area, BooleanOps, BoundingRect, Centroid, Simplify};
use geo::{Coord, Geometry, LineString, MultiPolygon, Polygon, Rect};
use geoseed_common::{Error, Result};
use rstar::{RTree, RTreeObject, AABB};

/// Axis-aligned bounding box in degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bbox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bbox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn of(geom: &MultiPolygon<f64>) -> Option<Self> {
        geom.bounding_rect().map(Self::from)
    }

    pub fn intersects(&self, other: &Bbox) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn to_polygon(&self) -> Polygon<f64> {
        Rect::new(
            Coord {
                x: self.min_x,
                y: self.min_y,
            },
            Coord {
                x: self.max_x,
                y: self.max_y,
            },
        )
        .to_polygon()
    }

    fn envelope(&self) -> AABB<[f64; 2]> {
        AABB::from_corners([self.min_x, self.min_y], [self.max_x, self.max_y])
    }
}

impl From<Rect<f64>> for Bbox {
    fn from(rect: Rect<f64>) -> Self {
        Self::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y)
    }
}

/// Whole-planet footprint used for the root jurisdiction
pub fn world() -> MultiPolygon<f64> {
    MultiPolygon::new(vec![Bbox::new(-180.0, -90.0, 180.0, 90.0).to_polygon()])
}

/// Close the ring and drop consecutive duplicate vertices
///
/// Returns `None` when fewer than three distinct vertices remain.
fn repair_ring(ring: &LineString<f64>) -> Option<LineString<f64>> {
    let mut coords: Vec<Coord<f64>> = Vec::with_capacity(ring.0.len() + 1);
    for c in &ring.0 {
        if !(c.x.is_finite() && c.y.is_finite()) {
            return None;
        }
        if coords.last() != Some(c) {
            coords.push(*c);
        }
    }
    if coords.len() > 1 && coords.first() == coords.last() {
        coords.pop();
    }
    if coords.len() < 3 {
        return None;
    }
    let first = coords[0];
    coords.push(first);
    Some(LineString::new(coords))
}

fn repair_polygon(polygon: &Polygon<f64>) -> Option<Polygon<f64>> {
    let exterior = repair_ring(polygon.exterior())?;
    let interiors: Vec<LineString<f64>> = polygon
        .interiors()
        .iter()
        .filter_map(repair_ring)
        .filter(|ring| Polygon::new(ring.clone(), vec![]).unsigned_area() > 0.0)
        .collect();

    let repaired = Polygon::new(exterior, interiors);
    if repaired.unsigned_area() > 0.0 {
        Some(repaired)
    } else {
        None
    }
}

/// Normalize any areal geometry into a clean `MultiPolygon`
///
/// Polygons are promoted, collections contribute their areal members, and
/// everything non-areal is ignored. Returns `None` if nothing areal survives.
pub fn normalize(geom: &Geometry<f64>) -> Option<MultiPolygon<f64>> {
    let mut polygons = Vec::new();
    collect_polygons(geom, &mut polygons);

    let repaired: Vec<Polygon<f64>> = polygons.iter().filter_map(repair_polygon).collect();
    if repaired.is_empty() {
        None
    } else {
        Some(MultiPolygon::new(repaired))
    }
}

fn collect_polygons(geom: &Geometry<f64>, out: &mut Vec<Polygon<f64>>) {
    match geom {
        Geometry::Polygon(p) => out.push(p.clone()),
        Geometry::MultiPolygon(mp) => out.extend(mp.0.iter().cloned()),
        Geometry::Rect(r) => out.push(r.to_polygon()),
        Geometry::Triangle(t) => out.push(t.to_polygon()),
        Geometry::GeometryCollection(gc) => {
            for g in &gc.0 {
                collect_polygons(g, out);
            }
        }
        _ => {}
    }
}

/// Douglas-Peucker simplification that never loses a polygon
///
/// A polygon whose simplified form degenerates is kept unsimplified.
pub fn simplify(geom: &MultiPolygon<f64>, tolerance: f64) -> MultiPolygon<f64> {
    if tolerance <= 0.0 {
        return geom.clone();
    }
    let polygons = geom
        .0
        .iter()
        .map(|p| repair_polygon(&p.simplify(&tolerance)).unwrap_or_else(|| p.clone()))
        .collect();
    MultiPolygon::new(polygons)
}

pub fn centroid(geom: &MultiPolygon<f64>) -> Option<(f64, f64)> {
    geom.centroid().map(|p| (p.x(), p.y()))
}

/// Encode as a GeoJSON geometry object
pub fn to_geojson_text(geom: &MultiPolygon<f64>) -> String {
    geojson::Geometry::new(geojson::Value::from(geom)).to_string()
}

/// Decode a stored GeoJSON geometry object and normalize it
pub fn from_geojson_text(text: &str) -> Result<MultiPolygon<f64>> {
    let parsed: geojson::Geometry = text
        .parse::<geojson::GeoJson>()
        .map_err(|e| Error::Geometry(format!("GeoJSON parse: {}", e)))
        .and_then(|gj| match gj {
            geojson::GeoJson::Geometry(g) => Ok(g),
            geojson::GeoJson::Feature(f) => f
                .geometry
                .ok_or_else(|| Error::Geometry("feature without geometry".to_string())),
            geojson::GeoJson::FeatureCollection(_) => Err(Error::Geometry(
                "expected a geometry, found a feature collection".to_string(),
            )),
        })?;
    from_geojson_geometry(parsed)
}

/// Convert a parsed GeoJSON geometry and normalize it
pub fn from_geojson_geometry(geometry: geojson::Geometry) -> Result<MultiPolygon<f64>> {
    let geom: Geometry<f64> = Geometry::try_from(geometry)
        .map_err(|e| Error::Geometry(format!("GeoJSON conversion: {}", e)))?;
    normalize(&geom).ok_or_else(|| Error::Geometry("no areal geometry".to_string()))
}

/// Area of `a ∩ b`
///
/// The boolean-ops sweep can panic on some self-intersecting input; that is
/// reported as a geometry error for the one pair instead of aborting the run.
pub fn intersection_area(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> Result<f64> {
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| a.intersection(b).unsigned_area()))
        .map_err(|_| Error::Geometry("polygon intersection failed".to_string()))
}

/// Candidate with its bounding box, for spatial lookups
#[derive(Debug, Clone)]
struct IndexedBox {
    idx: usize,
    env: AABB<[f64; 2]>,
}

impl RTreeObject for IndexedBox {
    type Envelope = AABB<[f64; 2]>;
    fn envelope(&self) -> Self::Envelope {
        self.env
    }
}

/// R-tree over candidate bounding boxes
///
/// Query results come back in insertion order so that ties resolve to the
/// first candidate in the caller's stable ordering.
#[derive(Debug)]
pub struct BboxIndex {
    tree: RTree<IndexedBox>,
}

impl BboxIndex {
    pub fn build(boxes: impl IntoIterator<Item = Bbox>) -> Self {
        let items: Vec<IndexedBox> = boxes
            .into_iter()
            .enumerate()
            .map(|(idx, b)| IndexedBox {
                idx,
                env: b.envelope(),
            })
            .collect();
        Self {
            tree: RTree::bulk_load(items),
        }
    }

    pub fn candidates(&self, bbox: &Bbox) -> Vec<usize> {
        let mut hits: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&bbox.envelope())
            .map(|b| b.idx)
            .collect();
        hits.sort_unstable();
        hits
    }
}

/// Pick the candidate sharing the most area with `target`
///
/// Candidates are tried in the given order and only a strictly larger
/// overlap replaces the current best, so exact ties keep the first. Zero
/// overlap never qualifies. Per-candidate intersection failures are skipped.
///
/// # Returns
/// Index into `candidates` and the overlap area
pub fn largest_overlap<'a>(
    target: &MultiPolygon<f64>,
    candidates: impl IntoIterator<Item = (usize, &'a MultiPolygon<f64>)>,
) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for (idx, candidate) in candidates {
        let area = match intersection_area(target, candidate) {
            Ok(area) => area,
            Err(e) => {
                tracing::warn!(candidate = idx, error = %e, "Skipping overlap candidate");
                continue;
            }
        };
        if area > 0.0 && best.map_or(true, |(_, best_area)| area > best_area) {
            best = Some((idx, area));
        }
    }
    best
}

/// Nearest candidate by centroid distance (squared degrees), first wins ties
pub fn nearest_centroid(
    target: (f64, f64),
    candidates: impl IntoIterator<Item = (usize, (f64, f64))>,
) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (idx, (x, y)) in candidates {
        let d = (x - target.0).powi(2) + (y - target.1).powi(2);
        if best.map_or(true, |(_, best_d)| d < best_d) {
            best = Some((idx, d));
        }
    }
    best.map(|(idx, _)| idx)
}
