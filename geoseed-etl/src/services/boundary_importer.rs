//! Boundary importer (Phase 1)
//!
//! Reads per-country, per-level boundary files laid out as
//! `<root>/<ISO3>/ADM<n>/geoBoundaries-<ISO3>-ADM<n>.geojson` and inserts one
//! jurisdiction per feature. Source ADM n is stored as level n + 1 under the
//! synthetic Earth root (level 0).
//!
//! Files are processed ordered by (adm, iso3), so every parent level is in
//! the store before its children are parsed. Inserts are insert-if-absent
//! keyed by slug: re-running never duplicates rows and never overwrites
//! population written by Phase 2.

use crate::checkpoint::{Ledger, TaskKey, TaskMetrics};
use crate::db::jurisdictions::{self, JurisdictionShape, NewJurisdiction, SOURCE_GEOBOUNDARIES};
use crate::geometry::{self, BboxIndex};
use crate::selection::{Selection, MAX_ADM};
use crate::services::languages::official_languages;
use crate::utils::{retry_on_lock, SlugAllocator};
use geo::MultiPolygon;
use geoseed_common::{Error, PipelineConfig, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

/// Page size for reading candidate parents
const PARENT_PAGE_SIZE: i64 = 2000;

/// Property keys tried for a feature name after `ADM{n}_EN`
const NAME_KEYS: &[&str] = &[
    "shapeName",
    "name",
    "NAME",
    "ADM5_EN",
    "ADM4_EN",
    "ADM3_EN",
    "ADM2_EN",
    "ADM1_EN",
    "ADM0_EN",
    "Local",
    "VARNAME_1",
];

/// One boundary file on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundaryFile {
    pub iso3: String,
    pub adm: u8,
    pub path: PathBuf,
}

/// Expected location of a boundary file
pub fn boundary_path(root: &Path, iso3: &str, adm: u8) -> PathBuf {
    root.join(iso3)
        .join(format!("ADM{}", adm))
        .join(format!("geoBoundaries-{}-ADM{}.geojson", iso3, adm))
}

/// Walk the boundary tree for files matching the layout
///
/// # Returns
/// Files ordered by (adm, iso3)
pub fn discover_files(root: &Path) -> Result<Vec<BoundaryFile>> {
    if !root.is_dir() {
        return Err(Error::NotFound(format!(
            "boundary directory {}",
            root.display()
        )));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).min_depth(3).max_depth(3) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Error accessing entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(file) = parse_layout(entry.path()) {
            files.push(file);
        }
    }

    files.sort_by(|a, b| (a.adm, &a.iso3).cmp(&(b.adm, &b.iso3)));
    debug!(files = files.len(), root = %root.display(), "Discovered boundary files");
    Ok(files)
}

/// `<ISO3>/ADM<n>/geoBoundaries-<ISO3>-ADM<n>.geojson` or nothing
fn parse_layout(path: &Path) -> Option<BoundaryFile> {
    let adm_dir = path.parent()?;
    let iso_dir = adm_dir.parent()?;
    let iso3 = iso_dir.file_name()?.to_str()?.to_uppercase();
    if iso3.len() != 3 || !iso3.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }

    let adm_name = adm_dir.file_name()?.to_str()?.to_uppercase();
    let digits = adm_name.strip_prefix("ADM")?;
    if digits.len() != 1 {
        return None;
    }
    let adm: u8 = digits.parse().ok()?;
    if adm > MAX_ADM {
        return None;
    }

    let expected = format!("geoBoundaries-{}-ADM{}.geojson", iso3, adm);
    let name = path.file_name()?.to_str()?;
    if !name.eq_ignore_ascii_case(&expected) {
        return None;
    }

    Some(BoundaryFile {
        iso3,
        adm,
        path: path.to_path_buf(),
    })
}

/// Supplementary metadata for one (country, ADM) file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoundaryMeta {
    pub boundary_id: Option<String>,
    pub region: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MetaRecord {
    #[serde(rename = "boundaryISO")]
    iso: String,
    #[serde(rename = "boundaryType")]
    boundary_type: String,
    #[serde(rename = "boundaryID", default)]
    boundary_id: Option<String>,
    #[serde(rename = "UNSDG-region", default)]
    region: Option<String>,
}

/// Boundary metadata table keyed by (ISO3, ADM n)
#[derive(Debug, Default)]
pub struct MetaIndex {
    entries: HashMap<(String, u8), BoundaryMeta>,
}

impl MetaIndex {
    /// Load the metadata CSV; a missing file yields an empty index
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "Boundary metadata CSV not found, continuing without it");
            return Ok(Self::default());
        }

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path)
            .map_err(|e| Error::InvalidInput(format!("{}: {}", path.display(), e)))?;

        let mut entries = HashMap::new();
        for (line, record) in reader.deserialize::<MetaRecord>().enumerate() {
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    debug!(line = line + 2, error = %e, "Skipping metadata row");
                    continue;
                }
            };
            let Some(adm) = record
                .boundary_type
                .trim()
                .to_uppercase()
                .strip_prefix("ADM")
                .and_then(|d| d.parse::<u8>().ok())
            else {
                continue;
            };
            let clean = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
            entries.insert(
                (record.iso.trim().to_uppercase(), adm),
                BoundaryMeta {
                    boundary_id: clean(record.boundary_id),
                    region: clean(record.region),
                },
            );
        }

        info!(entries = entries.len(), "Loaded boundary metadata");
        Ok(Self { entries })
    }

    pub fn get(&self, iso3: &str, adm: u8) -> Option<&BoundaryMeta> {
        self.entries.get(&(iso3.to_uppercase(), adm))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn property_text(props: &Map<String, Value>, key: &str) -> Option<String> {
    let text = match props.get(key)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    if text.is_empty() || text == "None" || text == "null" {
        None
    } else {
        Some(text)
    }
}

/// Display name of a feature
///
/// Tries `ADM{adm}_EN` first, then the common name keys; "Unknown" if all
/// are blank.
pub fn feature_name(props: &Map<String, Value>, adm: u8) -> String {
    let level_key = format!("ADM{}_EN", adm);
    std::iter::once(level_key.as_str())
        .chain(NAME_KEYS.iter().copied())
        .find_map(|key| property_text(props, key))
        .unwrap_or_else(|| "Unknown".to_string())
}

/// Feature ready for parent resolution
#[derive(Debug, Clone)]
pub struct ParsedFeature {
    pub name: String,
    pub iso3: String,
    pub boundary_id: Option<String>,
    pub geometry: MultiPolygon<f64>,
}

/// Parse a boundary file into normalized features
///
/// # Returns
/// Features in file order and the number of features dropped for missing
/// or non-areal geometry
pub fn parse_boundary_file(
    file: &BoundaryFile,
    simplify_tolerance: f64,
) -> Result<(Vec<ParsedFeature>, usize)> {
    let text = std::fs::read_to_string(&file.path)?;
    let collection = match text.parse::<geojson::GeoJson>() {
        Ok(geojson::GeoJson::FeatureCollection(fc)) => fc,
        Ok(_) => {
            return Err(Error::InvalidInput(format!(
                "{}: expected a FeatureCollection",
                file.path.display()
            )))
        }
        Err(e) => {
            return Err(Error::InvalidInput(format!(
                "{}: {}",
                file.path.display(),
                e
            )))
        }
    };

    let empty = Map::new();
    let mut features = Vec::with_capacity(collection.features.len());
    let mut dropped = 0;

    for (idx, feature) in collection.features.into_iter().enumerate() {
        let props = feature.properties.as_ref().unwrap_or(&empty);
        let name = feature_name(props, file.adm);

        let Some(raw) = feature.geometry.clone() else {
            warn!(file = %file.path.display(), feature = idx, name = %name, "Feature has no geometry, skipped");
            dropped += 1;
            continue;
        };
        let geometry = match geometry::from_geojson_geometry(raw) {
            Ok(g) => geometry::simplify(&g, simplify_tolerance),
            Err(e) => {
                warn!(file = %file.path.display(), feature = idx, name = %name, error = %e, "Unusable geometry, skipped");
                dropped += 1;
                continue;
            }
        };

        let iso3 = feature_country(props, file, idx);

        features.push(ParsedFeature {
            name,
            iso3,
            boundary_id: property_text(props, "shapeID"),
            geometry,
        });
    }

    Ok((features, dropped))
}

/// Country a feature is filed under: its shapeGroup, else the file's
fn feature_country(props: &Map<String, Value>, file: &BoundaryFile, idx: usize) -> String {
    match property_text(props, "shapeGroup").map(|s| s.to_uppercase()) {
        Some(group) if group != file.iso3 => {
            warn!(
                file = %file.path.display(),
                feature = idx,
                shape_group = %group,
                "Feature belongs to another country than its file"
            );
            group
        }
        Some(group) => group,
        None => file.iso3.clone(),
    }
}

/// Phase 1 counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportStats {
    pub files_done: usize,
    pub files_already_done: usize,
    pub files_skipped: usize,
    pub files_failed: usize,
    pub inserted: u64,
    pub existing: u64,
    pub orphans: u64,
    pub features_dropped: u64,
}

impl ImportStats {
    pub fn display_string(&self) -> String {
        format!(
            "{} files imported ({} already done, {} skipped, {} failed), {} rows inserted, {} already present, {} orphans, {} features dropped",
            self.files_done,
            self.files_already_done,
            self.files_skipped,
            self.files_failed,
            self.inserted,
            self.existing,
            self.orphans,
            self.features_dropped
        )
    }
}

/// Result of importing one file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileOutcome {
    pub inserted: u64,
    pub existing: u64,
    pub orphans: u64,
    pub dropped: u64,
}

/// Candidate parents of one (country, level), spatially indexed
struct ParentCandidates {
    shapes: Vec<JurisdictionShape>,
    index: BboxIndex,
}

impl ParentCandidates {
    fn new(shapes: Vec<JurisdictionShape>) -> Self {
        let index = BboxIndex::build(shapes.iter().map(|s| s.bbox));
        Self { shapes, index }
    }

    /// Candidate with the largest intersection area
    fn best_match(&self, geometry: &MultiPolygon<f64>) -> Option<&JurisdictionShape> {
        let bbox = geometry::Bbox::of(geometry)?;
        let hits = self.index.candidates(&bbox);
        geometry::largest_overlap(
            geometry,
            hits.into_iter().map(|i| (i, &self.shapes[i].geometry)),
        )
        .map(|(i, _)| &self.shapes[i])
    }
}

/// Boundary importer service
pub struct BoundaryImporter<'a> {
    pool: &'a SqlitePool,
    config: &'a PipelineConfig,
}

impl<'a> BoundaryImporter<'a> {
    pub fn new(pool: &'a SqlitePool, config: &'a PipelineConfig) -> Self {
        Self { pool, config }
    }

    /// Import every selected (country, ADM) file not yet done
    ///
    /// # Arguments
    /// * `ledger` - Progress ledger, updated after each file
    /// * `selection` - Countries and ADM levels in scope
    ///
    /// # Returns
    /// Counters for the run. Per-file failures are recorded in the ledger
    /// and counted; only ledger or root-insert failures abort.
    pub async fn run(&self, ledger: &mut Ledger, selection: &Selection) -> Result<ImportStats> {
        let root = self.config.paths.boundaries_dir();
        let meta = MetaIndex::load(&self.config.paths.meta_csv())?;
        let earth_id = self.ensure_earth(ledger).await?;

        let mut stats = ImportStats::default();
        let planned = self.plan(&root, selection)?;
        info!(files = planned.len(), root = %root.display(), "Phase 1: importing boundaries");

        for (iso3, adm, path) in planned {
            let key = TaskKey::boundary(&iso3, adm);
            if ledger.is_done(&key) {
                stats.files_already_done += 1;
                continue;
            }

            let Some(path) = path else {
                warn!(country = %iso3, adm, "Boundary file not found");
                ledger.mark_skipped(&key, "file_not_found")?;
                stats.files_skipped += 1;
                continue;
            };

            let file = BoundaryFile {
                iso3: iso3.clone(),
                adm,
                path,
            };
            ledger.mark_in_progress(&key)?;
            match self.import_file(&file, meta.get(&iso3, adm), &earth_id).await {
                Ok(outcome) => {
                    info!(
                        country = %iso3,
                        adm,
                        inserted = outcome.inserted,
                        existing = outcome.existing,
                        orphans = outcome.orphans,
                        "Imported boundary file"
                    );
                    let mut metrics = TaskMetrics::inserted(outcome.inserted);
                    if outcome.orphans > 0 {
                        metrics = metrics.with_note(format!("{} orphans", outcome.orphans));
                    }
                    ledger.mark_done(&key, metrics)?;
                    stats.files_done += 1;
                    stats.inserted += outcome.inserted;
                    stats.existing += outcome.existing;
                    stats.orphans += outcome.orphans;
                    stats.features_dropped += outcome.dropped;
                }
                Err(e) => {
                    tracing::error!(country = %iso3, adm, error = %e, "Boundary import failed");
                    ledger.mark_failed(&key, e.to_string())?;
                    stats.files_failed += 1;
                }
            }
        }

        info!("Phase 1 complete: {}", stats.display_string());
        Ok(stats)
    }

    /// Root row id, inserting it on first use
    async fn ensure_earth(&self, ledger: &mut Ledger) -> Result<String> {
        if let Some(id) = ledger.earth_id() {
            if jurisdictions::find_by_id(self.pool, id).await?.is_some() {
                return Ok(id.to_string());
            }
            warn!(id, "Recorded Earth root missing from store, re-creating");
        }
        let id = jurisdictions::ensure_earth(self.pool).await?;
        ledger.set_earth(&id)?;
        Ok(id)
    }

    /// (iso3, adm, path) work list ordered by (adm, iso3)
    ///
    /// With explicit countries every selected ADM is planned, and a missing
    /// file shows up as `None`. Otherwise the directory tree decides.
    fn plan(
        &self,
        root: &Path,
        selection: &Selection,
    ) -> Result<Vec<(String, u8, Option<PathBuf>)>> {
        let mut planned = match selection.country_list() {
            Some(countries) => {
                let mut planned = Vec::new();
                for adm in selection.adm_list() {
                    for iso3 in &countries {
                        let path = boundary_path(root, iso3, adm);
                        let found = path.is_file().then_some(path);
                        planned.push((iso3.clone(), adm, found));
                    }
                }
                planned
            }
            None => discover_files(root)?
                .into_iter()
                .filter(|f| selection.includes_adm(f.adm))
                .map(|f| (f.iso3, f.adm, Some(f.path)))
                .collect(),
        };
        planned.sort_by(|a, b| (a.1, &a.0).cmp(&(b.1, &b.0)));
        Ok(planned)
    }

    /// Parse one file, resolve parents and insert its rows
    pub async fn import_file(
        &self,
        file: &BoundaryFile,
        meta: Option<&BoundaryMeta>,
        earth_id: &str,
    ) -> Result<FileOutcome> {
        let level = i64::from(file.adm) + 1;
        let (features, dropped) =
            parse_boundary_file(file, self.config.boundaries.simplify_tolerance)?;
        let mut outcome = FileOutcome {
            dropped: dropped as u64,
            ..FileOutcome::default()
        };
        if features.is_empty() {
            warn!(file = %file.path.display(), "No usable features in boundary file");
            return Ok(outcome);
        }

        let region = meta.and_then(|m| m.region.as_deref());
        let meta_boundary_id = meta.and_then(|m| m.boundary_id.clone());
        let mut slugs = SlugAllocator::new();
        let mut nationals: HashMap<String, Option<String>> = HashMap::new();
        let mut candidates: HashMap<String, ParentCandidates> = HashMap::new();
        let mut rows = Vec::with_capacity(features.len());

        for feature in features {
            let parent_id = match level {
                1 => Some(earth_id.to_string()),
                2 => {
                    if !nationals.contains_key(&feature.iso3) {
                        let id = jurisdictions::national_id(self.pool, &feature.iso3).await?;
                        nationals.insert(feature.iso3.clone(), id);
                    }
                    nationals.get(&feature.iso3).cloned().flatten()
                }
                _ => {
                    if !candidates.contains_key(&feature.iso3) {
                        let shapes = jurisdictions::fetch_all_shapes(
                            self.pool,
                            &feature.iso3,
                            level - 1,
                            PARENT_PAGE_SIZE,
                        )
                        .await?;
                        candidates.insert(feature.iso3.clone(), ParentCandidates::new(shapes));
                    }
                    candidates
                        .get(&feature.iso3)
                        .and_then(|c| c.best_match(&feature.geometry))
                        .map(|shape| shape.id.clone())
                }
            };

            if parent_id.is_none() {
                warn!(
                    country = %feature.iso3,
                    level,
                    name = %feature.name,
                    "No parent found, inserting as orphan"
                );
                outcome.orphans += 1;
            }

            let slug = slugs.allocate(&feature.iso3, level, &feature.name);
            rows.push(NewJurisdiction {
                id: Uuid::new_v4(),
                official_languages: official_languages(&feature.iso3, region),
                name: feature.name,
                slug,
                iso_code: Some(feature.iso3),
                adm_level: level,
                parent_id,
                source: SOURCE_GEOBOUNDARIES.to_string(),
                boundary_id: feature.boundary_id.or_else(|| meta_boundary_id.clone()),
                geometry: feature.geometry,
            });
        }

        let max_wait = self.config.store.max_lock_wait_ms;
        for batch in rows.chunks(self.config.boundaries.insert_batch_size) {
            let inserted = retry_on_lock("insert jurisdictions", max_wait, || {
                jurisdictions::insert_batch(self.pool, batch)
            })
            .await?;
            outcome.inserted += inserted;
            outcome.existing += batch.len() as u64 - inserted;
        }

        Ok(outcome)
    }
}
