//! Jurisdiction table operations
//!
//! Rows are written once by the boundary importer (insert-if-absent keyed by
//! slug) and afterwards only their population columns and parent link are
//! touched.

use crate::checkpoint::PopulatedPair;
use crate::geometry::{self, Bbox};
use chrono::Utc;
use geo::MultiPolygon;
use geoseed_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Provenance tag for rows read from boundary files
pub const SOURCE_GEOBOUNDARIES: &str = "geoboundaries";

/// Provenance tag for rows the pipeline creates itself (the root)
pub const SOURCE_SYNTHETIC: &str = "synthetic";

pub const EARTH_SLUG: &str = "earth-0-earth";
pub const EARTH_NAME: &str = "Earth";

/// Row to insert
#[derive(Debug, Clone)]
pub struct NewJurisdiction {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub iso_code: Option<String>,
    pub adm_level: i64,
    pub parent_id: Option<String>,
    pub source: String,
    pub boundary_id: Option<String>,
    pub official_languages: Vec<String>,
    pub geometry: MultiPolygon<f64>,
}

/// Attribute view of a stored row (no geometry)
#[derive(Debug, Clone, PartialEq)]
pub struct JurisdictionRow {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub iso_code: Option<String>,
    pub adm_level: i64,
    pub parent_id: Option<String>,
    pub source: String,
    pub boundary_id: Option<String>,
    pub official_languages: Vec<String>,
    pub population: i64,
    pub population_year: Option<i64>,
    pub population_note: Option<String>,
}

/// Geometry view of a stored row
#[derive(Debug, Clone)]
pub struct JurisdictionShape {
    pub id: String,
    pub name: String,
    pub adm_level: i64,
    pub bbox: Bbox,
    pub centroid: Option<(f64, f64)>,
    pub geometry: MultiPolygon<f64>,
}

/// New population value for one row
#[derive(Debug, Clone, PartialEq)]
pub struct PopulationUpdate {
    pub id: String,
    pub population: i64,
    pub note: Option<String>,
}

/// Orphans of one (country, level)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanGroup {
    pub iso_code: String,
    pub adm_level: i64,
    pub count: i64,
}

const ROW_COLUMNS: &str = "id, name, slug, iso_code, adm_level, parent_id, source, boundary_id, \
     official_languages, population, population_year, population_note";

const SHAPE_COLUMNS: &str =
    "id, name, adm_level, geometry, min_x, min_y, max_x, max_y, centroid_x, centroid_y";

fn row_from(row: &SqliteRow) -> Result<JurisdictionRow> {
    let id: String = row.get("id");
    let languages: String = row.get("official_languages");
    let official_languages = serde_json::from_str(&languages).map_err(|e| {
        geoseed_common::Error::Internal(format!("official_languages of {}: {}", id, e))
    })?;
    Ok(JurisdictionRow {
        id,
        name: row.get("name"),
        slug: row.get("slug"),
        iso_code: row.get("iso_code"),
        adm_level: row.get("adm_level"),
        parent_id: row.get("parent_id"),
        source: row.get("source"),
        boundary_id: row.get("boundary_id"),
        official_languages,
        population: row.get("population"),
        population_year: row.get("population_year"),
        population_note: row.get("population_note"),
    })
}

fn shape_from(row: &SqliteRow) -> Result<JurisdictionShape> {
    let text: String = row.get("geometry");
    let centroid = match (
        row.get::<Option<f64>, _>("centroid_x"),
        row.get::<Option<f64>, _>("centroid_y"),
    ) {
        (Some(x), Some(y)) => Some((x, y)),
        _ => None,
    };
    Ok(JurisdictionShape {
        id: row.get("id"),
        name: row.get("name"),
        adm_level: row.get("adm_level"),
        bbox: Bbox::new(
            row.get("min_x"),
            row.get("min_y"),
            row.get("max_x"),
            row.get("max_y"),
        ),
        centroid,
        geometry: geometry::from_geojson_text(&text)?,
    })
}

/// Insert a batch in one transaction, leaving existing slugs untouched
///
/// # Returns
/// Number of rows actually inserted
pub async fn insert_batch(pool: &SqlitePool, rows: &[NewJurisdiction]) -> Result<u64> {
    if rows.is_empty() {
        return Ok(0);
    }
    let now = Utc::now().to_rfc3339();
    let mut tx = pool.begin().await?;
    let mut inserted = 0;

    for row in rows {
        let bbox = Bbox::of(&row.geometry).unwrap_or(Bbox::new(0.0, 0.0, 0.0, 0.0));
        let centroid = geometry::centroid(&row.geometry);
        let languages = serde_json::to_string(&row.official_languages)?;

        let result = sqlx::query(
            r#"
            INSERT INTO jurisdictions (
                id, name, slug, iso_code, adm_level, parent_id, source, boundary_id,
                official_languages, geometry, min_x, min_y, max_x, max_y,
                centroid_x, centroid_y, population, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
            ON CONFLICT(slug) DO NOTHING
            "#,
        )
        .bind(row.id.to_string())
        .bind(&row.name)
        .bind(&row.slug)
        .bind(&row.iso_code)
        .bind(row.adm_level)
        .bind(&row.parent_id)
        .bind(&row.source)
        .bind(&row.boundary_id)
        .bind(languages)
        .bind(geometry::to_geojson_text(&row.geometry))
        .bind(bbox.min_x)
        .bind(bbox.min_y)
        .bind(bbox.max_x)
        .bind(bbox.max_y)
        .bind(centroid.map(|c| c.0))
        .bind(centroid.map(|c| c.1))
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        inserted += result.rows_affected();
    }

    tx.commit().await?;
    Ok(inserted)
}

/// Insert the level-0 root if absent and return its id
pub async fn ensure_earth(pool: &SqlitePool) -> Result<String> {
    if let Some(row) = find_by_slug(pool, EARTH_SLUG).await? {
        return Ok(row.id);
    }

    let earth = NewJurisdiction {
        id: Uuid::new_v4(),
        name: EARTH_NAME.to_string(),
        slug: EARTH_SLUG.to_string(),
        iso_code: None,
        adm_level: 0,
        parent_id: None,
        source: SOURCE_SYNTHETIC.to_string(),
        boundary_id: None,
        official_languages: vec!["en".to_string()],
        geometry: geometry::world(),
    };
    insert_batch(pool, std::slice::from_ref(&earth)).await?;

    // Re-read: a concurrent writer may have won the slug
    let row = find_by_slug(pool, EARTH_SLUG).await?.ok_or_else(|| {
        geoseed_common::Error::Internal("root jurisdiction missing after insert".to_string())
    })?;
    tracing::info!(id = %row.id, "Earth root present");
    Ok(row.id)
}

pub async fn find_by_slug(pool: &SqlitePool, slug: &str) -> Result<Option<JurisdictionRow>> {
    let sql = format!("SELECT {} FROM jurisdictions WHERE slug = ?", ROW_COLUMNS);
    let row = sqlx::query(&sql).bind(slug).fetch_optional(pool).await?;
    row.as_ref().map(row_from).transpose()
}

pub async fn find_by_id(pool: &SqlitePool, id: &str) -> Result<Option<JurisdictionRow>> {
    let sql = format!("SELECT {} FROM jurisdictions WHERE id = ?", ROW_COLUMNS);
    let row = sqlx::query(&sql).bind(id).fetch_optional(pool).await?;
    row.as_ref().map(row_from).transpose()
}

/// The country's national (level 1) row, first by id if several exist
pub async fn national_id(pool: &SqlitePool, iso_code: &str) -> Result<Option<String>> {
    let id: Option<String> = sqlx::query_scalar(
        "SELECT id FROM jurisdictions WHERE iso_code = ? AND adm_level = 1 ORDER BY id LIMIT 1",
    )
    .bind(iso_code)
    .fetch_optional(pool)
    .await?;
    Ok(id)
}

pub async fn count_rows(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jurisdictions")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

pub async fn count_at_level(pool: &SqlitePool, iso_code: &str, adm_level: i64) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM jurisdictions WHERE iso_code = ? AND adm_level = ?",
    )
    .bind(iso_code)
    .bind(adm_level)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Page of one (country, level) ordered by id
pub async fn fetch_rows_page(
    pool: &SqlitePool,
    iso_code: &str,
    adm_level: i64,
    limit: i64,
    offset: i64,
) -> Result<Vec<JurisdictionRow>> {
    let sql = format!(
        "SELECT {} FROM jurisdictions WHERE iso_code = ? AND adm_level = ? \
         ORDER BY id LIMIT ? OFFSET ?",
        ROW_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(iso_code)
        .bind(adm_level)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;
    rows.iter().map(row_from).collect()
}

/// Geometry page of one (country, level) ordered by id
pub async fn fetch_shapes_page(
    pool: &SqlitePool,
    iso_code: &str,
    adm_level: i64,
    limit: i64,
    offset: i64,
) -> Result<Vec<JurisdictionShape>> {
    let sql = format!(
        "SELECT {} FROM jurisdictions WHERE iso_code = ? AND adm_level = ? \
         ORDER BY id LIMIT ? OFFSET ?",
        SHAPE_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(iso_code)
        .bind(adm_level)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;
    rows.iter().map(shape_from).collect()
}

/// Every shape of one (country, level), read page by page
pub async fn fetch_all_shapes(
    pool: &SqlitePool,
    iso_code: &str,
    adm_level: i64,
    page_size: i64,
) -> Result<Vec<JurisdictionShape>> {
    let mut shapes = Vec::new();
    let mut offset = 0;
    loop {
        let page = fetch_shapes_page(pool, iso_code, adm_level, page_size, offset).await?;
        let len = page.len() as i64;
        shapes.extend(page);
        if len < page_size {
            return Ok(shapes);
        }
        offset += len;
    }
}

/// Distinct countries with at least one non-root row
pub async fn distinct_countries(pool: &SqlitePool) -> Result<Vec<String>> {
    let countries: Vec<String> = sqlx::query_scalar(
        "SELECT DISTINCT iso_code FROM jurisdictions \
         WHERE iso_code IS NOT NULL AND adm_level >= 1 ORDER BY iso_code",
    )
    .fetch_all(pool)
    .await?;
    Ok(countries)
}

/// Levels present for a country, ascending
pub async fn levels_present(pool: &SqlitePool, iso_code: &str) -> Result<Vec<i64>> {
    let levels: Vec<i64> = sqlx::query_scalar(
        "SELECT DISTINCT adm_level FROM jurisdictions \
         WHERE iso_code = ? AND adm_level >= 1 ORDER BY adm_level",
    )
    .bind(iso_code)
    .fetch_all(pool)
    .await?;
    Ok(levels)
}

/// Write population values for `year` in one transaction
///
/// # Returns
/// Number of rows updated
pub async fn apply_population(
    pool: &SqlitePool,
    updates: &[PopulationUpdate],
    year: i32,
) -> Result<u64> {
    if updates.is_empty() {
        return Ok(0);
    }
    let now = Utc::now().to_rfc3339();
    let mut tx = pool.begin().await?;
    let mut updated = 0;

    for update in updates {
        let result = sqlx::query(
            r#"
            UPDATE jurisdictions
            SET population = ?, population_year = ?, population_note = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(update.population)
        .bind(year)
        .bind(&update.note)
        .bind(&now)
        .bind(&update.id)
        .execute(&mut *tx)
        .await?;
        updated += result.rows_affected();
    }

    tx.commit().await?;
    Ok(updated)
}

/// Set population 0 with an explanatory note for a whole (country, level)
pub async fn zero_level_population(
    pool: &SqlitePool,
    iso_code: &str,
    adm_level: i64,
    year: i32,
    note: &str,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE jurisdictions
        SET population = 0, population_year = ?, population_note = ?, updated_at = ?
        WHERE iso_code = ? AND adm_level = ?
        "#,
    )
    .bind(year)
    .bind(note)
    .bind(Utc::now().to_rfc3339())
    .bind(iso_code)
    .bind(adm_level)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// National population and the sum over its direct children
///
/// `None` when the country has no national row.
pub async fn national_and_children_population(
    pool: &SqlitePool,
    iso_code: &str,
) -> Result<Option<(i64, i64, i64)>> {
    let Some(national_id) = national_id(pool, iso_code).await? else {
        return Ok(None);
    };
    let national: i64 = sqlx::query_scalar("SELECT population FROM jurisdictions WHERE id = ?")
        .bind(&national_id)
        .fetch_one(pool)
        .await?;
    let row = sqlx::query(
        "SELECT COUNT(*) AS children, COALESCE(SUM(population), 0) AS total \
         FROM jurisdictions WHERE parent_id = ?",
    )
    .bind(&national_id)
    .fetch_one(pool)
    .await?;
    Ok(Some((national, row.get("total"), row.get("children"))))
}

/// (country, level) groups holding rows without a parent
pub async fn orphan_groups(pool: &SqlitePool) -> Result<Vec<OrphanGroup>> {
    let rows = sqlx::query(
        r#"
        SELECT iso_code, adm_level, COUNT(*) AS n
        FROM jurisdictions
        WHERE parent_id IS NULL AND adm_level >= 1 AND iso_code IS NOT NULL
        GROUP BY iso_code, adm_level
        ORDER BY iso_code, adm_level
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows
        .iter()
        .map(|r| OrphanGroup {
            iso_code: r.get("iso_code"),
            adm_level: r.get("adm_level"),
            count: r.get("n"),
        })
        .collect())
}

/// Orphans of a group after `after_id` (keyset paging, stable while parents are set)
pub async fn fetch_orphans_page(
    pool: &SqlitePool,
    iso_code: &str,
    adm_level: i64,
    after_id: &str,
    limit: i64,
) -> Result<Vec<JurisdictionShape>> {
    let sql = format!(
        "SELECT {} FROM jurisdictions \
         WHERE iso_code = ? AND adm_level = ? AND parent_id IS NULL AND id > ? \
         ORDER BY id LIMIT ?",
        SHAPE_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(iso_code)
        .bind(adm_level)
        .bind(after_id)
        .bind(limit)
        .fetch_all(pool)
        .await?;
    rows.iter().map(shape_from).collect()
}

pub async fn set_parent(pool: &SqlitePool, id: &str, parent_id: &str) -> Result<()> {
    sqlx::query("UPDATE jurisdictions SET parent_id = ?, updated_at = ? WHERE id = ?")
        .bind(parent_id)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Attach a country's parentless national rows to the root
pub async fn attach_nationals_to_root(
    pool: &SqlitePool,
    iso_code: &str,
    earth_id: &str,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE jurisdictions SET parent_id = ?, updated_at = ? \
         WHERE iso_code = ? AND adm_level = 1 AND parent_id IS NULL",
    )
    .bind(earth_id)
    .bind(Utc::now().to_rfc3339())
    .bind(iso_code)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Delete rows at `min_level` and deeper, deepest level first
///
/// The root (level 0) is never deleted. `countries = None` covers every
/// country.
///
/// # Returns
/// Number of rows deleted
pub async fn delete_scope(
    pool: &SqlitePool,
    countries: Option<&[String]>,
    min_level: i64,
) -> Result<u64> {
    let min_level = min_level.max(1);
    let max_level: Option<i64> = sqlx::query_scalar("SELECT MAX(adm_level) FROM jurisdictions")
        .fetch_one(pool)
        .await?;
    let Some(max_level) = max_level else {
        return Ok(0);
    };

    let mut deleted = 0;
    for level in (min_level..=max_level).rev() {
        match countries {
            Some(list) => {
                for iso in list {
                    let result = sqlx::query(
                        "DELETE FROM jurisdictions WHERE iso_code = ? AND adm_level = ?",
                    )
                    .bind(iso)
                    .bind(level)
                    .execute(pool)
                    .await?;
                    deleted += result.rows_affected();
                }
            }
            None => {
                let result = sqlx::query("DELETE FROM jurisdictions WHERE adm_level = ?")
                    .bind(level)
                    .execute(pool)
                    .await?;
                deleted += result.rows_affected();
            }
        }
    }
    tracing::info!(deleted, min_level, "Deleted jurisdictions for fresh run");
    Ok(deleted)
}

/// (country, level) pairs whose every row already carries a population year
pub async fn populated_pairs(pool: &SqlitePool) -> Result<Vec<PopulatedPair>> {
    let rows = sqlx::query(
        r#"
        SELECT iso_code, adm_level, COUNT(*) AS n
        FROM jurisdictions
        WHERE iso_code IS NOT NULL AND adm_level >= 1
        GROUP BY iso_code, adm_level
        HAVING COUNT(population_year) = COUNT(*)
        ORDER BY iso_code, adm_level
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows
        .iter()
        .map(|r| PopulatedPair {
            country: r.get("iso_code"),
            level: r.get("adm_level"),
            rows: r.get::<i64, _>("n") as u64,
        })
        .collect())
}

/// Root rows (no parent) as (level, count)
pub async fn root_levels(pool: &SqlitePool) -> Result<Vec<(i64, i64)>> {
    let rows = sqlx::query(
        "SELECT adm_level, COUNT(*) AS n FROM jurisdictions WHERE parent_id IS NULL \
         GROUP BY adm_level ORDER BY adm_level",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(|r| (r.get("adm_level"), r.get("n"))).collect())
}

/// Parent/child pairs whose levels do not differ by exactly one
pub async fn count_level_gaps(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM jurisdictions c
        JOIN jurisdictions p ON c.parent_id = p.id
        WHERE c.adm_level != p.adm_level + 1
        "#,
    )
    .fetch_one(pool)
    .await?;
    Ok(count)
}
