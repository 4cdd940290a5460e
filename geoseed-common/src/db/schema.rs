//! Schema verification
//!
//! The store may be shared with another application that owns the wider
//! schema, so the pipeline never alters tables it finds. Instead each table
//! declares the columns the pipeline reads and writes, and startup compares
//! them against `PRAGMA table_info`. Any drift is a fatal [`Error::Schema`].

use crate::{Error, Result};
use sqlx::{Row, SqlitePool};
use tracing::{error, info};

/// Column the pipeline depends on
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    pub name: String,
    /// SQL type (e.g., "TEXT", "INTEGER", "REAL", "BLOB")
    pub sql_type: String,
    pub not_null: bool,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            not_null: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }
}

/// Actual column from database introspection (PRAGMA table_info result)
#[derive(Debug, Clone)]
pub struct ActualColumn {
    pub cid: i32,
    pub name: String,
    pub type_name: String,
    pub not_null: bool,
}

/// Difference between the expected and the actual schema
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaDrift {
    MissingTable {
        table: String,
    },
    MissingColumn {
        table: String,
        column: String,
    },
    TypeMismatch {
        table: String,
        column: String,
        expected: String,
        actual: String,
    },
    /// Expected NOT NULL, found nullable
    NullableColumn {
        table: String,
        column: String,
    },
}

impl std::fmt::Display for SchemaDrift {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemaDrift::MissingTable { table } => write!(f, "table '{}' missing", table),
            SchemaDrift::MissingColumn { table, column } => {
                write!(f, "column {}.{} missing", table, column)
            }
            SchemaDrift::TypeMismatch {
                table,
                column,
                expected,
                actual,
            } => write!(
                f,
                "column {}.{} has type '{}', expected '{}'",
                table, column, actual, expected
            ),
            SchemaDrift::NullableColumn { table, column } => {
                write!(f, "column {}.{} must be NOT NULL", table, column)
            }
        }
    }
}

/// Declares the columns one table must carry
pub trait TableSchema {
    fn table_name() -> &'static str;

    fn expected_columns() -> Vec<ColumnDefinition>;
}

/// Jurisdiction tree
pub struct JurisdictionsTableSchema;

impl TableSchema for JurisdictionsTableSchema {
    fn table_name() -> &'static str {
        "jurisdictions"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("id", "TEXT"),
            ColumnDefinition::new("name", "TEXT").not_null(),
            ColumnDefinition::new("slug", "TEXT").not_null(),
            ColumnDefinition::new("iso_code", "TEXT"),
            ColumnDefinition::new("adm_level", "INTEGER").not_null(),
            ColumnDefinition::new("parent_id", "TEXT"),
            ColumnDefinition::new("source", "TEXT").not_null(),
            ColumnDefinition::new("boundary_id", "TEXT"),
            ColumnDefinition::new("official_languages", "TEXT"),
            ColumnDefinition::new("geometry", "TEXT").not_null(),
            ColumnDefinition::new("min_x", "REAL").not_null(),
            ColumnDefinition::new("min_y", "REAL").not_null(),
            ColumnDefinition::new("max_x", "REAL").not_null(),
            ColumnDefinition::new("max_y", "REAL").not_null(),
            ColumnDefinition::new("centroid_x", "REAL"),
            ColumnDefinition::new("centroid_y", "REAL"),
            ColumnDefinition::new("population", "INTEGER").not_null(),
            ColumnDefinition::new("population_year", "INTEGER"),
            ColumnDefinition::new("population_note", "TEXT"),
            ColumnDefinition::new("created_at", "TEXT").not_null(),
            ColumnDefinition::new("updated_at", "TEXT").not_null(),
        ]
    }
}

/// Population raster tiles
pub struct RasterTilesTableSchema;

impl TableSchema for RasterTilesTableSchema {
    fn table_name() -> &'static str {
        "raster_tiles"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("iso_code", "TEXT").not_null(),
            ColumnDefinition::new("year", "INTEGER").not_null(),
            ColumnDefinition::new("resolution_m", "INTEGER").not_null(),
            ColumnDefinition::new("tile_row", "INTEGER").not_null(),
            ColumnDefinition::new("tile_col", "INTEGER").not_null(),
            ColumnDefinition::new("width", "INTEGER").not_null(),
            ColumnDefinition::new("height", "INTEGER").not_null(),
            ColumnDefinition::new("origin_x", "REAL").not_null(),
            ColumnDefinition::new("origin_y", "REAL").not_null(),
            ColumnDefinition::new("pixel_width", "REAL").not_null(),
            ColumnDefinition::new("pixel_height", "REAL").not_null(),
            ColumnDefinition::new("nodata", "REAL"),
            ColumnDefinition::new("payload", "BLOB").not_null(),
            ColumnDefinition::new("min_x", "REAL").not_null(),
            ColumnDefinition::new("min_y", "REAL").not_null(),
            ColumnDefinition::new("max_x", "REAL").not_null(),
            ColumnDefinition::new("max_y", "REAL").not_null(),
            ColumnDefinition::new("footprint", "TEXT").not_null(),
        ]
    }
}

/// Read actual columns using PRAGMA table_info, ordered by cid
pub async fn introspect_table(pool: &SqlitePool, table_name: &str) -> Result<Vec<ActualColumn>> {
    let query = format!("PRAGMA table_info({})", table_name);
    let rows = sqlx::query(&query).fetch_all(pool).await?;

    let mut columns: Vec<ActualColumn> = rows
        .iter()
        .map(|row| ActualColumn {
            cid: row.get("cid"),
            name: row.get("name"),
            type_name: row.get("type"),
            not_null: row.get::<i32, _>("notnull") != 0,
        })
        .collect();

    columns.sort_by_key(|c| c.cid);
    Ok(columns)
}

/// Compare one table's expected columns to the introspected ones
pub fn compare(
    table_name: &str,
    expected: &[ColumnDefinition],
    actual: &[ActualColumn],
) -> Vec<SchemaDrift> {
    if actual.is_empty() {
        return vec![SchemaDrift::MissingTable {
            table: table_name.to_string(),
        }];
    }

    let mut drift = Vec::new();
    for expected_col in expected {
        match actual.iter().find(|c| c.name == expected_col.name) {
            Some(actual_col) => {
                if !types_compatible(&expected_col.sql_type, &actual_col.type_name) {
                    drift.push(SchemaDrift::TypeMismatch {
                        table: table_name.to_string(),
                        column: expected_col.name.clone(),
                        expected: expected_col.sql_type.clone(),
                        actual: actual_col.type_name.clone(),
                    });
                }
                if expected_col.not_null && !actual_col.not_null {
                    drift.push(SchemaDrift::NullableColumn {
                        table: table_name.to_string(),
                        column: expected_col.name.clone(),
                    });
                }
            }
            None => drift.push(SchemaDrift::MissingColumn {
                table: table_name.to_string(),
                column: expected_col.name.clone(),
            }),
        }
    }
    drift
}

/// SQLite type affinity comparison
fn types_compatible(expected: &str, actual: &str) -> bool {
    let exp = expected.to_uppercase();
    let act = actual.to_uppercase();

    if exp == act {
        return true;
    }

    let affinity = |t: &str| {
        if t.contains("INT") {
            "INTEGER"
        } else if t.contains("CHAR") || t.contains("CLOB") || t.contains("TEXT") {
            "TEXT"
        } else if t.contains("BLOB") || t.is_empty() {
            "BLOB"
        } else if t.contains("REAL") || t.contains("FLOA") || t.contains("DOUB") {
            "REAL"
        } else {
            "NUMERIC"
        }
    };
    affinity(&exp) == affinity(&act)
}

async fn verify_table<T: TableSchema>(pool: &SqlitePool) -> Result<Vec<SchemaDrift>> {
    let actual = introspect_table(pool, T::table_name()).await?;
    Ok(compare(T::table_name(), &T::expected_columns(), &actual))
}

/// Verify every pipeline-owned table
///
/// # Returns
/// `Ok(())` when all expected columns exist with compatible types,
/// otherwise [`Error::Schema`] listing every difference found.
pub async fn verify_schema(pool: &SqlitePool) -> Result<()> {
    let mut drift = verify_table::<JurisdictionsTableSchema>(pool).await?;
    drift.extend(verify_table::<RasterTilesTableSchema>(pool).await?);

    if drift.is_empty() {
        info!("Schema verified");
        return Ok(());
    }

    for item in &drift {
        error!("Schema drift: {}", item);
    }
    let summary: Vec<String> = drift.iter().map(ToString::to_string).collect();
    Err(Error::Schema(summary.join("; ")))
}
