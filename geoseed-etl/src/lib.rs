//! geoseed-etl library interface
//!
//! Two-phase seeding of the jurisdiction tree:
//! - **Phase 1**: boundary files → jurisdiction rows with parent links
//! - **Phase 2**: population rasters → per-jurisdiction population
//!
//! plus the progress ledger both phases resume from, optional raster tile
//! materialization, and the tile aggregation query. Exposed as a library so
//! integration tests can drive each phase directly.

pub mod checkpoint;
pub mod db;
pub mod geometry;
pub mod logging;
pub mod raster;
pub mod selection;
pub mod services;
pub mod utils;

pub use checkpoint::{Ledger, TaskKey, TaskStatus};
pub use selection::Selection;
