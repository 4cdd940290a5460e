//! Test Helper Utilities
//!
//! Shared utilities for testing geoseed-etl

#![allow(dead_code, unused_imports)]

pub mod fixtures;
pub mod ledger_history;
pub mod test_env;

// Re-export commonly used items
pub use fixtures::{
    raster_path, rect_feature, write_boundary_file, write_geotiff, write_meta_csv,
    write_nzl_boundaries, write_nzl_raster, write_square_country, FixtureFeature, NZL_CELL_VALUE,
};
pub use ledger_history::RecordingBackend;
pub use test_env::TestEnv;
