//! Pipeline services

pub mod boundary_importer;
pub mod hierarchy_repair;
pub mod languages;
pub mod pipeline_orchestrator;
pub mod population_overlay;
pub mod tile_loader;
pub mod tile_query;

pub use boundary_importer::{BoundaryImporter, ImportStats};
pub use hierarchy_repair::{HierarchyRepair, RepairReport};
pub use languages::official_languages;
pub use pipeline_orchestrator::{PipelineOrchestrator, RunOptions, RunOutcome};
pub use population_overlay::{OverlayOptions, OverlayStats, PopulationOverlay};
pub use tile_loader::{TileLoadStats, TileLoader};
pub use tile_query::population_in_polygon;
