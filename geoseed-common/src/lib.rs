//! # geoseed common library
//!
//! Shared code for the jurisdiction seeding pipeline:
//! - Error type used across crates
//! - Pipeline configuration loading
//! - Spatial store initialization and schema verification

pub mod config;
pub mod db;
pub mod error;

pub use config::PipelineConfig;
pub use error::{Error, Result};
