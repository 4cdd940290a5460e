//! Spatial store initialization and schema verification

pub mod init;
pub mod schema;

pub use init::*;
pub use schema::{verify_schema, SchemaDrift};
