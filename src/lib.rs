pub mod config;
pub mod error;
pub mod models;
pub mod registry;
pub mod services;

pub use config::OrmConfig;
pub use error::OrmError;
pub use models::*;
pub use registry::{AncestryResolver, MetadataRegistry, PrimaryKey, RelationGraph};
pub use services::*;
