pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

pub use config::cli::LocalStorage;
#[cfg(feature = "cli")]
pub use config::CliConfig;
pub use config::{load_config, ProjectConfig};

pub use core::{etl::EtlEngine, pipeline::SpandexPipeline};
pub use domain::geometry::{Catalog, GeoTable, GeometryColumn};
pub use domain::model::{Table, Value};
pub use utils::error::{Result, SpandexError};
