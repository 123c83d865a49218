// Adapters layer: file formats, the SRID lookup service and export bundles.

pub mod csv;
pub mod geojson;
pub mod loader;
pub mod srid;
pub mod store;
pub mod wkt;

pub use loader::{DataLoader, LoadEntry, LoadOptions};
pub use srid::Prj2EpsgClient;
