// THEORY:
// This file is the main entry point for the `landcover_toolkit` library crate.
// It exposes the `ExportPipeline` as the high-level interface: hand it a
// completed selection and it writes the class rasters and area tables for it.
//
// The lower layers stay public because hosts drive them directly. A UI walks
// the `selection` state machine and reacts to its effects, reads the typed
// `catalog` to fill its menus, and calls `discovery` to list tables. The
// geometry, raster and zonal modules are usable on their own for any
// class-raster statistics.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod pipeline;

// Re-export the types most callers need.
pub use config::ToolkitConfig;
pub use core_modules::catalog::{CollectionVersion, DataProduct, RegionKey, catalog};
pub use core_modules::export::{ExportReceipt, ExportSettings, ExportSink, FileSystemSink};
pub use core_modules::selection::{Effect, Selection, SelectionInput};
pub use core_modules::store::AssetStore;
pub use error::{Result, ToolkitError};
pub use pipeline::{ExportPipeline, ExportReport, MapLayer};
