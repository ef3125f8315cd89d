//! Catalog access and raster/driver input

pub mod catalog;
pub mod assets;
pub mod driver;

// Re-export main types
pub use catalog::{CatalogClient, CatalogConfig, SceneSearch};
pub use assets::{decode_band_tiff, downsample, BandFetcher, HrefFetcher, HttpBandFetcher};
pub use driver::{
    DriverLoader, GriddedField, GriddedStore, PrecipCoverage, PrecipLoader, StacGriddedStore,
};
