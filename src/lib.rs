//! estuarine: A Fast, Modular Sentinel-2 Water-Quality Index Processor
//!
//! This library turns Sentinel-2 L2A scenes into per-scene water-quality
//! index series (NDWI, NDTI, NDCI), aligns them with a sea-surface
//! temperature driver on a monthly grid, and derives joint statistics:
//! correlations, standardized error, seasonal means, and a principal
//! component decomposition.

pub mod types;
pub mod io;
pub mod core;
pub mod pipeline;

// Re-export main types and functions for easier access
pub use types::{
    Band, BandGrid, BoundingBox, DateInterval, FieldCube, SceneRecord, SelectedSceneSet, WqError,
    WqResult,
};

pub use io::{CatalogClient, DriverLoader, HttpBandFetcher, StacGriddedStore};

pub use crate::core::{IndexEngine, IndexSuite, SceneSelector, TimeSeries, WaterIndex};

pub use pipeline::{PipelineParams, PipelineReport, WqiPipeline};
