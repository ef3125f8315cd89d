//! Normalized-difference water-quality indices.
//!
//! For every selected scene the engine materializes the required bands,
//! masks to water-classified pixels, and reduces each index to a spatial
//! mean and median. The full time x band x row x column cube is never held in
//! memory; [`CubePlan`] describes the work and scenes are evaluated one at
//! a time (in parallel across scenes) at reduction points.

use crate::core::series::{ClimatologyTable, TimeSeries};
use crate::io::assets::BandFetcher;
use crate::types::{
    Band, BandGrid, SceneRecord, SelectedSceneSet, WqError, WqResult, WATER_CLASSES,
};
use chrono::{DateTime, Utc};
use ndarray::Array2;
use num_traits::Float;
use rayon::prelude::*;

/// The three water-quality indices, each a normalized band-pair difference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaterIndex {
    /// Water presence: (green - nir) / (green + nir)
    Ndwi,
    /// Turbidity: (red - green) / (red + green)
    Ndti,
    /// Chlorophyll: (rededge - red) / (rededge + red)
    Ndci,
}

impl WaterIndex {
    pub fn all() -> [WaterIndex; 3] {
        [WaterIndex::Ndwi, WaterIndex::Ndti, WaterIndex::Ndci]
    }

    /// Numerator-first band pair. The NDTI red/green pairing follows the
    /// turbidity-index literature definition and must not be swapped for a
    /// red/NIR variant; downstream correlations are tied to it.
    pub fn band_pair(&self) -> (Band, Band) {
        match self {
            WaterIndex::Ndwi => (Band::Green, Band::Nir),
            WaterIndex::Ndti => (Band::Red, Band::Green),
            WaterIndex::Ndci => (Band::RedEdge, Band::Red),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            WaterIndex::Ndwi => "ndwi",
            WaterIndex::Ndti => "ndti",
            WaterIndex::Ndci => "ndci",
        }
    }

    pub fn mean_column(&self) -> String {
        format!("{}_mean", self.name())
    }

    pub fn median_column(&self) -> String {
        format!("{}_median", self.name())
    }
}

/// Normalized difference of two reflectances.
///
/// Missing (rather than infinite or NaN) when the denominator is zero or
/// either input is non-finite or negative; reflectance below zero is outside
/// the physical range and excluded from reductions.
pub fn normalized_diff<F: Float>(a: F, b: F) -> Option<F> {
    if !a.is_finite() || !b.is_finite() || a < F::zero() || b < F::zero() {
        return None;
    }
    let denom = a + b;
    if denom == F::zero() {
        return None;
    }
    Some((a - b) / denom)
}

/// Materialized bands for one scene, co-registered to a common grid.
#[derive(Debug, Clone)]
pub struct SceneBands {
    pub green: BandGrid,
    pub red: BandGrid,
    pub rededge: BandGrid,
    pub nir: BandGrid,
    pub scl: BandGrid,
}

impl SceneBands {
    pub fn band(&self, band: Band) -> &BandGrid {
        match band {
            Band::Green => &self.green,
            Band::Red => &self.red,
            Band::RedEdge => &self.rededge,
            Band::Nir => &self.nir,
            Band::Scl => &self.scl,
        }
    }
}

/// Lazy description of the band data a computation needs.
///
/// Nothing is fetched until [`materialize_scene`](CubePlan::materialize_scene)
/// is called; the underlying remote handles are not guaranteed stable across
/// runs, so plans are built fresh per engine invocation.
pub struct CubePlan<'a> {
    scenes: &'a SelectedSceneSet,
    bands: [Band; 5],
}

impl<'a> CubePlan<'a> {
    pub fn new(scenes: &'a SelectedSceneSet) -> Self {
        Self {
            scenes,
            bands: Band::required(),
        }
    }

    pub fn scenes(&self) -> &SelectedSceneSet {
        self.scenes
    }

    pub fn bands(&self) -> &[Band] {
        &self.bands
    }

    /// Fetch and co-register all bands of one scene.
    ///
    /// Sentinel-2 bands come at heterogeneous native resolutions (SCL and
    /// red-edge at 20 m, the rest at 10 m); everything is resampled to the
    /// green band's grid by nearest neighbor.
    pub fn materialize_scene<F: BandFetcher>(
        &self,
        fetcher: &F,
        scene: &SceneRecord,
    ) -> WqResult<SceneBands> {
        let green = fetcher.fetch(scene, Band::Green)?;
        if green.is_empty() {
            return Err(WqError::AssetRead(format!(
                "green band of scene {} decoded to an empty grid",
                scene.id
            )));
        }
        let shape = green.dim();

        let red = resize_nearest(&fetcher.fetch(scene, Band::Red)?, shape)?;
        let rededge = resize_nearest(&fetcher.fetch(scene, Band::RedEdge)?, shape)?;
        let nir = resize_nearest(&fetcher.fetch(scene, Band::Nir)?, shape)?;
        let scl = resize_nearest(&fetcher.fetch(scene, Band::Scl)?, shape)?;

        Ok(SceneBands {
            green,
            red,
            rededge,
            nir,
            scl,
        })
    }
}

/// Nearest-neighbor resample to a target shape.
///
/// An empty source grid has no pixels to sample from; resampling it to a
/// non-empty target is reported as invalid data rather than fabricating
/// values.
pub fn resize_nearest(grid: &BandGrid, shape: (usize, usize)) -> WqResult<BandGrid> {
    if grid.dim() == shape {
        return Ok(grid.clone());
    }
    let (in_rows, in_cols) = grid.dim();
    let (out_rows, out_cols) = shape;
    if out_rows == 0 || out_cols == 0 {
        return Ok(Array2::zeros(shape));
    }
    if in_rows == 0 || in_cols == 0 {
        return Err(WqError::InvalidFormat(format!(
            "cannot resample an empty grid to {}x{}",
            out_rows, out_cols
        )));
    }
    Ok(Array2::from_shape_fn(shape, |(r, c)| {
        let src_r = (r * in_rows / out_rows).min(in_rows - 1);
        let src_c = (c * in_cols / out_cols).min(in_cols - 1);
        grid[[src_r, src_c]]
    }))
}

/// Whether an SCL code counts as water for masking purposes.
pub fn is_water_class(scl_value: f32) -> bool {
    if !scl_value.is_finite() {
        return false;
    }
    let code = scl_value.round();
    if !(0.0..=255.0).contains(&code) {
        return false;
    }
    WATER_CLASSES.contains(&(code as u8))
}

/// Index engine parameters
#[derive(Debug, Clone)]
pub struct IndexEngineParams {
    /// Rolling-mean window in observations
    pub rolling_window: usize,
}

impl Default for IndexEngineParams {
    fn default() -> Self {
        Self { rolling_window: 3 }
    }
}

/// Per-scene index statistics plus smoothed and climatology derivatives.
#[derive(Debug, Clone)]
pub struct IndexSuite {
    /// One row per selected scene, six columns: `{index}_{mean,median}`
    pub series: TimeSeries,
    /// Centered rolling mean of `series`
    pub rolling: TimeSeries,
    /// Per-calendar-month mean over all years, 12 rows
    pub climatology: ClimatologyTable,
}

/// Computes index time series from a selected scene set.
pub struct IndexEngine<'a, F: BandFetcher + Sync> {
    fetcher: &'a F,
    params: IndexEngineParams,
}

impl<'a, F: BandFetcher + Sync> IndexEngine<'a, F> {
    pub fn new(fetcher: &'a F, params: IndexEngineParams) -> Self {
        Self { fetcher, params }
    }

    pub fn standard(fetcher: &'a F) -> Self {
        Self::new(fetcher, IndexEngineParams::default())
    }

    /// Reduce every scene to per-index spatial statistics.
    ///
    /// Scenes whose assets cannot be read are excluded with a warning; the
    /// series never aborts on a single bad scene. An empty scene set yields
    /// an empty series. Rows are keyed by acquisition timestamp, so the
    /// result is deterministic regardless of reduction order.
    pub fn compute(&self, scenes: &SelectedSceneSet) -> WqResult<IndexSuite> {
        let plan = CubePlan::new(scenes);

        let rows: Vec<Option<(DateTime<Utc>, [Option<f64>; 6])>> = scenes
            .scenes()
            .par_iter()
            .map(|scene| match plan.materialize_scene(self.fetcher, scene) {
                Ok(bands) => Some((scene.acquired, reduce_scene(&bands))),
                Err(WqError::AssetRead(reason)) => {
                    log::warn!("excluding scene {}: {}", scene.id, reason);
                    None
                }
                Err(e) => {
                    log::warn!("excluding scene {}: {}", scene.id, e);
                    None
                }
            })
            .collect();

        let mut timestamps = Vec::new();
        let mut cells: [Vec<Option<f64>>; 6] = Default::default();
        for row in rows.into_iter().flatten() {
            timestamps.push(row.0);
            for (column, value) in cells.iter_mut().zip(row.1) {
                column.push(value);
            }
        }

        let mut columns = Vec::with_capacity(6);
        for (i, index) in WaterIndex::all().iter().enumerate() {
            columns.push((index.mean_column(), cells[i * 2].clone()));
            columns.push((index.median_column(), cells[i * 2 + 1].clone()));
        }

        let series = TimeSeries::new(timestamps, columns)?;
        log::info!(
            "index engine reduced {} of {} scenes",
            series.len(),
            scenes.len()
        );

        let rolling = series.rolling_mean(self.params.rolling_window)?;
        let climatology = series.monthly_climatology();

        Ok(IndexSuite {
            series,
            rolling,
            climatology,
        })
    }
}

/// Spatial mean and median per index over water-classified pixels.
///
/// Order: [ndwi_mean, ndwi_median, ndti_mean, ndti_median, ndci_mean,
/// ndci_median]. A scene with zero valid water pixels yields missing cells.
pub fn reduce_scene(bands: &SceneBands) -> [Option<f64>; 6] {
    let mut out = [None; 6];

    for (i, index) in WaterIndex::all().iter().enumerate() {
        let (num_band, den_band) = index.band_pair();
        let a = bands.band(num_band);
        let b = bands.band(den_band);

        let mut values: Vec<f64> = Vec::new();
        for ((av, bv), sclv) in a.iter().zip(b.iter()).zip(bands.scl.iter()) {
            if !is_water_class(*sclv) {
                continue;
            }
            if let Some(v) = normalized_diff(*av as f64, *bv as f64) {
                values.push(v);
            }
        }

        out[i * 2] = mean(&values);
        out[i * 2 + 1] = median(&mut values);
    }

    out
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some((values[mid - 1] + values[mid]) / 2.0)
    }
}
