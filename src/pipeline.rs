//! End-to-end orchestration of the water-quality index workflow.

use crate::core::analysis::{
    join_monthly, pairwise_stats, pca, seasonal_means, PairStats, PcaDecomposition, SeasonalTable,
};
use crate::core::diagnostics::{DiagnosticsParams, DiagnosticsReport, DiagnosticsReporter};
use crate::core::indices::{IndexEngine, IndexEngineParams, IndexSuite, WaterIndex};
use crate::core::select::{SceneSelector, SelectorParams};
use crate::core::series::TimeSeries;
use crate::io::assets::BandFetcher;
use crate::io::catalog::SceneSearch;
use crate::io::driver::{DriverLoader, GriddedStore};
use crate::types::{BoundingBox, DateInterval, SceneRecord, WqError, WqResult};

/// Knobs for a full pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineParams {
    pub selector: SelectorParams,
    pub engine: IndexEngineParams,
    pub diagnostics: DiagnosticsParams,
    /// Upper bound on catalog results per search window
    pub max_scenes: usize,
    pub pca_components: usize,
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self {
            selector: SelectorParams::default(),
            engine: IndexEngineParams::default(),
            diagnostics: DiagnosticsParams::default(),
            max_scenes: 500,
            pca_components: 2,
        }
    }
}

/// Everything one run produces.
#[derive(Debug)]
pub struct PipelineReport {
    pub indices: IndexSuite,
    pub sst: TimeSeries,
    pub joined: TimeSeries,
    pub stats: Vec<PairStats>,
    pub seasonal: SeasonalTable,
    /// `None` when the joined series is too sparse to decompose
    pub pca: Option<PcaDecomposition>,
    pub diagnostics: DiagnosticsReport,
}

/// Wires catalog search, scene selection, index reduction, the SST driver,
/// and the joint statistics into one run.
pub struct WqiPipeline<C, F, S>
where
    C: SceneSearch,
    F: BandFetcher + Sync,
    S: GriddedStore,
{
    catalog: C,
    fetcher: F,
    sst: DriverLoader<S>,
    params: PipelineParams,
}

impl<C, F, S> WqiPipeline<C, F, S>
where
    C: SceneSearch,
    F: BandFetcher + Sync,
    S: GriddedStore,
{
    pub fn new(catalog: C, fetcher: F, sst_store: S, params: PipelineParams) -> Self {
        Self {
            catalog,
            fetcher,
            sst: DriverLoader::new(sst_store),
            params,
        }
    }

    pub fn standard(catalog: C, fetcher: F, sst_store: S) -> Self {
        Self::new(catalog, fetcher, sst_store, PipelineParams::default())
    }

    /// Run the full workflow over one region and date window.
    ///
    /// Zero passing scenes is an empty report, not an error. Only a catalog
    /// that cannot be reached at all aborts the run.
    pub fn run(&self, region: &BoundingBox, interval: &DateInterval) -> WqResult<PipelineReport> {
        let records = self.search_scenes(region, interval)?;
        log::info!("catalog returned {} candidate scenes", records.len());

        let selector = SceneSelector::new(self.params.selector.clone());
        let scenes = selector.select(records)?;
        log::info!("selected {} scenes after cloud screening", scenes.len());

        let reporter = DiagnosticsReporter::new(&self.fetcher, self.params.diagnostics.clone());
        let diagnostics = reporter.report(&scenes);

        let engine = IndexEngine::new(&self.fetcher, self.params.engine.clone());
        let indices = engine.compute(&scenes)?;

        let sst = self.sst.load_sst(region, interval)?;
        let joined = join_monthly(&indices.series, &sst)?;

        let index_columns: Vec<String> = WaterIndex::all()
            .iter()
            .flat_map(|i| [i.mean_column(), i.median_column()])
            .collect();
        let index_refs: Vec<&str> = index_columns.iter().map(|s| s.as_str()).collect();
        let stats = pairwise_stats(&joined, &index_refs, &["sst_c"])?;
        let seasonal = seasonal_means(&joined);

        let mean_columns: Vec<String> =
            WaterIndex::all().iter().map(|i| i.mean_column()).collect();
        let mut pca_columns: Vec<&str> = mean_columns.iter().map(|s| s.as_str()).collect();
        pca_columns.push("sst_c");
        let pca = match pca(&joined, &pca_columns, self.params.pca_components) {
            Ok(decomposition) => Some(decomposition),
            Err(e) => {
                log::warn!("skipping PCA: {}", e);
                None
            }
        };

        Ok(PipelineReport {
            indices,
            sst,
            joined,
            stats,
            seasonal,
            pca,
            diagnostics,
        })
    }

    /// Full-window search, with per-year sub-windows as the fallback when
    /// the whole window fails. Only an entirely unreachable catalog
    /// propagates as [`WqError::CatalogUnavailable`].
    fn search_scenes(
        &self,
        region: &BoundingBox,
        interval: &DateInterval,
    ) -> WqResult<Vec<SceneRecord>> {
        match self
            .catalog
            .search(region, interval, self.params.max_scenes)
        {
            Ok(records) => Ok(records),
            Err(WqError::CatalogUnavailable(reason)) => {
                log::warn!(
                    "full-window search failed ({}), retrying per year",
                    reason
                );
                self.search_per_year(region, interval)
            }
            Err(e) => Err(e),
        }
    }

    fn search_per_year(
        &self,
        region: &BoundingBox,
        interval: &DateInterval,
    ) -> WqResult<Vec<SceneRecord>> {
        let windows = interval.split_by_year();
        let mut records = Vec::new();
        let mut failures = 0usize;

        for window in &windows {
            match self
                .catalog
                .search(region, window, self.params.max_scenes)
            {
                Ok(mut chunk) => records.append(&mut chunk),
                Err(e) => {
                    failures += 1;
                    log::warn!("sub-window {} failed: {}", window.start, e);
                }
            }
        }

        if failures == windows.len() {
            return Err(WqError::CatalogUnavailable(format!(
                "all {} yearly sub-windows failed for {}..{}",
                windows.len(),
                interval.start,
                interval.end
            )));
        }
        Ok(records)
    }
}
