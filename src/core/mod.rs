//! Core water-quality processing modules

pub mod select;
pub mod series;
pub mod indices;
pub mod diagnostics;
pub mod analysis;

// Re-export main types
pub use select::{SceneSelector, SelectorParams};
pub use series::{ClimatologyTable, TimeSeries};
pub use indices::{
    normalized_diff, IndexEngine, IndexEngineParams, IndexSuite, SceneBands, WaterIndex,
};
pub use diagnostics::{
    DiagnosticOutcome, DiagnosticsParams, DiagnosticsReport, DiagnosticsReporter, SceneDiagnostics,
};
pub use analysis::{
    join_monthly, pairwise_stats, pca, pearson, seasonal_means, standardized_rmse, PairStats,
    PcaDecomposition, Season, SeasonalTable,
};
