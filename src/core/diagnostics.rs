//! Per-scene quality diagnostics for manual QA.
//!
//! Diagnostics are advisory: every per-scene failure is captured in the
//! report as an explicit unavailable entry instead of propagating, so a bad
//! scene can never abort or alter the index engine's own output.

use crate::core::indices::{is_water_class, normalized_diff, CubePlan};
use crate::io::assets::{downsample, BandFetcher};
use crate::types::{SceneRecord, SelectedSceneSet, WqResult, CLOUD_CLASSES};
use chrono::NaiveDate;

/// Diagnostics parameters
#[derive(Debug, Clone)]
pub struct DiagnosticsParams {
    /// How many scenes from the start of the set to inspect
    pub max_scenes: usize,
    /// Subsampling stride applied to each band before inspection
    pub stride: usize,
}

impl Default for DiagnosticsParams {
    fn default() -> Self {
        Self {
            max_scenes: 5,
            stride: 10,
        }
    }
}

/// Outcome of inspecting one scene.
#[derive(Debug, Clone)]
pub enum DiagnosticOutcome {
    Available {
        /// Fraction of pixels flagged as cloud, shadow, or cirrus
        cloud_fraction: f64,
        /// Fraction of pixels classified as water
        water_fraction: f64,
        /// Count of water pixels that produced a valid index value
        valid_observations: usize,
        /// Coarse NDWI mean over valid water pixels, as a sanity check
        ndwi_probe: Option<f64>,
    },
    /// The scene could not be safely inspected; the reason is kept visible
    /// in the report rather than swallowed.
    Unavailable { reason: String },
}

/// One row of the diagnostics report.
#[derive(Debug, Clone)]
pub struct SceneDiagnostics {
    pub date: NaiveDate,
    pub scene_id: String,
    pub outcome: DiagnosticOutcome,
}

/// Side-channel QA report over a bounded scene prefix.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticsReport {
    pub scenes: Vec<SceneDiagnostics>,
}

impl DiagnosticsReport {
    pub fn available_count(&self) -> usize {
        self.scenes
            .iter()
            .filter(|s| matches!(s.outcome, DiagnosticOutcome::Available { .. }))
            .count()
    }

    pub fn unavailable_count(&self) -> usize {
        self.scenes.len() - self.available_count()
    }
}

/// Computes auxiliary quality signals for a sample of early scenes.
pub struct DiagnosticsReporter<'a, F: BandFetcher> {
    fetcher: &'a F,
    params: DiagnosticsParams,
}

impl<'a, F: BandFetcher> DiagnosticsReporter<'a, F> {
    pub fn new(fetcher: &'a F, params: DiagnosticsParams) -> Self {
        Self { fetcher, params }
    }

    pub fn standard(fetcher: &'a F) -> Self {
        Self::new(fetcher, DiagnosticsParams::default())
    }

    /// Inspect the first scenes of the set at reduced resolution.
    ///
    /// This never fails as a whole: each scene either yields signals or an
    /// unavailable entry with the failure reason.
    pub fn report(&self, scenes: &SelectedSceneSet) -> DiagnosticsReport {
        let plan = CubePlan::new(scenes);
        let mut report = DiagnosticsReport::default();

        for scene in scenes.prefix(self.params.max_scenes) {
            let outcome = match self.inspect(&plan, scene) {
                Ok(outcome) => outcome,
                Err(e) => {
                    log::warn!("diagnostics unavailable for scene {}: {}", scene.id, e);
                    DiagnosticOutcome::Unavailable {
                        reason: e.to_string(),
                    }
                }
            };
            report.scenes.push(SceneDiagnostics {
                date: scene.acquisition_date(),
                scene_id: scene.id.clone(),
                outcome,
            });
        }

        log::info!(
            "diagnostics: {} available, {} unavailable",
            report.available_count(),
            report.unavailable_count()
        );
        report
    }

    fn inspect(&self, plan: &CubePlan<'_>, scene: &SceneRecord) -> WqResult<DiagnosticOutcome> {
        let bands = plan.materialize_scene(self.fetcher, scene)?;

        let scl = downsample(&bands.scl, self.params.stride);
        let green = downsample(&bands.green, self.params.stride);
        let nir = downsample(&bands.nir, self.params.stride);

        let total = scl.len().max(1) as f64;
        let mut cloud = 0usize;
        let mut water = 0usize;
        let mut ndwi_values: Vec<f64> = Vec::new();

        for ((sclv, g), n) in scl.iter().zip(green.iter()).zip(nir.iter()) {
            let code = sclv.round();
            if code.is_finite() && (0.0..=255.0).contains(&code) {
                let code = code as u8;
                if CLOUD_CLASSES.contains(&code) {
                    cloud += 1;
                }
            }
            if is_water_class(*sclv) {
                water += 1;
                if let Some(v) = normalized_diff(*g as f64, *n as f64) {
                    ndwi_values.push(v);
                }
            }
        }

        let ndwi_probe = if ndwi_values.is_empty() {
            None
        } else {
            Some(ndwi_values.iter().sum::<f64>() / ndwi_values.len() as f64)
        };

        Ok(DiagnosticOutcome::Available {
            cloud_fraction: cloud as f64 / total,
            water_fraction: water as f64 / total,
            valid_observations: ndwi_values.len(),
            ndwi_probe,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AssetRef, Band, BandGrid, WqError};
    use approx::assert_relative_eq;
    use ndarray::Array2;
    use std::collections::HashMap;

    struct HalfWaterFetcher;

    impl BandFetcher for HalfWaterFetcher {
        fn fetch(&self, _scene: &SceneRecord, band: Band) -> WqResult<BandGrid> {
            Ok(match band {
                // left half water, right half cloud
                Band::Scl => Array2::from_shape_fn((4, 4), |(_, c)| if c < 2 { 6.0 } else { 9.0 }),
                Band::Green => Array2::from_elem((4, 4), 0.3),
                Band::Nir => Array2::from_elem((4, 4), 0.1),
                _ => Array2::from_elem((4, 4), 0.2),
            })
        }
    }

    struct BrokenFetcher;

    impl BandFetcher for BrokenFetcher {
        fn fetch(&self, scene: &SceneRecord, _band: Band) -> WqResult<BandGrid> {
            Err(WqError::DuplicateTimestamp(format!(
                "time selection failed for {}",
                scene.id
            )))
        }
    }

    fn scene(id: &str, ts: &str) -> SceneRecord {
        let assets = Band::required()
            .iter()
            .map(|b| {
                (
                    b.asset_key().to_string(),
                    AssetRef {
                        href: format!("https://example.com/{}.tif", b),
                    },
                )
            })
            .collect::<HashMap<_, _>>();
        SceneRecord {
            id: id.to_string(),
            acquired: format!("{}T16:00:00Z", ts).parse().unwrap(),
            cloud_cover: Some(5.0),
            assets,
            thumbnail: None,
        }
    }

    fn params() -> DiagnosticsParams {
        DiagnosticsParams {
            max_scenes: 5,
            stride: 1,
        }
    }

    #[test]
    fn test_fractions_and_probe() {
        let set = SelectedSceneSet::from_ordered(vec![scene("s1", "2021-03-05")]).unwrap();
        let reporter = DiagnosticsReporter::new(&HalfWaterFetcher, params());
        let report = reporter.report(&set);

        assert_eq!(report.scenes.len(), 1);
        match &report.scenes[0].outcome {
            DiagnosticOutcome::Available {
                cloud_fraction,
                water_fraction,
                valid_observations,
                ndwi_probe,
            } => {
                assert_relative_eq!(*cloud_fraction, 0.5);
                assert_relative_eq!(*water_fraction, 0.5);
                assert_eq!(*valid_observations, 8);
                assert_relative_eq!(ndwi_probe.unwrap(), 0.5, epsilon = 1e-6);
            }
            other => panic!("expected available outcome, got {:?}", other),
        }
    }

    #[test]
    fn test_failures_become_unavailable_entries() {
        let set = SelectedSceneSet::from_ordered(vec![
            scene("s1", "2021-03-05"),
            scene("s2", "2021-03-10"),
        ])
        .unwrap();
        let reporter = DiagnosticsReporter::new(&BrokenFetcher, params());
        let report = reporter.report(&set);

        assert_eq!(report.scenes.len(), 2);
        assert_eq!(report.unavailable_count(), 2);
        match &report.scenes[0].outcome {
            DiagnosticOutcome::Unavailable { reason } => {
                assert!(reason.contains("duplicate timestamp"));
            }
            other => panic!("expected unavailable outcome, got {:?}", other),
        }
    }

    #[test]
    fn test_prefix_bound_respected() {
        let set = SelectedSceneSet::from_ordered(vec![
            scene("s1", "2021-03-05"),
            scene("s2", "2021-03-10"),
            scene("s3", "2021-03-15"),
        ])
        .unwrap();
        let reporter = DiagnosticsReporter::new(
            &HalfWaterFetcher,
            DiagnosticsParams {
                max_scenes: 2,
                stride: 1,
            },
        );
        assert_eq!(reporter.report(&set).scenes.len(), 2);
    }
}
