//! Scene filtering and per-date deduplication.
//!
//! Multiple overlapping orbits can image the same estuary on one calendar
//! day; mosaicking those acquisitions would blend viewing geometries and
//! smooth genuine temporal signal. The selector therefore keeps exactly one
//! scene per date, the least cloudy one.

use crate::types::{SceneRecord, SelectedSceneSet, WqResult};
use std::collections::BTreeMap;

/// Selection parameters
#[derive(Debug, Clone)]
pub struct SelectorParams {
    /// Maximum acceptable cloud-cover percentage
    pub max_cloud_cover: f64,
}

impl Default for SelectorParams {
    fn default() -> Self {
        Self {
            max_cloud_cover: 20.0,
        }
    }
}

/// Filters catalog results into an analysis-ready scene set.
pub struct SceneSelector {
    params: SelectorParams,
}

impl SceneSelector {
    pub fn new(params: SelectorParams) -> Self {
        Self { params }
    }

    pub fn standard() -> Self {
        Self::new(SelectorParams::default())
    }

    /// Select at most one scene per calendar date.
    ///
    /// Records at or above the cloud threshold or with unknown cloud cover
    /// are discarded. Within a date the minimum-cloud record wins, ties broken
    /// by earliest acquisition. Zero surviving scenes is a valid outcome,
    /// not an error.
    pub fn select(&self, records: Vec<SceneRecord>) -> WqResult<SelectedSceneSet> {
        let input_count = records.len();
        let mut by_date: BTreeMap<chrono::NaiveDate, SceneRecord> = BTreeMap::new();

        for record in records {
            let cloud = match record.cloud_cover {
                Some(c) if c < self.params.max_cloud_cover => c,
                Some(_) => continue,
                None => {
                    log::debug!("discarding scene {} with unknown cloud cover", record.id);
                    continue;
                }
            };

            let date = record.acquisition_date();
            match by_date.get(&date) {
                Some(kept) => {
                    let kept_cloud = kept.cloud_cover.unwrap_or(f64::MAX);
                    let replace = cloud < kept_cloud
                        || (cloud == kept_cloud && record.acquired < kept.acquired);
                    if replace {
                        by_date.insert(date, record);
                    }
                }
                None => {
                    by_date.insert(date, record);
                }
            }
        }

        let scenes: Vec<SceneRecord> = by_date.into_values().collect();
        log::info!(
            "selector kept {} of {} scenes (cloud threshold {}%)",
            scenes.len(),
            input_count,
            self.params.max_cloud_cover
        );

        SelectedSceneSet::from_ordered(scenes)
    }
}
