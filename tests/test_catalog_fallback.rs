//! Catalog escalation policy: failed full-window searches retry per year.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use ndarray::{Array2, Array3};

use estuarine::io::catalog::SceneSearch;
use estuarine::io::assets::BandFetcher;
use estuarine::io::driver::{GriddedField, GriddedStore};
use estuarine::types::AssetRef;
use estuarine::{
    Band, BandGrid, BoundingBox, DateInterval, SceneRecord, WqError, WqResult, WqiPipeline,
};

fn region() -> BoundingBox {
    let _ = env_logger::builder().is_test(true).try_init();
    BoundingBox::new(-5.0, 35.0, -4.0, 36.0)
}

fn interval(start: &str, end: &str) -> DateInterval {
    DateInterval::new(start.parse().unwrap(), end.parse().unwrap()).unwrap()
}

fn scene(id: &str, acquired: &str) -> SceneRecord {
    let mut assets = HashMap::new();
    for key in ["green", "red", "rededge1", "nir", "scl"] {
        assets.insert(
            key.to_string(),
            AssetRef {
                href: format!("https://assets.test/{}/{}.tif", id, key),
            },
        );
    }
    SceneRecord {
        id: id.to_string(),
        acquired: acquired.parse::<DateTime<Utc>>().unwrap(),
        cloud_cover: Some(5.0),
        assets,
        thumbnail: None,
    }
}

struct WaterFetcher;

impl BandFetcher for WaterFetcher {
    fn fetch(&self, _scene: &SceneRecord, band: Band) -> WqResult<BandGrid> {
        let value = match band {
            Band::Green => 0.3,
            Band::Red => 0.2,
            Band::RedEdge => 0.25,
            Band::Nir => 0.1,
            Band::Scl => 6.0,
        };
        Ok(Array2::from_elem((2, 2), value))
    }
}

struct CelsiusStore;

impl GriddedStore for CelsiusStore {
    fn variable_names(&self) -> WqResult<Vec<String>> {
        Ok(vec!["sst".to_string()])
    }

    fn read_field(
        &self,
        _variable: &str,
        _region: &BoundingBox,
        _interval: &DateInterval,
    ) -> WqResult<GriddedField> {
        Ok(GriddedField {
            times: vec!["2020-06-15T12:00:00Z".parse().unwrap()],
            values: Array3::from_elem((1, 2, 2), 19.5),
            units: Some("celsius".to_string()),
        })
    }
}

/// Fails the first (full-window) search, serves yearly sub-windows after.
struct FlakyFullWindowCatalog {
    calls: AtomicUsize,
    records: Vec<SceneRecord>,
}

impl SceneSearch for FlakyFullWindowCatalog {
    fn search(
        &self,
        _region: &BoundingBox,
        window: &DateInterval,
        _max_items: usize,
    ) -> WqResult<Vec<SceneRecord>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(WqError::CatalogUnavailable(
                "gateway timeout on full window".to_string(),
            ));
        }
        Ok(self
            .records
            .iter()
            .filter(|r| window.contains(r.acquisition_date()))
            .cloned()
            .collect())
    }
}

struct DownCatalog;

impl SceneSearch for DownCatalog {
    fn search(
        &self,
        _region: &BoundingBox,
        _window: &DateInterval,
        _max_items: usize,
    ) -> WqResult<Vec<SceneRecord>> {
        Err(WqError::CatalogUnavailable("connection refused".to_string()))
    }
}

#[test]
fn test_full_window_failure_recovers_per_year() {
    let catalog = FlakyFullWindowCatalog {
        calls: AtomicUsize::new(0),
        records: vec![
            scene("S2A_20200610", "2020-06-10T10:30:00Z"),
            scene("S2A_20210615", "2021-06-15T10:30:00Z"),
        ],
    };

    let pipeline = WqiPipeline::standard(catalog, WaterFetcher, CelsiusStore);
    let report = pipeline
        .run(&region(), &interval("2020-01-01", "2021-12-31"))
        .unwrap();

    // both yearly sub-windows succeeded after the full window failed
    assert_eq!(report.indices.series.len(), 2);
}

#[test]
fn test_all_sub_windows_failing_is_terminal() {
    let pipeline = WqiPipeline::standard(DownCatalog, WaterFetcher, CelsiusStore);
    let result = pipeline.run(&region(), &interval("2020-01-01", "2021-12-31"));
    assert!(matches!(result, Err(WqError::CatalogUnavailable(_))));
}

#[test]
fn test_non_catalog_errors_propagate_without_retry() {
    struct BrokenCatalog;

    impl SceneSearch for BrokenCatalog {
        fn search(
            &self,
            _region: &BoundingBox,
            _window: &DateInterval,
            _max_items: usize,
        ) -> WqResult<Vec<SceneRecord>> {
            Err(WqError::InvalidFormat("unparseable response".to_string()))
        }
    }

    let pipeline = WqiPipeline::standard(BrokenCatalog, WaterFetcher, CelsiusStore);
    let result = pipeline.run(&region(), &interval("2020-01-01", "2020-12-31"));
    assert!(matches!(result, Err(WqError::InvalidFormat(_))));
}
