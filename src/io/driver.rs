//! Environmental driver loading: sea-surface temperature and precipitation.
//!
//! The gridded SST archive sits behind the [`GriddedStore`] seam. The loader
//! resolves the variable name between the two conventions seen in the wild,
//! normalizes units to Celsius, reduces spatially over the bounding box, and
//! resamples to a monthly cadence. Precipitation coverage comes from a
//! separate catalog, queried one calendar year at a time so a single failed
//! sub-query costs one year of coverage instead of the whole interval.

use crate::core::series::TimeSeries;
use crate::io::assets::HrefFetcher;
use crate::io::catalog::SceneSearch;
use crate::types::{
    BoundingBox, DateInterval, FieldCube, SceneRecord, WqError, WqResult,
};
use chrono::{DateTime, Datelike, Utc};
use ndarray::Array3;

/// Variable name conventions for the SST field, in preference order.
pub const SST_VARIABLE_ALIASES: [&str; 2] = ["analysed_sst", "sst"];

/// Absolute zero offset for Kelvin to Celsius conversion.
const KELVIN_OFFSET: f64 = 273.15;

/// A time-referenced gridded scalar field.
#[derive(Debug, Clone)]
pub struct GriddedField {
    /// One entry per time slice, not guaranteed unique or sorted by the store
    pub times: Vec<DateTime<Utc>>,
    /// Axes: time, row, column
    pub values: FieldCube,
    /// Unit tag as reported by the archive, e.g. "kelvin" or "celsius"
    pub units: Option<String>,
}

/// Archive seam for gridded environmental fields.
pub trait GriddedStore {
    /// Variable names present in the store.
    fn variable_names(&self) -> WqResult<Vec<String>>;

    /// Read one variable subset to the region and interval.
    fn read_field(
        &self,
        variable: &str,
        region: &BoundingBox,
        interval: &DateInterval,
    ) -> WqResult<GriddedField>;
}

/// Loads and normalizes the SST driver series from a gridded store.
pub struct DriverLoader<S: GriddedStore> {
    store: S,
}

impl<S: GriddedStore> DriverLoader<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Monthly mean SST in Celsius over the region, column `sst_c`.
    ///
    /// Fails loudly with [`WqError::MissingVariable`] when neither variable
    /// alias is present: an empty SST series is not distinguishable from
    /// "this period truly has no signal" and must never be fabricated.
    pub fn load_sst(
        &self,
        region: &BoundingBox,
        interval: &DateInterval,
    ) -> WqResult<TimeSeries> {
        let names = self.store.variable_names()?;
        let variable = SST_VARIABLE_ALIASES
            .iter()
            .find(|alias| names.iter().any(|n| n == *alias))
            .ok_or_else(|| {
                WqError::MissingVariable(format!(
                    "no SST variable among {:?}; known aliases: {:?}",
                    names, SST_VARIABLE_ALIASES
                ))
            })?;
        log::info!("resolved SST variable name: {}", variable);

        let field = self.store.read_field(variable, region, interval)?;
        let mut pairs = spatial_mean_series(&field);

        if is_kelvin(&field, &pairs) {
            log::info!("converting SST from Kelvin to Celsius");
            for (_, value) in pairs.iter_mut() {
                if let Some(v) = value {
                    *v -= KELVIN_OFFSET;
                }
            }
        }

        // Archives occasionally return unsorted or duplicated time slices;
        // sort and average duplicates before the key invariant is enforced.
        pairs.sort_by_key(|(ts, _)| *ts);
        let mut timestamps: Vec<DateTime<Utc>> = Vec::new();
        let mut cells: Vec<Vec<Option<f64>>> = Vec::new();
        for (ts, value) in pairs {
            if timestamps.last() == Some(&ts) {
                if let Some(group) = cells.last_mut() {
                    group.push(value);
                }
            } else {
                timestamps.push(ts);
                cells.push(vec![value]);
            }
        }
        let values: Vec<Option<f64>> = cells
            .iter()
            .map(|group| crate::core::series::mean_present(group))
            .collect();

        let series = TimeSeries::new(timestamps, vec![("sst_c".to_string(), values)])?;
        series.monthly_mean()
    }
}

/// Spatial mean per time slice, ignoring non-finite cells.
///
/// A slice with no valid cell yields an explicit missing value, never zero.
fn spatial_mean_series(field: &GriddedField) -> Vec<(DateTime<Utc>, Option<f64>)> {
    field
        .times
        .iter()
        .enumerate()
        .map(|(t, ts)| {
            let slice = field.values.index_axis(ndarray::Axis(0), t);
            let valid: Vec<f64> = slice
                .iter()
                .filter(|v| v.is_finite())
                .map(|v| *v as f64)
                .collect();
            let mean = if valid.is_empty() {
                None
            } else {
                Some(valid.iter().sum::<f64>() / valid.len() as f64)
            };
            (*ts, mean)
        })
        .collect()
}

/// Kelvin detection: trust the unit tag, fall back to magnitude.
///
/// Sea-surface temperature in Celsius never reaches 150; a mean above that
/// can only be Kelvin data with a missing unit tag.
fn is_kelvin(field: &GriddedField, pairs: &[(DateTime<Utc>, Option<f64>)]) -> bool {
    if let Some(units) = &field.units {
        let u = units.to_lowercase();
        return u == "k" || u == "kelvin";
    }
    let present: Vec<f64> = pairs.iter().filter_map(|(_, v)| *v).collect();
    if present.is_empty() {
        return false;
    }
    present.iter().sum::<f64>() / present.len() as f64 > 150.0
}

// ---------------------------------------------------------------------------
// STAC-backed gridded store
// ---------------------------------------------------------------------------

/// Gridded store over a STAC catalog where each item is one time slice and
/// the variable is an asset on the item.
///
/// Sub-queries are issued per calendar year to bound request cost; a failed
/// year is logged and skipped, and only a fully unreachable interval
/// surfaces as [`WqError::CatalogUnavailable`].
pub struct StacGriddedStore<C: SceneSearch, F: HrefFetcher> {
    client: C,
    fetcher: F,
    /// Variable names advertised by the collection's assets
    variables: Vec<String>,
    /// Unit tag for the field, when the collection documents one
    units: Option<String>,
    /// Item cap per yearly sub-query
    max_items_per_year: usize,
}

impl<C: SceneSearch, F: HrefFetcher> StacGriddedStore<C, F> {
    pub fn new(
        client: C,
        fetcher: F,
        variables: Vec<String>,
        units: Option<String>,
        max_items_per_year: usize,
    ) -> Self {
        Self {
            client,
            fetcher,
            variables,
            units,
            max_items_per_year,
        }
    }
}

impl<C: SceneSearch, F: HrefFetcher> GriddedStore for StacGriddedStore<C, F> {
    fn variable_names(&self) -> WqResult<Vec<String>> {
        Ok(self.variables.clone())
    }

    fn read_field(
        &self,
        variable: &str,
        region: &BoundingBox,
        interval: &DateInterval,
    ) -> WqResult<GriddedField> {
        let mut items: Vec<SceneRecord> = Vec::new();
        let mut failed_years = 0usize;
        let sub_windows = interval.split_by_year();
        let window_count = sub_windows.len();

        for sub in sub_windows {
            match self.client.search(region, &sub, self.max_items_per_year) {
                Ok(mut found) => items.append(&mut found),
                Err(WqError::CatalogUnavailable(reason)) => {
                    log::warn!("SST sub-query {} failed: {}", sub, reason);
                    failed_years += 1;
                }
                Err(e) => return Err(e),
            }
        }

        if failed_years == window_count {
            return Err(WqError::CatalogUnavailable(format!(
                "all {} yearly SST sub-queries failed for {}",
                window_count, interval
            )));
        }

        items.sort_by_key(|item| item.acquired);

        let mut times = Vec::new();
        let mut slices: Vec<crate::types::BandGrid> = Vec::new();
        for item in &items {
            let asset = match item.assets.get(variable) {
                Some(asset) => asset.clone(),
                None => {
                    log::warn!("item {} has no '{}' asset", item.id, variable);
                    continue;
                }
            };
            match self.fetcher.fetch_href(&asset.href) {
                Ok(grid) if grid.is_empty() => {
                    log::warn!("skipping SST slice {}: empty grid", item.id);
                }
                Ok(grid) => {
                    times.push(item.acquired);
                    slices.push(grid);
                }
                Err(e) => log::warn!("skipping SST slice {}: {}", item.id, e),
            }
        }

        if slices.is_empty() {
            return Ok(GriddedField {
                times,
                values: Array3::zeros((0, 0, 0)),
                units: self.units.clone(),
            });
        }

        let shape = slices[0].dim();
        let mut values = Array3::from_elem((slices.len(), shape.0, shape.1), f32::NAN);
        for (t, slice) in slices.iter().enumerate() {
            let resampled = crate::core::indices::resize_nearest(slice, shape)?;
            values
                .index_axis_mut(ndarray::Axis(0), t)
                .assign(&resampled);
        }

        Ok(GriddedField {
            times,
            values,
            units: self.units.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Precipitation coverage
// ---------------------------------------------------------------------------

/// Per-year precipitation item coverage with explicit gaps.
#[derive(Debug, Clone, Default)]
pub struct PrecipCoverage {
    /// Raw item metadata, ordered by acquisition time
    pub records: Vec<SceneRecord>,
    /// Calendar years whose sub-query failed
    pub missing_years: Vec<i32>,
}

impl PrecipCoverage {
    /// True when no year produced any records: the explicit unavailable
    /// marker callers must check before trusting the coverage.
    pub fn is_unavailable(&self) -> bool {
        self.records.is_empty()
    }
}

/// Fetches precipitation item metadata one calendar year at a time.
pub struct PrecipLoader<C: SceneSearch> {
    client: C,
    max_items_per_year: usize,
}

impl<C: SceneSearch> PrecipLoader<C> {
    pub fn new(client: C, max_items_per_year: usize) -> Self {
        Self {
            client,
            max_items_per_year,
        }
    }

    /// Collect coverage over the interval. Never fails: a timed-out year is
    /// recorded in `missing_years` and the remaining years stand on their
    /// own. Partial coverage is expected, not anomalous.
    pub fn load(&self, region: &BoundingBox, interval: &DateInterval) -> PrecipCoverage {
        let mut coverage = PrecipCoverage::default();

        for sub in interval.split_by_year() {
            match self.client.search(region, &sub, self.max_items_per_year) {
                Ok(mut records) => coverage.records.append(&mut records),
                Err(e) => {
                    log::warn!("precipitation year {} unavailable: {}", sub.start.year(), e);
                    coverage.missing_years.push(sub.start.year());
                }
            }
        }

        coverage.records.sort_by_key(|r| r.acquired);
        log::info!(
            "precipitation coverage: {} records, {} missing year(s)",
            coverage.records.len(),
            coverage.missing_years.len()
        );
        coverage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;
    use std::collections::HashMap;

    struct FixedStore {
        variable: &'static str,
        times: Vec<DateTime<Utc>>,
        values: FieldCube,
        units: Option<String>,
    }

    impl GriddedStore for FixedStore {
        fn variable_names(&self) -> WqResult<Vec<String>> {
            Ok(vec![self.variable.to_string()])
        }

        fn read_field(
            &self,
            _variable: &str,
            _region: &BoundingBox,
            _interval: &DateInterval,
        ) -> WqResult<GriddedField> {
            Ok(GriddedField {
                times: self.times.clone(),
                values: self.values.clone(),
                units: self.units.clone(),
            })
        }
    }

    fn region() -> BoundingBox {
        BoundingBox::new(-82.8, 27.5, -82.3, 28.0)
    }

    fn interval(start: &str, end: &str) -> DateInterval {
        DateInterval::new(
            start.parse::<NaiveDate>().unwrap(),
            end.parse::<NaiveDate>().unwrap(),
        )
        .unwrap()
    }

    fn ts(s: &str) -> DateTime<Utc> {
        format!("{}T12:00:00Z", s).parse().unwrap()
    }

    #[test]
    fn test_sst_alias_in_kelvin_converted() {
        // variable named "sst" (not "analysed_sst"), single Kelvin cell
        let store = FixedStore {
            variable: "sst",
            times: vec![ts("2021-03-10")],
            values: Array3::from_elem((1, 1, 1), 300.15),
            units: Some("kelvin".to_string()),
        };
        let series = DriverLoader::new(store)
            .load_sst(&region(), &interval("2021-03-01", "2021-03-31"))
            .unwrap();

        assert_eq!(series.len(), 1);
        let v = series.column("sst_c").unwrap()[0].unwrap();
        assert_relative_eq!(v, 27.0, epsilon = 1e-4);
    }

    #[test]
    fn test_kelvin_heuristic_without_unit_tag() {
        let store = FixedStore {
            variable: "analysed_sst",
            times: vec![ts("2021-03-10")],
            values: Array3::from_elem((1, 2, 2), 295.65),
            units: None,
        };
        let series = DriverLoader::new(store)
            .load_sst(&region(), &interval("2021-03-01", "2021-03-31"))
            .unwrap();
        let v = series.column("sst_c").unwrap()[0].unwrap();
        assert_relative_eq!(v, 22.5, epsilon = 1e-4);
    }

    #[test]
    fn test_celsius_left_untouched() {
        let store = FixedStore {
            variable: "analysed_sst",
            times: vec![ts("2021-03-10")],
            values: Array3::from_elem((1, 1, 1), 22.5),
            units: Some("celsius".to_string()),
        };
        let series = DriverLoader::new(store)
            .load_sst(&region(), &interval("2021-03-01", "2021-03-31"))
            .unwrap();
        assert_relative_eq!(series.column("sst_c").unwrap()[0].unwrap(), 22.5);
    }

    #[test]
    fn test_missing_variable_fails_loudly() {
        let store = FixedStore {
            variable: "precip",
            times: vec![],
            values: Array3::zeros((0, 0, 0)),
            units: None,
        };
        let result =
            DriverLoader::new(store).load_sst(&region(), &interval("2021-01-01", "2021-12-31"));
        assert!(matches!(result, Err(WqError::MissingVariable(_))));
    }

    #[test]
    fn test_all_invalid_slice_is_missing_not_zero() {
        let mut values = Array3::from_elem((2, 1, 1), f32::NAN);
        values[[1, 0, 0]] = 22.0;
        let store = FixedStore {
            variable: "analysed_sst",
            times: vec![ts("2021-03-10"), ts("2021-04-10")],
            values,
            units: Some("celsius".to_string()),
        };
        let series = DriverLoader::new(store)
            .load_sst(&region(), &interval("2021-03-01", "2021-04-30"))
            .unwrap();

        let col = series.column("sst_c").unwrap();
        assert_eq!(col[0], None);
        assert_relative_eq!(col[1].unwrap(), 22.0);
    }

    #[test]
    fn test_duplicate_time_slices_are_merged() {
        let mut values = Array3::zeros((2, 1, 1));
        values[[0, 0, 0]] = 20.0;
        values[[1, 0, 0]] = 24.0;
        let store = FixedStore {
            variable: "analysed_sst",
            times: vec![ts("2021-03-10"), ts("2021-03-10")],
            values,
            units: Some("celsius".to_string()),
        };
        let series = DriverLoader::new(store)
            .load_sst(&region(), &interval("2021-03-01", "2021-03-31"))
            .unwrap();

        assert_eq!(series.len(), 1);
        assert_relative_eq!(series.column("sst_c").unwrap()[0].unwrap(), 22.0);
    }

    // Precipitation: search mock that fails for one configured year.
    struct YearFailSearch {
        fail_year: i32,
    }

    impl SceneSearch for YearFailSearch {
        fn search(
            &self,
            _region: &BoundingBox,
            interval: &DateInterval,
            _max_items: usize,
        ) -> WqResult<Vec<SceneRecord>> {
            if interval.start.year() == self.fail_year {
                return Err(WqError::CatalogUnavailable("timed out".to_string()));
            }
            Ok(vec![SceneRecord {
                id: format!("precip-{}", interval.start.year()),
                acquired: format!("{}-06-01T00:00:00Z", interval.start.year())
                    .parse()
                    .unwrap(),
                cloud_cover: None,
                assets: HashMap::new(),
                thumbnail: None,
            }])
        }
    }

    #[test]
    fn test_failed_year_leaves_other_years_intact() {
        let loader = PrecipLoader::new(YearFailSearch { fail_year: 2020 }, 100);
        let coverage = loader.load(&region(), &interval("2019-01-01", "2021-12-31"));

        assert_eq!(coverage.records.len(), 2);
        assert_eq!(coverage.missing_years, vec![2020]);
        assert!(!coverage.is_unavailable());
    }

    #[test]
    fn test_all_years_failed_is_explicit_unavailable() {
        struct AlwaysFail;
        impl SceneSearch for AlwaysFail {
            fn search(
                &self,
                _region: &BoundingBox,
                _interval: &DateInterval,
                _max_items: usize,
            ) -> WqResult<Vec<SceneRecord>> {
                Err(WqError::CatalogUnavailable("unreachable".to_string()))
            }
        }

        let loader = PrecipLoader::new(AlwaysFail, 100);
        let coverage = loader.load(&region(), &interval("2020-01-01", "2021-12-31"));
        assert!(coverage.is_unavailable());
        assert_eq!(coverage.missing_years, vec![2020, 2021]);
    }
}
