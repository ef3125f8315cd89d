use chrono::{DateTime, Datelike, NaiveDate, Utc};
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Real-valued raster band data (row x column)
pub type BandGrid = Array2<f32>;

/// Gridded scalar field over time (time x row x column)
pub type FieldCube = Array3<f32>;

/// Spectral bands required by the water-quality indices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Band {
    Green,
    Red,
    RedEdge,
    Nir,
    /// Scene classification layer (per-pixel class codes)
    Scl,
}

impl Band {
    /// STAC asset key for this band in Sentinel-2 L2A collections.
    pub fn asset_key(&self) -> &'static str {
        match self {
            Band::Green => "green",
            Band::Red => "red",
            Band::RedEdge => "rededge1",
            Band::Nir => "nir",
            Band::Scl => "scl",
        }
    }

    /// All bands the index engine needs per scene.
    pub fn required() -> [Band; 5] {
        [Band::Green, Band::Red, Band::RedEdge, Band::Nir, Band::Scl]
    }
}

impl std::fmt::Display for Band {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.asset_key())
    }
}

/// SCL class codes treated as water when masking index pixels
pub const WATER_CLASSES: [u8; 2] = [6, 2];

/// SCL class codes treated as cloud-contaminated in diagnostics
pub const CLOUD_CLASSES: [u8; 4] = [3, 8, 9, 10];

/// Geospatial bounding box
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        }
    }

    /// STAC bbox order: [west, south, east, north]
    pub fn to_stac(&self) -> Vec<f64> {
        vec![self.min_lon, self.min_lat, self.max_lon, self.max_lat]
    }
}

/// Closed calendar-date interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateInterval {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateInterval {
    pub fn new(start: NaiveDate, end: NaiveDate) -> WqResult<Self> {
        if end < start {
            return Err(WqError::InvalidFormat(format!(
                "interval end {} precedes start {}",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    /// STAC datetime range string, e.g. "2021-01-01/2021-12-31"
    pub fn to_stac(&self) -> String {
        format!("{}/{}", self.start, self.end)
    }

    /// Split into per-calendar-year sub-intervals, clipped to the interval
    /// bounds. Used to bound remote query cost and isolate failures.
    pub fn split_by_year(&self) -> Vec<DateInterval> {
        let mut out = Vec::new();
        for year in self.start.year()..=self.end.year() {
            let y_start = NaiveDate::from_ymd_opt(year, 1, 1).unwrap_or(self.start);
            let y_end = NaiveDate::from_ymd_opt(year, 12, 31).unwrap_or(self.end);
            out.push(DateInterval {
                start: y_start.max(self.start),
                end: y_end.min(self.end),
            });
        }
        out
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

impl std::fmt::Display for DateInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.start, self.end)
    }
}

/// Retrievable raster asset reference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetRef {
    pub href: String,
}

/// One imagery scene as returned by the catalog.
///
/// Immutable once fetched; the selector consumes these and the index engine
/// only extracts the bands it needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneRecord {
    pub id: String,
    pub acquired: DateTime<Utc>,
    /// Estimated cloud-cover percentage; None when the catalog omitted it
    pub cloud_cover: Option<f64>,
    /// Band asset key -> raster handle
    pub assets: HashMap<String, AssetRef>,
    pub thumbnail: Option<String>,
}

impl SceneRecord {
    pub fn acquisition_date(&self) -> NaiveDate {
        self.acquired.date_naive()
    }

    pub fn asset(&self, band: Band) -> WqResult<&AssetRef> {
        self.assets.get(band.asset_key()).ok_or_else(|| {
            WqError::MissingVariable(format!(
                "scene {} has no '{}' asset",
                self.id,
                band.asset_key()
            ))
        })
    }
}

/// Ordered scene set with strictly increasing, per-date-unique timestamps.
///
/// Built once by the selector; empty is a valid state meaning "no data for
/// this window".
#[derive(Debug, Clone, Default)]
pub struct SelectedSceneSet {
    scenes: Vec<SceneRecord>,
}

impl SelectedSceneSet {
    /// Wrap an already ordered and deduplicated scene list, verifying the
    /// invariant rather than assuming it.
    pub fn from_ordered(scenes: Vec<SceneRecord>) -> WqResult<Self> {
        for pair in scenes.windows(2) {
            if pair[1].acquired <= pair[0].acquired {
                return Err(WqError::DuplicateTimestamp(format!(
                    "scenes {} and {} are not strictly increasing in time",
                    pair[0].id, pair[1].id
                )));
            }
            if pair[1].acquisition_date() == pair[0].acquisition_date() {
                return Err(WqError::DuplicateTimestamp(format!(
                    "scenes {} and {} share acquisition date {}",
                    pair[0].id,
                    pair[1].id,
                    pair[0].acquisition_date()
                )));
            }
        }
        Ok(Self { scenes })
    }

    pub fn empty() -> Self {
        Self { scenes: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SceneRecord> {
        self.scenes.iter()
    }

    pub fn scenes(&self) -> &[SceneRecord] {
        &self.scenes
    }

    /// Bounded prefix view, used by the diagnostics reporter.
    pub fn prefix(&self, n: usize) -> &[SceneRecord] {
        &self.scenes[..n.min(self.scenes.len())]
    }
}

impl<'a> IntoIterator for &'a SelectedSceneSet {
    type Item = &'a SceneRecord;
    type IntoIter = std::slice::Iter<'a, SceneRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.scenes.iter()
    }
}

/// Error types for water-quality processing
#[derive(Debug, thiserror::Error)]
pub enum WqError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("catalog unavailable: {0}")]
    CatalogUnavailable(String),

    #[error("asset read failure: {0}")]
    AssetRead(String),

    #[error("duplicate timestamp: {0}")]
    DuplicateTimestamp(String),

    #[error("missing variable: {0}")]
    MissingVariable(String),

    #[error("invalid data format: {0}")]
    InvalidFormat(String),

    #[error("processing error: {0}")]
    Processing(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("TIFF decoding error: {0}")]
    Tiff(#[from] tiff::TiffError),
}

/// Result type for water-quality operations
pub type WqResult<T> = Result<T, WqError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn scene(id: &str, ts: &str) -> SceneRecord {
        SceneRecord {
            id: id.to_string(),
            acquired: format!("{}Z", ts.replace(' ', "T"))
                .parse::<DateTime<Utc>>()
                .expect("valid timestamp"),
            cloud_cover: Some(5.0),
            assets: HashMap::new(),
            thumbnail: None,
        }
    }

    #[test]
    fn test_interval_year_split() {
        let interval = DateInterval::new(
            NaiveDate::from_ymd_opt(2020, 6, 15).unwrap(),
            NaiveDate::from_ymd_opt(2022, 3, 1).unwrap(),
        )
        .unwrap();

        let parts = interval.split_by_year();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].start, NaiveDate::from_ymd_opt(2020, 6, 15).unwrap());
        assert_eq!(parts[0].end, NaiveDate::from_ymd_opt(2020, 12, 31).unwrap());
        assert_eq!(parts[1].start, NaiveDate::from_ymd_opt(2021, 1, 1).unwrap());
        assert_eq!(parts[2].end, NaiveDate::from_ymd_opt(2022, 3, 1).unwrap());
    }

    #[test]
    fn test_interval_rejects_reversed_bounds() {
        let result = DateInterval::new(
            NaiveDate::from_ymd_opt(2021, 2, 1).unwrap(),
            NaiveDate::from_ymd_opt(2021, 1, 1).unwrap(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_scene_set_rejects_same_day_pair() {
        let scenes = vec![
            scene("a", "2021-03-01 10:00:00"),
            scene("b", "2021-03-01 12:00:00"),
        ];
        let result = SelectedSceneSet::from_ordered(scenes);
        assert!(matches!(result, Err(WqError::DuplicateTimestamp(_))));
    }

    #[test]
    fn test_scene_set_accepts_ordered_distinct_dates() {
        let scenes = vec![
            scene("a", "2021-03-01 10:00:00"),
            scene("b", "2021-03-06 10:00:00"),
        ];
        let set = SelectedSceneSet::from_ordered(scenes).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.prefix(5).len(), 2);
        assert_eq!(set.prefix(1).len(), 1);
    }
}
