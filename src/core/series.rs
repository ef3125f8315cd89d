//! Timestamp-keyed numeric tables.
//!
//! [`TimeSeries`] is the analysis-ready shape every stage hands downstream:
//! strictly increasing unique timestamps, named columns of optional values.
//! Missing observations are explicit `None` cells, never zero, and the
//! uniqueness invariant is enforced at construction rather than assumed.

use crate::types::{WqError, WqResult};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use std::path::Path;

/// Column of optional observations
pub type SeriesColumn = Vec<Option<f64>>;

/// Timestamp-keyed table with named numeric columns.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    timestamps: Vec<DateTime<Utc>>,
    columns: Vec<(String, SeriesColumn)>,
}

impl TimeSeries {
    /// Build a series, enforcing strictly increasing unique timestamps and
    /// uniform column lengths.
    pub fn new(
        timestamps: Vec<DateTime<Utc>>,
        columns: Vec<(String, SeriesColumn)>,
    ) -> WqResult<Self> {
        for pair in timestamps.windows(2) {
            if pair[1] <= pair[0] {
                return Err(WqError::DuplicateTimestamp(format!(
                    "series timestamps not strictly increasing at {}",
                    pair[1]
                )));
            }
        }
        for (name, values) in &columns {
            if values.len() != timestamps.len() {
                return Err(WqError::InvalidFormat(format!(
                    "column '{}' has {} rows, expected {}",
                    name,
                    values.len(),
                    timestamps.len()
                )));
            }
        }
        Ok(Self {
            timestamps,
            columns,
        })
    }

    pub fn empty(column_names: &[&str]) -> Self {
        Self {
            timestamps: Vec::new(),
            columns: column_names
                .iter()
                .map(|n| (n.to_string(), Vec::new()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }

    pub fn columns(&self) -> &[(String, SeriesColumn)] {
        &self.columns
    }

    /// Centered moving average per column.
    ///
    /// The window shrinks at the series boundaries instead of emitting
    /// missing values; a cell is `None` only when no valid observation
    /// falls inside the window.
    pub fn rolling_mean(&self, window: usize) -> WqResult<TimeSeries> {
        if window == 0 {
            return Err(WqError::Processing(
                "rolling window must be at least 1".to_string(),
            ));
        }
        let half = window / 2;
        let n = self.len();

        let columns = self
            .columns
            .iter()
            .map(|(name, values)| {
                let smoothed = (0..n)
                    .map(|i| {
                        let start = i.saturating_sub(half);
                        let end = (i + window - half).min(n);
                        mean_present(&values[start..end])
                    })
                    .collect();
                (name.clone(), smoothed)
            })
            .collect();

        TimeSeries::new(self.timestamps.clone(), columns)
    }

    /// Collapse to month-start keys, averaging all observations that fall in
    /// the same calendar month. Months with rows but no valid observations
    /// keep an explicit missing cell.
    pub fn monthly_mean(&self) -> WqResult<TimeSeries> {
        let mut keys: Vec<DateTime<Utc>> = Vec::new();
        let mut groups: Vec<Vec<usize>> = Vec::new();

        for (i, ts) in self.timestamps.iter().enumerate() {
            let key = month_start(ts);
            if keys.last() == Some(&key) {
                if let Some(group) = groups.last_mut() {
                    group.push(i);
                }
            } else {
                keys.push(key);
                groups.push(vec![i]);
            }
        }

        let columns = self
            .columns
            .iter()
            .map(|(name, values)| {
                let cells = groups
                    .iter()
                    .map(|idx| {
                        let slice: Vec<Option<f64>> = idx.iter().map(|&i| values[i]).collect();
                        mean_present(&slice)
                    })
                    .collect();
                (name.clone(), cells)
            })
            .collect();

        TimeSeries::new(keys, columns)
    }

    /// Long-term mean per calendar month, ignoring year.
    ///
    /// Always yields exactly 12 rows; months never observed carry missing
    /// cells.
    pub fn monthly_climatology(&self) -> ClimatologyTable {
        let columns = self
            .columns
            .iter()
            .map(|(name, values)| {
                let mut cells = [None; 12];
                for (month_idx, cell) in cells.iter_mut().enumerate() {
                    let month = month_idx as u32 + 1;
                    let slice: Vec<Option<f64>> = self
                        .timestamps
                        .iter()
                        .zip(values)
                        .filter(|(ts, _)| ts.month() == month)
                        .map(|(_, v)| *v)
                        .collect();
                    *cell = mean_present(&slice);
                }
                (name.clone(), cells)
            })
            .collect();

        ClimatologyTable { columns }
    }

    /// Inner join on exact timestamp keys. Column names must not collide.
    pub fn inner_join(&self, other: &TimeSeries) -> WqResult<TimeSeries> {
        for name in other.column_names() {
            if self.column(name).is_some() {
                return Err(WqError::InvalidFormat(format!(
                    "join would duplicate column '{}'",
                    name
                )));
            }
        }

        let mut keys = Vec::new();
        let mut left_idx = Vec::new();
        let mut right_idx = Vec::new();

        let (mut i, mut j) = (0, 0);
        while i < self.len() && j < other.len() {
            match self.timestamps[i].cmp(&other.timestamps[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    keys.push(self.timestamps[i]);
                    left_idx.push(i);
                    right_idx.push(j);
                    i += 1;
                    j += 1;
                }
            }
        }

        let mut columns: Vec<(String, SeriesColumn)> = Vec::new();
        for (name, values) in &self.columns {
            columns.push((name.clone(), left_idx.iter().map(|&i| values[i]).collect()));
        }
        for (name, values) in &other.columns {
            columns.push((name.clone(), right_idx.iter().map(|&j| values[j]).collect()));
        }

        TimeSeries::new(keys, columns)
    }

    /// Persist as a flat delimited table: `time` column in RFC 3339, missing
    /// values as empty cells.
    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> WqResult<()> {
        let mut writer = csv::Writer::from_path(path)?;

        let mut header = vec!["time".to_string()];
        header.extend(self.column_names().iter().map(|s| s.to_string()));
        writer.write_record(&header)?;

        for (i, ts) in self.timestamps.iter().enumerate() {
            let mut row = vec![ts.to_rfc3339()];
            for (_, values) in &self.columns {
                row.push(match values[i] {
                    Some(v) => format!("{}", v),
                    None => String::new(),
                });
            }
            writer.write_record(&row)?;
        }

        writer.flush()?;
        Ok(())
    }

    /// Reload a series persisted by [`write_csv`](Self::write_csv). The key
    /// invariant is re-checked on load.
    pub fn read_csv<P: AsRef<Path>>(path: P) -> WqResult<TimeSeries> {
        let mut reader = csv::Reader::from_path(path)?;

        let headers = reader.headers()?.clone();
        if headers.is_empty() || &headers[0] != "time" {
            return Err(WqError::InvalidFormat(
                "expected 'time' as first CSV column".to_string(),
            ));
        }
        let names: Vec<String> = headers.iter().skip(1).map(|s| s.to_string()).collect();

        let mut timestamps = Vec::new();
        let mut columns: Vec<SeriesColumn> = vec![Vec::new(); names.len()];

        for record in reader.records() {
            let record = record?;
            let ts = record
                .get(0)
                .ok_or_else(|| WqError::InvalidFormat("missing time cell".to_string()))?
                .parse::<DateTime<Utc>>()
                .map_err(|e| WqError::InvalidFormat(format!("bad timestamp: {}", e)))?;
            timestamps.push(ts);

            for (col, cell) in columns.iter_mut().zip(record.iter().skip(1)) {
                if cell.is_empty() {
                    col.push(None);
                } else {
                    let value = cell
                        .parse::<f64>()
                        .map_err(|e| WqError::InvalidFormat(format!("bad value: {}", e)))?;
                    col.push(Some(value));
                }
            }
        }

        TimeSeries::new(timestamps, names.into_iter().zip(columns).collect())
    }
}

/// Fixed 12-row monthly climatology table.
#[derive(Debug, Clone, PartialEq)]
pub struct ClimatologyTable {
    columns: Vec<(String, [Option<f64>; 12])>,
}

impl ClimatologyTable {
    /// Always 12, one row per calendar month.
    pub fn len(&self) -> usize {
        12
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn column(&self, name: &str) -> Option<&[Option<f64>; 12]> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Value for a 1-based calendar month.
    pub fn value(&self, name: &str, month: u32) -> Option<f64> {
        debug_assert!((1..=12).contains(&month));
        self.column(name)
            .and_then(|cells| cells.get(month as usize - 1).copied().flatten())
    }

    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> WqResult<()> {
        let mut writer = csv::Writer::from_path(path)?;

        let mut header = vec!["month".to_string()];
        header.extend(self.column_names().iter().map(|s| s.to_string()));
        writer.write_record(&header)?;

        for month in 1..=12u32 {
            let mut row = vec![month.to_string()];
            for (_, cells) in &self.columns {
                row.push(match cells[month as usize - 1] {
                    Some(v) => format!("{}", v),
                    None => String::new(),
                });
            }
            writer.write_record(&row)?;
        }

        writer.flush()?;
        Ok(())
    }
}

/// First instant of the timestamp's calendar month.
pub fn month_start(ts: &DateTime<Utc>) -> DateTime<Utc> {
    let date = ts.date_naive();
    let first = NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date);
    DateTime::from_naive_utc_and_offset(first.and_hms_opt(0, 0, 0).unwrap_or_default(), Utc)
}

/// Mean over present values; `None` when nothing is present.
pub fn mean_present(values: &[Option<f64>]) -> Option<f64> {
    let present: Vec<f64> = values.iter().flatten().copied().collect();
    if present.is_empty() {
        None
    } else {
        Some(present.iter().sum::<f64>() / present.len() as f64)
    }
}
