//! Joint statistics over index and driver series.
//!
//! All statistics operate on the monthly joined series. The join is inner
//! by policy: fabricating driver values for months without observations
//! would bias every downstream statistic, so months absent from either side
//! are simply absent from the joined table.

use crate::core::series::TimeSeries;
use crate::types::{WqError, WqResult};
use chrono::Datelike;
use nalgebra::{DMatrix, SymmetricEigen};

/// Meteorological season
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Season {
    Winter,
    Spring,
    Summer,
    Fall,
}

impl Season {
    /// Fixed month mapping: Dec-Feb, Mar-May, Jun-Aug, Sep-Nov.
    pub fn from_month(month: u32) -> Season {
        match month {
            12 | 1 | 2 => Season::Winter,
            3 | 4 | 5 => Season::Spring,
            6 | 7 | 8 => Season::Summer,
            _ => Season::Fall,
        }
    }

    pub fn all() -> [Season; 4] {
        [Season::Winter, Season::Spring, Season::Summer, Season::Fall]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Season::Winter => "Winter",
            Season::Spring => "Spring",
            Season::Summer => "Summer",
            Season::Fall => "Fall",
        }
    }
}

impl std::fmt::Display for Season {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Join two monthly series on their shared month keys.
///
/// Both inputs are collapsed to month-start keys first, so an index series
/// still at scene cadence joins cleanly against a monthly driver series.
pub fn join_monthly(indices: &TimeSeries, driver: &TimeSeries) -> WqResult<TimeSeries> {
    let left = indices.monthly_mean()?;
    let right = driver.monthly_mean()?;
    let joined = left.inner_join(&right)?;
    log::info!(
        "joined {} index rows x {} driver rows -> {} shared months",
        left.len(),
        right.len(),
        joined.len()
    );
    Ok(joined)
}

/// Pearson correlation over rows where both values are present.
///
/// `None` when fewer than two paired observations exist or either side has
/// zero variance.
pub fn pearson(x: &[Option<f64>], y: &[Option<f64>]) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = x
        .iter()
        .zip(y)
        .filter_map(|(a, b)| Some((((*a)?), ((*b)?))))
        .collect();
    if pairs.len() < 2 {
        return None;
    }

    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|(a, _)| a).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|(_, b)| b).sum::<f64>() / n;

    let mut numerator = 0.0;
    let mut sum_sq_x = 0.0;
    let mut sum_sq_y = 0.0;
    for (a, b) in &pairs {
        let dx = a - mean_x;
        let dy = b - mean_y;
        numerator += dx * dy;
        sum_sq_x += dx * dx;
        sum_sq_y += dy * dy;
    }

    let denominator = (sum_sq_x * sum_sq_y).sqrt();
    if denominator == 0.0 {
        None
    } else {
        Some(numerator / denominator)
    }
}

/// Root-mean-square deviation between two z-scored columns.
///
/// Each column is standardized independently before the deviation is taken,
/// which makes the metric comparable between a [-1, 1] index and a driver
/// in physical units.
pub fn standardized_rmse(x: &[Option<f64>], y: &[Option<f64>]) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = x
        .iter()
        .zip(y)
        .filter_map(|(a, b)| Some((((*a)?), ((*b)?))))
        .collect();
    if pairs.len() < 2 {
        return None;
    }

    let xs: Vec<f64> = pairs.iter().map(|(a, _)| *a).collect();
    let ys: Vec<f64> = pairs.iter().map(|(_, b)| *b).collect();
    let zx = zscore(&xs)?;
    let zy = zscore(&ys)?;

    let sum_sq: f64 = zx
        .iter()
        .zip(&zy)
        .map(|(a, b)| (a - b) * (a - b))
        .sum();
    Some((sum_sq / pairs.len() as f64).sqrt())
}

/// Sample-variance z-score; `None` for constant input.
fn zscore(values: &[f64]) -> Option<Vec<f64>> {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / (n - 1.0);
    if var == 0.0 {
        return None;
    }
    let std = var.sqrt();
    Some(values.iter().map(|v| (v - mean) / std).collect())
}

/// Correlation and standardized error between one index and one driver.
#[derive(Debug, Clone)]
pub struct PairStats {
    pub index_column: String,
    pub driver_column: String,
    pub correlation: Option<f64>,
    pub rmse_z: Option<f64>,
}

/// All pairwise index/driver statistics over a joined series.
pub fn pairwise_stats(
    joined: &TimeSeries,
    index_columns: &[&str],
    driver_columns: &[&str],
) -> WqResult<Vec<PairStats>> {
    let mut stats = Vec::new();
    for index_name in index_columns {
        let x = joined.column(index_name).ok_or_else(|| {
            WqError::MissingVariable(format!("joined series has no column '{}'", index_name))
        })?;
        for driver_name in driver_columns {
            let y = joined.column(driver_name).ok_or_else(|| {
                WqError::MissingVariable(format!("joined series has no column '{}'", driver_name))
            })?;
            stats.push(PairStats {
                index_column: index_name.to_string(),
                driver_column: driver_name.to_string(),
                correlation: pearson(x, y),
                rmse_z: standardized_rmse(x, y),
            });
        }
    }
    Ok(stats)
}

/// Per-season mean of every numeric column, in Winter/Spring/Summer/Fall
/// order.
#[derive(Debug, Clone)]
pub struct SeasonalTable {
    pub columns: Vec<String>,
    /// Row per season, cell per column
    pub rows: Vec<(Season, Vec<Option<f64>>)>,
}

pub fn seasonal_means(joined: &TimeSeries) -> SeasonalTable {
    let columns: Vec<String> = joined.column_names().iter().map(|s| s.to_string()).collect();
    let mut rows = Vec::with_capacity(4);

    for season in Season::all() {
        let cells = joined
            .columns()
            .iter()
            .map(|(_, values)| {
                let in_season: Vec<Option<f64>> = joined
                    .timestamps()
                    .iter()
                    .zip(values)
                    .filter(|(ts, _)| Season::from_month(ts.month()) == season)
                    .map(|(_, v)| *v)
                    .collect();
                crate::core::series::mean_present(&in_season)
            })
            .collect();
        rows.push((season, cells));
    }

    SeasonalTable { columns, rows }
}

impl SeasonalTable {
    pub fn value(&self, season: Season, column: &str) -> Option<f64> {
        let col_idx = self.columns.iter().position(|c| c == column)?;
        self.rows
            .iter()
            .find(|(s, _)| *s == season)
            .and_then(|(_, cells)| cells.get(col_idx).copied().flatten())
    }

    pub fn write_csv<P: AsRef<std::path::Path>>(&self, path: P) -> WqResult<()> {
        let mut writer = csv::Writer::from_path(path)?;
        let mut header = vec!["season".to_string()];
        header.extend(self.columns.clone());
        writer.write_record(&header)?;
        for (season, cells) in &self.rows {
            let mut row = vec![season.to_string()];
            for cell in cells {
                row.push(cell.map(|v| v.to_string()).unwrap_or_default());
            }
            writer.write_record(&row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Principal component decomposition of standardized columns.
#[derive(Debug, Clone)]
pub struct PcaDecomposition {
    pub variables: Vec<String>,
    /// Component x variable loadings
    pub loadings: Vec<Vec<f64>>,
    pub explained_variance_ratio: Vec<f64>,
    /// Complete-row scores, component per column
    pub scores: Vec<Vec<f64>>,
}

impl PcaDecomposition {
    /// One row per component: explained-variance ratio plus the loading on
    /// each variable.
    pub fn write_csv<P: AsRef<std::path::Path>>(&self, path: P) -> WqResult<()> {
        let mut writer = csv::Writer::from_path(path)?;
        let mut header = vec!["component".to_string(), "explained_variance_ratio".to_string()];
        header.extend(self.variables.clone());
        writer.write_record(&header)?;
        for (c, loading) in self.loadings.iter().enumerate() {
            let mut row = vec![
                format!("PC{}", c + 1),
                self.explained_variance_ratio[c].to_string(),
            ];
            row.extend(loading.iter().map(|v| v.to_string()));
            writer.write_record(&row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// PCA over the selected columns of a joined series.
///
/// Rows with any missing value in the selected columns are excluded before
/// the decomposition; the eigensolve is undefined on missing data. Columns
/// are standardized, so the decomposition runs on the correlation matrix.
pub fn pca(
    joined: &TimeSeries,
    columns: &[&str],
    n_components: usize,
) -> WqResult<PcaDecomposition> {
    if columns.is_empty() || n_components == 0 || n_components > columns.len() {
        return Err(WqError::Processing(format!(
            "cannot extract {} components from {} variables",
            n_components,
            columns.len()
        )));
    }

    let mut series_columns: Vec<&[Option<f64>]> = Vec::with_capacity(columns.len());
    for name in columns {
        series_columns.push(joined.column(name).ok_or_else(|| {
            WqError::MissingVariable(format!("joined series has no column '{}'", name))
        })?);
    }

    // Complete rows only
    let complete: Vec<Vec<f64>> = (0..joined.len())
        .filter_map(|i| {
            series_columns
                .iter()
                .map(|col| col[i])
                .collect::<Option<Vec<f64>>>()
        })
        .collect();

    if complete.len() < 2 {
        return Err(WqError::Processing(format!(
            "PCA needs at least 2 complete rows, found {}",
            complete.len()
        )));
    }

    // Standardize each variable
    let n_rows = complete.len();
    let n_vars = columns.len();
    let mut standardized = DMatrix::<f64>::zeros(n_rows, n_vars);
    for j in 0..n_vars {
        let raw: Vec<f64> = complete.iter().map(|row| row[j]).collect();
        let z = zscore(&raw).ok_or_else(|| {
            WqError::Processing(format!("column '{}' is constant, PCA undefined", columns[j]))
        })?;
        for (i, v) in z.into_iter().enumerate() {
            standardized[(i, j)] = v;
        }
    }

    // Correlation matrix and its eigendecomposition
    let corr = standardized.transpose() * &standardized / (n_rows as f64 - 1.0);
    let eigen = SymmetricEigen::new(corr);

    // Order components by descending eigenvalue
    let mut order: Vec<usize> = (0..n_vars).collect();
    order.sort_by(|&a, &b| {
        eigen.eigenvalues[b]
            .partial_cmp(&eigen.eigenvalues[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let total_variance: f64 = eigen.eigenvalues.iter().sum();
    let mut loadings = Vec::with_capacity(n_components);
    let mut explained = Vec::with_capacity(n_components);
    for &k in order.iter().take(n_components) {
        loadings.push(eigen.eigenvectors.column(k).iter().copied().collect());
        explained.push(eigen.eigenvalues[k].max(0.0) / total_variance);
    }

    // Project rows onto the retained components
    let mut scores = vec![vec![0.0; n_components]; n_rows];
    for (i, row_scores) in scores.iter_mut().enumerate() {
        for (c, &k) in order.iter().take(n_components).enumerate() {
            let mut dot = 0.0;
            for j in 0..n_vars {
                dot += standardized[(i, j)] * eigen.eigenvectors[(j, k)];
            }
            row_scores[c] = dot;
        }
    }

    log::info!(
        "PCA over {} rows x {} variables: explained variance {:?}",
        n_rows,
        n_vars,
        explained
    );

    Ok(PcaDecomposition {
        variables: columns.iter().map(|s| s.to_string()).collect(),
        loadings,
        explained_variance_ratio: explained,
        scores,
    })
}
