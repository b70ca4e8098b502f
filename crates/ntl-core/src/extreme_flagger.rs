use std::collections::HashMap;

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::columns::{float_values, PixelKey};
use crate::schema::{
    require_columns, SchemaError, EXTREME_FALSE, EXTREME_TRUE, IS_EXTREME, LAT, LON, NTL,
    NTL_FIX, NTL_MEAN, NTL_STD, OBSERVATION_COLUMNS,
};
use crate::stats::{self, defined};

const STAGE: &str = "extreme_flagger";

#[derive(Debug, Error)]
pub enum ExtremeFlaggerError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("polars operation failed: {0}")]
    Polars(#[from] PolarsError),
    #[error("invalid flagger configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlaggerConfig {
    /// A reading is extreme when it lies further than this many standard
    /// deviations from its pixel mean.
    pub sigma_threshold: f64,
    /// Quantile of the non-extreme readings that bounds the `ntl_fix` baseline.
    pub fix_quantile: f64,
    /// Keep the per-pixel `ntl_mean` / `ntl_std` columns in the output.
    pub emit_moments: bool,
}

impl Default for FlaggerConfig {
    fn default() -> Self {
        Self {
            sigma_threshold: 3.0,
            fix_quantile: 0.05,
            emit_moments: false,
        }
    }
}

impl FlaggerConfig {
    fn validate(&self) -> Result<(), ExtremeFlaggerError> {
        if !self.sigma_threshold.is_finite() || self.sigma_threshold < 0.0 {
            return Err(ExtremeFlaggerError::InvalidConfig(format!(
                "sigma_threshold must be a non-negative number, got {}",
                self.sigma_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.fix_quantile) {
            return Err(ExtremeFlaggerError::InvalidConfig(format!(
                "fix_quantile must lie in [0, 1], got {}",
                self.fix_quantile
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlagSummary {
    pub rows: usize,
    pub pixels: usize,
    pub extremes: usize,
    pub pixels_without_fix: usize,
}

#[derive(Debug, Clone)]
pub struct FlagResult {
    pub dataframe: DataFrame,
    pub summary: FlagSummary,
}

/// Per-pixel moments and baseline, broadcast back to every row of the pixel.
#[derive(Debug, Clone, Copy, Default)]
struct PixelStats {
    mean: Option<f64>,
    std: Option<f64>,
    fix: Option<f64>,
}

/// Marks readings more than `sigma_threshold` standard deviations from their
/// pixel mean and attaches the low-quantile `ntl_fix` baseline computed from
/// the remaining readings.
pub fn flag_extremes(
    observations: &DataFrame,
    config: &FlaggerConfig,
) -> Result<FlagResult, ExtremeFlaggerError> {
    config.validate()?;
    require_columns(observations, STAGE, &OBSERVATION_COLUMNS)?;

    let len = observations.height();
    let lon = float_values(observations, LON)?;
    let lat = float_values(observations, LAT)?;
    let ntl = float_values(observations, NTL)?;

    let mut rows_by_pixel: HashMap<PixelKey, Vec<usize>> = HashMap::new();
    for idx in 0..len {
        if let Some(key) = PixelKey::new(lon[idx], lat[idx]) {
            rows_by_pixel.entry(key).or_default().push(idx);
        }
    }
    debug!(rows = len, pixels = rows_by_pixel.len(), "grouped observations by pixel");

    let mut is_extreme = vec![false; len];
    let mut per_row: Vec<PixelStats> = vec![PixelStats::default(); len];
    let mut summary = FlagSummary {
        rows: len,
        pixels: rows_by_pixel.len(),
        ..FlagSummary::default()
    };

    for rows in rows_by_pixel.values() {
        let values = defined(rows.iter().map(|&idx| ntl[idx]));
        let mean = stats::mean(&values);
        let std = stats::sample_std(&values);

        for &idx in rows {
            is_extreme[idx] = exceeds_threshold(ntl[idx], mean, std, config.sigma_threshold);
        }

        let retained = defined(rows.iter().filter(|&&idx| !is_extreme[idx]).map(|&idx| ntl[idx]));
        let fix = stats::quantile_linear(&retained, config.fix_quantile)
            .and_then(|threshold| stats::mean_at_or_below(&retained, threshold));
        if fix.is_none() {
            summary.pixels_without_fix += 1;
        }

        let pixel = PixelStats { mean, std, fix };
        for &idx in rows {
            per_row[idx] = pixel;
        }
    }

    summary.extremes = is_extreme.iter().filter(|flag| **flag).count();

    let flags: Vec<&str> = is_extreme
        .iter()
        .map(|&flag| if flag { EXTREME_TRUE } else { EXTREME_FALSE })
        .collect();

    let mut output = observations.clone();
    if config.emit_moments {
        output.with_column(Series::new(
            NTL_MEAN.into(),
            per_row.iter().map(|p| p.mean).collect::<Vec<_>>(),
        ))?;
        output.with_column(Series::new(
            NTL_STD.into(),
            per_row.iter().map(|p| p.std).collect::<Vec<_>>(),
        ))?;
    }
    output.with_column(Series::new(IS_EXTREME.into(), flags))?;
    output.with_column(Series::new(
        NTL_FIX.into(),
        per_row.iter().map(|p| p.fix).collect::<Vec<_>>(),
    ))?;

    info!(
        rows = summary.rows,
        pixels = summary.pixels,
        extremes = summary.extremes,
        pixels_without_fix = summary.pixels_without_fix,
        "flagged extreme values"
    );

    Ok(FlagResult {
        dataframe: output,
        summary,
    })
}

// Undefined operands and zero spread never flag a reading.
fn exceeds_threshold(
    value: Option<f64>,
    mean: Option<f64>,
    std: Option<f64>,
    sigma_threshold: f64,
) -> bool {
    match (value, mean, std) {
        (Some(value), Some(mean), Some(std)) if std > 0.0 => {
            (value - mean).abs() > sigma_threshold * std
        }
        _ => false,
    }
}
