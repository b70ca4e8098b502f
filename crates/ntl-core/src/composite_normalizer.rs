use std::collections::HashMap;

use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::columns::{date_values, flag_values, float_values, ColumnError, PixelKey};
use crate::schema::{
    require_columns, SchemaError, DATE, DATE_GROUP, GROUP, IS_EXTREME, LAT, LON, NTL_YR, PIXEL_ID,
    RATIO,
};
use crate::stats::MeanAccumulator;

const STAGE: &str = "composite_normalizer";

pub const DEFAULT_VALUE_COLUMN: &str = "ntl_match";
/// Length of a VIIRS composite period in days.
pub const DEFAULT_PERIOD_DAYS: u32 = 16;

#[derive(Debug, Error)]
pub enum CompositeNormalizerError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Column(#[from] ColumnError),
    #[error("polars operation failed: {0}")]
    Polars(#[from] PolarsError),
    #[error("composite period must be at least one day")]
    InvalidPeriod,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    pub value_column: String,
    pub period_days: u32,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            value_column: DEFAULT_VALUE_COLUMN.to_string(),
            period_days: DEFAULT_PERIOD_DAYS,
        }
    }
}

impl NormalizerConfig {
    pub fn period_mean_column(&self) -> String {
        format!("{}_mean", self.value_column)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NormalizeSummary {
    pub rows: usize,
    pub pixels: usize,
    pub composite_groups: usize,
    pub undefined_ratios: usize,
}

#[derive(Debug, Clone)]
pub struct NormalizeResult {
    pub dataframe: DataFrame,
    pub summary: NormalizeSummary,
}

/// Hands out 1-based pixel ids in first-seen order.
#[derive(Debug, Default)]
pub struct PixelIdAssigner {
    ids: HashMap<PixelKey, i64>,
}

impl PixelIdAssigner {
    pub fn assign(&mut self, key: PixelKey) -> i64 {
        let next = self.ids.len() as i64 + 1;
        *self.ids.entry(key).or_insert(next)
    }

    pub fn assigned(&self) -> usize {
        self.ids.len()
    }
}

/// 1-based position of `date` inside the repeating composite cycle that
/// starts at `first_date`.
pub fn composite_period(first_date: NaiveDate, date: NaiveDate, period_days: u32) -> i64 {
    let offset = (date - first_date).num_days();
    offset.rem_euclid(i64::from(period_days)) + 1
}

/// Ratio of the composite-period mean to the pixel's annual mean.
pub fn normalization_ratio(period_mean: Option<f64>, annual_mean: Option<f64>) -> Option<f64> {
    match (period_mean, annual_mean) {
        (Some(period), Some(annual)) if annual != 0.0 => Some(period / annual),
        _ => None,
    }
}

/// Buckets each pixel's observations into composite periods and derives the
/// normalization factor `A = period mean / annual mean` from non-extreme rows.
pub fn normalize(
    observations: &DataFrame,
    config: &NormalizerConfig,
) -> Result<NormalizeResult, CompositeNormalizerError> {
    if config.period_days == 0 {
        return Err(CompositeNormalizerError::InvalidPeriod);
    }
    require_columns(
        observations,
        STAGE,
        &[LON, LAT, DATE, config.value_column.as_str(), IS_EXTREME],
    )?;

    let len = observations.height();
    let lon = float_values(observations, LON)?;
    let lat = float_values(observations, LAT)?;
    let dates = date_values(observations, DATE)?;
    let values = float_values(observations, &config.value_column)?;
    let extreme = flag_values(observations, IS_EXTREME)?;

    let mut assigner = PixelIdAssigner::default();
    let pixel_ids: Vec<Option<i64>> = (0..len)
        .map(|idx| PixelKey::new(lon[idx], lat[idx]).map(|key| assigner.assign(key)))
        .collect();

    let mut first_dates: HashMap<i64, NaiveDate> = HashMap::new();
    for (pixel_id, date) in pixel_ids.iter().zip(&dates) {
        if let (Some(pixel_id), Some(date)) = (pixel_id, date) {
            first_dates
                .entry(*pixel_id)
                .and_modify(|first| {
                    if *date < *first {
                        *first = *date;
                    }
                })
                .or_insert(*date);
        }
    }

    let date_groups: Vec<Option<i64>> = (0..len)
        .map(|idx| {
            let pixel_id = pixel_ids[idx]?;
            let date = dates[idx]?;
            let first = first_dates.get(&pixel_id)?;
            Some(composite_period(*first, date, config.period_days))
        })
        .collect();

    let mut annual: HashMap<i64, MeanAccumulator> = HashMap::new();
    let mut periodic: HashMap<(i64, i64), MeanAccumulator> = HashMap::new();
    for idx in 0..len {
        if extreme[idx] != Some(false) {
            continue;
        }
        let Some(pixel_id) = pixel_ids[idx] else {
            continue;
        };
        annual.entry(pixel_id).or_default().push(values[idx]);
        if let Some(date_group) = date_groups[idx] {
            periodic
                .entry((pixel_id, date_group))
                .or_default()
                .push(values[idx]);
        }
    }

    let mut groups: Vec<Option<String>> = Vec::with_capacity(len);
    let mut annual_means = Vec::with_capacity(len);
    let mut period_means = Vec::with_capacity(len);
    let mut ratios = Vec::with_capacity(len);

    for idx in 0..len {
        let pixel_id = pixel_ids[idx];
        let date_group = date_groups[idx];

        groups.push(match (pixel_id, date_group) {
            (Some(pixel_id), Some(date_group)) => Some(format!("{pixel_id}_{date_group}")),
            _ => None,
        });

        let annual_mean = pixel_id
            .and_then(|id| annual.get(&id))
            .and_then(MeanAccumulator::mean);
        let period_mean = pixel_id
            .zip(date_group)
            .and_then(|key| periodic.get(&key))
            .and_then(MeanAccumulator::mean);

        annual_means.push(annual_mean);
        period_means.push(period_mean);
        ratios.push(normalization_ratio(period_mean, annual_mean));
    }

    let summary = NormalizeSummary {
        rows: len,
        pixels: assigner.assigned(),
        composite_groups: periodic.len(),
        undefined_ratios: ratios.iter().filter(|ratio| ratio.is_none()).count(),
    };

    let group_labels: Vec<Option<&str>> = groups.iter().map(|g| g.as_deref()).collect();

    let mut output = observations.clone();
    output.with_column(Series::new(PIXEL_ID.into(), pixel_ids))?;
    output.with_column(Series::new(DATE_GROUP.into(), date_groups))?;
    output.with_column(Series::new(GROUP.into(), group_labels))?;
    output.with_column(Series::new(NTL_YR.into(), annual_means))?;
    output.with_column(Series::new(config.period_mean_column().into(), period_means))?;
    output.with_column(Series::new(RATIO.into(), ratios))?;

    info!(
        rows = summary.rows,
        pixels = summary.pixels,
        composite_groups = summary.composite_groups,
        undefined_ratios = summary.undefined_ratios,
        "computed composite-period normalization"
    );

    Ok(NormalizeResult {
        dataframe: output,
        summary,
    })
}
