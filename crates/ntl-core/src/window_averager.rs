use std::collections::HashMap;

use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::columns::{float_values, parse_observation_date};
use crate::schema::{
    has_column, require_columns, SchemaError, DATE, IX, IY, LAT, LAT_CENTER, LON, LON_CENTER,
};
use crate::stats::{self, MeanAccumulator};

const STAGE: &str = "window_averager";

/// 15 arc-seconds, the VIIRS Black Marble grid spacing.
pub const DEFAULT_PIXEL_SIZE: f64 = 1.0 / 240.0;
pub const DEFAULT_VALUE_COLUMN: &str = "ntl_mis";
pub const SMOOTHED_SUFFIX: &str = "_33";

#[derive(Debug, Error)]
pub enum WindowAveragerError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("polars operation failed: {0}")]
    Polars(#[from] PolarsError),
    #[error("pixel size must be a positive finite number, got {0}")]
    InvalidPixelSize(f64),
}

/// How observations from different dates share grid cells.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalGrouping {
    /// Per date when a `date` column is present, otherwise one spatial field.
    #[default]
    Auto,
    /// Per date; the `date` column is required.
    PerDate,
    /// One spatial field over the whole table, ignoring `date`.
    Spatial,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub value_column: String,
    pub pixel_size: f64,
    pub grouping: TemporalGrouping,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            value_column: DEFAULT_VALUE_COLUMN.to_string(),
            pixel_size: DEFAULT_PIXEL_SIZE,
            grouping: TemporalGrouping::Auto,
        }
    }
}

impl WindowConfig {
    pub fn smoothed_column(&self) -> String {
        format!("{}{}", self.value_column, SMOOTHED_SUFFIX)
    }
}

/// Integer cell indices on the regular lon/lat grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridCell {
    pub ix: i64,
    pub iy: i64,
}

impl GridCell {
    /// `None` when either index does not fit an `i64` with room for a neighbour.
    pub fn assign(lon: f64, lat: f64, pixel_size: f64) -> Option<Self> {
        Some(Self {
            ix: cell_index(lon, pixel_size)?,
            iy: cell_index(lat, pixel_size)?,
        })
    }

    pub fn center(&self, pixel_size: f64) -> (f64, f64) {
        (
            (self.ix as f64 + 0.5) * pixel_size,
            (self.iy as f64 + 0.5) * pixel_size,
        )
    }

    fn offset(&self, dx: i64, dy: i64) -> Option<Self> {
        Some(Self {
            ix: self.ix.checked_add(dx)?,
            iy: self.iy.checked_add(dy)?,
        })
    }
}

// Below 2^63, so the cast is exact and a neighbour offset cannot overflow.
const MAX_CELL_INDEX: f64 = 9.0e18;

fn cell_index(coordinate: f64, pixel_size: f64) -> Option<i64> {
    let index = (coordinate / pixel_size).floor();
    (-MAX_CELL_INDEX..=MAX_CELL_INDEX)
        .contains(&index)
        .then_some(index as i64)
}

/// Same-day identity of a row. Cells that do not parse as a date still
/// group by their trimmed text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum DateKey {
    Day(NaiveDate),
    Label(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CellKey {
    date: Option<DateKey>,
    cell: GridCell,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WindowSummary {
    pub rows: usize,
    pub cells: usize,
    pub per_date: bool,
    pub undefined_smoothed: usize,
}

#[derive(Debug, Clone)]
pub struct WindowResult {
    pub dataframe: DataFrame,
    pub summary: WindowSummary,
}

/// Averages `value_column` per grid cell (and date), then replaces every row's
/// value with the mean of its cell and the eight neighbouring cells.
pub fn window_mean(
    observations: &DataFrame,
    config: &WindowConfig,
) -> Result<WindowResult, WindowAveragerError> {
    if !config.pixel_size.is_finite() || config.pixel_size <= 0.0 {
        return Err(WindowAveragerError::InvalidPixelSize(config.pixel_size));
    }
    require_columns(observations, STAGE, &[LON, LAT, config.value_column.as_str()])?;

    let per_date = match config.grouping {
        TemporalGrouping::Auto => has_column(observations, DATE),
        TemporalGrouping::PerDate => {
            require_columns(observations, STAGE, &[DATE])?;
            true
        }
        TemporalGrouping::Spatial => false,
    };

    let len = observations.height();
    let lon = float_values(observations, LON)?;
    let lat = float_values(observations, LAT)?;
    let values = float_values(observations, &config.value_column)?;
    let dates = if per_date {
        Some(date_keys(observations)?)
    } else {
        None
    };

    let cells: Vec<Option<GridCell>> = (0..len)
        .map(|idx| match (lon[idx], lat[idx]) {
            (Some(lon), Some(lat)) => GridCell::assign(lon, lat, config.pixel_size),
            _ => None,
        })
        .collect();

    // Rows without a date cannot be matched to neighbours of the same day.
    let keys: Vec<Option<CellKey>> = cells
        .iter()
        .enumerate()
        .map(|(idx, cell)| {
            let cell = (*cell)?;
            let date = match &dates {
                Some(dates) => Some(dates[idx]?),
                None => None,
            };
            Some(CellKey { date, cell })
        })
        .collect();

    let mut cell_means: HashMap<CellKey, MeanAccumulator> = HashMap::new();
    for (idx, key) in keys.iter().enumerate() {
        if let Some(key) = key {
            cell_means.entry(*key).or_default().push(values[idx]);
        }
    }
    debug!(rows = len, cells = cell_means.len(), per_date, "aggregated grid cells");

    let mut smoothed_by_key: HashMap<CellKey, Option<f64>> =
        HashMap::with_capacity(cell_means.len());
    for key in cell_means.keys() {
        smoothed_by_key.insert(*key, neighbourhood_mean(&cell_means, key));
    }

    let mut ix = Vec::with_capacity(len);
    let mut iy = Vec::with_capacity(len);
    let mut lon_center = Vec::with_capacity(len);
    let mut lat_center = Vec::with_capacity(len);
    let mut smoothed = Vec::with_capacity(len);

    for idx in 0..len {
        match cells[idx] {
            Some(cell) => {
                let (cx, cy) = cell.center(config.pixel_size);
                ix.push(Some(cell.ix));
                iy.push(Some(cell.iy));
                lon_center.push(Some(cx));
                lat_center.push(Some(cy));
            }
            None => {
                ix.push(None);
                iy.push(None);
                lon_center.push(None);
                lat_center.push(None);
            }
        }
        smoothed.push(
            keys[idx]
                .and_then(|key| smoothed_by_key.get(&key).copied())
                .flatten(),
        );
    }

    let summary = WindowSummary {
        rows: len,
        cells: cell_means.len(),
        per_date,
        undefined_smoothed: smoothed.iter().filter(|value| value.is_none()).count(),
    };

    let mut output = observations.clone();
    output.with_column(Series::new(IX.into(), ix))?;
    output.with_column(Series::new(IY.into(), iy))?;
    output.with_column(Series::new(LON_CENTER.into(), lon_center))?;
    output.with_column(Series::new(LAT_CENTER.into(), lat_center))?;
    output.with_column(Series::new(config.smoothed_column().into(), smoothed))?;

    info!(
        rows = summary.rows,
        cells = summary.cells,
        per_date = summary.per_date,
        undefined_smoothed = summary.undefined_smoothed,
        "computed 3x3 window means"
    );

    Ok(WindowResult {
        dataframe: output,
        summary,
    })
}

fn date_keys(df: &DataFrame) -> PolarsResult<Vec<Option<DateKey>>> {
    let column = df.column(DATE)?.cast(&DataType::String)?;
    let mut labels: HashMap<String, usize> = HashMap::new();

    let keys: Vec<Option<DateKey>> = column
        .str()?
        .into_iter()
        .map(|value| {
            let text = value.map(str::trim).filter(|text| !text.is_empty())?;
            Some(match parse_observation_date(text) {
                Some(day) => DateKey::Day(day),
                None => {
                    let next = labels.len();
                    DateKey::Label(*labels.entry(text.to_string()).or_insert(next))
                }
            })
        })
        .collect();

    if !labels.is_empty() {
        warn!(
            distinct = labels.len(),
            "date cells not recognised as dates; grouping them by their text"
        );
    }
    Ok(keys)
}

fn neighbourhood_mean(cell_means: &HashMap<CellKey, MeanAccumulator>, key: &CellKey) -> Option<f64> {
    let mut neighbours = Vec::with_capacity(9);
    for dx in -1..=1 {
        for dy in -1..=1 {
            let Some(cell) = key.cell.offset(dx, dy) else {
                continue;
            };
            let neighbour = CellKey {
                date: key.date,
                cell,
            };
            if let Some(value) = cell_means.get(&neighbour).and_then(MeanAccumulator::mean) {
                neighbours.push(value);
            }
        }
    }
    stats::mean(&neighbours)
}
