//! Typed views over DataFrame columns.
//!
//! Every stage reads its inputs through these helpers so that the null
//! handling is identical everywhere: empty cells and `NaN` both become
//! `None`, and nothing downstream has to reason about float sentinels.

use chrono::NaiveDate;
use polars::prelude::*;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ColumnError {
    #[error("polars operation failed: {0}")]
    Polars(#[from] PolarsError),
    #[error("column {column} row {row}: unrecognised date '{value}'")]
    InvalidDate {
        column: String,
        row: usize,
        value: String,
    },
}

/// Identity of a physical ground pixel: the exact (lon, lat) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelKey {
    lon_bits: u64,
    lat_bits: u64,
}

impl PixelKey {
    pub fn new(lon: Option<f64>, lat: Option<f64>) -> Option<Self> {
        let (lon, lat) = (lon?, lat?);
        Some(Self {
            lon_bits: canonical_bits(lon),
            lat_bits: canonical_bits(lat),
        })
    }
}

// -0.0 and 0.0 name the same meridian.
fn canonical_bits(value: f64) -> u64 {
    if value == 0.0 {
        0.0f64.to_bits()
    } else {
        value.to_bits()
    }
}

pub fn float_values(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<f64>>> {
    let column = df.column(name)?.cast(&DataType::Float64)?;
    let values = column.f64()?;
    Ok(values
        .into_iter()
        .map(|value| value.filter(|v| !v.is_nan()))
        .collect())
}

pub fn date_values(df: &DataFrame, name: &str) -> Result<Vec<Option<NaiveDate>>, ColumnError> {
    let column = df.column(name)?.cast(&DataType::String)?;
    let raw = column.str()?;

    let mut dates = Vec::with_capacity(raw.len());
    for (row, value) in raw.into_iter().enumerate() {
        let Some(text) = value.map(str::trim).filter(|text| !text.is_empty()) else {
            dates.push(None);
            continue;
        };
        let date = parse_observation_date(text).ok_or_else(|| ColumnError::InvalidDate {
            column: name.to_string(),
            row,
            value: text.to_string(),
        })?;
        dates.push(Some(date));
    }

    Ok(dates)
}

/// Reads a `T`/`F` flag column. Boolean columns are accepted as-is; string
/// columns accept `T`, `F`, `true` and `false` in any case. Anything else is `None`.
pub fn flag_values(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<bool>>> {
    let column = df.column(name)?;
    if matches!(column.dtype(), DataType::Boolean) {
        return Ok(column.bool()?.into_iter().collect());
    }

    let column = column.cast(&DataType::String)?;
    Ok(column
        .str()?
        .into_iter()
        .map(|value| value.and_then(parse_flag))
        .collect())
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "t" | "true" => Some(true),
        "f" | "false" => Some(false),
        _ => None,
    }
}

/// Accepts `YYYY-MM-DD` (a trailing time part is ignored), `YYYY/MM/DD`,
/// `YYYYMMDD` and the VIIRS acquisition token `AYYYYDDD`.
pub fn parse_observation_date(raw: &str) -> Option<NaiveDate> {
    let text = raw.trim();

    if let Some(token) = text.strip_prefix('A') {
        return parse_acquisition_token(token);
    }

    if let Some(day) = text.get(..10) {
        for format in ["%Y-%m-%d", "%Y/%m/%d"] {
            if let Ok(date) = NaiveDate::parse_from_str(day, format) {
                return Some(date);
            }
        }
    }

    if text.len() == 8 && text.bytes().all(|b| b.is_ascii_digit()) {
        return NaiveDate::parse_from_str(text, "%Y%m%d").ok();
    }

    None
}

fn parse_acquisition_token(token: &str) -> Option<NaiveDate> {
    let digits = token.get(..7)?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year: i32 = digits[..4].parse().ok()?;
    let day_of_year: u32 = digits[4..].parse().ok()?;
    NaiveDate::from_yo_opt(year, day_of_year)
}

