use polars::prelude::DataFrame;
use thiserror::Error;

pub const DATE: &str = "date";
pub const LON: &str = "lon";
pub const LAT: &str = "lat";
pub const NTL: &str = "ntl";
pub const VZA: &str = "vza";

pub const NTL_MEAN: &str = "ntl_mean";
pub const NTL_STD: &str = "ntl_std";
pub const IS_EXTREME: &str = "is_extreme";
pub const NTL_FIX: &str = "ntl_fix";

pub const IX: &str = "ix";
pub const IY: &str = "iy";
pub const LON_CENTER: &str = "lon_center";
pub const LAT_CENTER: &str = "lat_center";

pub const PIXEL_ID: &str = "pixel_id";
pub const DATE_GROUP: &str = "date_group";
pub const GROUP: &str = "group";
pub const NTL_YR: &str = "ntl_yr";
pub const RATIO: &str = "A";

/// Columns every raw observation table must carry before flagging.
pub const OBSERVATION_COLUMNS: [&str; 5] = [DATE, LON, LAT, VZA, NTL];

pub const EXTREME_TRUE: &str = "T";
pub const EXTREME_FALSE: &str = "F";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{stage}: missing required columns: {}", .missing.join(", "))]
pub struct SchemaError {
    pub stage: &'static str,
    pub missing: Vec<String>,
}

pub fn has_column(df: &DataFrame, name: &str) -> bool {
    df.get_column_index(name).is_some()
}

/// Fails with every absent column listed in sorted order.
pub fn require_columns(
    df: &DataFrame,
    stage: &'static str,
    required: &[&str],
) -> Result<(), SchemaError> {
    let mut missing: Vec<String> = required
        .iter()
        .filter(|name| !has_column(df, name))
        .map(|name| (*name).to_string())
        .collect();

    if missing.is_empty() {
        return Ok(());
    }

    missing.sort();
    missing.dedup();
    Err(SchemaError { stage, missing })
}
