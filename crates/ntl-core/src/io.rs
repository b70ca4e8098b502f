use std::fs::{self, File};
use std::path::Path;

use blake3::Hasher;
use polars::prelude::*;
use serde::Serialize;

use crate::admin_join::{load_admin_polygons, AdminPolygon};
use crate::error::{PipelineError, Result};

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> PipelineError + '_ {
    move |source| PipelineError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Reads a headered CSV table, inferring column types over the whole file.
pub fn read_table(path: &Path) -> Result<DataFrame> {
    CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(None)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .and_then(|reader| reader.finish())
        .map_err(|source| PipelineError::ReadTable {
            path: path.to_path_buf(),
            source,
        })
}

/// Writes `df` as a headered CSV, creating parent directories. Nulls become empty cells.
pub fn write_table(df: &mut DataFrame, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_error(parent))?;
    }

    let mut file = File::create(path).map_err(io_error(path))?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .finish(df)
        .map_err(|source| PipelineError::WriteTable {
            path: path.to_path_buf(),
            source,
        })
}

/// blake3 digest of a file's bytes, hex encoded.
pub fn fingerprint(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(io_error(path))?;
    let mut hasher = Hasher::new();
    std::io::copy(&mut file, &mut hasher).map_err(io_error(path))?;
    Ok(hasher.finalize().to_hex().to_string())
}

pub fn read_polygons(path: &Path, admin_field: &str) -> Result<Vec<AdminPolygon>> {
    let text = fs::read_to_string(path).map_err(io_error(path))?;
    Ok(load_admin_polygons(&text, admin_field)?)
}

pub fn write_json<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    let body = serde_json::to_string_pretty(value)?;
    fs::write(path, body).map_err(io_error(path))
}
