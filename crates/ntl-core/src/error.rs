use std::path::PathBuf;

use thiserror::Error;

use crate::admin_join::AdminJoinError;
use crate::composite_normalizer::CompositeNormalizerError;
use crate::extreme_flagger::ExtremeFlaggerError;
use crate::window_averager::WindowAveragerError;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("file I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read table {}: {source}", .path.display())]
    ReadTable {
        path: PathBuf,
        #[source]
        source: polars::error::PolarsError,
    },

    #[error("failed to write table {}: {source}", .path.display())]
    WriteTable {
        path: PathBuf,
        #[source]
        source: polars::error::PolarsError,
    },

    #[error("Polars operation failed: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("invalid pipeline configuration: {0}")]
    Config(String),

    #[error("failed to parse pipeline configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    ExtremeFlagger(#[from] ExtremeFlaggerError),

    #[error(transparent)]
    WindowAverager(#[from] WindowAveragerError),

    #[error(transparent)]
    CompositeNormalizer(#[from] CompositeNormalizerError),

    #[error(transparent)]
    AdminJoin(#[from] AdminJoinError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
