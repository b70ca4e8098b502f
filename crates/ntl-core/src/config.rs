//! Pipeline configuration loaded from TOML.
//!
//! ```toml
//! input = "ntl_vza.csv"
//! summary = "out/run_summary.json"
//!
//! [flagger]
//! output = "out/ntl_adjusted1_extreme.csv"
//!
//! [window]
//! output = "out/ntl_adjusted2_wdav.csv"
//! value_column = "ntl_mis"
//! grouping = "auto"
//!
//! [normalizer]
//! output = "out/ntl_adjusted3_A.csv"
//!
//! [admin]
//! polygons = "boundaries/counties.geojson"
//! output = "out/ntl_adjusted_admin.csv"
//! admin_field = "county_name"
//! output_field = "county"
//! ```
//!
//! Relative paths are resolved against the directory holding the config file.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::admin_join::AdminJoinConfig;
use crate::composite_normalizer::NormalizerConfig;
use crate::error::{PipelineError, Result};
use crate::extreme_flagger::FlaggerConfig;
use crate::window_averager::WindowConfig;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StageSettings<T> {
    pub enabled: bool,
    pub output: Option<PathBuf>,
    #[serde(flatten)]
    pub params: T,
}

impl<T: Default> Default for StageSettings<T> {
    fn default() -> Self {
        Self {
            enabled: true,
            output: None,
            params: T::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AdminSettings {
    pub polygons: PathBuf,
    pub output: PathBuf,
    #[serde(flatten)]
    pub params: AdminJoinConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PipelineConfig {
    pub input: PathBuf,
    #[serde(default)]
    pub summary: Option<PathBuf>,
    #[serde(default)]
    pub flagger: StageSettings<FlaggerConfig>,
    #[serde(default)]
    pub window: StageSettings<WindowConfig>,
    #[serde(default)]
    pub normalizer: StageSettings<NormalizerConfig>,
    #[serde(default)]
    pub admin: Option<AdminSettings>,
}

impl PipelineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str::<PipelineConfig>(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| PipelineError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&text)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        config.validate()?;
        Ok(config)
    }

    /// Rewrites every relative path as `base/path`.
    pub fn resolve_paths(&mut self, base: &Path) {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };

        resolve(&mut self.input);
        for output in [
            self.summary.as_mut(),
            self.flagger.output.as_mut(),
            self.window.output.as_mut(),
            self.normalizer.output.as_mut(),
        ]
        .into_iter()
        .flatten()
        {
            resolve(output);
        }
        if let Some(admin) = self.admin.as_mut() {
            resolve(&mut admin.polygons);
            resolve(&mut admin.output);
        }
    }

    pub fn validate(&self) -> Result<()> {
        let any_stage =
            self.flagger.enabled || self.window.enabled || self.normalizer.enabled;
        if !any_stage && self.admin.is_none() {
            return Err(PipelineError::Config(
                "no stage is enabled and no admin join is configured".to_string(),
            ));
        }
        if self.admin.as_ref().is_some_and(|admin| admin.params.admin_field.is_empty()) {
            return Err(PipelineError::Config(
                "admin.admin_field must name a polygon property".to_string(),
            ));
        }
        Ok(())
    }
}
