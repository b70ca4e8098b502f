use std::path::{Path, PathBuf};
use std::time::Instant;

use once_cell::sync::Lazy;
use polars::prelude::DataFrame;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::admin_join::{join_admin_labels, AdminJoinConfig, AdminPolygon};
use crate::composite_normalizer::{self, NormalizerConfig};
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::extreme_flagger::{self, FlaggerConfig};
use crate::io;
use crate::window_averager::{self, WindowConfig};

/// Output of one stage plus the statistics it reports about itself.
pub struct StageOutput {
    pub dataframe: DataFrame,
    pub details: Value,
}

pub trait CorrectionStage {
    fn descriptor(&self) -> &'static StageDescriptor;
    fn run(&self, input: &DataFrame) -> Result<StageOutput>;

    fn code(&self) -> &'static str {
        self.descriptor().code
    }

    fn version(&self) -> &'static str {
        self.descriptor().version
    }

    fn description(&self) -> &'static str {
        self.descriptor().description
    }
}

#[derive(Debug, Clone)]
pub struct StageDescriptor {
    pub code: &'static str,
    pub version: &'static str,
    pub order: u8,
    pub description: &'static str,
}

const EXTREME_FLAGGER: StageDescriptor = StageDescriptor {
    code: "extreme_flagger",
    version: "0.1.0",
    order: 1,
    description: "Per-pixel 3-sigma outlier flag and low-quantile ntl_fix baseline",
};

const WINDOW_AVERAGER: StageDescriptor = StageDescriptor {
    code: "window_averager",
    version: "0.1.0",
    order: 2,
    description: "Regular-grid cell assignment and 3x3 neighbourhood mean",
};

const COMPOSITE_NORMALIZER: StageDescriptor = StageDescriptor {
    code: "composite_normalizer",
    version: "0.1.0",
    order: 3,
    description: "16-day composite periods, annual baseline and ratio A",
};

const ADMIN_JOIN: StageDescriptor = StageDescriptor {
    code: "admin_join",
    version: "0.1.0",
    order: 4,
    description: "Point-in-polygon administrative label join",
};

static STAGES: Lazy<Vec<StageDescriptor>> = Lazy::new(|| {
    vec![
        EXTREME_FLAGGER,
        WINDOW_AVERAGER,
        COMPOSITE_NORMALIZER,
        ADMIN_JOIN,
    ]
});

pub fn all_stage_descriptors() -> &'static [StageDescriptor] {
    STAGES.as_slice()
}

pub struct ExtremeFlaggerStage {
    pub config: FlaggerConfig,
}

impl CorrectionStage for ExtremeFlaggerStage {
    fn descriptor(&self) -> &'static StageDescriptor {
        &EXTREME_FLAGGER
    }

    fn run(&self, input: &DataFrame) -> Result<StageOutput> {
        let result = extreme_flagger::flag_extremes(input, &self.config)?;
        Ok(StageOutput {
            dataframe: result.dataframe,
            details: serde_json::to_value(result.summary)?,
        })
    }
}

pub struct WindowAveragerStage {
    pub config: WindowConfig,
}

impl CorrectionStage for WindowAveragerStage {
    fn descriptor(&self) -> &'static StageDescriptor {
        &WINDOW_AVERAGER
    }

    fn run(&self, input: &DataFrame) -> Result<StageOutput> {
        let result = window_averager::window_mean(input, &self.config)?;
        Ok(StageOutput {
            dataframe: result.dataframe,
            details: serde_json::to_value(result.summary)?,
        })
    }
}

pub struct CompositeNormalizerStage {
    pub config: NormalizerConfig,
}

impl CorrectionStage for CompositeNormalizerStage {
    fn descriptor(&self) -> &'static StageDescriptor {
        &COMPOSITE_NORMALIZER
    }

    fn run(&self, input: &DataFrame) -> Result<StageOutput> {
        let result = composite_normalizer::normalize(input, &self.config)?;
        Ok(StageOutput {
            dataframe: result.dataframe,
            details: serde_json::to_value(result.summary)?,
        })
    }
}

/// Joins against polygons loaded once when the stage is built.
pub struct AdminJoinStage {
    pub polygons: Vec<AdminPolygon>,
    pub config: AdminJoinConfig,
}

impl AdminJoinStage {
    pub fn load(polygons_path: &Path, config: AdminJoinConfig) -> Result<Self> {
        let polygons = io::read_polygons(polygons_path, &config.admin_field)?;
        Ok(Self { polygons, config })
    }
}

impl CorrectionStage for AdminJoinStage {
    fn descriptor(&self) -> &'static StageDescriptor {
        &ADMIN_JOIN
    }

    fn run(&self, input: &DataFrame) -> Result<StageOutput> {
        let dataframe = join_admin_labels(input, &self.polygons, &self.config)?;
        let labels = dataframe.column(self.config.label_column())?;
        let labelled = labels.len() - labels.null_count();
        Ok(StageOutput {
            dataframe,
            details: serde_json::json!({
                "polygons": self.polygons.len(),
                "labelled_rows": labelled,
            }),
        })
    }
}

/// A stage together with the path its output is written to, if any.
pub struct PlannedStage {
    pub stage: Box<dyn CorrectionStage>,
    pub output: Option<PathBuf>,
}

/// Builds the enabled stages in execution order.
pub fn plan_stages(config: &PipelineConfig) -> Result<Vec<PlannedStage>> {
    let mut planned = Vec::new();

    if config.flagger.enabled {
        planned.push(PlannedStage {
            stage: Box::new(ExtremeFlaggerStage {
                config: config.flagger.params.clone(),
            }),
            output: config.flagger.output.clone(),
        });
    }
    if config.window.enabled {
        planned.push(PlannedStage {
            stage: Box::new(WindowAveragerStage {
                config: config.window.params.clone(),
            }),
            output: config.window.output.clone(),
        });
    }
    if config.normalizer.enabled {
        planned.push(PlannedStage {
            stage: Box::new(CompositeNormalizerStage {
                config: config.normalizer.params.clone(),
            }),
            output: config.normalizer.output.clone(),
        });
    }
    if let Some(admin) = &config.admin {
        planned.push(PlannedStage {
            stage: Box::new(AdminJoinStage::load(&admin.polygons, admin.params.clone())?),
            output: Some(admin.output.clone()),
        });
    }

    Ok(planned)
}

#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub code: &'static str,
    pub version: &'static str,
    pub rows_in: usize,
    pub rows_out: usize,
    pub elapsed_ms: u64,
    pub output: Option<PathBuf>,
    pub details: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub input: PathBuf,
    pub input_blake3: String,
    pub stages: Vec<StageReport>,
    pub final_rows: usize,
}

/// Runs `stages` in order over `input`. A stage's output file is written
/// only after that stage succeeded; the first failure aborts the run.
pub fn run_stages(
    input: DataFrame,
    stages: &[PlannedStage],
) -> Result<(DataFrame, Vec<StageReport>)> {
    let mut table = input;
    let mut reports = Vec::with_capacity(stages.len());

    for planned in stages {
        let stage = planned.stage.as_ref();
        let started = Instant::now();
        let rows_in = table.height();
        debug!(
            stage = stage.code(),
            description = stage.description(),
            rows = rows_in,
            "running stage"
        );

        let StageOutput {
            mut dataframe,
            details,
        } = stage.run(&table)?;

        if let Some(path) = planned.output.as_deref() {
            io::write_table(&mut dataframe, path)?;
        }

        let report = StageReport {
            code: stage.code(),
            version: stage.version(),
            rows_in,
            rows_out: dataframe.height(),
            elapsed_ms: started.elapsed().as_millis() as u64,
            output: planned.output.clone(),
            details,
        };
        info!(
            stage = report.code,
            rows = report.rows_out,
            elapsed_ms = report.elapsed_ms,
            "stage finished"
        );
        reports.push(report);
        table = dataframe;
    }

    Ok((table, reports))
}

/// Loads the input table, runs every configured stage and writes the run summary.
pub fn run_pipeline(config: &PipelineConfig) -> Result<RunSummary> {
    config.validate()?;

    let input_blake3 = io::fingerprint(&config.input)?;
    let input = io::read_table(&config.input)?;
    info!(
        input = %config.input.display(),
        rows = input.height(),
        blake3 = %input_blake3,
        "loaded observations"
    );

    let stages = plan_stages(config)?;
    let (table, reports) = run_stages(input, &stages)?;

    let summary = RunSummary {
        input: config.input.clone(),
        input_blake3,
        stages: reports,
        final_rows: table.height(),
    };

    if let Some(path) = config.summary.as_deref() {
        io::write_json(&summary, path)?;
    }

    Ok(summary)
}
