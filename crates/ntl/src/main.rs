use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ntl_core::admin_join::{join_admin_labels, AdminJoinConfig};
use ntl_core::composite_normalizer::{normalize, NormalizerConfig};
use ntl_core::config::PipelineConfig;
use ntl_core::extreme_flagger::{flag_extremes, FlaggerConfig};
use ntl_core::io::{read_polygons, read_table, write_table};
use ntl_core::pipeline::{all_stage_descriptors, run_pipeline};
use ntl_core::window_averager::{window_mean, TemporalGrouping, WindowConfig};
use polars::prelude::DataFrame;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Nighttime-light correction pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Flag per-pixel radiance outliers and compute the ntl_fix baseline
    FlagExtremes(FlagArgs),
    /// Smooth a radiance column with the 3x3 grid-neighbourhood mean
    WindowMean(WindowArgs),
    /// Compute composite-period means and the normalization ratio A
    Normalize(NormalizeArgs),
    /// Attach administrative-unit labels by point-in-polygon lookup
    AdminJoin(AdminArgs),
    /// Run every configured stage from a TOML pipeline file
    Run(RunArgs),
    /// List the available correction stages
    Stages,
}

#[derive(Args, Debug)]
struct TableArgs {
    /// Input CSV table
    #[arg(long)]
    input: PathBuf,
    /// Output CSV table
    #[arg(long)]
    output: PathBuf,
}

#[derive(Args, Debug)]
struct FlagArgs {
    #[command(flatten)]
    table: TableArgs,
    /// Distance from the pixel mean, in standard deviations, that marks an extreme
    #[arg(long = "sigma", alias = "sigma-threshold", default_value_t = 3.0)]
    sigma_threshold: f64,
    /// Quantile of the retained readings bounding the ntl_fix baseline
    #[arg(long = "quantile", alias = "fix-quantile", default_value_t = 0.05)]
    fix_quantile: f64,
    /// Keep the per-pixel ntl_mean / ntl_std columns in the output
    #[arg(long)]
    emit_moments: bool,
}

#[derive(Args, Debug)]
struct WindowArgs {
    #[command(flatten)]
    table: TableArgs,
    #[arg(long, default_value = "ntl_mis")]
    value_column: String,
    /// Grid cell size in degrees
    #[arg(long, default_value_t = 1.0 / 240.0)]
    pixel_size: f64,
    /// auto, per-date or spatial
    #[arg(long, value_parser = parse_grouping, default_value = "auto")]
    grouping: TemporalGrouping,
}

#[derive(Args, Debug)]
struct NormalizeArgs {
    #[command(flatten)]
    table: TableArgs,
    #[arg(long, default_value = "ntl_match")]
    value_column: String,
    #[arg(long, default_value_t = 16)]
    period_days: u32,
}

#[derive(Args, Debug)]
struct AdminArgs {
    #[command(flatten)]
    table: TableArgs,
    /// GeoJSON polygon layer in EPSG:4326
    #[arg(long)]
    polygons: PathBuf,
    /// Polygon property holding the unit name
    #[arg(long, default_value = "name")]
    admin_field: String,
    /// Label column name; defaults to the admin field
    #[arg(long)]
    output_field: Option<String>,
    #[arg(long, default_value = "lon")]
    lon_column: String,
    #[arg(long, default_value = "lat")]
    lat_column: String,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Pipeline TOML; falls back to NTL_PIPELINE_CONFIG
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::FlagExtremes(args) => {
            let config = FlaggerConfig {
                sigma_threshold: args.sigma_threshold,
                fix_quantile: args.fix_quantile,
                emit_moments: args.emit_moments,
            };
            transform_table(&args.table, |df| {
                Ok(flag_extremes(df, &config)?.dataframe)
            })
        }
        Command::WindowMean(args) => {
            let config = WindowConfig {
                value_column: args.value_column,
                pixel_size: args.pixel_size,
                grouping: args.grouping,
            };
            transform_table(&args.table, |df| Ok(window_mean(df, &config)?.dataframe))
        }
        Command::Normalize(args) => {
            let config = NormalizerConfig {
                value_column: args.value_column,
                period_days: args.period_days,
            };
            transform_table(&args.table, |df| Ok(normalize(df, &config)?.dataframe))
        }
        Command::AdminJoin(args) => {
            let config = AdminJoinConfig {
                lon_column: args.lon_column,
                lat_column: args.lat_column,
                admin_field: args.admin_field,
                output_field: args.output_field,
            };
            let polygons = read_polygons(&args.polygons, &config.admin_field)
                .with_context(|| format!("loading polygons from {}", args.polygons.display()))?;
            transform_table(&args.table, |df| {
                Ok(join_admin_labels(df, &polygons, &config)?)
            })
        }
        Command::Run(args) => {
            let path = resolve_config_path(args.config)?;
            let config = PipelineConfig::load(&path)
                .with_context(|| format!("loading pipeline config {}", path.display()))?;
            let summary = run_pipeline(&config)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Command::Stages => {
            for stage in all_stage_descriptors() {
                println!(
                    "{}. {} v{}  {}",
                    stage.order, stage.code, stage.version, stage.description
                );
            }
            Ok(())
        }
    }
}

fn transform_table<F>(table: &TableArgs, stage: F) -> Result<()>
where
    F: FnOnce(&DataFrame) -> Result<DataFrame>,
{
    let input = read_table(&table.input)?;
    let mut output = stage(&input)?;
    write_table(&mut output, &table.output)?;
    info!(
        input = %table.input.display(),
        output = %table.output.display(),
        rows = output.height(),
        "wrote table"
    );
    Ok(())
}

fn resolve_config_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    let path = std::env::var("NTL_PIPELINE_CONFIG")
        .context("pass --config or set NTL_PIPELINE_CONFIG")?;
    Ok(PathBuf::from(path))
}

fn parse_grouping(raw: &str) -> Result<TemporalGrouping, String> {
    match raw.to_ascii_lowercase().replace('-', "_").as_str() {
        "auto" => Ok(TemporalGrouping::Auto),
        "per_date" => Ok(TemporalGrouping::PerDate),
        "spatial" => Ok(TemporalGrouping::Spatial),
        other => Err(format!("unknown grouping '{other}' (expected auto, per-date or spatial)")),
    }
}
