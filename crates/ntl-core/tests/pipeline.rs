use std::fs;
use std::path::Path;

use ntl_core::config::PipelineConfig;
use ntl_core::error::PipelineError;
use ntl_core::io::read_table;
use ntl_core::pipeline::{all_stage_descriptors, run_pipeline};

const OBSERVATIONS: &str = "\
date,lon,lat,vza,ntl
2020-01-01,0.5,0.5,10.0,2.0
2020-01-02,0.5,0.5,12.0,3.0
2020-01-17,0.5,0.5,11.0,7.0
2020-01-01,1.5,0.5,20.0,6.0
";

const HALVES: &str = r#"{
  "type": "FeatureCollection",
  "features": [
    { "type": "Feature", "properties": { "name": "West" },
      "geometry": { "type": "Polygon", "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 1], [0, 0]]] } },
    { "type": "Feature", "properties": { "name": "East" },
      "geometry": { "type": "Polygon", "coordinates": [[[1, 0], [2, 0], [2, 1], [1, 1], [1, 0]]] } }
  ]
}"#;

fn write_inputs(dir: &Path) {
    fs::write(dir.join("obs.csv"), OBSERVATIONS).unwrap();
    fs::write(dir.join("halves.geojson"), HALVES).unwrap();
}

fn load(dir: &Path, toml: &str) -> PipelineConfig {
    let path = dir.join("pipeline.toml");
    fs::write(&path, toml).unwrap();
    PipelineConfig::load(&path).unwrap()
}

#[test]
fn descriptors_are_listed_in_execution_order() {
    let codes: Vec<&str> = all_stage_descriptors().iter().map(|d| d.code).collect();
    assert_eq!(
        codes,
        vec![
            "extreme_flagger",
            "window_averager",
            "composite_normalizer",
            "admin_join"
        ]
    );
}

#[test]
fn full_run_writes_every_stage_output() {
    let dir = tempfile::tempdir().unwrap();
    write_inputs(dir.path());
    let config = load(
        dir.path(),
        r#"
input = "obs.csv"
summary = "out/summary.json"

[flagger]
output = "out/extreme.csv"

[window]
output = "out/wdav.csv"
value_column = "ntl"
pixel_size = 1.0

[normalizer]
output = "out/normalized.csv"
value_column = "ntl"

[admin]
polygons = "halves.geojson"
output = "out/admin.csv"
"#,
    );

    let summary = run_pipeline(&config).unwrap();

    let codes: Vec<&str> = summary.stages.iter().map(|s| s.code).collect();
    assert_eq!(
        codes,
        vec![
            "extreme_flagger",
            "window_averager",
            "composite_normalizer",
            "admin_join"
        ]
    );
    assert_eq!(summary.final_rows, 4);
    assert_eq!(summary.input_blake3.len(), 64);
    assert!(summary.stages.iter().all(|s| s.rows_in == 4 && s.rows_out == 4));

    for name in ["extreme.csv", "wdav.csv", "normalized.csv", "admin.csv", "summary.json"] {
        assert!(dir.path().join("out").join(name).exists(), "{name} missing");
    }

    let admin = read_table(&dir.path().join("out/admin.csv")).unwrap();
    for column in ["is_extreme", "ntl_fix", "ntl_33", "pixel_id", "A", "name"] {
        assert!(admin.column(column).is_ok(), "{column} missing");
    }
    let names = admin.column("name").unwrap().str().unwrap();
    assert_eq!(names.get(0), Some("West"));
    assert_eq!(names.get(3), Some("East"));

    let smoothed = admin.column("ntl_33").unwrap().f64().unwrap();
    // cell (0, 0) on 2020-01-01 holds 2.0, its neighbour (1, 0) holds 6.0
    assert_eq!(smoothed.get(0), Some(4.0));
    assert_eq!(smoothed.get(1), Some(3.0));

    let written: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("out/summary.json")).unwrap())
            .unwrap();
    assert_eq!(written["final_rows"], 4);
    assert_eq!(written["stages"][0]["details"]["pixels"], 2);
}

#[test]
fn failing_stage_keeps_earlier_outputs_only() {
    let dir = tempfile::tempdir().unwrap();
    write_inputs(dir.path());
    let config = load(
        dir.path(),
        r#"
input = "obs.csv"

[flagger]
enabled = false

[window]
output = "out/wdav.csv"
value_column = "ntl"

[normalizer]
output = "out/normalized.csv"
value_column = "ntl"
"#,
    );

    let err = run_pipeline(&config).unwrap_err();

    assert!(matches!(err, PipelineError::CompositeNormalizer(_)));
    assert!(err.to_string().contains("is_extreme"));
    assert!(dir.path().join("out/wdav.csv").exists());
    assert!(!dir.path().join("out/normalized.csv").exists());
}

#[test]
fn missing_input_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = load(dir.path(), "input = \"absent.csv\"\n");

    assert!(matches!(
        run_pipeline(&config),
        Err(PipelineError::Io { .. })
    ));
}
