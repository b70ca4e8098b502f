use ntl_core::window_averager::{
    window_mean, GridCell, TemporalGrouping, WindowAveragerError, WindowConfig,
};
use polars::prelude::*;

fn config(grouping: TemporalGrouping) -> WindowConfig {
    WindowConfig {
        value_column: "ntl".to_string(),
        pixel_size: 1.0,
        grouping,
    }
}

fn sample() -> DataFrame {
    df!(
        "date" => &["2020-01-01", "2020-01-01", "2020-01-01", "2020-01-02"],
        "lon" => &[0.5f64, 1.5, 5.5, 0.5],
        "lat" => &[0.5f64, 0.5, 5.5, 0.5],
        "ntl" => &[1.0f64, 3.0, 10.0, 7.0],
    )
    .unwrap()
}

fn smoothed(df: &DataFrame) -> Vec<Option<f64>> {
    df.column("ntl_33").unwrap().f64().unwrap().into_iter().collect()
}

#[test]
fn grid_cells_floor_coordinates() {
    assert_eq!(GridCell::assign(0.5, 0.5, 1.0), Some(GridCell { ix: 0, iy: 0 }));
    assert_eq!(
        GridCell::assign(-0.25, 1.75, 0.5),
        Some(GridCell { ix: -1, iy: 3 })
    );
    assert_eq!(GridCell { ix: -1, iy: 3 }.center(0.5), (-0.25, 1.75));
    assert_eq!(GridCell::assign(f64::INFINITY, 0.0, 1.0), None);
}

#[test]
fn neighbourhood_mean_stays_within_a_date() {
    let result = window_mean(&sample(), &config(TemporalGrouping::Auto)).unwrap();

    assert_eq!(
        smoothed(&result.dataframe),
        vec![Some(2.0), Some(2.0), Some(10.0), Some(7.0)]
    );
    assert!(result.summary.per_date);
    assert_eq!(result.summary.cells, 4);
}

#[test]
fn spatial_grouping_pools_all_dates() {
    let result = window_mean(&sample(), &config(TemporalGrouping::Spatial)).unwrap();

    // cell (0, 0) averages 1 and 7, then pools with its neighbour holding 3
    assert_eq!(
        smoothed(&result.dataframe),
        vec![Some(3.5), Some(3.5), Some(10.0), Some(3.5)]
    );
    assert!(!result.summary.per_date);
}

#[test]
fn auto_grouping_without_dates_is_spatial() {
    let df = sample().drop("date").unwrap();
    let result = window_mean(&df, &config(TemporalGrouping::Auto)).unwrap();

    assert!(!result.summary.per_date);
    assert_eq!(smoothed(&result.dataframe)[0], Some(3.5));
}

#[test]
fn per_date_grouping_requires_dates() {
    let df = sample().drop("date").unwrap();

    assert!(matches!(
        window_mean(&df, &config(TemporalGrouping::PerDate)),
        Err(WindowAveragerError::Schema(_))
    ));
}

#[test]
fn cell_indices_and_centers_are_emitted() {
    let result = window_mean(&sample(), &config(TemporalGrouping::Auto)).unwrap();
    let df = &result.dataframe;

    let ix = df.column("ix").unwrap().i64().unwrap();
    let iy = df.column("iy").unwrap().i64().unwrap();
    let lon_center = df.column("lon_center").unwrap().f64().unwrap();
    let lat_center = df.column("lat_center").unwrap().f64().unwrap();

    assert_eq!(ix.get(1), Some(1));
    assert_eq!(iy.get(2), Some(5));
    assert_eq!(lon_center.get(1), Some(1.5));
    assert_eq!(lat_center.get(2), Some(5.5));
}

#[test]
fn missing_values_and_coordinates() {
    let df = df!(
        "date" => &["2020-01-01", "2020-01-01", "2020-01-01"],
        "lon" => &[Some(0.5f64), Some(1.5), None],
        "lat" => &[Some(0.5f64), Some(0.5), Some(0.5)],
        "ntl" => &[None, Some(4.0f64), Some(9.0)],
    )
    .unwrap();

    let result = window_mean(&df, &config(TemporalGrouping::Auto)).unwrap();
    let out = &result.dataframe;

    assert_eq!(smoothed(out), vec![Some(4.0), Some(4.0), None]);
    assert_eq!(out.column("ix").unwrap().i64().unwrap().get(2), None);
    assert_eq!(result.summary.undefined_smoothed, 1);
}

#[test]
fn smoothed_column_follows_value_column() {
    let df = sample()
        .lazy()
        .with_column(col("ntl").alias("ntl_mis"))
        .collect()
        .unwrap();

    let result = window_mean(&df, &WindowConfig::default()).unwrap();
    assert!(result.dataframe.column("ntl_mis_33").is_ok());
}

#[test]
fn rejects_bad_pixel_size() {
    let bad_size = WindowConfig {
        pixel_size: 0.0,
        ..config(TemporalGrouping::Auto)
    };
    assert!(matches!(
        window_mean(&sample(), &bad_size),
        Err(WindowAveragerError::InvalidPixelSize(_))
    ));
}

#[test]
fn unparsed_dates_still_group_by_their_text() {
    let df = df!(
        "date" => &["2024-1-5", "2024-1-5 ", "2024-1-6", "2024-01-05"],
        "lon" => &[0.5f64, 1.5, 1.5, 0.5],
        "lat" => &[0.5f64, 0.5, 0.5, 0.5],
        "ntl" => &[1.0f64, 3.0, 20.0, 9.0],
    )
    .unwrap();

    let result = window_mean(&df, &config(TemporalGrouping::PerDate)).unwrap();

    assert_eq!(
        smoothed(&result.dataframe),
        vec![Some(2.0), Some(2.0), Some(20.0), Some(9.0)]
    );
}

#[test]
fn cell_indices_out_of_range_are_undefined() {
    assert_eq!(GridCell::assign(110.0, 0.0, 1e-20), None);
    assert_eq!(GridCell::assign(1e20, 0.0, 1.0 / 240.0), None);

    let df = df!(
        "lon" => &[1e20f64, 110.0],
        "lat" => &[0.0f64, 20.0],
        "ntl_mis" => &[1.0f64, 2.0],
    )
    .unwrap();
    let config = WindowConfig {
        grouping: TemporalGrouping::Spatial,
        ..WindowConfig::default()
    };

    let result = window_mean(&df, &config).unwrap();
    let out = &result.dataframe;

    assert_eq!(
        out.column("ntl_mis_33").unwrap().f64().unwrap().get(0),
        None
    );
    assert_eq!(out.column("ix").unwrap().i64().unwrap().get(0), None);
    assert_eq!(
        out.column("ntl_mis_33").unwrap().f64().unwrap().get(1),
        Some(2.0)
    );
}

#[test]
fn cells_near_the_index_limit_still_smooth() {
    let df = df!(
        "lon" => &[4.4e18f64, 4.4e18],
        "lat" => &[-4.4e18f64, -4.4e18],
        "ntl" => &[5.0f64, 7.0],
    )
    .unwrap();
    let config = WindowConfig {
        value_column: "ntl".to_string(),
        pixel_size: 0.5,
        grouping: TemporalGrouping::Spatial,
    };

    let result = window_mean(&df, &config).unwrap();
    assert!(result.dataframe.column("ix").unwrap().i64().unwrap().get(0).is_some());
    assert_eq!(smoothed(&result.dataframe), vec![Some(6.0), Some(6.0)]);
}

#[test]
fn uniform_field_smooths_to_its_value() {
    let size = 1.0 / 240.0;
    let value = 12.5;

    let mut lon = Vec::new();
    let mut lat = Vec::new();
    for i in 0..5 {
        for j in 0..5 {
            lon.push(110.0 + (i as f64 + 0.5) * size);
            lat.push(19.0 + (j as f64 + 0.5) * size);
        }
    }
    let cells = lon.len();
    let df = df!(
        "date" => vec!["2020-01-01"; cells],
        "lon" => lon,
        "lat" => lat,
        "ntl_mis" => vec![value; cells],
    )
    .unwrap();

    let result = window_mean(&df, &WindowConfig::default()).unwrap();

    assert_eq!(result.summary.cells, 25);
    let smoothed = result.dataframe.column("ntl_mis_33").unwrap().f64().unwrap();
    assert!(smoothed.into_iter().all(|v| v == Some(value)));
}

#[test]
fn grid_assignment_is_repeatable_at_default_size() {
    let size = 1.0 / 240.0;
    let first = GridCell::assign(110.35, 19.97, size).unwrap();
    let second = GridCell::assign(110.35, 19.97, size).unwrap();

    assert_eq!(first, second);
    assert_eq!(first, GridCell { ix: 26484, iy: 4792 });
}
