use geojson::{Feature, GeoJson, JsonObject, Value as GeoJsonValue};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::columns::float_values;
use crate::schema::{require_columns, SchemaError, LAT, LON};

const STAGE: &str = "admin_join";
const EDGE_TOLERANCE: f64 = 1e-12;

#[derive(Debug, Error)]
pub enum AdminJoinError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("polars operation failed: {0}")]
    Polars(#[from] PolarsError),
    #[error("polygon layer is not valid GeoJSON: {0}")]
    GeoJson(#[from] geojson::Error),
    #[error("join mismatch: {0}")]
    JoinMismatch(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminJoinConfig {
    pub lon_column: String,
    pub lat_column: String,
    /// Feature property holding the administrative name.
    pub admin_field: String,
    /// Name of the label column in the output; defaults to `admin_field`.
    pub output_field: Option<String>,
}

impl Default for AdminJoinConfig {
    fn default() -> Self {
        Self {
            lon_column: LON.to_string(),
            lat_column: LAT.to_string(),
            admin_field: "name".to_string(),
            output_field: None,
        }
    }
}

impl AdminJoinConfig {
    pub fn label_column(&self) -> &str {
        self.output_field.as_deref().unwrap_or(&self.admin_field)
    }
}

type Ring = Vec<(f64, f64)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RingPosition {
    Inside,
    Boundary,
    Outside,
}

/// A polygon with optional holes, in lon/lat degrees.
#[derive(Debug, Clone, PartialEq)]
pub struct PolygonPart {
    exterior: Ring,
    holes: Vec<Ring>,
}

impl PolygonPart {
    pub fn new(exterior: Vec<(f64, f64)>, holes: Vec<Vec<(f64, f64)>>) -> Self {
        Self { exterior, holes }
    }

    /// Edges count as inside, for the exterior ring and for holes alike.
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        match locate_in_ring(&self.exterior, lon, lat) {
            RingPosition::Outside => false,
            RingPosition::Boundary => true,
            RingPosition::Inside => self
                .holes
                .iter()
                .all(|hole| locate_in_ring(hole, lon, lat) != RingPosition::Inside),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct BoundingBox {
    west: f64,
    south: f64,
    east: f64,
    north: f64,
}

impl BoundingBox {
    fn around<'a>(points: impl Iterator<Item = &'a (f64, f64)>) -> Self {
        let mut bbox = Self {
            west: f64::MAX,
            south: f64::MAX,
            east: f64::MIN,
            north: f64::MIN,
        };
        for (lon, lat) in points {
            bbox.west = bbox.west.min(*lon);
            bbox.east = bbox.east.max(*lon);
            bbox.south = bbox.south.min(*lat);
            bbox.north = bbox.north.max(*lat);
        }
        bbox
    }

    fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.west && lon <= self.east && lat >= self.south && lat <= self.north
    }
}

/// One administrative unit: a label and the polygon parts that make it up.
#[derive(Debug, Clone, PartialEq)]
pub struct AdminPolygon {
    pub label: Option<String>,
    parts: Vec<PolygonPart>,
    bbox: BoundingBox,
}

impl AdminPolygon {
    pub fn new(label: Option<String>, parts: Vec<PolygonPart>) -> Self {
        let bbox = BoundingBox::around(parts.iter().flat_map(|part| part.exterior.iter()));
        Self { label, parts, bbox }
    }

    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        self.bbox.contains(lon, lat) && self.parts.iter().any(|part| part.contains(lon, lat))
    }
}

/// Parses a GeoJSON FeatureCollection (or single Feature) of Polygon /
/// MultiPolygon features, labelling each with its `admin_field` property.
/// The layer is rejected only when no feature carries that property.
pub fn load_admin_polygons(
    geojson_text: &str,
    admin_field: &str,
) -> Result<Vec<AdminPolygon>, AdminJoinError> {
    let geojson = geojson_text.parse::<GeoJson>()?;

    let (features, foreign_members) = match geojson {
        GeoJson::FeatureCollection(collection) => {
            (collection.features, collection.foreign_members)
        }
        GeoJson::Feature(feature) => {
            let foreign_members = feature.foreign_members.clone();
            (vec![feature], foreign_members)
        }
        GeoJson::Geometry(_) => {
            return Err(AdminJoinError::JoinMismatch(
                "polygon layer must be a Feature or FeatureCollection carrying properties"
                    .to_string(),
            ))
        }
    };

    check_crs(foreign_members.as_ref())?;

    let field_present = features.iter().any(|feature| carries_field(feature, admin_field));
    if !features.is_empty() && !field_present {
        return Err(AdminJoinError::JoinMismatch(format!(
            "field '{admin_field}' not found in polygon layer"
        )));
    }

    let mut polygons = Vec::with_capacity(features.len());
    for (index, feature) in features.iter().enumerate() {
        let label = feature_label(feature, admin_field);
        let Some(geometry) = feature.geometry.as_ref() else {
            warn!(feature = index, "skipping feature without geometry");
            continue;
        };
        let parts = match &geometry.value {
            GeoJsonValue::Polygon(rings) => vec![polygon_part(rings)],
            GeoJsonValue::MultiPolygon(polygons) => {
                polygons.iter().map(|rings| polygon_part(rings)).collect()
            }
            other => {
                warn!(
                    feature = index,
                    geometry = geometry_kind(other),
                    "skipping non-polygon feature"
                );
                continue;
            }
        };
        polygons.push(AdminPolygon::new(label, parts));
    }

    Ok(polygons)
}

/// Left-joins the label of the first polygon containing each point.
/// Points outside every polygon, or without coordinates, get no label.
pub fn join_admin_labels(
    points: &DataFrame,
    polygons: &[AdminPolygon],
    config: &AdminJoinConfig,
) -> Result<DataFrame, AdminJoinError> {
    require_columns(
        points,
        STAGE,
        &[config.lon_column.as_str(), config.lat_column.as_str()],
    )?;

    let lon = float_values(points, &config.lon_column)?;
    let lat = float_values(points, &config.lat_column)?;

    let labels: Vec<Option<&str>> = lon
        .iter()
        .zip(&lat)
        .map(|(lon, lat)| match (lon, lat) {
            (Some(lon), Some(lat)) => polygons
                .iter()
                .find(|polygon| polygon.contains(*lon, *lat))
                .and_then(|polygon| polygon.label.as_deref()),
            _ => None,
        })
        .collect();

    let matched = labels.iter().filter(|label| label.is_some()).count();

    let mut output = points.clone();
    output.with_column(Series::new(config.label_column().into(), labels))?;

    info!(
        rows = output.height(),
        polygons = polygons.len(),
        matched,
        "joined administrative labels"
    );

    Ok(output)
}

fn check_crs(foreign_members: Option<&JsonObject>) -> Result<(), AdminJoinError> {
    let Some(crs) = foreign_members.and_then(|members| members.get("crs")) else {
        warn!("polygon layer has no CRS; assuming EPSG:4326");
        return Ok(());
    };

    let name = crs
        .get("properties")
        .and_then(|properties| properties.get("name"))
        .and_then(Value::as_str)
        .unwrap_or_default();

    let upper = name.to_ascii_uppercase();
    if upper.ends_with("CRS84") || upper.ends_with(":4326") {
        Ok(())
    } else {
        Err(AdminJoinError::JoinMismatch(format!(
            "polygon layer CRS '{name}' is not EPSG:4326; reproject it before joining"
        )))
    }
}

fn geometry_kind(value: &GeoJsonValue) -> &'static str {
    match value {
        GeoJsonValue::Point(_) => "Point",
        GeoJsonValue::MultiPoint(_) => "MultiPoint",
        GeoJsonValue::LineString(_) => "LineString",
        GeoJsonValue::MultiLineString(_) => "MultiLineString",
        GeoJsonValue::Polygon(_) => "Polygon",
        GeoJsonValue::MultiPolygon(_) => "MultiPolygon",
        GeoJsonValue::GeometryCollection(_) => "GeometryCollection",
    }
}

fn carries_field(feature: &Feature, admin_field: &str) -> bool {
    feature
        .properties
        .as_ref()
        .is_some_and(|properties| properties.contains_key(admin_field))
}

// A feature without the property, or with a null value, stays unlabeled.
fn feature_label(feature: &Feature, admin_field: &str) -> Option<String> {
    let value = feature.properties.as_ref()?.get(admin_field)?;
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

fn polygon_part(rings: &[Vec<Vec<f64>>]) -> PolygonPart {
    let mut rings = rings.iter().map(|ring| {
        ring.iter()
            .filter(|position| position.len() >= 2)
            .map(|position| (position[0], position[1]))
            .collect::<Ring>()
    });
    let exterior = rings.next().unwrap_or_default();
    PolygonPart::new(exterior, rings.collect())
}

fn locate_in_ring(ring: &[(f64, f64)], x: f64, y: f64) -> RingPosition {
    let n = ring.len();
    if n < 3 {
        return RingPosition::Outside;
    }

    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = ring[i];
        let (xj, yj) = ring[j];

        if on_segment((x, y), (xj, yj), (xi, yi)) {
            return RingPosition::Boundary;
        }
        if ((yi > y) != (yj > y)) && (x < (xj - xi) * (y - yi) / (yj - yi) + xi) {
            inside = !inside;
        }
        j = i;
    }

    if inside {
        RingPosition::Inside
    } else {
        RingPosition::Outside
    }
}

fn on_segment(p: (f64, f64), a: (f64, f64), b: (f64, f64)) -> bool {
    let cross = (b.0 - a.0) * (p.1 - a.1) - (b.1 - a.1) * (p.0 - a.0);
    let scale = (b.0 - a.0).abs().max((b.1 - a.1).abs()).max(1.0);
    if cross.abs() > EDGE_TOLERANCE * scale {
        return false;
    }
    p.0 >= a.0.min(b.0) - EDGE_TOLERANCE
        && p.0 <= a.0.max(b.0) + EDGE_TOLERANCE
        && p.1 >= a.1.min(b.1) - EDGE_TOLERANCE
        && p.1 <= a.1.max(b.1) + EDGE_TOLERANCE
}
