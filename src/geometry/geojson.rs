//! Conversion between GeoJSON geometry objects and [`Polygon`]

use serde_json::{Value, json};

use super::polygon::{Point, Polygon};
use crate::error::{Result, StudyError};

/// Parse a GeoJSON `Polygon` or `MultiPolygon` geometry into its first outer ring
///
/// Holes and additional polygons are ignored; village boundaries are single
/// parts in practice.
pub fn polygon_from_geojson(geometry: &Value) -> Result<Polygon> {
    let kind = geometry
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| StudyError::GeometryError("geometry has no type".to_string()))?;
    let coordinates = geometry
        .get("coordinates")
        .ok_or_else(|| StudyError::GeometryError("geometry has no coordinates".to_string()))?;

    let ring = match kind {
        "Polygon" => coordinates.get(0),
        "MultiPolygon" => coordinates.get(0).and_then(|polygon| polygon.get(0)),
        other => {
            return Err(StudyError::GeometryError(format!(
                "unsupported geometry type {other}"
            )));
        }
    }
    .and_then(Value::as_array)
    .ok_or_else(|| StudyError::GeometryError(format!("{kind} has no outer ring")))?;

    let points = ring
        .iter()
        .map(parse_position)
        .collect::<Result<Vec<_>>>()?;

    Ok(Polygon::new(points))
}

/// Parse a geometry that may be stored as a JSON string (as spreadsheet exports do)
pub fn polygon_from_geojson_str(text: &str) -> Result<Polygon> {
    let value: Value = serde_json::from_str(text)?;
    polygon_from_geojson(&value)
}

/// Render a polygon as a closed GeoJSON `Polygon` geometry
#[must_use]
pub fn polygon_to_geojson(polygon: &Polygon) -> Value {
    let mut ring: Vec<[f64; 2]> = polygon.exterior().iter().map(|p| [p.x, p.y]).collect();
    if let Some(first) = ring.first().copied() {
        ring.push(first);
    }
    json!({
        "type": "Polygon",
        "coordinates": [ring],
    })
}

fn parse_position(position: &Value) -> Result<Point> {
    let pair = position
        .as_array()
        .filter(|values| values.len() >= 2)
        .ok_or_else(|| StudyError::GeometryError(format!("invalid position {position}")))?;
    let x = pair[0]
        .as_f64()
        .ok_or_else(|| StudyError::GeometryError(format!("invalid x in {position}")))?;
    let y = pair[1]
        .as_f64()
        .ok_or_else(|| StudyError::GeometryError(format!("invalid y in {position}")))?;
    Ok(Point::new(x, y))
}
