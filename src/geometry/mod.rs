//! Village boundary geometry: polygon validation and GeoJSON conversion

pub mod geojson;
pub mod polygon;

pub use geojson::{polygon_from_geojson, polygon_from_geojson_str, polygon_to_geojson};
pub use polygon::{BoundingBox, GeometryIssue, Point, Polygon};
