//! GeoJSON file backed label store
//!
//! Every call reads the file again; writes replace the whole file through a
//! temp file and rename.

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde_json::{Map, Value, json};
use std::path::{Path, PathBuf};

use super::{Annotation, LabelLoad, LabelStore, SkippedLabel, is_truthy_value};
use crate::error::util::{safe_read_to_string, write_atomically};
use crate::error::{Result, StudyError};
use crate::geometry::{polygon_from_geojson, polygon_from_geojson_str, polygon_to_geojson};
use crate::models::village_ward_key;

/// Label store kept in a single GeoJSON `FeatureCollection`
#[derive(Debug, Clone)]
pub struct FileLabelStore {
    path: PathBuf,
}

impl FileLabelStore {
    /// Open a store; the file is created on first save
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_features(&self) -> Result<Vec<Value>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let text = safe_read_to_string(&self.path, "treatment labels")?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let collection: Value = serde_json::from_str(&text)?;
        collection
            .get("features")
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| {
                StudyError::ValidationError(format!(
                    "{} is not a GeoJSON FeatureCollection",
                    self.path.display()
                ))
            })
    }

    fn write_features(&self, features: Vec<Value>) -> Result<()> {
        let collection = json!({
            "type": "FeatureCollection",
            "features": features,
        });
        write_atomically(&self.path, serde_json::to_string_pretty(&collection)?.as_bytes())
    }
}

impl LabelStore for FileLabelStore {
    fn load_all(&self) -> Result<LabelLoad> {
        let mut load = LabelLoad::default();
        for (row, feature) in self.read_features()?.iter().enumerate() {
            match annotation_from_feature(feature) {
                Ok(annotation) => load.annotations.push(annotation),
                Err(e) => {
                    let village_name = feature
                        .pointer("/properties/village_name")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    warn!("Label row {row}: skipping ({e})");
                    load.skipped.push(SkippedLabel {
                        row,
                        village_name,
                        reason: e.to_string(),
                    });
                }
            }
        }
        debug!(
            "Read {} labels from {} ({} skipped)",
            load.annotations.len(),
            self.path.display(),
            load.skipped.len()
        );
        Ok(load)
    }

    fn save(&self, annotation: &Annotation) -> Result<()> {
        let mut features = self.read_features()?;
        let key = annotation.key();
        if features.iter().any(|feature| feature_key(feature).as_deref() == Some(key.as_str())) {
            return Err(StudyError::ValidationError(format!(
                "village {} in ward {} is already labelled",
                annotation.village_name, annotation.ward_name
            )));
        }
        features.push(annotation_to_feature(annotation));
        self.write_features(features)
    }

    fn delete(&self, village_name: &str, ward_name: &str) -> Result<bool> {
        let features = self.read_features()?;
        let key = village_ward_key(village_name, ward_name);
        let before = features.len();
        let kept: Vec<Value> = features
            .into_iter()
            .filter(|feature| feature_key(feature).as_deref() != Some(key.as_str()))
            .collect();
        let removed = kept.len() != before;
        if removed {
            self.write_features(kept)?;
        }
        Ok(removed)
    }
}

fn feature_key(feature: &Value) -> Option<String> {
    let village = feature.pointer("/properties/village_name")?.as_str()?;
    let ward = feature.pointer("/properties/ward_name")?.as_str()?;
    Some(village_ward_key(village, ward))
}

fn annotation_to_feature(annotation: &Annotation) -> Value {
    let mut properties = Map::new();
    properties.insert("village_name".into(), json!(annotation.village_name));
    properties.insert("ward_name".into(), json!(annotation.ward_name));
    properties.insert("is_treatment".into(), json!(annotation.is_treatment));
    if let Some(notes) = &annotation.notes {
        properties.insert("notes".into(), json!(notes));
    }
    let labelled_at = annotation.labelled_at.unwrap_or_else(Utc::now);
    properties.insert("labelled_at".into(), json!(labelled_at.to_rfc3339()));

    json!({
        "type": "Feature",
        "properties": properties,
        "geometry": polygon_to_geojson(&annotation.geometry),
    })
}

fn annotation_from_feature(feature: &Value) -> Result<Annotation> {
    let properties = feature
        .get("properties")
        .ok_or_else(|| StudyError::ValidationError("feature has no properties".into()))?;
    let text = |name: &str| -> Result<String> {
        properties
            .get(name)
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| StudyError::ValidationError(format!("missing {name}")))
    };

    let geometry = match feature.get("geometry") {
        None | Some(Value::Null) => {
            return Err(StudyError::GeometryError("empty geometry".into()));
        }
        Some(Value::String(s)) if s.trim().is_empty() || s.trim() == "nan" => {
            return Err(StudyError::GeometryError("empty geometry".into()));
        }
        // Spreadsheet exports store the geometry as a JSON string
        Some(Value::String(s)) => polygon_from_geojson_str(s)?,
        Some(geometry) => polygon_from_geojson(geometry)?,
    };

    Ok(Annotation {
        village_name: text("village_name")?,
        ward_name: text("ward_name")?,
        geometry,
        is_treatment: properties.get("is_treatment").is_some_and(is_truthy_value),
        notes: properties
            .get("notes")
            .and_then(Value::as_str)
            .map(str::to_string),
        labelled_at: properties
            .get("labelled_at")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
    })
}
