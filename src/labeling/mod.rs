//! Treatment labeling store
//!
//! Village boundary labels collected by the labeling app. The store is
//! accessed through explicit request/response calls; nothing is cached
//! between calls so concurrent labellers always see the stored state.

pub mod file_store;
pub mod progress;

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::geometry::Polygon;
use crate::models::village_ward_key;
use crate::registry::Registry;

pub use file_store::FileLabelStore;
pub use progress::{LabelProgress, ProgressRow};

/// A labelled village boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub village_name: String,
    pub ward_name: String,
    pub geometry: Polygon,
    pub is_treatment: bool,
    pub notes: Option<String>,
    pub labelled_at: Option<DateTime<Utc>>,
}

impl Annotation {
    #[must_use]
    pub fn new(village_name: &str, ward_name: &str, geometry: Polygon, is_treatment: bool) -> Self {
        Self {
            village_name: village_name.to_string(),
            ward_name: ward_name.to_string(),
            geometry,
            is_treatment,
            notes: None,
            labelled_at: None,
        }
    }

    #[must_use]
    pub fn key(&self) -> String {
        village_ward_key(&self.village_name, &self.ward_name)
    }
}

/// A stored row that could not be turned into an [`Annotation`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedLabel {
    /// Position of the row in the store
    pub row: usize,
    pub village_name: Option<String>,
    pub reason: String,
}

/// Result of reading every label
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelLoad {
    pub annotations: Vec<Annotation>,
    pub skipped: Vec<SkippedLabel>,
}

/// Outcome of applying labels to the registry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelApplyReport {
    pub applied: usize,
    /// `VILLAGE||WARD` keys of labels with no registry unit
    pub unmatched: Vec<String>,
}

/// Persistent store of labels
pub trait LabelStore {
    /// Read every stored label
    fn load_all(&self) -> Result<LabelLoad>;

    /// Store a new label; a village already labelled in the same ward is rejected
    fn save(&self, annotation: &Annotation) -> Result<()>;

    /// Remove the label of a village, returning whether one existed
    fn delete(&self, village_name: &str, ward_name: &str) -> Result<bool>;

    /// Whether the village already has a label
    fn is_mapped(&self, village_name: &str, ward_name: &str) -> Result<bool> {
        let key = village_ward_key(village_name, ward_name);
        Ok(self.load_all()?.annotations.iter().any(|a| a.key() == key))
    }
}

/// Interpret spreadsheet-style truthy flags (`TRUE`, `YES`, `1`, `T`)
#[must_use]
pub fn is_truthy(text: &str) -> bool {
    matches!(text.trim().to_uppercase().as_str(), "TRUE" | "YES" | "1" | "T")
}

/// Interpret a JSON flag that may be a bool, number or truthy string
#[must_use]
pub fn is_truthy_value(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|v| v == 1.0),
        Value::String(s) => is_truthy(s),
        _ => false,
    }
}

/// Copy label boundaries and treatment flags onto matching registry units
///
/// Labels are joined on the normalised `VILLAGE||WARD` key.
pub fn apply_labels(registry: &mut Registry, annotations: &[Annotation]) -> LabelApplyReport {
    let mut report = LabelApplyReport::default();

    for annotation in annotations {
        let key = annotation.key();
        let id = registry
            .units()
            .find(|unit| unit.village_ward_key() == key)
            .map(|unit| unit.id.clone());

        match id.and_then(|id| registry.get_mut(&id)) {
            Some(unit) => {
                unit.boundary = Some(annotation.geometry.clone());
                if annotation.is_treatment {
                    unit.is_treatment = true;
                    unit.location_type = crate::models::ProgramLocationType::Treatment;
                }
                report.applied += 1;
            }
            None => {
                warn!("Label for {key} matches no registry unit");
                report.unmatched.push(key);
            }
        }
    }

    info!(
        "Applied {} labels to the registry ({} unmatched)",
        report.applied,
        report.unmatched.len()
    );
    report
}
