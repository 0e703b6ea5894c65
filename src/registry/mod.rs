//! Ward/village registry
//!
//! Static reference data: administrative units with their boundaries and
//! program participation flags, loaded once from official GeoJSON sources.

pub mod program;

use log::{info, warn};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::util::safe_read_to_string;
use crate::error::{Result, StudyError};
use crate::geometry::polygon_from_geojson;
use crate::models::{AdministrativeUnit, ProgramLocationType, UnitId};

pub use program::{ProgramList, ProgramLocation, ProgramMatchReport};

/// Property names read from registry features
const UNIT_ID_PROPERTY: &str = "unit_id";
const VILLAGE_PROPERTY: &str = "village_name";
const WARD_PROPERTY: &str = "ward_name";
const DISTRICT_PROPERTY: &str = "dist_name";
const REGION_PROPERTY: &str = "reg_name";
const TREATMENT_PROPERTY: &str = "is_treatment";

/// Administrative units indexed by identifier
#[derive(Debug, Clone, Default)]
pub struct Registry {
    units: BTreeMap<UnitId, AdministrativeUnit>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from units, rejecting duplicate identifiers
    pub fn from_units(units: impl IntoIterator<Item = AdministrativeUnit>) -> Result<Self> {
        let mut registry = Self::new();
        for unit in units {
            registry.insert(unit)?;
        }
        Ok(registry)
    }

    /// Load a GeoJSON `FeatureCollection` file
    pub fn load_geojson(path: &Path) -> Result<Self> {
        let text = safe_read_to_string(path, "ward/village registry")?;
        let value: Value = serde_json::from_str(&text)?;
        let registry = Self::from_feature_collection(&value)?;
        info!(
            "Loaded {} administrative units ({} treated) from {}",
            registry.len(),
            registry.treated_count(),
            path.display()
        );
        Ok(registry)
    }

    /// Build a registry from a parsed GeoJSON `FeatureCollection`
    ///
    /// Features without an identifier are skipped with a warning. A feature
    /// whose geometry cannot be parsed keeps no boundary; the extractor will
    /// then report it as missing geometry.
    pub fn from_feature_collection(collection: &Value) -> Result<Self> {
        let features = collection
            .get("features")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                StudyError::ValidationError("registry is not a GeoJSON FeatureCollection".into())
            })?;

        let mut registry = Self::new();
        for (idx, feature) in features.iter().enumerate() {
            let properties = feature.get("properties").unwrap_or(&Value::Null);
            let Some(id) = string_property(properties, UNIT_ID_PROPERTY) else {
                warn!("Registry feature {idx} has no {UNIT_ID_PROPERTY}, skipping");
                continue;
            };

            let mut unit = AdministrativeUnit::new(
                id.as_str(),
                &string_property(properties, VILLAGE_PROPERTY).unwrap_or_default(),
                &string_property(properties, WARD_PROPERTY).unwrap_or_default(),
            )
            .with_district(&string_property(properties, DISTRICT_PROPERTY).unwrap_or_default())
            .with_region(&string_property(properties, REGION_PROPERTY).unwrap_or_default());

            if properties
                .get(TREATMENT_PROPERTY)
                .is_some_and(crate::labeling::is_truthy_value)
            {
                unit = unit.treated();
            }

            match feature.get("geometry") {
                Some(Value::Null) | None => {}
                Some(geometry) => match polygon_from_geojson(geometry) {
                    Ok(polygon) => unit = unit.with_boundary(polygon),
                    Err(e) => warn!("Unit {id}: unreadable geometry ({e})"),
                },
            }

            registry.insert(unit)?;
        }
        Ok(registry)
    }

    /// Add a unit; identifiers must be unique
    pub fn insert(&mut self, unit: AdministrativeUnit) -> Result<()> {
        if self.units.contains_key(&unit.id) {
            return Err(StudyError::ValidationError(format!(
                "duplicate unit identifier {}",
                unit.id
            )));
        }
        self.units.insert(unit.id.clone(), unit);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, id: &UnitId) -> Option<&AdministrativeUnit> {
        self.units.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &UnitId) -> Option<&mut AdministrativeUnit> {
        self.units.get_mut(id)
    }

    /// Units in identifier order
    pub fn units(&self) -> impl Iterator<Item = &AdministrativeUnit> {
        self.units.values()
    }

    /// Treatment flag per unit
    #[must_use]
    pub fn treatment_flags(&self) -> BTreeMap<UnitId, bool> {
        self.units
            .values()
            .map(|unit| (unit.id.clone(), unit.is_treatment))
            .collect()
    }

    /// Treated villages of a ward, compared on the trimmed upper-case name
    #[must_use]
    pub fn treated_villages_in_ward(&self, ward_name: &str) -> Vec<&AdministrativeUnit> {
        let ward = ward_name.trim().to_uppercase();
        self.units
            .values()
            .filter(|unit| unit.is_treatment && unit.ward_name.trim().to_uppercase() == ward)
            .collect()
    }

    #[must_use]
    pub fn treated_count(&self) -> usize {
        self.units.values().filter(|unit| unit.is_treatment).count()
    }

    /// Number of units per program location type
    #[must_use]
    pub fn count_by_location_type(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for unit in self.units.values() {
            let label = match unit.location_type {
                ProgramLocationType::Treatment => "treatment",
                ProgramLocationType::ProgramControl => "program_control",
                ProgramLocationType::None => "none",
            };
            *counts.entry(label.to_string()).or_insert(0) += 1;
        }
        counts
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

fn string_property(properties: &Value, name: &str) -> Option<String> {
    match properties.get(name)? {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
