//! Administrative units (villages) and their identifiers

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::geometry::Polygon;

/// Identifier of an administrative unit
///
/// Ordering is lexicographic and is used as the deterministic tie-break
/// throughout matching.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(String);

impl UnitId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UnitId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for UnitId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Role of a ward in the evaluated program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgramLocationType {
    /// Enrolled in the program
    Treatment,
    /// Listed by the program as a comparison location
    ProgramControl,
    /// Not named by the program; still a candidate control
    #[default]
    None,
}

/// A village with its administrative hierarchy, boundary and treatment flag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdministrativeUnit {
    pub id: UnitId,
    pub village_name: String,
    pub ward_name: String,
    pub district: String,
    pub region: String,
    /// Boundary polygon; absent until labelled or loaded from official sources
    pub boundary: Option<Polygon>,
    pub is_treatment: bool,
    pub location_type: ProgramLocationType,
}

impl AdministrativeUnit {
    /// Create a unit with no boundary that is not treated
    #[must_use]
    pub fn new(id: impl Into<UnitId>, village_name: &str, ward_name: &str) -> Self {
        Self {
            id: id.into(),
            village_name: village_name.to_string(),
            ward_name: ward_name.to_string(),
            district: String::new(),
            region: String::new(),
            boundary: None,
            is_treatment: false,
            location_type: ProgramLocationType::None,
        }
    }

    #[must_use]
    pub fn with_district(mut self, district: &str) -> Self {
        self.district = district.to_string();
        self
    }

    #[must_use]
    pub fn with_region(mut self, region: &str) -> Self {
        self.region = region.to_string();
        self
    }

    #[must_use]
    pub fn with_boundary(mut self, boundary: Polygon) -> Self {
        self.boundary = Some(boundary);
        self
    }

    /// Mark the unit as treated (also sets the program location type)
    #[must_use]
    pub const fn treated(mut self) -> Self {
        self.is_treatment = true;
        self.location_type = ProgramLocationType::Treatment;
        self
    }

    /// Key used to join program lists to the registry
    #[must_use]
    pub fn ward_district_key(&self) -> String {
        ward_district_key(&self.ward_name, &self.district)
    }

    /// Key used to join labels to the registry
    #[must_use]
    pub fn village_ward_key(&self) -> String {
        village_ward_key(&self.village_name, &self.ward_name)
    }
}

/// Normalised `WARD||DISTRICT` key
#[must_use]
pub fn ward_district_key(ward: &str, district: &str) -> String {
    format!(
        "{}||{}",
        ward.trim().to_uppercase(),
        district.trim().to_uppercase()
    )
}

/// Normalised `VILLAGE||WARD` key
#[must_use]
pub fn village_ward_key(village: &str, ward: &str) -> String {
    format!(
        "{}||{}",
        village.trim().to_uppercase(),
        ward.trim().to_uppercase()
    )
}
