//! Program participation lists
//!
//! The program names its treatment and comparison locations as ward/district
//! pairs. They are joined to the registry on the normalised `WARD||DISTRICT`
//! key; pairs that match nothing are reported so spelling differences can be
//! fixed at the source.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

use super::Registry;
use crate::error::Result;
use crate::error::util::safe_read_to_string;
use crate::models::{ProgramLocationType, ward_district_key};

/// A ward named by the program
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramLocation {
    pub ward: String,
    pub district: String,
}

impl ProgramLocation {
    #[must_use]
    pub fn new(ward: &str, district: &str) -> Self {
        Self {
            ward: ward.to_string(),
            district: district.to_string(),
        }
    }

    #[must_use]
    pub fn key(&self) -> String {
        ward_district_key(&self.ward, &self.district)
    }
}

/// Treatment and comparison wards named by the program
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramList {
    #[serde(default)]
    pub treatment: Vec<ProgramLocation>,
    #[serde(default)]
    pub control: Vec<ProgramLocation>,
}

/// Outcome of joining a program list to the registry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramMatchReport {
    /// Units flagged as treated
    pub treated_units: usize,
    /// Units flagged as program controls
    pub control_units: usize,
    /// Treatment `WARD||DISTRICT` keys with no registry unit
    pub treatment_missing: Vec<String>,
    /// Control `WARD||DISTRICT` keys with no registry unit
    pub control_missing: Vec<String>,
}

impl ProgramList {
    /// Load a program list from JSON
    pub fn load(path: &Path) -> Result<Self> {
        let text = safe_read_to_string(path, "program location list")?;
        Ok(serde_json::from_str(&text)?)
    }
}

impl Registry {
    /// Flag units by program participation
    ///
    /// Treatment takes precedence when a ward appears in both lists.
    pub fn apply_program(&mut self, program: &ProgramList) -> ProgramMatchReport {
        let treatment_keys: BTreeSet<String> = program.treatment.iter().map(ProgramLocation::key).collect();
        let control_keys: BTreeSet<String> = program.control.iter().map(ProgramLocation::key).collect();

        let mut seen = BTreeSet::new();
        let mut report = ProgramMatchReport::default();

        let ids: Vec<_> = self.units().map(|unit| unit.id.clone()).collect();
        for id in ids {
            let Some(unit) = self.get_mut(&id) else { continue };
            let key = unit.ward_district_key();
            if treatment_keys.contains(&key) {
                unit.is_treatment = true;
                unit.location_type = ProgramLocationType::Treatment;
                report.treated_units += 1;
                seen.insert(key);
            } else if control_keys.contains(&key) {
                unit.is_treatment = false;
                unit.location_type = ProgramLocationType::ProgramControl;
                report.control_units += 1;
                seen.insert(key);
            }
        }

        report.treatment_missing = treatment_keys.difference(&seen).cloned().collect();
        report.control_missing = control_keys
            .iter()
            .filter(|key| !seen.contains(*key) && !treatment_keys.contains(*key))
            .cloned()
            .collect();

        for key in report.treatment_missing.iter().chain(&report.control_missing) {
            warn!("Program location {key} matches no registry unit");
        }
        info!(
            "Program flags applied: {} treated units, {} program control units",
            report.treated_units, report.control_units
        );

        report
    }
}
