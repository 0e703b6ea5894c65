//! Labeling coverage of treatment villages
//!
//! Counts how many treated villages in the registry already carry a label,
//! overall and per ward and district, so labellers know where work remains.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fmt::Write as _;
use std::path::Path;

use super::Annotation;
use crate::error::Result;
use crate::error::util::write_atomically;
use crate::models::UnitId;
use crate::registry::Registry;
use crate::utils::io::escape_csv;

/// Coverage counts for one group of treated villages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRow {
    pub name: String,
    pub total: usize,
    pub mapped: usize,
    pub remaining: usize,
    /// Share mapped, in percent
    pub percent: f64,
}

impl ProgressRow {
    fn new(name: &str, total: usize, mapped: usize) -> Self {
        let percent = if total == 0 {
            0.0
        } else {
            100.0 * mapped as f64 / total as f64
        };
        Self {
            name: name.to_string(),
            total,
            mapped,
            remaining: total - mapped,
            percent,
        }
    }
}

/// Labeling progress over the treated villages of a registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelProgress {
    pub overall: ProgressRow,
    /// Most complete ward first
    pub wards: Vec<ProgressRow>,
    /// Districts in name order
    pub districts: Vec<ProgressRow>,
    /// Treated villages still without a label
    pub unmapped: Vec<UnitId>,
}

impl LabelProgress {
    /// Compare treated registry units against stored labels
    ///
    /// A village counts as mapped when a label shares its normalised
    /// `VILLAGE||WARD` key.
    #[must_use]
    pub fn compute(registry: &Registry, annotations: &[Annotation]) -> Self {
        let labelled: BTreeSet<String> = annotations.iter().map(Annotation::key).collect();

        let mut wards: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
        let mut districts: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
        let mut unmapped = Vec::new();
        let mut mapped_total = 0;
        let mut total = 0;

        for unit in registry.units().filter(|u| u.is_treatment) {
            let mapped = labelled.contains(&unit.village_ward_key());
            total += 1;
            if mapped {
                mapped_total += 1;
            } else {
                unmapped.push(unit.id.clone());
            }
            for (groups, name) in [
                (&mut wards, unit.ward_name.as_str()),
                (&mut districts, unit.district.as_str()),
            ] {
                let entry = groups.entry(name).or_default();
                entry.0 += 1;
                entry.1 += usize::from(mapped);
            }
        }

        let rows = |groups: BTreeMap<&str, (usize, usize)>| -> Vec<ProgressRow> {
            groups
                .into_iter()
                .map(|(name, (total, mapped))| ProgressRow::new(name, total, mapped))
                .collect()
        };
        let mut ward_rows = rows(wards);
        ward_rows.sort_by(|a, b| b.percent.total_cmp(&a.percent).then_with(|| a.name.cmp(&b.name)));

        Self {
            overall: ProgressRow::new("all", total, mapped_total),
            wards: ward_rows,
            districts: rows(districts),
            unmapped,
        }
    }

    #[must_use]
    pub fn ward(&self, name: &str) -> Option<&ProgressRow> {
        self.wards.iter().find(|row| row.name == name)
    }

    #[must_use]
    pub fn district(&self, name: &str) -> Option<&ProgressRow> {
        self.districts.iter().find(|row| row.name == name)
    }

    /// Write overall, ward and district rows to one CSV file
    pub fn write_to_csv(&self, path: &Path) -> Result<()> {
        let mut out = String::from("level,name,total,mapped,remaining,completion_pct\n");
        let overall = std::iter::once(("overall", &self.overall));
        let wards = self.wards.iter().map(|row| ("ward", row));
        let districts = self.districts.iter().map(|row| ("district", row));
        for (level, row) in overall.chain(wards).chain(districts) {
            let _ = writeln!(
                out,
                "{level},{},{},{},{},{:.1}",
                escape_csv(&row.name),
                row.total,
                row.mapped,
                row.remaining,
                row.percent
            );
        }
        write_atomically(path, out.as_bytes())
    }
}

impl fmt::Display for LabelProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Labeling progress: {}/{} treatment villages mapped ({:.1}%)",
            self.overall.mapped, self.overall.total, self.overall.percent
        )?;
        for row in self.wards.iter().filter(|row| row.remaining > 0) {
            writeln!(
                f,
                "- {}: {}/{} ({} remaining)",
                row.name, row.mapped, row.total, row.remaining
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Polygon;
    use crate::models::AdministrativeUnit;

    fn registry() -> Registry {
        let village = |id: &'static str, name: &str, ward: &str, district: &str| {
            AdministrativeUnit::new(id, name, ward)
                .with_district(district)
                .treated()
        };
        Registry::from_units(vec![
            village("V1", "Ruaha", "Mikumi", "Kilosa"),
            village("V2", "Ihanda", "Mikumi", "Kilosa"),
            village("V3", "Kitete", "Ulaya", "Kilosa"),
            village("V4", "Lupembe", "Mtimbira", "Ulanga"),
            AdministrativeUnit::new("C1", "Kidodi", "Mikumi").with_district("Kilosa"),
        ])
        .unwrap()
    }

    fn label(village: &str, ward: &str) -> Annotation {
        let square = Polygon::from_coords(&[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)]);
        Annotation::new(village, ward, square, true)
    }

    #[test]
    fn test_progress_by_ward_and_district() {
        let progress = LabelProgress::compute(
            &registry(),
            &[label("RUAHA", " mikumi"), label("Lupembe", "Mtimbira"), label("Kidodi", "Mikumi")],
        );

        assert_eq!(progress.overall.total, 4);
        assert_eq!(progress.overall.mapped, 2);
        assert!((progress.overall.percent - 50.0).abs() < 1e-9);

        let mikumi = progress.ward("Mikumi").unwrap();
        assert_eq!((mikumi.total, mikumi.mapped, mikumi.remaining), (2, 1, 1));
        assert_eq!(progress.wards[0].name, "Mtimbira");
        assert_eq!(progress.ward("Ulaya").unwrap().percent, 0.0);

        let kilosa = progress.district("Kilosa").unwrap();
        assert_eq!((kilosa.total, kilosa.mapped), (3, 1));
        assert_eq!(progress.district("Ulanga").unwrap().remaining, 0);

        let unmapped: Vec<_> = progress.unmapped.iter().map(UnitId::as_str).collect();
        assert_eq!(unmapped, vec!["V2", "V3"]);
    }

    #[test]
    fn test_no_treated_villages() {
        let registry =
            Registry::from_units(vec![AdministrativeUnit::new("C1", "Kidodi", "Mikumi")]).unwrap();
        let progress = LabelProgress::compute(&registry, &[]);
        assert_eq!(progress.overall.total, 0);
        assert_eq!(progress.overall.percent, 0.0);
        assert!(progress.wards.is_empty());
    }

    #[test]
    fn test_progress_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("label_progress.csv");
        LabelProgress::compute(&registry(), &[label("Ruaha", "Mikumi")])
            .write_to_csv(&path)
            .unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "level,name,total,mapped,remaining,completion_pct");
        assert_eq!(lines[1], "overall,all,4,1,3,25.0");
        assert!(lines.contains(&"district,Ulanga,1,0,1,0.0"));
    }
}
