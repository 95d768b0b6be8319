//! Factor table format and validation

use super::{FactorCategory, FactorError};
use crate::units::{Dimension, Unit};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// kg CO2e per one `unit`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UnitFactor {
    pub value: f64,
    pub unit: Unit,
}

/// A single conversion factor: kg CO2e per `unit` of activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorEntry {
    pub value: f64,
    pub unit: Unit,
    pub source: String,
    pub year: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Factors for the same activity measured in other dimensions
    /// (a fuel by volume, by mass or by energy content)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternates: Vec<UnitFactor>,
}

impl FactorEntry {
    pub fn new(value: f64, unit: Unit, source: &str, year: u16) -> Self {
        Self {
            value,
            unit,
            source: source.to_string(),
            year,
            name: None,
            alternates: Vec::new(),
        }
    }

    pub fn with_alternate(mut self, value: f64, unit: Unit) -> Self {
        self.alternates.push(UnitFactor { value, unit });
        self
    }

    /// The primary factor followed by the alternates
    pub fn factors(&self) -> impl Iterator<Item = UnitFactor> + '_ {
        std::iter::once(UnitFactor {
            value: self.value,
            unit: self.unit,
        })
        .chain(self.alternates.iter().copied())
    }

    /// Factor applicable to an activity measured in `unit`, if any
    pub fn factor_for(&self, unit: Unit) -> Option<UnitFactor> {
        self.factors().find(|f| f.unit.dimension() == unit.dimension())
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Source and vintage, e.g. "UK DEFRA 2024 (2024)"
    pub fn provenance(&self) -> String {
        format!("{} ({})", self.source, self.year)
    }
}

/// One category's factor table, as stored in `<category>.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorTable {
    pub category: FactorCategory,
    #[serde(default)]
    pub description: String,
    pub entries: BTreeMap<String, FactorEntry>,
}

impl FactorTable {
    pub fn new(category: FactorCategory) -> Self {
        Self {
            category,
            description: String::new(),
            entries: BTreeMap::new(),
        }
    }

    pub fn with_entry(mut self, key: &str, entry: FactorEntry) -> Self {
        self.entries.insert(key.to_string(), entry);
        self
    }

    /// Parse a table, checking that it declares the expected category
    pub fn from_json(expected: FactorCategory, content: &str) -> Result<Self, FactorError> {
        let table: FactorTable = serde_json::from_str(content).map_err(|e| FactorError::Parse {
            category: expected,
            source: e,
        })?;

        if table.category != expected {
            return Err(FactorError::CategoryMismatch {
                expected,
                found: table.category,
            });
        }

        Ok(table)
    }

    /// Check every entry and the presence of the keys the calculator depends on
    pub fn validate(&self) -> Result<(), FactorError> {
        for (key, entry) in &self.entries {
            let invalid = |reason: String| FactorError::InvalidEntry {
                category: self.category,
                key: key.clone(),
                reason,
            };

            if key.trim().is_empty() || key != &super::normalise_key(key) {
                return Err(invalid("keys must be lowercase snake_case".to_string()));
            }

            for factor in entry.factors() {
                if !factor.value.is_finite() {
                    return Err(invalid(format!("value {} is not a finite number", factor.value)));
                }

                if factor.value <= 0.0 && !self.category.allows_avoided_emissions(key) {
                    return Err(invalid(format!(
                        "value {} must be positive; only recycling and anaerobic digestion may be negative",
                        factor.value
                    )));
                }
            }

            if !entry.alternates.is_empty() && self.category.dimension().is_some() {
                return Err(invalid(format!(
                    "{} factors take a single unit; alternates are only allowed for fuel",
                    self.category
                )));
            }

            let mut dimensions: Vec<Dimension> = entry.factors().map(|f| f.unit.dimension()).collect();
            dimensions.sort();
            dimensions.dedup();
            if dimensions.len() != entry.alternates.len() + 1 {
                return Err(invalid("each factor must be per unit of a different dimension".to_string()));
            }

            if entry.source.trim().is_empty() {
                return Err(invalid("source must not be empty".to_string()));
            }

            if entry.year == 0 {
                return Err(invalid("year must be set".to_string()));
            }

            if let Some(expected) = self.category.dimension() {
                if entry.unit.dimension() != expected {
                    return Err(invalid(format!(
                        "unit {} is {} but {} factors must be per unit of {}",
                        entry.unit,
                        entry.unit.dimension(),
                        self.category,
                        expected
                    )));
                }
            }
        }

        for &key in self.category.required_keys() {
            if !self.entries.contains_key(key) {
                return Err(FactorError::MissingKey {
                    category: self.category,
                    key,
                });
            }
        }

        Ok(())
    }
}

impl FactorCategory {
    /// Dimension every entry of this category must be expressed per, if fixed
    pub(crate) fn dimension(&self) -> Option<Dimension> {
        match self {
            FactorCategory::Electricity => Some(Dimension::Energy),
            FactorCategory::Fuel => None,
            FactorCategory::Transport => Some(Dimension::Distance),
            FactorCategory::Waste => Some(Dimension::Mass),
            FactorCategory::Water => Some(Dimension::Volume),
        }
    }

    pub(crate) fn required_keys(&self) -> &'static [&'static str] {
        match self {
            FactorCategory::Electricity => &[super::WORLD_AVERAGE],
            FactorCategory::Fuel => &[],
            FactorCategory::Transport => &["flight_domestic", "flight_short_haul", "flight_long_haul"],
            FactorCategory::Waste => &[],
            FactorCategory::Water => &["supply", "treatment"],
        }
    }

    /// Recycling and anaerobic digestion carry negative (avoided) emissions
    pub(crate) fn allows_avoided_emissions(&self, key: &str) -> bool {
        matches!(self, FactorCategory::Waste)
            && (key.starts_with("recycling_") || key == "recycling" || key == "anaerobic_digestion")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn water_table() -> FactorTable {
        FactorTable::new(FactorCategory::Water)
            .with_entry("supply", FactorEntry::new(0.2, Unit::CubicMetres, "Test", 2024))
            .with_entry("treatment", FactorEntry::new(0.1, Unit::CubicMetres, "Test", 2024))
    }

    #[test]
    fn test_valid_table() {
        assert!(water_table().validate().is_ok());
    }

    #[test]
    fn test_missing_required_key() {
        let mut table = water_table();
        table.entries.remove("treatment");
        assert!(matches!(
            table.validate(),
            Err(FactorError::MissingKey { key: "treatment", .. })
        ));
    }

    #[test]
    fn test_negative_value_only_for_avoided_emissions() {
        let recycling = FactorTable::new(FactorCategory::Waste)
            .with_entry("recycling_glass", FactorEntry::new(-314.0, Unit::Tonnes, "Test", 2024))
            .with_entry("anaerobic_digestion", FactorEntry::new(-78.5, Unit::Tonnes, "Test", 2024));
        assert!(recycling.validate().is_ok());

        let landfill = FactorTable::new(FactorCategory::Waste)
            .with_entry("landfill", FactorEntry::new(-1.0, Unit::Tonnes, "Test", 2024));
        assert!(matches!(landfill.validate(), Err(FactorError::InvalidEntry { .. })));

        let zero_fuel = FactorTable::new(FactorCategory::Fuel)
            .with_entry("diesel", FactorEntry::new(0.0, Unit::Litres, "Test", 2024));
        assert!(zero_fuel.validate().is_err());
    }

    #[test]
    fn test_fuel_alternates() {
        let table = FactorTable::new(FactorCategory::Fuel).with_entry(
            "natural_gas",
            FactorEntry::new(0.1829, Unit::Kwh, "Test", 2024).with_alternate(2.04542, Unit::CubicMetres),
        );
        assert!(table.validate().is_ok());

        let entry = &table.entries["natural_gas"];
        assert_eq!(entry.factor_for(Unit::Mwh).map(|f| f.unit), Some(Unit::Kwh));
        assert_eq!(entry.factor_for(Unit::Litres).map(|f| f.value), Some(2.04542));
        assert!(entry.factor_for(Unit::Kg).is_none());

        let repeated = FactorTable::new(FactorCategory::Fuel).with_entry(
            "diesel",
            FactorEntry::new(2.68, Unit::Litres, "Test", 2024).with_alternate(2.7, Unit::Gallons),
        );
        assert!(matches!(repeated.validate(), Err(FactorError::InvalidEntry { .. })));

        let water = FactorTable::new(FactorCategory::Water)
            .with_entry(
                "supply",
                FactorEntry::new(0.2, Unit::CubicMetres, "Test", 2024).with_alternate(0.1, Unit::Kwh),
            )
            .with_entry("treatment", FactorEntry::new(0.1, Unit::CubicMetres, "Test", 2024));
        assert!(matches!(water.validate(), Err(FactorError::InvalidEntry { .. })));
    }

    #[test]
    fn test_unit_dimension_enforced() {
        let table = FactorTable::new(FactorCategory::Waste)
            .with_entry("landfill", FactorEntry::new(400.0, Unit::Litres, "Test", 2024));
        assert!(matches!(table.validate(), Err(FactorError::InvalidEntry { .. })));
    }

    #[test]
    fn test_missing_provenance_fields_fail_to_parse() {
        let content = r#"{
            "category": "fuel",
            "entries": { "diesel": { "value": 2.68, "unit": "litres", "year": 2024 } }
        }"#;
        assert!(matches!(
            FactorTable::from_json(FactorCategory::Fuel, content),
            Err(FactorError::Parse { .. })
        ));
    }

    #[test]
    fn test_unrecognized_unit_fails_to_parse() {
        let content = r#"{
            "category": "fuel",
            "entries": { "diesel": { "value": 2.68, "unit": "barrels", "source": "X", "year": 2024 } }
        }"#;
        assert!(FactorTable::from_json(FactorCategory::Fuel, content).is_err());
    }

    #[test]
    fn test_category_mismatch() {
        let content = r#"{ "category": "water", "entries": {} }"#;
        assert!(matches!(
            FactorTable::from_json(FactorCategory::Fuel, content),
            Err(FactorError::CategoryMismatch { .. })
        ));
    }
}
