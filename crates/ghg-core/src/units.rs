//! Unit recognition and conversion
//!
//! Every unit is defined by its size relative to the canonical unit of its
//! dimension, so conversions only exist between units of the same
//! dimension and always go through the canonical unit.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Physical dimension of an activity quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Energy,
    Volume,
    Mass,
    Distance,
}

impl Dimension {
    /// Unit that totals of this dimension are reported in
    pub fn canonical_unit(&self) -> Unit {
        match self {
            Dimension::Energy => Unit::Kwh,
            Dimension::Volume => Unit::CubicMetres,
            Dimension::Mass => Unit::Tonnes,
            Dimension::Distance => Unit::Km,
        }
    }
}

impl std::fmt::Display for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dimension::Energy => write!(f, "energy"),
            Dimension::Volume => write!(f, "volume"),
            Dimension::Mass => write!(f, "mass"),
            Dimension::Distance => write!(f, "distance"),
        }
    }
}

/// Recognized activity units
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Unit {
    Kwh,
    Mwh,
    Gwh,
    Therms,
    Litres,
    Gallons,
    CubicMetres,
    Kg,
    Tonnes,
    Km,
    Miles,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unrecognized unit '{0}'")]
pub struct UnknownUnit(pub String);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("No conversion from {from} ({from_dimension}) to {to} ({to_dimension})")]
pub struct IncompatibleUnits {
    pub from: Unit,
    pub to: Unit,
    pub from_dimension: Dimension,
    pub to_dimension: Dimension,
}

impl Unit {
    pub const ALL: [Unit; 11] = [
        Unit::Kwh,
        Unit::Mwh,
        Unit::Gwh,
        Unit::Therms,
        Unit::Litres,
        Unit::Gallons,
        Unit::CubicMetres,
        Unit::Kg,
        Unit::Tonnes,
        Unit::Km,
        Unit::Miles,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Unit::Kwh => "kWh",
            Unit::Mwh => "MWh",
            Unit::Gwh => "GWh",
            Unit::Therms => "therms",
            Unit::Litres => "litres",
            Unit::Gallons => "gallons",
            Unit::CubicMetres => "cubic_metres",
            Unit::Kg => "kg",
            Unit::Tonnes => "tonnes",
            Unit::Km => "km",
            Unit::Miles => "miles",
        }
    }

    pub fn dimension(&self) -> Dimension {
        match self {
            Unit::Kwh | Unit::Mwh | Unit::Gwh | Unit::Therms => Dimension::Energy,
            Unit::Litres | Unit::Gallons | Unit::CubicMetres => Dimension::Volume,
            Unit::Kg | Unit::Tonnes => Dimension::Mass,
            Unit::Km | Unit::Miles => Dimension::Distance,
        }
    }

    /// Size of one of this unit in the canonical unit of its dimension
    fn canonical_scale(&self) -> f64 {
        match self {
            Unit::Kwh => 1.0,
            Unit::Mwh => 1_000.0,
            Unit::Gwh => 1_000_000.0,
            Unit::Therms => 29.3071,
            Unit::Litres => 0.001,
            Unit::Gallons => 0.003_785_41,
            Unit::CubicMetres => 1.0,
            Unit::Kg => 0.001,
            Unit::Tonnes => 1.0,
            Unit::Km => 1.0,
            Unit::Miles => 1.609_344,
        }
    }

    /// Parse a unit, accepting the common spellings found in activity data
    pub fn parse(raw: &str) -> Result<Self, UnknownUnit> {
        let key: String = raw
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c.is_whitespace() || c == '-' { '_' } else { c })
            .collect();

        let unit = match key.as_str() {
            "kwh" | "kilowatt_hour" | "kilowatt_hours" | "kilowatthour" | "kilowatthours" => Unit::Kwh,
            "mwh" | "megawatt_hour" | "megawatt_hours" => Unit::Mwh,
            "gwh" | "gigawatt_hour" | "gigawatt_hours" => Unit::Gwh,
            "therm" | "therms" => Unit::Therms,
            "l" | "litre" | "litres" | "liter" | "liters" | "ltr" => Unit::Litres,
            "gal" | "gals" | "gallon" | "gallons" | "us_gallons" => Unit::Gallons,
            "m3" | "m³" | "cbm" | "cubic_metre" | "cubic_metres" | "cubic_meter" | "cubic_meters" => {
                Unit::CubicMetres
            }
            "kg" | "kgs" | "kilogram" | "kilograms" => Unit::Kg,
            "t" | "tonne" | "tonnes" | "ton" | "tons" | "metric_ton" | "metric_tons" => Unit::Tonnes,
            "km" | "kms" | "kilometre" | "kilometres" | "kilometer" | "kilometers" => Unit::Km,
            "mi" | "mile" | "miles" => Unit::Miles,
            _ => return Err(UnknownUnit(raw.trim().to_string())),
        };

        Ok(unit)
    }
}

impl std::fmt::Display for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for Unit {
    type Err = UnknownUnit;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Unit::parse(s)
    }
}

impl From<Unit> for String {
    fn from(unit: Unit) -> Self {
        unit.label().to_string()
    }
}

impl TryFrom<String> for Unit {
    type Error = UnknownUnit;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Unit::parse(&value)
    }
}

/// Convert `value` from one unit to another of the same dimension
pub fn convert(value: f64, from: Unit, to: Unit) -> Result<f64, IncompatibleUnits> {
    if from == to {
        return Ok(value);
    }

    if from.dimension() != to.dimension() {
        return Err(IncompatibleUnits {
            from,
            to,
            from_dimension: from.dimension(),
            to_dimension: to.dimension(),
        });
    }

    Ok(value * from.canonical_scale() / to.canonical_scale())
}

/// Convert `value` to the canonical unit of its dimension
pub fn to_canonical(value: f64, unit: Unit) -> f64 {
    value * unit.canonical_scale() / unit.dimension().canonical_unit().canonical_scale()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!(Unit::parse("L").unwrap(), Unit::Litres);
        assert_eq!(Unit::parse(" Liters ").unwrap(), Unit::Litres);
        assert_eq!(Unit::parse("m³").unwrap(), Unit::CubicMetres);
        assert_eq!(Unit::parse("cubic meters").unwrap(), Unit::CubicMetres);
        assert_eq!(Unit::parse("kilowatt-hours").unwrap(), Unit::Kwh);
        assert_eq!(Unit::parse("MWh").unwrap(), Unit::Mwh);
        assert_eq!(Unit::parse("t").unwrap(), Unit::Tonnes);
        assert_eq!(Unit::parse("mi").unwrap(), Unit::Miles);
        assert!(Unit::parse("furlongs").is_err());
        assert!(Unit::parse("").is_err());
    }

    #[test]
    fn test_known_conversions() {
        assert!(close(convert(10.0, Unit::Miles, Unit::Km).unwrap(), 16.09344));
        assert!(close(convert(1.0, Unit::Gallons, Unit::Litres).unwrap(), 3.78541));
        assert!(close(convert(2.5, Unit::Mwh, Unit::Kwh).unwrap(), 2_500.0));
        assert!(close(convert(1_500.0, Unit::Kg, Unit::Tonnes).unwrap(), 1.5));
        assert!(close(convert(1.0, Unit::CubicMetres, Unit::Litres).unwrap(), 1_000.0));
    }

    #[test]
    fn test_identity_conversion_is_exact() {
        let value = 0.1 + 0.2;
        assert_eq!(convert(value, Unit::Km, Unit::Km).unwrap(), value);
    }

    #[test]
    fn test_cross_dimension_rejected() {
        let err = convert(1.0, Unit::Litres, Unit::Kwh).unwrap_err();
        assert_eq!(err.from_dimension, Dimension::Volume);
        assert_eq!(err.to_dimension, Dimension::Energy);
    }

    #[test]
    fn test_round_trip_every_pair() {
        let samples = [0.0, 1.0, 3.75, 12_345.678, 9.0e8];
        for from in Unit::ALL {
            for to in Unit::ALL.iter().copied().filter(|u| u.dimension() == from.dimension()) {
                for value in samples {
                    let there = convert(value, from, to).unwrap();
                    let back = convert(there, to, from).unwrap();
                    assert!(close(back, value), "{} -> {} -> {}: {} vs {}", from, to, from, back, value);
                }
            }
        }
    }

    #[test]
    fn test_serde_uses_labels() {
        assert_eq!(serde_json::to_string(&Unit::CubicMetres).unwrap(), "\"cubic_metres\"");
        let unit: Unit = serde_json::from_str("\"litre\"").unwrap();
        assert_eq!(unit, Unit::Litres);
        assert!(serde_json::from_str::<Unit>("\"parsecs\"").is_err());
    }

    #[test]
    fn test_canonical_units() {
        assert!(close(to_canonical(500.0, Unit::Kg), 0.5));
        assert!(close(to_canonical(2_000.0, Unit::Litres), 2.0));
        assert_eq!(Dimension::Energy.canonical_unit(), Unit::Kwh);
    }
}
