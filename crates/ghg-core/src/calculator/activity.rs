//! Activity records and their typed form
//!
//! `ActivityRecord` is the loosely typed shape produced by file parsers and
//! manual entry. It is converted into an [`Activity`] before any factor is
//! looked up, so category, unit and parameter problems surface as
//! [`CalculationError`]s up front.

use super::CalculationError;
use crate::factors::{normalise_key, FactorCategory};
use crate::units::{Dimension, Unit};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Activity categories, one per calculation function
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Electricity,
    Fuel,
    Transport,
    Flight,
    Waste,
    Water,
}

impl ActivityKind {
    pub const ALL: [ActivityKind; 6] = [
        ActivityKind::Electricity,
        ActivityKind::Fuel,
        ActivityKind::Transport,
        ActivityKind::Flight,
        ActivityKind::Waste,
        ActivityKind::Water,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Electricity => "electricity",
            ActivityKind::Fuel => "fuel",
            ActivityKind::Transport => "transport",
            ActivityKind::Flight => "flight",
            ActivityKind::Waste => "waste",
            ActivityKind::Water => "water",
        }
    }

    /// Factor table the category draws from
    pub fn factor_category(&self) -> FactorCategory {
        match self {
            ActivityKind::Electricity => FactorCategory::Electricity,
            ActivityKind::Fuel => FactorCategory::Fuel,
            ActivityKind::Transport | ActivityKind::Flight => FactorCategory::Transport,
            ActivityKind::Waste => FactorCategory::Waste,
            ActivityKind::Water => FactorCategory::Water,
        }
    }

    /// Dimension amounts of this category are measured in, if fixed
    pub fn dimension(&self) -> Option<Dimension> {
        match self {
            ActivityKind::Electricity => Some(Dimension::Energy),
            ActivityKind::Fuel => None,
            ActivityKind::Transport | ActivityKind::Flight => Some(Dimension::Distance),
            ActivityKind::Waste => Some(Dimension::Mass),
            ActivityKind::Water => Some(Dimension::Volume),
        }
    }

    /// Resolve a category name or alias
    pub fn from_alias(raw: &str) -> Option<Self> {
        CATEGORY_ALIASES.get(normalise_key(raw).as_str()).copied()
    }
}

impl std::fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

static CATEGORY_ALIASES: Lazy<HashMap<&'static str, ActivityKind>> = Lazy::new(|| {
    use ActivityKind::*;
    [
        ("electricity", Electricity),
        ("electric", Electricity),
        ("power", Electricity),
        ("grid", Electricity),
        ("energy", Electricity),
        ("fuel", Fuel),
        ("fuels", Fuel),
        ("combustion", Fuel),
        ("gas", Fuel),
        ("heating", Fuel),
        ("transport", Transport),
        ("transportation", Transport),
        ("ground_transport", Transport),
        ("travel", Transport),
        ("vehicle", Transport),
        ("road", Transport),
        ("car", Transport),
        ("flight", Flight),
        ("flights", Flight),
        ("air", Flight),
        ("air_travel", Flight),
        ("aviation", Flight),
        ("waste", Waste),
        ("disposal", Waste),
        ("rubbish", Waste),
        ("refuse", Waste),
        ("water", Water),
        ("water_supply", Water),
        ("water_treatment", Water),
    ]
    .into_iter()
    .collect()
});

/// An activity record as supplied by parsers or manual entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityRecord {
    pub category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_category: Option<String>,
    pub amount: f64,
    pub unit: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Share of electricity from renewable sources, 0 to 100
    #[serde(skip_serializing_if = "Option::is_none")]
    pub renewable_percentage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flight_class: Option<String>,
    pub return_trip: bool,
    /// `owned` or `third_party`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ownership: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passengers: Option<u32>,
    pub per_passenger: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_treatment: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub material: Option<String>,
}

/// An amount with its unit; `None` means the factor's native unit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantity {
    pub amount: f64,
    pub unit: Option<Unit>,
}

impl Quantity {
    pub fn new(amount: f64, unit: Unit) -> Self {
        Self {
            amount,
            unit: Some(unit),
        }
    }

    pub fn native(amount: f64) -> Self {
        Self { amount, unit: None }
    }

    pub(crate) fn unit_or(&self, native: Unit) -> Unit {
        self.unit.unwrap_or(native)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleOwnership {
    /// Company-owned or controlled fleet
    Owned,
    #[default]
    ThirdParty,
}

/// How ground-transport emissions are allocated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PassengerAllocation {
    #[default]
    PerVehicle,
    PerPassenger(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlightHaul {
    Domestic,
    ShortHaul,
    LongHaul,
}

impl FlightHaul {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlightHaul::Domestic => "domestic",
            FlightHaul::ShortHaul => "short_haul",
            FlightHaul::LongHaul => "long_haul",
        }
    }

    /// Transport factor key for this haul
    pub fn factor_key(&self) -> &'static str {
        match self {
            FlightHaul::Domestic => "flight_domestic",
            FlightHaul::ShortHaul => "flight_short_haul",
            FlightHaul::LongHaul => "flight_long_haul",
        }
    }

    /// Typical one-way distance, used when a flight is given as a trip count
    pub fn average_distance_km(&self) -> f64 {
        match self {
            FlightHaul::Domestic => 400.0,
            FlightHaul::ShortHaul => 1_500.0,
            FlightHaul::LongHaul => 6_500.0,
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        let key = normalise_key(raw);
        match key.trim_start_matches("flight_") {
            "domestic" => Some(FlightHaul::Domestic),
            "short_haul" | "shorthaul" | "short" => Some(FlightHaul::ShortHaul),
            "long_haul" | "longhaul" | "long" | "international" => Some(FlightHaul::LongHaul),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CabinClass {
    #[default]
    Economy,
    PremiumEconomy,
    Business,
    First,
}

impl CabinClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            CabinClass::Economy => "economy",
            CabinClass::PremiumEconomy => "premium_economy",
            CabinClass::Business => "business",
            CabinClass::First => "first",
        }
    }

    pub fn multiplier(&self) -> f64 {
        match self {
            CabinClass::Economy => 1.0,
            CabinClass::PremiumEconomy => 1.6,
            CabinClass::Business => 2.0,
            CabinClass::First => 4.0,
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match normalise_key(raw).as_str() {
            "economy" | "coach" | "standard" => Some(CabinClass::Economy),
            "premium_economy" | "premium" => Some(CabinClass::PremiumEconomy),
            "business" | "business_class" => Some(CabinClass::Business),
            "first" | "first_class" => Some(CabinClass::First),
            _ => None,
        }
    }
}

/// Flight distance, either measured or as a number of trips of average length
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FlightDistance {
    Distance(Quantity),
    Trips(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElectricityParams {
    pub quantity: Quantity,
    pub country: Option<String>,
    pub renewable_percentage: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuelParams {
    pub fuel_type: String,
    pub quantity: Quantity,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportParams {
    pub vehicle_type: String,
    pub distance: Quantity,
    pub ownership: VehicleOwnership,
    pub allocation: PassengerAllocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlightParams {
    pub haul: FlightHaul,
    pub class: CabinClass,
    pub distance: FlightDistance,
    pub return_trip: bool,
    pub passengers: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WasteParams {
    pub disposal_method: String,
    pub material: Option<String>,
    pub quantity: Quantity,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WaterParams {
    pub quantity: Quantity,
    pub include_treatment: bool,
}

/// A validated activity, one variant per calculation function
#[derive(Debug, Clone, PartialEq)]
pub enum Activity {
    Electricity(ElectricityParams),
    Fuel(FuelParams),
    Transport(TransportParams),
    Flight(FlightParams),
    Waste(WasteParams),
    Water(WaterParams),
}

impl Activity {
    pub fn kind(&self) -> ActivityKind {
        match self {
            Activity::Electricity(_) => ActivityKind::Electricity,
            Activity::Fuel(_) => ActivityKind::Fuel,
            Activity::Transport(_) => ActivityKind::Transport,
            Activity::Flight(_) => ActivityKind::Flight,
            Activity::Waste(_) => ActivityKind::Waste,
            Activity::Water(_) => ActivityKind::Water,
        }
    }
}

impl TryFrom<&ActivityRecord> for Activity {
    type Error = CalculationError;

    fn try_from(record: &ActivityRecord) -> Result<Self, Self::Error> {
        let kind = ActivityKind::from_alias(&record.category)
            .ok_or_else(|| CalculationError::UnknownCategory(record.category.trim().to_string()))?;

        let sub_category = record
            .sub_category
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let activity = match kind {
            ActivityKind::Electricity => Activity::Electricity(ElectricityParams {
                quantity: quantity(kind, record)?,
                country: record.country.clone(),
                renewable_percentage: record.renewable_percentage.unwrap_or(0.0),
            }),

            ActivityKind::Fuel => Activity::Fuel(FuelParams {
                fuel_type: required(kind, sub_category, "sub_category")?,
                quantity: quantity(kind, record)?,
            }),

            ActivityKind::Transport => Activity::Transport(TransportParams {
                vehicle_type: required(kind, sub_category, "sub_category")?,
                distance: quantity(kind, record)?,
                ownership: ownership(record.ownership.as_deref())?,
                allocation: allocation(record)?,
            }),

            ActivityKind::Flight => {
                let haul_raw = required(kind, sub_category, "sub_category")?;
                let haul = FlightHaul::parse(&haul_raw).ok_or_else(|| CalculationError::InvalidParameter {
                    field: "sub_category",
                    reason: format!(
                        "unknown flight haul '{}' (expected domestic, short_haul or long_haul)",
                        haul_raw
                    ),
                })?;

                let class = match record.flight_class.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
                    Some(raw) => CabinClass::parse(raw).ok_or_else(|| CalculationError::InvalidParameter {
                        field: "flight_class",
                        reason: format!(
                            "unknown cabin class '{}' (expected economy, premium_economy, business or first)",
                            raw
                        ),
                    })?,
                    None => CabinClass::Economy,
                };

                let distance = if is_trip_unit(&record.unit) {
                    FlightDistance::Trips(record.amount)
                } else {
                    FlightDistance::Distance(quantity(kind, record)?)
                };

                let passengers = record.passengers.unwrap_or(1);
                if passengers == 0 {
                    return Err(CalculationError::InvalidParameter {
                        field: "passengers",
                        reason: "must be at least 1".to_string(),
                    });
                }

                Activity::Flight(FlightParams {
                    haul,
                    class,
                    distance,
                    return_trip: record.return_trip,
                    passengers,
                })
            }

            ActivityKind::Waste => {
                let material = record
                    .material
                    .as_deref()
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .map(str::to_string);

                let disposal_method = match (sub_category, &material) {
                    (Some(method), _) => method.to_string(),
                    (None, Some(_)) => "recycling".to_string(),
                    (None, None) => {
                        return Err(CalculationError::MissingField {
                            category: kind,
                            field: "sub_category",
                        })
                    }
                };

                Activity::Waste(WasteParams {
                    disposal_method,
                    material,
                    quantity: quantity(kind, record)?,
                })
            }

            ActivityKind::Water => {
                let include_treatment = match (record.include_treatment, sub_category.map(normalise_key)) {
                    (Some(flag), _) => flag,
                    (None, Some(stage)) => match stage.as_str() {
                        "supply" | "supply_only" => false,
                        "treatment" | "supply_and_treatment" | "supply_treatment" => true,
                        other => {
                            return Err(CalculationError::UnknownWaterStage {
                                key: other.to_string(),
                                available: vec!["supply".to_string(), "supply_and_treatment".to_string()],
                            })
                        }
                    },
                    (None, None) => true,
                };

                Activity::Water(WaterParams {
                    quantity: quantity(kind, record)?,
                    include_treatment,
                })
            }
        };

        Ok(activity)
    }
}

fn required(kind: ActivityKind, value: Option<&str>, field: &'static str) -> Result<String, CalculationError> {
    value
        .map(str::to_string)
        .ok_or(CalculationError::MissingField { category: kind, field })
}

fn quantity(kind: ActivityKind, record: &ActivityRecord) -> Result<Quantity, CalculationError> {
    if record.unit.trim().is_empty() {
        return Ok(Quantity::native(record.amount));
    }

    let unit = Unit::parse(&record.unit).map_err(|_| CalculationError::InvalidUnit {
        from: record.unit.trim().to_string(),
        to: match kind.dimension() {
            Some(dimension) => format!("{} units", dimension),
            None => "a recognized unit".to_string(),
        },
    })?;

    Ok(Quantity::new(record.amount, unit))
}

fn is_trip_unit(raw: &str) -> bool {
    matches!(
        normalise_key(raw).as_str(),
        "trip" | "trips" | "flight" | "flights" | "journey" | "journeys"
    )
}

fn ownership(raw: Option<&str>) -> Result<VehicleOwnership, CalculationError> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(VehicleOwnership::default());
    };

    match normalise_key(raw).as_str() {
        "owned" | "company" | "company_owned" | "fleet" | "controlled" => Ok(VehicleOwnership::Owned),
        "third_party" | "thirdparty" | "rental" | "hired" | "public" | "personal" => {
            Ok(VehicleOwnership::ThirdParty)
        }
        _ => Err(CalculationError::InvalidParameter {
            field: "ownership",
            reason: format!("unknown ownership '{}' (expected owned or third_party)", raw),
        }),
    }
}

fn allocation(record: &ActivityRecord) -> Result<PassengerAllocation, CalculationError> {
    if !record.per_passenger {
        return Ok(PassengerAllocation::PerVehicle);
    }

    match record.passengers {
        Some(n) if n > 0 => Ok(PassengerAllocation::PerPassenger(n)),
        Some(_) => Err(CalculationError::InvalidParameter {
            field: "passengers",
            reason: "must be at least 1".to_string(),
        }),
        None => Err(CalculationError::MissingField {
            category: ActivityKind::Transport,
            field: "passengers",
        }),
    }
}
