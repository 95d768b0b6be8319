//! Emissions calculator
//!
//! One calculation function per activity category. Each resolves its factor
//! from the shared registry, converts the activity amount into the factor's
//! unit, multiplies, and assigns the GHG Protocol scope.

mod activity;

pub use activity::{
    Activity, ActivityKind, ActivityRecord, CabinClass, ElectricityParams, FlightDistance, FlightHaul,
    FlightParams, FuelParams, PassengerAllocation, Quantity, TransportParams, VehicleOwnership,
    WasteParams, WaterParams,
};

use crate::aggregate::{aggregate, RecordWarning, TotalEmissions};
use crate::factors::{normalise_key, FactorCategory, FactorRegistry, UnitFactor, UnknownFactorKey};
use crate::units::{self, Unit};
use crate::Scope;
use once_cell::sync::Lazy;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Default amount above which results are flagged for review
pub const DEFAULT_LARGE_AMOUNT_THRESHOLD: f64 = 1_000_000_000.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalculationError {
    #[error("Invalid amount {0}: must be a finite, non-negative number")]
    InvalidAmount(f64),

    #[error("Cannot convert '{from}' to {to}")]
    InvalidUnit { from: String, to: String },

    #[error("Unknown fuel type '{key}'")]
    UnknownFuelType { key: String, available: Vec<String> },

    #[error("Unknown vehicle type '{key}'")]
    UnknownVehicleType { key: String, available: Vec<String> },

    #[error("Unknown disposal method '{key}'")]
    UnknownDisposalMethod { key: String, available: Vec<String> },

    #[error("Unknown water stage '{key}'")]
    UnknownWaterStage { key: String, available: Vec<String> },

    #[error(transparent)]
    UnknownFactorKey(UnknownFactorKey),

    #[error("Unknown activity category '{0}' (supported: electricity, fuel, transport, flight, waste, water)")]
    UnknownCategory(String),

    #[error("{category} activity requires '{field}'")]
    MissingField {
        category: ActivityKind,
        field: &'static str,
    },

    #[error("Invalid {field}: {reason}")]
    InvalidParameter { field: &'static str, reason: String },

    #[error("{category} emissions for {amount} {unit} are not a finite number")]
    Overflow {
        category: ActivityKind,
        amount: f64,
        unit: String,
    },
}

impl From<UnknownFactorKey> for CalculationError {
    fn from(err: UnknownFactorKey) -> Self {
        let UnknownFactorKey {
            category,
            key,
            available,
        } = err;

        match category {
            FactorCategory::Fuel => CalculationError::UnknownFuelType { key, available },
            FactorCategory::Transport => CalculationError::UnknownVehicleType { key, available },
            FactorCategory::Waste => CalculationError::UnknownDisposalMethod { key, available },
            FactorCategory::Water => CalculationError::UnknownWaterStage { key, available },
            FactorCategory::Electricity => CalculationError::UnknownFactorKey(UnknownFactorKey {
                category,
                key,
                available,
            }),
        }
    }
}

/// Emissions attributed to a single activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmissionResult {
    pub activity_type: ActivityKind,
    /// Amount as supplied
    pub activity_amount: f64,
    pub activity_unit: String,
    /// Amount in the factor's unit, after return-trip doubling for flights
    pub converted_amount: f64,
    pub factor_unit: Unit,
    pub emissions_kg_co2e: f64,
    pub scope: Scope,
    pub factor_used: f64,
    pub factor_source: String,
    pub calculation_details: String,
    #[serde(default)]
    pub requires_review: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl EmissionResult {
    pub fn emissions_tonnes_co2e(&self) -> f64 {
        self.emissions_kg_co2e / 1000.0
    }
}

static FUEL_ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    [
        ("gas", "natural_gas"),
        ("mains_gas", "natural_gas"),
        ("gasoline", "petrol"),
        ("gas_diesel_oil", "diesel"),
        ("diesel_fuel", "diesel"),
        ("burning_oil", "kerosene"),
        ("oil", "fuel_oil"),
        ("pellets", "wood_pellets"),
    ]
    .into_iter()
    .collect()
});

static VEHICLE_ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    [
        ("car", "average_car"),
        ("petrol_car", "medium_petrol_car"),
        ("diesel_car", "medium_diesel_car"),
        ("ev", "electric_car"),
        ("hybrid", "hybrid_car"),
        ("motorbike", "motorcycle"),
        ("van", "van_average"),
        ("hgv", "hgv_average"),
        ("truck", "hgv_average"),
        ("lorry", "hgv_average"),
        ("coach", "bus"),
        ("train", "national_rail"),
        ("rail", "national_rail"),
        ("tram", "light_rail"),
        ("metro", "underground"),
        ("subway", "underground"),
        ("tube", "underground"),
        ("ship", "container_ship"),
        ("shipping", "container_ship"),
        ("container", "container_ship"),
        ("freight_ship", "general_cargo_ship"),
        ("cargo_ship", "general_cargo_ship"),
        ("tanker", "oil_tanker"),
    ]
    .into_iter()
    .collect()
});

static DISPOSAL_ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    [
        ("landfill", "landfill_mixed"),
        ("general_waste", "landfill_mixed"),
        ("food_waste", "landfill_food"),
        ("incinerated", "incineration"),
        ("energy_from_waste", "incineration"),
        ("compost", "composting"),
        ("composted", "composting"),
        ("ad", "anaerobic_digestion"),
        ("recycling", "recycling_average"),
        ("recycled", "recycling_average"),
    ]
    .into_iter()
    .collect()
});

fn resolve_alias(aliases: &HashMap<&'static str, &'static str>, raw: &str) -> String {
    let key = normalise_key(raw);
    match aliases.get(key.as_str()) {
        Some(alias) => alias.to_string(),
        None => key,
    }
}

/// Calculates emissions against a shared factor registry
#[derive(Debug, Clone)]
pub struct EmissionsCalculator {
    registry: Arc<FactorRegistry>,
    large_amount_threshold: f64,
}

impl EmissionsCalculator {
    pub fn new(registry: Arc<FactorRegistry>) -> Self {
        Self {
            registry,
            large_amount_threshold: DEFAULT_LARGE_AMOUNT_THRESHOLD,
        }
    }

    pub fn with_large_amount_threshold(mut self, threshold: f64) -> Self {
        self.large_amount_threshold = threshold;
        self
    }

    pub fn registry(&self) -> &FactorRegistry {
        &self.registry
    }

    /// Convert a raw record and calculate it
    pub fn calculate_record(&self, record: &ActivityRecord) -> Result<EmissionResult, CalculationError> {
        let activity = Activity::try_from(record)?;
        let mut result = self.calculate(&activity)?;
        result.description = record
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);
        Ok(result)
    }

    pub fn calculate(&self, activity: &Activity) -> Result<EmissionResult, CalculationError> {
        let result = match activity {
            Activity::Electricity(params) => self.calculate_electricity(params),
            Activity::Fuel(params) => self.calculate_fuel(params),
            Activity::Transport(params) => self.calculate_transport(params),
            Activity::Flight(params) => self.calculate_flight(params),
            Activity::Waste(params) => self.calculate_waste(params),
            Activity::Water(params) => self.calculate_water(params),
        }?;

        debug!(
            "{} {} {} -> {:.3} kg CO2e ({})",
            result.activity_type, result.activity_amount, result.activity_unit, result.emissions_kg_co2e, result.scope
        );

        Ok(result)
    }

    /// Scope 2: grid electricity less the renewable share
    pub fn calculate_electricity(&self, params: &ElectricityParams) -> Result<EmissionResult, CalculationError> {
        let amount = validate_amount(params.quantity.amount)?;

        if !(0.0..=100.0).contains(&params.renewable_percentage) {
            return Err(CalculationError::InvalidParameter {
                field: "renewable_percentage",
                reason: format!("{} is outside 0-100", params.renewable_percentage),
            });
        }

        let factor = self.registry.resolve_electricity(params.country.as_deref())?;
        if factor.fallback {
            warn!(
                "No grid factor for country '{}', using {}",
                params.country.as_deref().unwrap_or_default(),
                factor.key
            );
        }

        let unit = params.quantity.unit_or(factor.entry.unit);
        let kwh = convert(amount, unit, factor.entry.unit)?;
        let grid_share = 1.0 - params.renewable_percentage / 100.0;
        let emissions = kwh * grid_share * factor.entry.value;

        let mut details = format!("{} {} × {} kg CO2e/{}", fmt_amount(kwh), factor.entry.unit, factor.entry.value, factor.entry.unit);
        if params.renewable_percentage > 0.0 {
            details.push_str(&format!(" × {}% grid", 100.0 - params.renewable_percentage));
        }
        details.push_str(&format!(" = {} kg CO2e", fmt_amount(emissions)));
        if factor.fallback {
            details.push_str(&format!(
                " (no factor for '{}', world average used)",
                params.country.as_deref().unwrap_or_default().trim()
            ));
        }

        self.finish(
            ActivityKind::Electricity,
            &params.quantity,
            unit,
            kwh,
            entry_factor(factor.entry.value, factor.entry.unit),
            emissions,
            Scope::Two,
            format!("{} - {}", factor.entry.provenance(), factor.key),
            details,
        )
    }

    /// Scope 1: direct combustion
    pub fn calculate_fuel(&self, params: &FuelParams) -> Result<EmissionResult, CalculationError> {
        let amount = validate_amount(params.quantity.amount)?;
        let key = resolve_alias(&FUEL_ALIASES, &params.fuel_type);
        let entry = self.registry.resolve(FactorCategory::Fuel, &key)?;

        let unit = params.quantity.unit_or(entry.unit);
        let factor = entry.factor_for(unit).ok_or_else(|| CalculationError::InvalidUnit {
            from: unit.label().to_string(),
            to: entry
                .factors()
                .map(|f| f.unit.label())
                .collect::<Vec<_>>()
                .join(" or "),
        })?;
        let converted = convert(amount, unit, factor.unit)?;
        let emissions = converted * factor.value;

        let details = format!(
            "{} {} of {} × {} kg CO2e/{} = {} kg CO2e",
            fmt_amount(converted),
            factor.unit,
            key,
            factor.value,
            factor.unit,
            fmt_amount(emissions)
        );

        self.finish(
            ActivityKind::Fuel,
            &params.quantity,
            unit,
            converted,
            factor,
            emissions,
            Scope::One,
            format!("{} - {}", entry.provenance(), key),
            details,
        )
    }

    /// Ground transport; scope follows vehicle ownership
    pub fn calculate_transport(&self, params: &TransportParams) -> Result<EmissionResult, CalculationError> {
        let amount = validate_amount(params.distance.amount)?;
        let key = resolve_alias(&VEHICLE_ALIASES, &params.vehicle_type);
        if key.starts_with("flight_") {
            return Err(CalculationError::UnknownVehicleType {
                key,
                available: self.ground_vehicle_keys(),
            });
        }
        let entry = self.registry.resolve(FactorCategory::Transport, &key).map_err(|e| {
            CalculationError::UnknownVehicleType {
                key: e.key,
                available: self.ground_vehicle_keys(),
            }
        })?;

        let unit = params.distance.unit_or(entry.unit);
        let km = convert(amount, unit, entry.unit)?;

        let mut emissions = km * entry.value;
        let mut details = format!("{} {} by {} × {} kg CO2e/{}", fmt_amount(km), entry.unit, key, entry.value, entry.unit);
        if let PassengerAllocation::PerPassenger(passengers) = params.allocation {
            emissions /= f64::from(passengers);
            details.push_str(&format!(" ÷ {} passengers", passengers));
        }
        details.push_str(&format!(" = {} kg CO2e", fmt_amount(emissions)));

        let scope = match params.ownership {
            VehicleOwnership::Owned => Scope::One,
            VehicleOwnership::ThirdParty => Scope::Three,
        };

        self.finish(
            ActivityKind::Transport,
            &params.distance,
            unit,
            km,
            entry_factor(entry.value, entry.unit),
            emissions,
            scope,
            format!("{} - {}", entry.provenance(), key),
            details,
        )
    }

    /// Scope 3: business flights
    pub fn calculate_flight(&self, params: &FlightParams) -> Result<EmissionResult, CalculationError> {
        let entry = self.registry.resolve(FactorCategory::Transport, params.haul.factor_key())?;

        let (supplied, unit_label, one_way_km) = match params.distance {
            FlightDistance::Distance(quantity) => {
                let amount = validate_amount(quantity.amount)?;
                let unit = quantity.unit_or(entry.unit);
                (quantity, unit.label().to_string(), convert(amount, unit, entry.unit)?)
            }
            FlightDistance::Trips(trips) => {
                let trips = validate_amount(trips)?;
                (
                    Quantity::native(trips),
                    "trips".to_string(),
                    trips * params.haul.average_distance_km(),
                )
            }
        };

        let km = if params.return_trip { one_way_km * 2.0 } else { one_way_km };
        let multiplier = params.class.multiplier();
        let emissions = km * entry.value * multiplier * f64::from(params.passengers);

        let mut details = format!(
            "{} km ({}{}) × {} kg CO2e/pkm × {}x ({})",
            fmt_amount(km),
            params.haul.as_str(),
            if params.return_trip { ", return" } else { "" },
            entry.value,
            multiplier,
            params.class.as_str()
        );
        if let FlightDistance::Trips(trips) = params.distance {
            details.push_str(&format!(
                " [{} trips at {} km average]",
                trips,
                params.haul.average_distance_km()
            ));
        }
        if params.passengers > 1 {
            details.push_str(&format!(" × {} passengers", params.passengers));
        }
        details.push_str(&format!(" = {} kg CO2e", fmt_amount(emissions)));

        if !emissions.is_finite() {
            return Err(CalculationError::Overflow {
                category: ActivityKind::Flight,
                amount: supplied.amount,
                unit: unit_label,
            });
        }

        let large = supplied.amount > self.large_amount_threshold;
        if large {
            warn!("Flight amount {} exceeds review threshold", supplied.amount);
            details.push_str(" [requires review: unusually large amount]");
        }

        Ok(EmissionResult {
            activity_type: ActivityKind::Flight,
            activity_amount: supplied.amount,
            activity_unit: unit_label,
            converted_amount: km,
            factor_unit: entry.unit,
            emissions_kg_co2e: emissions,
            scope: Scope::Three,
            factor_used: entry.value,
            factor_source: format!(
                "{} - {} ({})",
                entry.provenance(),
                params.haul.as_str(),
                params.class.as_str()
            ),
            calculation_details: details,
            requires_review: large,
            description: None,
        })
    }

    /// Scope 3: waste disposal; avoided emissions stay negative
    pub fn calculate_waste(&self, params: &WasteParams) -> Result<EmissionResult, CalculationError> {
        let amount = validate_amount(params.quantity.amount)?;
        let method = resolve_alias(&DISPOSAL_ALIASES, &params.disposal_method);

        let key = match params.material.as_deref() {
            Some(material) if method.starts_with("recycling") => format!("recycling_{}", normalise_key(material)),
            Some(material) => {
                return Err(CalculationError::InvalidParameter {
                    field: "material",
                    reason: format!("material '{}' only applies to recycling, not {}", material, method),
                })
            }
            None => method,
        };

        let entry = self.registry.resolve(FactorCategory::Waste, &key)?;
        let unit = params.quantity.unit_or(entry.unit);
        let tonnes = convert(amount, unit, entry.unit)?;
        let emissions = tonnes * entry.value;

        let details = format!(
            "{} {} ({}) × {} kg CO2e/{} = {} kg CO2e",
            fmt_amount(tonnes),
            entry.unit,
            key,
            entry.value,
            entry.unit,
            fmt_amount(emissions)
        );

        self.finish(
            ActivityKind::Waste,
            &params.quantity,
            unit,
            tonnes,
            entry_factor(entry.value, entry.unit),
            emissions,
            Scope::Three,
            format!("{} - {}", entry.provenance(), key),
            details,
        )
    }

    /// Scope 3: water supply, optionally with treatment
    pub fn calculate_water(&self, params: &WaterParams) -> Result<EmissionResult, CalculationError> {
        let amount = validate_amount(params.quantity.amount)?;
        let supply = self.registry.resolve(FactorCategory::Water, "supply")?;

        let factor = if params.include_treatment {
            let treatment = self.registry.resolve(FactorCategory::Water, "treatment")?;
            supply.value + treatment.value * convert(1.0, supply.unit, treatment.unit)?
        } else {
            supply.value
        };

        let unit = params.quantity.unit_or(supply.unit);
        let volume = convert(amount, unit, supply.unit)?;
        let emissions = volume * factor;

        let stage = if params.include_treatment {
            "supply_and_treatment"
        } else {
            "supply"
        };
        let details = format!(
            "{} {} × {} kg CO2e/{} ({}) = {} kg CO2e",
            fmt_amount(volume),
            supply.unit,
            factor,
            supply.unit,
            stage,
            fmt_amount(emissions)
        );

        self.finish(
            ActivityKind::Water,
            &params.quantity,
            unit,
            volume,
            entry_factor(factor, supply.unit),
            emissions,
            Scope::Three,
            format!("{} - water {}", supply.provenance(), stage),
            details,
        )
    }

    /// Calculate every record and aggregate the successes.
    ///
    /// Failed records are excluded from the totals and listed as warnings in
    /// input order.
    pub fn calculate_bulk(&self, records: &[ActivityRecord], parallel: bool) -> TotalEmissions {
        let outcomes: Vec<Result<EmissionResult, CalculationError>> = if parallel {
            records.par_iter().map(|r| self.calculate_record(r)).collect()
        } else {
            records.iter().map(|r| self.calculate_record(r)).collect()
        };

        let mut results = Vec::with_capacity(outcomes.len());
        let mut warnings = Vec::new();

        for (index, (record, outcome)) in records.iter().zip(outcomes).enumerate() {
            match outcome {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!("Record {} ({}) skipped: {}", index, record.category, e);
                    warnings.push(RecordWarning {
                        index,
                        category: record.category.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        let mut totals = aggregate(results);
        totals.warnings = warnings;
        totals
    }

    fn ground_vehicle_keys(&self) -> Vec<String> {
        self.registry
            .list_keys(FactorCategory::Transport)
            .into_iter()
            .filter(|k| !k.starts_with("flight_"))
            .map(str::to_string)
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        kind: ActivityKind,
        supplied: &Quantity,
        unit: Unit,
        converted: f64,
        factor: UnitFactor,
        emissions: f64,
        scope: Scope,
        source: String,
        mut details: String,
    ) -> Result<EmissionResult, CalculationError> {
        // zero amounts against negative factors give -0.0
        let emissions = emissions + 0.0;
        if !emissions.is_finite() {
            return Err(CalculationError::Overflow {
                category: kind,
                amount: supplied.amount,
                unit: unit.label().to_string(),
            });
        }

        let large = supplied.amount > self.large_amount_threshold;
        if large {
            warn!(
                "{} amount {} {} exceeds review threshold {}",
                kind, supplied.amount, unit, self.large_amount_threshold
            );
            details.push_str(" [requires review: unusually large amount]");
        }

        Ok(EmissionResult {
            activity_type: kind,
            activity_amount: supplied.amount,
            activity_unit: unit.label().to_string(),
            converted_amount: converted,
            factor_unit: factor.unit,
            emissions_kg_co2e: emissions,
            scope,
            factor_used: factor.value,
            factor_source: source,
            calculation_details: details,
            requires_review: large,
            description: None,
        })
    }
}

fn validate_amount(amount: f64) -> Result<f64, CalculationError> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(CalculationError::InvalidAmount(amount));
    }
    Ok(amount)
}

fn convert(value: f64, from: Unit, to: Unit) -> Result<f64, CalculationError> {
    units::convert(value, from, to).map_err(|e| CalculationError::InvalidUnit {
        from: e.from.label().to_string(),
        to: e.to.label().to_string(),
    })
}

fn entry_factor(value: f64, unit: Unit) -> UnitFactor {
    UnitFactor { value, unit }
}

fn fmt_amount(value: f64) -> String {
    format!("{:.2}", value)
}
