//! Metric equivalence table
//!
//! Maps the metric names found in sustainability reports onto the figures
//! the aggregation engine produces, and normalises claim units into the
//! unit those figures are expressed in.

use crate::aggregate::TotalEmissions;
use crate::calculator::ActivityKind;
use crate::factors::normalise_key;
use crate::units::{self, Dimension, Unit};
use crate::Scope;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

/// Unit label for emission comparisons
pub const TONNES_CO2E: &str = "tonnes CO2e";

/// Calculated figure a claim is compared against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricTarget {
    Total,
    Scope(Scope),
    CategoryEmissions(ActivityKind),
    /// Consumed quantity; `None` category sums every category, `None`
    /// dimension takes the dimension of the claim's unit
    Consumption {
        category: Option<ActivityKind>,
        dimension: Option<Dimension>,
    },
}

impl MetricTarget {
    /// Resolve a metric name, narrowing totals to the claim's scope
    pub fn resolve(metric_type: &str, scope: Option<Scope>) -> Option<Self> {
        let target = *METRIC_TARGETS.get(normalise_key(metric_type).as_str())?;
        Some(match (target, scope) {
            (MetricTarget::Total, Some(scope)) => MetricTarget::Scope(scope),
            (target, _) => target,
        })
    }

    pub fn is_emissions(&self) -> bool {
        !matches!(self, MetricTarget::Consumption { .. })
    }

    pub fn label(&self) -> String {
        match self {
            MetricTarget::Total => "Total Emissions".to_string(),
            MetricTarget::Scope(scope) => format!("{} Emissions", scope),
            MetricTarget::CategoryEmissions(kind) => format!("{} Emissions", title(kind.as_str())),
            MetricTarget::Consumption {
                category: Some(kind), ..
            } => format!("{} Consumption", title(kind.as_str())),
            MetricTarget::Consumption {
                category: None,
                dimension: Some(Dimension::Energy),
            } => "Energy Consumption".to_string(),
            MetricTarget::Consumption {
                category: None,
                dimension: Some(Dimension::Distance),
            } => "Distance Travelled".to_string(),
            MetricTarget::Consumption { .. } => "Consumption".to_string(),
        }
    }

    /// Calculated value in the comparison unit, or `None` when no activity
    /// data contributed to this figure
    pub fn calculated(&self, totals: &TotalEmissions, dimension: Dimension) -> Option<f64> {
        match *self {
            MetricTarget::Total => (!totals.is_empty()).then(|| totals.total_tonnes_co2e()),
            MetricTarget::Scope(scope) => totals
                .has_scope(scope)
                .then(|| totals.scope_total(scope) / 1000.0),
            MetricTarget::CategoryEmissions(kind) => totals
                .has_category(kind)
                .then(|| totals.category_total(kind) / 1000.0),
            MetricTarget::Consumption { category: Some(kind), .. } => {
                totals.activity_total(kind, dimension).map(|t| t.amount)
            }
            MetricTarget::Consumption { category: None, .. } => totals.dimension_total(dimension),
        }
    }
}

/// A claimed value expressed in the comparison unit
#[derive(Debug, Clone, PartialEq)]
pub struct NormalisedValue {
    pub value: f64,
    pub unit: String,
    pub dimension: Dimension,
    /// The claim was stated in a different unit
    pub converted: bool,
}

/// Express a claim value in the unit its target is calculated in
pub fn normalise_claim_value(target: &MetricTarget, value: f64, unit: &str) -> Option<NormalisedValue> {
    if target.is_emissions() {
        let scale = emission_unit_scale(unit)?;
        return Some(NormalisedValue {
            value: value * scale,
            unit: TONNES_CO2E.to_string(),
            dimension: Dimension::Mass,
            converted: scale != 1.0,
        });
    }

    let MetricTarget::Consumption { dimension, .. } = target else {
        return None;
    };

    let parsed = Unit::parse(unit).ok()?;
    if dimension.map_or(false, |d| d != parsed.dimension()) {
        return None;
    }

    let canonical = parsed.dimension().canonical_unit();
    Some(NormalisedValue {
        value: units::to_canonical(value, parsed),
        unit: canonical.label().to_string(),
        dimension: parsed.dimension(),
        converted: parsed != canonical,
    })
}

static EMISSION_UNIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<mass>kg|kgs|kilograms?|t|tonnes?|tons?|metrictonnes?|metrictons?|mt|kt|kilotonnes?|thousandtonnes?|megatonnes?|milliontonnes?)(?:of)?(?:co2e?|co2eq|co2equivalents?|carbondioxideequivalents?|ghg|e)?$",
    )
    .unwrap()
});

static UNIT_NOISE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s_\-.()]+").unwrap());

static SCOPE_TEXT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:scope)?([123])$").unwrap());

/// Tonnes CO2e per one of `unit`, for emission units.
///
/// `Mt` (capital M) is megatonnes; `mt` and `MT` are metric tonnes.
pub fn emission_unit_scale(unit: &str) -> Option<f64> {
    let compact = UNIT_NOISE.replace_all(unit.trim(), "").replace('₂', "2");
    if compact.starts_with("Mt") {
        let rest = compact[2..].to_lowercase();
        return (rest.is_empty() || EMISSION_UNIT.is_match(&format!("t{}", rest))).then_some(1_000_000.0);
    }

    let lowered = compact.to_lowercase();
    let caps = EMISSION_UNIT.captures(&lowered)?;
    let scale = match &caps["mass"] {
        "kg" | "kgs" | "kilogram" | "kilograms" => 0.001,
        "kt" | "kilotonne" | "kilotonnes" | "thousandtonne" | "thousandtonnes" => 1_000.0,
        "megatonne" | "megatonnes" | "milliontonne" | "milliontonnes" => 1_000_000.0,
        _ => 1.0,
    };
    Some(scale)
}

/// Parse a scope written as `1`, `scope 1`, `Scope_2`, ...
pub fn parse_scope(raw: &str) -> Option<Scope> {
    let compact = UNIT_NOISE.replace_all(raw.trim(), "").to_lowercase();
    let caps = SCOPE_TEXT.captures(&compact)?;
    caps[1].parse::<u8>().ok().and_then(Scope::from_number)
}

fn title(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

static METRIC_TARGETS: Lazy<HashMap<&'static str, MetricTarget>> = Lazy::new(|| {
    let consumption = |category: Option<ActivityKind>, dimension: Option<Dimension>| MetricTarget::Consumption {
        category,
        dimension,
    };

    let mut table = HashMap::new();

    for name in [
        "total_emissions",
        "total_ghg_emissions",
        "total_carbon_emissions",
        "total_co2e",
        "total_co2e_emissions",
        "ghg_emissions",
        "greenhouse_gas_emissions",
        "carbon_emissions",
        "co2_emissions",
        "co2e_emissions",
        "carbon_footprint",
        "emissions",
        "gross_emissions",
    ] {
        table.insert(name, MetricTarget::Total);
    }

    for (scope, names) in [
        (
            Scope::One,
            &[
                "scope_1",
                "scope1",
                "scope_1_emissions",
                "scope1_emissions",
                "scope_1_ghg_emissions",
                "direct_emissions",
                "direct_ghg_emissions",
            ][..],
        ),
        (
            Scope::Two,
            &[
                "scope_2",
                "scope2",
                "scope_2_emissions",
                "scope2_emissions",
                "scope_2_ghg_emissions",
                "scope_2_location_based",
                "indirect_energy_emissions",
                "energy_indirect_emissions",
                "purchased_energy_emissions",
            ][..],
        ),
        (
            Scope::Three,
            &[
                "scope_3",
                "scope3",
                "scope_3_emissions",
                "scope3_emissions",
                "scope_3_ghg_emissions",
                "value_chain_emissions",
                "other_indirect_emissions",
                "supply_chain_emissions",
            ][..],
        ),
    ] {
        for name in names {
            table.insert(*name, MetricTarget::Scope(scope));
        }
    }

    for (name, kind) in [
        ("electricity_emissions", ActivityKind::Electricity),
        ("grid_electricity_emissions", ActivityKind::Electricity),
        ("fuel_emissions", ActivityKind::Fuel),
        ("combustion_emissions", ActivityKind::Fuel),
        ("stationary_combustion_emissions", ActivityKind::Fuel),
        ("transport_emissions", ActivityKind::Transport),
        ("ground_transport_emissions", ActivityKind::Transport),
        ("vehicle_emissions", ActivityKind::Transport),
        ("fleet_emissions", ActivityKind::Transport),
        ("flight_emissions", ActivityKind::Flight),
        ("air_travel_emissions", ActivityKind::Flight),
        ("aviation_emissions", ActivityKind::Flight),
        ("waste_emissions", ActivityKind::Waste),
        ("water_emissions", ActivityKind::Water),
    ] {
        table.insert(name, MetricTarget::CategoryEmissions(kind));
    }

    for (name, target) in [
        (
            "electricity_consumption",
            consumption(Some(ActivityKind::Electricity), Some(Dimension::Energy)),
        ),
        (
            "electricity_usage",
            consumption(Some(ActivityKind::Electricity), Some(Dimension::Energy)),
        ),
        (
            "electricity_use",
            consumption(Some(ActivityKind::Electricity), Some(Dimension::Energy)),
        ),
        (
            "power_consumption",
            consumption(Some(ActivityKind::Electricity), Some(Dimension::Energy)),
        ),
        ("energy_consumption", consumption(None, Some(Dimension::Energy))),
        ("energy_use", consumption(None, Some(Dimension::Energy))),
        ("total_energy_consumption", consumption(None, Some(Dimension::Energy))),
        ("fuel_consumption", consumption(Some(ActivityKind::Fuel), None)),
        ("fuel_use", consumption(Some(ActivityKind::Fuel), None)),
        ("fuel_used", consumption(Some(ActivityKind::Fuel), None)),
        ("water_consumption", consumption(Some(ActivityKind::Water), Some(Dimension::Volume))),
        ("water_usage", consumption(Some(ActivityKind::Water), Some(Dimension::Volume))),
        ("water_use", consumption(Some(ActivityKind::Water), Some(Dimension::Volume))),
        ("water_withdrawal", consumption(Some(ActivityKind::Water), Some(Dimension::Volume))),
        ("waste_generated", consumption(Some(ActivityKind::Waste), Some(Dimension::Mass))),
        ("waste_produced", consumption(Some(ActivityKind::Waste), Some(Dimension::Mass))),
        ("total_waste", consumption(Some(ActivityKind::Waste), Some(Dimension::Mass))),
        ("waste", consumption(Some(ActivityKind::Waste), Some(Dimension::Mass))),
        ("distance_travelled", consumption(None, Some(Dimension::Distance))),
        ("distance_traveled", consumption(None, Some(Dimension::Distance))),
        ("business_travel_distance", consumption(None, Some(Dimension::Distance))),
        ("flight_distance", consumption(Some(ActivityKind::Flight), Some(Dimension::Distance))),
        ("air_travel_distance", consumption(Some(ActivityKind::Flight), Some(Dimension::Distance))),
    ] {
        table.insert(name, target);
    }

    table
});
