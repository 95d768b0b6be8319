//! Aggregation of per-activity results into totals

use crate::calculator::{ActivityKind, EmissionResult};
use crate::units::{self, Dimension, Unit};
use crate::Scope;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Quantity consumed by one category, in the dimension's canonical unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityTotal {
    pub category: ActivityKind,
    pub dimension: Dimension,
    pub amount: f64,
    pub unit: Unit,
}

/// A record that failed during bulk calculation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordWarning {
    /// Zero-based position in the input batch
    pub index: usize,
    pub category: String,
    pub message: String,
}

/// Totals derived from a set of emission results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TotalEmissions {
    pub total_kg_co2e: f64,
    pub by_scope: BTreeMap<Scope, f64>,
    pub by_category: BTreeMap<ActivityKind, f64>,
    #[serde(default)]
    pub activity_totals: Vec<ActivityTotal>,
    pub breakdown: Vec<EmissionResult>,
    #[serde(default)]
    pub warnings: Vec<RecordWarning>,
}

impl TotalEmissions {
    pub fn total_tonnes_co2e(&self) -> f64 {
        self.total_kg_co2e / 1000.0
    }

    pub fn scope_total(&self, scope: Scope) -> f64 {
        self.by_scope.get(&scope).copied().unwrap_or(0.0)
    }

    pub fn category_total(&self, category: ActivityKind) -> f64 {
        self.by_category.get(&category).copied().unwrap_or(0.0)
    }

    /// Whether any activity contributed to the scope
    pub fn has_scope(&self, scope: Scope) -> bool {
        self.breakdown.iter().any(|r| r.scope == scope)
    }

    pub fn has_category(&self, category: ActivityKind) -> bool {
        self.by_category.contains_key(&category)
    }

    /// Consumed quantity for a category in the given dimension, if any was recorded
    pub fn activity_total(&self, category: ActivityKind, dimension: Dimension) -> Option<&ActivityTotal> {
        self.activity_totals
            .iter()
            .find(|t| t.category == category && t.dimension == dimension)
    }

    /// Total consumed quantity across categories for a dimension
    pub fn dimension_total(&self, dimension: Dimension) -> Option<f64> {
        let values: Vec<f64> = self
            .activity_totals
            .iter()
            .filter(|t| t.dimension == dimension)
            .map(|t| t.amount)
            .collect();

        if values.is_empty() {
            None
        } else {
            Some(ordered_sum(values))
        }
    }

    pub fn is_empty(&self) -> bool {
        self.breakdown.is_empty()
    }
}

/// Fold emission results into totals.
///
/// Values are summed in sorted order, so any permutation of the input gives
/// bit-identical totals. Empty input gives zero totals with all three scopes
/// present.
pub fn aggregate<I>(results: I) -> TotalEmissions
where
    I: IntoIterator<Item = EmissionResult>,
{
    let breakdown: Vec<EmissionResult> = results.into_iter().collect();

    let mut scope_values: BTreeMap<Scope, Vec<f64>> = Scope::ALL.iter().map(|s| (*s, Vec::new())).collect();
    let mut category_values: BTreeMap<ActivityKind, Vec<f64>> = BTreeMap::new();
    let mut quantity_values: BTreeMap<(ActivityKind, Dimension), Vec<f64>> = BTreeMap::new();

    for result in &breakdown {
        scope_values
            .entry(result.scope)
            .or_default()
            .push(result.emissions_kg_co2e);

        category_values
            .entry(result.activity_type)
            .or_default()
            .push(result.emissions_kg_co2e);

        quantity_values
            .entry((result.activity_type, result.factor_unit.dimension()))
            .or_default()
            .push(units::to_canonical(result.converted_amount, result.factor_unit));
    }

    let total_kg_co2e = ordered_sum(breakdown.iter().map(|r| r.emissions_kg_co2e).collect());

    let by_scope = scope_values
        .into_iter()
        .map(|(scope, values)| (scope, ordered_sum(values)))
        .collect();

    let by_category = category_values
        .into_iter()
        .map(|(category, values)| (category, ordered_sum(values)))
        .collect();

    let activity_totals = quantity_values
        .into_iter()
        .map(|((category, dimension), values)| ActivityTotal {
            category,
            dimension,
            amount: ordered_sum(values),
            unit: dimension.canonical_unit(),
        })
        .collect();

    TotalEmissions {
        total_kg_co2e,
        by_scope,
        by_category,
        activity_totals,
        breakdown,
        warnings: Vec::new(),
    }
}

/// Sum in `total_cmp` order, starting from +0.0
fn ordered_sum(mut values: Vec<f64>) -> f64 {
    values.sort_by(f64::total_cmp);
    values.into_iter().fold(0.0, |acc, v| acc + v)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(kind: ActivityKind, scope: Scope, kg: f64, converted: f64, unit: Unit) -> EmissionResult {
        EmissionResult {
            activity_type: kind,
            activity_amount: converted,
            activity_unit: unit.label().to_string(),
            converted_amount: converted,
            factor_unit: unit,
            emissions_kg_co2e: kg,
            scope,
            factor_used: 1.0,
            factor_source: "Test".to_string(),
            calculation_details: String::new(),
            requires_review: false,
            description: None,
        }
    }

    fn sample() -> Vec<EmissionResult> {
        vec![
            result(ActivityKind::Fuel, Scope::One, 13_400.0, 5_000.0, Unit::Litres),
            result(ActivityKind::Electricity, Scope::Two, 36_550.0, 50_000.0, Unit::Kwh),
            result(ActivityKind::Waste, Scope::Three, -90_000.0, 10.0, Unit::Tonnes),
            result(ActivityKind::Water, Scope::Three, 0.1, 0.3, Unit::CubicMetres),
            result(ActivityKind::Fuel, Scope::One, 1e-7, 0.2, Unit::Kwh),
            result(ActivityKind::Flight, Scope::Three, 1.0e16, 1.0, Unit::Km),
        ]
    }

    #[test]
    fn test_empty_input_gives_zero_totals() {
        let totals = aggregate(Vec::new());
        assert_eq!(totals.total_kg_co2e, 0.0);
        assert_eq!(totals.by_scope.len(), 3);
        assert!(totals.by_scope.values().all(|v| *v == 0.0));
        assert!(totals.by_category.is_empty());
        assert!(totals.breakdown.is_empty());
        assert!(totals.is_empty());
        assert!(!totals.has_scope(Scope::One));
        assert!(totals.total_kg_co2e.is_sign_positive());
        assert!(totals.by_scope.values().all(|v| v.is_sign_positive()));
        assert_eq!(format!("{:.2}", totals.scope_total(Scope::Two)), "0.00");

        let json = serde_json::to_string(&totals).unwrap();
        assert!(!json.contains("-0.0"));
    }

    #[test]
    fn test_permutations_give_identical_totals() {
        let forward = aggregate(sample());

        let mut reversed_input = sample();
        reversed_input.reverse();
        let reversed = aggregate(reversed_input);

        let mut rotated_input = sample();
        rotated_input.rotate_left(2);
        let rotated = aggregate(rotated_input);

        for other in [&reversed, &rotated] {
            assert_eq!(forward.total_kg_co2e.to_bits(), other.total_kg_co2e.to_bits());
            assert_eq!(forward.by_scope, other.by_scope);
            assert_eq!(forward.by_category, other.by_category);
            assert_eq!(forward.activity_totals, other.activity_totals);
        }
    }

    #[test]
    fn test_sum_invariants() {
        let inputs = vec![
            result(ActivityKind::Fuel, Scope::One, 13_400.0, 5_000.0, Unit::Litres),
            result(ActivityKind::Electricity, Scope::Two, 36_550.0, 50_000.0, Unit::Kwh),
            result(ActivityKind::Waste, Scope::Three, -90_000.0, 10.0, Unit::Tonnes),
            result(ActivityKind::Water, Scope::Three, 37.73, 100.0, Unit::CubicMetres),
        ];
        let totals = aggregate(inputs);

        let breakdown_sum: f64 = totals.breakdown.iter().map(|r| r.emissions_kg_co2e).sum();
        let scope_sum: f64 = totals.by_scope.values().sum();
        let category_sum: f64 = totals.by_category.values().sum();

        assert!((totals.total_kg_co2e - breakdown_sum).abs() < 1e-6);
        assert!((totals.total_kg_co2e - scope_sum).abs() < 1e-6);
        assert!((totals.total_kg_co2e - category_sum).abs() < 1e-6);
        assert!((totals.scope_total(Scope::Three) - (-89_962.27)).abs() < 1e-6);
    }

    #[test]
    fn test_activity_totals_are_canonical() {
        let totals = aggregate(vec![
            result(ActivityKind::Fuel, Scope::One, 1.0, 2_000.0, Unit::Litres),
            result(ActivityKind::Fuel, Scope::One, 1.0, 1.0, Unit::CubicMetres),
            result(ActivityKind::Fuel, Scope::One, 1.0, 100.0, Unit::Kwh),
        ]);

        let volume = totals.activity_total(ActivityKind::Fuel, Dimension::Volume).unwrap();
        assert_eq!(volume.unit, Unit::CubicMetres);
        assert!((volume.amount - 3.0).abs() < 1e-9);

        let energy = totals.activity_total(ActivityKind::Fuel, Dimension::Energy).unwrap();
        assert_eq!(energy.amount, 100.0);
        assert_eq!(totals.dimension_total(Dimension::Energy), Some(100.0));
        assert_eq!(totals.dimension_total(Dimension::Mass), None);
    }

    #[test]
    fn test_negative_totals_not_clamped() {
        let totals = aggregate(vec![result(
            ActivityKind::Waste,
            Scope::Three,
            -90_000.0,
            10.0,
            Unit::Tonnes,
        )]);
        assert_eq!(totals.total_kg_co2e, -90_000.0);
        assert_eq!(totals.category_total(ActivityKind::Waste), -90_000.0);
        assert!(totals.has_scope(Scope::Three));
        assert!(!totals.has_scope(Scope::Two));
    }

    #[test]
    fn test_serializes_scope_keys_as_numbers() {
        let totals = aggregate(sample());
        let json = serde_json::to_value(&totals).unwrap();
        assert!(json["by_scope"].get("1").is_some());
        assert!(json["by_category"].get("electricity").is_some());

        let back: TotalEmissions = serde_json::from_value(json).unwrap();
        assert_eq!(back.by_scope, totals.by_scope);
    }
}
