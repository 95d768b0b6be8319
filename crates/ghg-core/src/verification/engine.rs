//! Claim verification engine

use super::equivalence::{normalise_claim_value, MetricTarget, NormalisedValue};
use super::{
    Discrepancy, ExtractedMetric, MetricStatus, Severity, VerificationResult, VerifiedMetric,
    MINOR_THRESHOLD, MODERATE_THRESHOLD,
};
use crate::aggregate::TotalEmissions;
use crate::Scope;
use tracing::debug;

/// Smallest denominator used for relative differences
const EPSILON: f64 = 1e-9;
/// Relative difference at which the penalty saturates
const PENALTY_SATURATION: f64 = 0.5;

const UNDERREPORTED: [&str; 2] = [
    "Different reporting boundaries may exclude some emission sources",
    "Potential understatement of emissions in the report",
];

const OVERREPORTED: [&str; 2] = [
    "Company may be using conservative estimation methods",
    "Activity data may not capture all emission sources",
];

const UNIT_CONVERSION: &str = "Unit conversion differences in methodology";

const MISSING_SCOPE_3: [&str; 2] = [
    "Missing Scope 3 categories in the calculation",
    "Supply chain emissions not captured in activity data",
];

const GENERAL: [&str; 3] = [
    "Different reporting periods between report and activity data",
    "Location-based vs market-based methodology differences",
    "Changes in emission factors between reporting years",
];

/// A claim that had a calculated counterpart
struct Comparison {
    target: MetricTarget,
    label: String,
    reported: NormalisedValue,
    calculated: f64,
    difference: f64,
    severity: Severity,
    confidence: f64,
}

/// Reconciles extracted claims with calculated totals
#[derive(Debug, Clone, Default)]
pub struct VerificationEngine;

impl VerificationEngine {
    pub fn new() -> Self {
        Self
    }

    /// Compare claims against totals.
    ///
    /// Pure: identical inputs always give an identical result. Data gaps are
    /// reported as `unverified` or `not_calculated` metrics, never as errors.
    pub fn compare(&self, claims: &[ExtractedMetric], totals: &TotalEmissions) -> VerificationResult {
        let mut verified_metrics = Vec::with_capacity(claims.len());
        let mut comparisons = Vec::new();
        let mut missing_targets: Vec<String> = Vec::new();

        let scope_3_claimed = claims.iter().any(|c| {
            matches!(
                MetricTarget::resolve(&c.metric_type, c.scope),
                Some(MetricTarget::Scope(Scope::Three))
            )
        });

        for claim in claims {
            let confidence = claim.confidence.clamp(0.0, 1.0);

            let Some(target) = MetricTarget::resolve(&claim.metric_type, claim.scope) else {
                debug!("No equivalence for claim '{}'", claim.metric_type);
                verified_metrics.push(unverified(claim, confidence, "no matching calculated metric"));
                continue;
            };

            let Some(reported) = normalise_claim_value(&target, claim.value, &claim.unit) else {
                debug!("Claim '{}' has incomparable unit '{}'", claim.metric_type, claim.unit);
                verified_metrics.push(unverified(
                    claim,
                    confidence,
                    &format!("unit '{}' cannot be compared with {}", claim.unit, target.label()),
                ));
                continue;
            };

            let label = target.label();

            let Some(calculated) = target.calculated(totals, reported.dimension) else {
                if !missing_targets.contains(&label) {
                    missing_targets.push(label.clone());
                }
                verified_metrics.push(VerifiedMetric {
                    metric_type: label,
                    reported_value: reported.value,
                    reported_unit: reported.unit,
                    calculated_value: None,
                    status: MetricStatus::NotCalculated,
                    severity: None,
                    confidence,
                    note: Some("no activity data supplied for this metric".to_string()),
                });
                continue;
            };

            let difference = relative_difference(reported.value, calculated);
            let severity = Severity::from_difference(difference);
            let status = if severity == Severity::Minor {
                MetricStatus::Verified
            } else {
                MetricStatus::Discrepancy
            };

            let note = reported
                .converted
                .then(|| format!("reported as {} {}", claim.value, claim.unit.trim()));

            verified_metrics.push(VerifiedMetric {
                metric_type: label.clone(),
                reported_value: reported.value,
                reported_unit: reported.unit.clone(),
                calculated_value: Some(calculated),
                status,
                severity: Some(severity),
                confidence: if status == MetricStatus::Discrepancy {
                    confidence * (1.0 - difference.min(1.0) / 2.0)
                } else {
                    confidence
                },
                note,
            });

            comparisons.push(Comparison {
                target,
                label,
                reported,
                calculated,
                difference,
                severity,
                confidence,
            });
        }

        let scope_3_missing = scope_3_claimed && totals.scope_total(Scope::Three) == 0.0;

        let mut discrepancies: Vec<Discrepancy> = comparisons
            .iter()
            .filter(|c| c.reported.value != c.calculated)
            .map(|c| Discrepancy {
                metric_type: c.label.clone(),
                reported_value: c.reported.value,
                reported_unit: c.reported.unit.clone(),
                calculated_value: c.calculated,
                calculated_unit: c.reported.unit.clone(),
                difference_absolute: c.calculated - c.reported.value,
                difference_percentage: c.difference * 100.0,
                severity: c.severity,
                possible_explanations: explanations(c, scope_3_missing),
            })
            .collect();

        discrepancies.sort_by(|a, b| b.severity.cmp(&a.severity));

        let match_score = match_score(&comparisons);
        let data_completeness = if claims.is_empty() {
            0.0
        } else {
            comparisons.len() as f64 / claims.len() as f64 * 100.0
        };

        let result_recommendations = recommendations(
            &comparisons,
            &verified_metrics,
            &missing_targets,
            data_completeness,
            claims.len(),
        );
        let summary = summary(match_score, &comparisons, &discrepancies, claims.len());

        VerificationResult {
            match_score,
            discrepancies,
            verified_metrics,
            summary,
            recommendations: result_recommendations,
            data_completeness,
        }
    }
}

fn unverified(claim: &ExtractedMetric, confidence: f64, reason: &str) -> VerifiedMetric {
    VerifiedMetric {
        metric_type: claim.metric_type.clone(),
        reported_value: claim.value,
        reported_unit: claim.unit.clone(),
        calculated_value: None,
        status: MetricStatus::Unverified,
        severity: None,
        confidence,
        note: Some(reason.to_string()),
    }
}

/// `|reported − calculated| / max(|reported|, ε)`
pub fn relative_difference(reported: f64, calculated: f64) -> f64 {
    (reported - calculated).abs() / reported.abs().max(EPSILON)
}

/// Continuous piecewise-linear penalty: 0→10 across the minor band,
/// 10→40 across the moderate band, 40→100 across the major band
pub fn penalty(d: f64) -> f64 {
    if d < MINOR_THRESHOLD {
        10.0 * d / MINOR_THRESHOLD
    } else if d < MODERATE_THRESHOLD {
        10.0 + 30.0 * (d - MINOR_THRESHOLD) / (MODERATE_THRESHOLD - MINOR_THRESHOLD)
    } else {
        let span = (d - MODERATE_THRESHOLD) / (PENALTY_SATURATION - MODERATE_THRESHOLD);
        40.0 + 60.0 * span.min(1.0)
    }
}

fn match_score(comparisons: &[Comparison]) -> f64 {
    if comparisons.is_empty() {
        return 0.0;
    }

    let weight: f64 = comparisons.iter().map(|c| c.confidence).sum();
    let average_penalty = if weight > 0.0 {
        comparisons.iter().map(|c| c.confidence * penalty(c.difference)).sum::<f64>() / weight
    } else {
        comparisons.iter().map(|c| penalty(c.difference)).sum::<f64>() / comparisons.len() as f64
    };

    (100.0 - average_penalty).clamp(0.0, 100.0)
}

fn explanations(comparison: &Comparison, scope_3_missing: bool) -> Vec<String> {
    let mut out: Vec<&str> = Vec::new();

    if comparison.reported.converted {
        out.push(UNIT_CONVERSION);
    }

    if scope_3_missing && comparison.target.is_emissions() {
        out.extend(MISSING_SCOPE_3);
    }

    if comparison.calculated > comparison.reported.value {
        out.extend(UNDERREPORTED);
    } else {
        out.extend(OVERREPORTED);
    }

    out.extend(GENERAL);
    if !comparison.reported.converted {
        out.push(UNIT_CONVERSION);
    }

    out.into_iter().map(str::to_string).collect()
}

fn recommendations(
    comparisons: &[Comparison],
    verified_metrics: &[VerifiedMetric],
    missing_targets: &[String],
    data_completeness: f64,
    claim_count: usize,
) -> Vec<String> {
    let mut recs = Vec::new();

    if claim_count == 0 {
        recs.push("No claims supplied; provide metrics extracted from the report to verify".to_string());
        return recs;
    }

    let mut flagged: Vec<&Comparison> = comparisons.iter().filter(|c| c.severity != Severity::Minor).collect();
    flagged.sort_by(|a, b| b.severity.cmp(&a.severity));

    for c in &flagged {
        let noun = if c.target.is_emissions() { "emissions" } else { "consumption" };
        if c.calculated > c.reported.value {
            recs.push(format!(
                "{} reported as {:.2} {} is {:.1}% below the calculated {:.2} {}: reported {} may be understated",
                c.label,
                c.reported.value,
                c.reported.unit,
                c.difference * 100.0,
                c.calculated,
                c.reported.unit,
                noun
            ));
        } else {
            recs.push(format!(
                "{} reported as {:.2} {} is {:.1}% above the calculated {:.2} {}: the report may be over-reporting (conservative estimate) or activity data may be incomplete",
                c.label,
                c.reported.value,
                c.reported.unit,
                c.difference * 100.0,
                c.calculated,
                c.reported.unit
            ));
        }
    }

    if data_completeness < 100.0 {
        if !missing_targets.is_empty() {
            recs.push(format!(
                "Supply activity data for {} to complete the comparison",
                missing_targets.join(", ")
            ));
        }

        let unverified = verified_metrics
            .iter()
            .filter(|m| m.status == MetricStatus::Unverified)
            .count();
        if unverified > 0 {
            recs.push(format!(
                "{} claim(s) could not be matched or converted; review their metric type and unit",
                unverified
            ));
        }
    }

    if flagged.is_empty() && !comparisons.is_empty() {
        recs.push("Reported figures align with calculated estimates; no major concerns identified".to_string());
    }

    recs
}

fn summary(
    match_score: f64,
    comparisons: &[Comparison],
    discrepancies: &[Discrepancy],
    claim_count: usize,
) -> String {
    if comparisons.is_empty() {
        return "No comparable metrics found between the report and calculated data.".to_string();
    }

    let base = if match_score >= 80.0 {
        "Reported figures closely align with calculated estimates."
    } else if match_score >= 50.0 {
        "Some discrepancies detected between reported and calculated values."
    } else {
        "Significant discrepancies detected; detailed review recommended."
    };

    let verified = comparisons.iter().filter(|c| c.severity == Severity::Minor).count();
    let major = discrepancies.iter().filter(|d| d.severity == Severity::Major).count();
    let moderate = discrepancies.iter().filter(|d| d.severity == Severity::Moderate).count();

    let mut details = vec![format!("{} of {} claim(s) compared", comparisons.len(), claim_count)];
    if verified > 0 {
        details.push(format!("{} verified", verified));
    }
    if major > 0 {
        details.push(format!("{} major discrepancy(ies)", major));
    }
    if moderate > 0 {
        details.push(format!("{} moderate discrepancy(ies)", moderate));
    }

    format!("{} {}.", base, details.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate;
    use crate::calculator::{ActivityKind, EmissionResult};
    use crate::units::Unit;

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

    fn scope_1_totals(tonnes: f64) -> TotalEmissions {
        aggregate(vec![result(
            ActivityKind::Fuel,
            Scope::One,
            tonnes * 1000.0,
            1.0,
            Unit::Litres,
        )])
    }

    fn engine() -> VerificationEngine {
        VerificationEngine::new()
    }

    #[test]
    fn test_moderate_scope_1_discrepancy() {
        let totals = scope_1_totals(15_200.0);
        let claims = vec![ExtractedMetric::new("scope_1_emissions", 12_500.0, "tCO2e")];

        let result = engine().compare(&claims, &totals);
        assert_eq!(result.discrepancies.len(), 1);

        let d = &result.discrepancies[0];
        assert!((d.difference_percentage - 21.6).abs() < 1e-9);
        assert_eq!(d.severity, Severity::Moderate);
        assert_eq!(d.difference_absolute, 2_700.0);
        assert_eq!(d.metric_type, "Scope 1 Emissions");
        assert_eq!(result.verified_metrics[0].status, MetricStatus::Discrepancy);
        assert!(result.recommendations[0].contains("understated"));
        assert_eq!(result.data_completeness, 100.0);
    }

    #[test]
    fn test_severity_boundaries_through_compare() {
        let cases = [
            (109.99, Severity::Minor),
            (110.0, Severity::Moderate),
            (124.99, Severity::Moderate),
            (125.0, Severity::Major),
        ];

        for (calculated, expected) in cases {
            let totals = scope_1_totals(calculated);
            let claims = vec![ExtractedMetric::new("Scope 1", 100.0, "tonnes")];
            let result = engine().compare(&claims, &totals);
            assert_eq!(
                result.verified_metrics[0].severity,
                Some(expected),
                "calculated {}",
                calculated
            );
        }
    }

    #[test]
    fn test_unverified_and_not_calculated() {
        let totals = scope_1_totals(10.0);
        let claims = vec![
            ExtractedMetric::new("employee_count", 1_200.0, "people"),
            ExtractedMetric::new("scope_1_emissions", 10.0, "kWh"),
            ExtractedMetric::new("scope_2_emissions", 5.0, "tCO2e"),
            ExtractedMetric::new("water_consumption", 10.0, "m3"),
        ];

        let result = engine().compare(&claims, &totals);
        let statuses: Vec<MetricStatus> = result.verified_metrics.iter().map(|m| m.status).collect();
        assert_eq!(
            statuses,
            vec![
                MetricStatus::Unverified,
                MetricStatus::Unverified,
                MetricStatus::NotCalculated,
                MetricStatus::NotCalculated,
            ]
        );
        assert!(result.verified_metrics.iter().all(|m| m.calculated_value.is_none()));
        assert_eq!(result.match_score, 0.0);
        assert_eq!(result.data_completeness, 0.0);
        assert!(result.summary.starts_with("No comparable metrics"));
        assert!(result
            .recommendations
            .iter()
            .any(|r| r.contains("Scope 2 Emissions") && r.contains("Water Consumption")));
    }

    #[test]
    fn test_exact_match_scores_100() {
        let totals = scope_1_totals(500.0);
        let claims = vec![ExtractedMetric::new("total emissions", 500.0, "tCO2e")];

        let result = engine().compare(&claims, &totals);
        assert_eq!(result.match_score, 100.0);
        assert!(result.discrepancies.is_empty());
        assert_eq!(result.verified_metrics[0].status, MetricStatus::Verified);
        assert!(result.summary.starts_with("Reported figures closely align"));
        assert!(result.recommendations.iter().any(|r| r.contains("align")));
    }

    #[test]
    fn test_kg_claim_is_converted_and_explained() {
        let totals = scope_1_totals(120.0);
        let claims = vec![ExtractedMetric::new("scope 1 emissions", 80_000.0, "kg CO2e")];

        let result = engine().compare(&claims, &totals);
        let d = &result.discrepancies[0];
        assert!((d.reported_value - 80.0).abs() < 1e-9);
        assert_eq!(d.reported_unit, "tonnes CO2e");
        assert_eq!(d.severity, Severity::Major);
        assert_eq!(d.possible_explanations[0], UNIT_CONVERSION);
        assert_eq!(
            d.possible_explanations
                .iter()
                .filter(|e| e.as_str() == UNIT_CONVERSION)
                .count(),
            1
        );
    }

    #[test]
    fn test_missing_scope_3_explanation() {
        let totals = scope_1_totals(100.0);
        let claims = vec![
            ExtractedMetric::new("total_emissions", 150.0, "tCO2e"),
            ExtractedMetric::new("scope 3 emissions", 50.0, "tCO2e"),
        ];

        let result = engine().compare(&claims, &totals);
        let total = &result.discrepancies[0];
        assert_eq!(total.metric_type, "Total Emissions");
        assert_eq!(total.possible_explanations[0], MISSING_SCOPE_3[0]);
        assert_eq!(result.verified_metrics[1].status, MetricStatus::NotCalculated);
        assert!(result.recommendations.iter().any(|r| r.contains("over-reporting")));
    }

    #[test]
    fn test_discrepancies_sorted_by_severity() {
        let totals = aggregate(vec![
            result(ActivityKind::Fuel, Scope::One, 100_000.0, 1.0, Unit::Litres),
            result(ActivityKind::Electricity, Scope::Two, 100_000.0, 1.0, Unit::Kwh),
            result(ActivityKind::Water, Scope::Three, 100_000.0, 1.0, Unit::CubicMetres),
        ]);
        let claims = vec![
            ExtractedMetric::new("scope 1", 98.0, "t"),
            ExtractedMetric::new("scope 2", 50.0, "t"),
            ExtractedMetric::new("scope 3", 85.0, "t"),
        ];

        let result = engine().compare(&claims, &totals);
        let severities: Vec<Severity> = result.discrepancies.iter().map(|d| d.severity).collect();
        assert_eq!(severities, vec![Severity::Major, Severity::Moderate, Severity::Minor]);
    }

    #[test]
    fn test_match_score_weighted_by_confidence() {
        let totals = aggregate(vec![
            result(ActivityKind::Fuel, Scope::One, 100_000.0, 1.0, Unit::Litres),
            result(ActivityKind::Electricity, Scope::Two, 100_000.0, 1.0, Unit::Kwh),
        ]);
        let exact = ExtractedMetric::new("scope 1", 100.0, "t");
        let wild = ExtractedMetric::new("scope 2", 10.0, "t");

        let even = engine().compare(&[exact.clone(), wild.clone()], &totals);
        assert!((even.match_score - 50.0).abs() < 1e-9);

        let trusted = engine().compare(&[exact, wild.with_confidence(0.25)], &totals);
        assert!((trusted.match_score - 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_penalty_is_continuous() {
        for boundary in [MINOR_THRESHOLD, MODERATE_THRESHOLD, PENALTY_SATURATION] {
            let below = penalty(boundary - 1e-12);
            let at = penalty(boundary);
            assert!((below - at).abs() < 1e-6, "jump at {}", boundary);
        }
        assert_eq!(penalty(0.0), 0.0);
        assert_eq!(penalty(5.0), 100.0);
    }

    #[test]
    fn test_consumption_claim() {
        let totals = aggregate(vec![result(
            ActivityKind::Electricity,
            Scope::Two,
            36_550.0,
            50_000.0,
            Unit::Kwh,
        )]);
        let claims = vec![ExtractedMetric::new("Electricity consumption", 50.0, "MWh")];

        let result = engine().compare(&claims, &totals);
        let metric = &result.verified_metrics[0];
        assert_eq!(metric.status, MetricStatus::Verified);
        assert_eq!(metric.reported_unit, "kWh");
        assert_eq!(metric.calculated_value, Some(50_000.0));
    }

    #[test]
    fn test_compare_is_pure() {
        let totals = scope_1_totals(15_200.0);
        let claims = vec![
            ExtractedMetric::new("scope_1_emissions", 12_500.0, "tCO2e"),
            ExtractedMetric::new("scope_3_emissions", 1.0, "tCO2e"),
        ];
        assert_eq!(engine().compare(&claims, &totals), engine().compare(&claims, &totals));
    }

    #[test]
    fn test_no_claims() {
        let result = engine().compare(&[], &scope_1_totals(1.0));
        assert_eq!(result.match_score, 0.0);
        assert_eq!(result.data_completeness, 0.0);
        assert_eq!(result.recommendations.len(), 1);
    }
}
