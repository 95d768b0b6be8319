//! Verification of reported metrics against calculated emissions

pub mod engine;
pub mod equivalence;

pub use engine::VerificationEngine;
pub use equivalence::{MetricTarget, TONNES_CO2E};

use crate::Scope;
use serde::{Deserialize, Deserializer, Serialize};

/// Discrepancies below this relative difference are minor
pub const MINOR_THRESHOLD: f64 = 0.10;
/// Discrepancies at or above this relative difference are major
pub const MODERATE_THRESHOLD: f64 = 0.25;

/// A metric extracted from a sustainability report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedMetric {
    pub metric_type: String,
    pub value: f64,
    #[serde(default)]
    pub unit: String,
    #[serde(
        default,
        deserialize_with = "deserialize_scope",
        skip_serializing_if = "Option::is_none"
    )]
    pub scope: Option<Scope>,
    /// Extraction confidence, 0 to 1
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    1.0
}

impl ExtractedMetric {
    pub fn new(metric_type: &str, value: f64, unit: &str) -> Self {
        Self {
            metric_type: metric_type.to_string(),
            value,
            unit: unit.to_string(),
            scope: None,
            confidence: default_confidence(),
        }
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }
}

/// Accepts `1`, `"1"`, `"Scope 1"` or null
fn deserialize_scope<'de, D>(deserializer: D) -> Result<Option<Scope>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u8),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(n)) => Scope::from_number(n)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("scope must be 1, 2 or 3, got {}", n))),
        Some(Raw::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(Raw::Text(text)) => equivalence::parse_scope(&text)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("unrecognized scope '{}'", text))),
    }
}

/// Severity of a reported/calculated mismatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Minor,
    Moderate,
    Major,
}

impl Severity {
    /// Classify a relative difference; band boundaries belong to the higher band
    pub fn from_difference(d: f64) -> Self {
        if d < MINOR_THRESHOLD {
            Severity::Minor
        } else if d < MODERATE_THRESHOLD {
            Severity::Moderate
        } else {
            Severity::Major
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Minor => "minor",
            Severity::Moderate => "moderate",
            Severity::Major => "major",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome for a single claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricStatus {
    /// Within the minor band
    Verified,
    /// Moderate or major difference
    Discrepancy,
    /// No equivalence entry, or a unit that cannot be compared
    Unverified,
    /// Recognized metric with no contributing activity data
    NotCalculated,
}

impl std::fmt::Display for MetricStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MetricStatus::Verified => "verified",
            MetricStatus::Discrepancy => "discrepancy",
            MetricStatus::Unverified => "unverified",
            MetricStatus::NotCalculated => "not_calculated",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub metric_type: String,
    pub reported_value: f64,
    pub reported_unit: String,
    pub calculated_value: f64,
    pub calculated_unit: String,
    /// Calculated minus reported
    pub difference_absolute: f64,
    pub difference_percentage: f64,
    pub severity: Severity,
    pub possible_explanations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifiedMetric {
    pub metric_type: String,
    pub reported_value: f64,
    pub reported_unit: String,
    pub calculated_value: Option<f64>,
    pub status: MetricStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Result of one verification run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    /// 0 to 100
    pub match_score: f64,
    pub discrepancies: Vec<Discrepancy>,
    pub verified_metrics: Vec<VerifiedMetric>,
    pub summary: String,
    pub recommendations: Vec<String>,
    /// Share of claims that had a calculated counterpart, 0 to 100
    pub data_completeness: f64,
}

impl VerificationResult {
    pub fn has_major_discrepancy(&self) -> bool {
        self.discrepancies.iter().any(|d| d.severity == Severity::Major)
    }

    pub fn count_status(&self, status: MetricStatus) -> usize {
        self.verified_metrics.iter().filter(|m| m.status == status).count()
    }

    pub fn count_severity(&self, severity: Severity) -> usize {
        self.discrepancies.iter().filter(|d| d.severity == severity).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_bands() {
        assert_eq!(Severity::from_difference(0.0), Severity::Minor);
        assert_eq!(Severity::from_difference(0.0999), Severity::Minor);
        assert_eq!(Severity::from_difference(0.10), Severity::Moderate);
        assert_eq!(Severity::from_difference(0.2499), Severity::Moderate);
        assert_eq!(Severity::from_difference(0.25), Severity::Major);
        assert_eq!(Severity::from_difference(3.0), Severity::Major);
        assert!(Severity::Major > Severity::Moderate);
    }

    #[test]
    fn test_metric_deserialization() {
        let metrics: Vec<ExtractedMetric> = serde_json::from_str(
            r#"[
                { "metric_type": "carbon_emissions", "value": 12500, "unit": "tCO2e", "scope": "Scope 1" },
                { "metric_type": "carbon_emissions", "value": 900, "unit": "tCO2e", "scope": 3, "confidence": 0.4 },
                { "metric_type": "water_consumption", "value": 10, "unit": "m3", "scope": null }
            ]"#,
        )
        .unwrap();

        assert_eq!(metrics[0].scope, Some(Scope::One));
        assert_eq!(metrics[0].confidence, 1.0);
        assert_eq!(metrics[1].scope, Some(Scope::Three));
        assert_eq!(metrics[1].confidence, 0.4);
        assert_eq!(metrics[2].scope, None);

        let bad = serde_json::from_str::<ExtractedMetric>(
            r#"{ "metric_type": "x", "value": 1, "unit": "t", "scope": "scope 9" }"#,
        );
        assert!(bad.is_err());
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&MetricStatus::NotCalculated).unwrap(),
            "\"not_calculated\""
        );
        assert_eq!(serde_json::to_string(&Severity::Moderate).unwrap(), "\"moderate\"");
    }
}
