//! JSON report generation

use super::EmissionsReport;
use crate::{CoreError, CoreResult};

pub fn generate(report: &EmissionsReport) -> CoreResult<String> {
    serde_json::to_string_pretty(report)
        .map_err(|e| CoreError::Serialization(format!("JSON serialization failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate;

    #[test]
    fn test_json_report_fields() {
        let report = EmissionsReport::new("abc123", aggregate(Vec::new()), None);
        let json = generate(&report).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["factor_table_version"], "abc123");
        assert_eq!(value["totals"]["total_kg_co2e"], 0.0);
        assert!(value.get("verification").is_none());
        assert!(value["id"].is_string());
    }
}
