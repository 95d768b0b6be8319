//! Report generation

pub mod json;
pub mod markdown;

use crate::aggregate::TotalEmissions;
use crate::verification::VerificationResult;
use crate::CoreResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A calculation run, optionally with its verification, as handed to renderers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmissionsReport {
    pub id: Uuid,
    pub generated_at: DateTime<Utc>,
    /// Fingerprint of the factor tables the totals were calculated with
    pub factor_table_version: String,
    pub totals: TotalEmissions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationResult>,
}

impl EmissionsReport {
    pub fn new(
        factor_table_version: &str,
        totals: TotalEmissions,
        verification: Option<VerificationResult>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            generated_at: Utc::now(),
            factor_table_version: factor_table_version.to_string(),
            totals,
            verification,
        }
    }
}

/// Report format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Json,
    Markdown,
}

impl std::str::FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(ReportFormat::Json),
            "markdown" | "md" => Ok(ReportFormat::Markdown),
            other => Err(format!("unknown report format '{}' (expected json or markdown)", other)),
        }
    }
}

/// Generate report in specified format
pub fn generate_report(report: &EmissionsReport, format: ReportFormat) -> CoreResult<String> {
    match format {
        ReportFormat::Json => json::generate(report),
        ReportFormat::Markdown => Ok(markdown::generate(report)),
    }
}
