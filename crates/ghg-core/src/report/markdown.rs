//! Markdown report generation

use super::EmissionsReport;
use crate::verification::{MetricStatus, VerificationResult};
use crate::Scope;

pub fn generate(report: &EmissionsReport) -> String {
    let totals = &report.totals;
    let mut s = String::new();

    s.push_str("# Emissions Report\n\n");
    s.push_str(&format!("**Report ID:** {}\n", report.id));
    s.push_str(&format!(
        "**Generated:** {}\n",
        report.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    s.push_str(&format!("**Factor tables:** `{}`\n\n", report.factor_table_version));

    s.push_str("## Totals\n\n");
    s.push_str(&format!(
        "**Total:** {:.2} kg CO2e ({:.3} t CO2e) from {} activities\n\n",
        totals.total_kg_co2e,
        totals.total_tonnes_co2e(),
        totals.breakdown.len()
    ));

    s.push_str("| Scope | kg CO2e |\n");
    s.push_str("|-------|---------|\n");
    for scope in Scope::ALL {
        s.push_str(&format!("| {} | {:.2} |\n", scope, totals.scope_total(scope)));
    }
    s.push('\n');

    if !totals.by_category.is_empty() {
        s.push_str("| Category | kg CO2e |\n");
        s.push_str("|----------|---------|\n");
        for (category, kg) in &totals.by_category {
            s.push_str(&format!("| {} | {:.2} |\n", category, kg));
        }
        s.push('\n');
    }

    if !totals.breakdown.is_empty() {
        s.push_str("## Breakdown\n\n");
        s.push_str("| Activity | Amount | Scope | kg CO2e | Calculation |\n");
        s.push_str("|----------|--------|-------|---------|-------------|\n");
        for result in &totals.breakdown {
            let activity = match &result.description {
                Some(description) => format!("{} ({})", result.activity_type, description),
                None => result.activity_type.to_string(),
            };
            s.push_str(&format!(
                "| {} | {} {} | {} | {:.2} | {}{} |\n",
                activity,
                result.activity_amount,
                result.activity_unit,
                result.scope.number(),
                result.emissions_kg_co2e,
                result.calculation_details,
                if result.requires_review { " ⚠" } else { "" }
            ));
        }
        s.push('\n');
    }

    if !totals.warnings.is_empty() {
        s.push_str("## Skipped Records\n\n");
        for warning in &totals.warnings {
            s.push_str(&format!(
                "- Record {} ({}): {}\n",
                warning.index + 1,
                warning.category,
                warning.message
            ));
        }
        s.push('\n');
    }

    if let Some(verification) = &report.verification {
        push_verification(&mut s, verification);
    }

    s
}

fn push_verification(s: &mut String, result: &VerificationResult) {
    s.push_str("## Verification\n\n");
    s.push_str(&format!("**Match score:** {:.1}/100\n", result.match_score));
    s.push_str(&format!("**Data completeness:** {:.1}%\n\n", result.data_completeness));
    s.push_str(&format!("{}\n\n", result.summary));

    s.push_str("| Metric | Reported | Calculated | Status |\n");
    s.push_str("|--------|----------|------------|--------|\n");
    for metric in &result.verified_metrics {
        let calculated = metric
            .calculated_value
            .map(|v| format!("{:.2} {}", v, metric.reported_unit))
            .unwrap_or_else(|| "-".to_string());
        let status = match (metric.status, metric.severity) {
            (MetricStatus::Discrepancy, Some(severity)) => format!("discrepancy ({})", severity),
            (status, _) => status.to_string(),
        };
        s.push_str(&format!(
            "| {} | {:.2} {} | {} | {} |\n",
            metric.metric_type, metric.reported_value, metric.reported_unit, calculated, status
        ));
    }
    s.push('\n');

    if !result.discrepancies.is_empty() {
        s.push_str("### Discrepancies\n\n");
        for d in &result.discrepancies {
            s.push_str(&format!(
                "#### {} [{}]\n\n",
                d.metric_type,
                d.severity.as_str().to_uppercase()
            ));
            s.push_str(&format!(
                "Reported {:.2} {}, calculated {:.2} {} ({:+.2}, {:.1}%)\n\n",
                d.reported_value,
                d.reported_unit,
                d.calculated_value,
                d.calculated_unit,
                d.difference_absolute,
                d.difference_percentage
            ));
            s.push_str("Possible explanations:\n");
            for explanation in &d.possible_explanations {
                s.push_str(&format!("- {}\n", explanation));
            }
            s.push('\n');
        }
    }

    if !result.recommendations.is_empty() {
        s.push_str("### Recommendations\n\n");
        for recommendation in &result.recommendations {
            s.push_str(&format!("- {}\n", recommendation));
        }
        s.push('\n');
    }
}
