//! Emissions calculation and verification CLI

use clap::{Parser, Subcommand};
use ghg_core::report::{self, ReportFormat};
use ghg_core::{
    ActivityRecord, CoreError, CoreResult, Engine, EngineConfig, ExtractedMetric, FactorCategory,
    MetricStatus, Scope, Severity,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "ghg")]
#[command(about = "Greenhouse-gas emissions calculation and claim verification")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the factor tables (overrides config and environment)
    #[arg(long, global = true)]
    factors_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Calculate emissions for a file of activity records
    Calculate {
        /// Path to activity records (JSON)
        #[arg(short, long)]
        file: PathBuf,

        /// Output format (json, markdown)
        #[arg(short, long, default_value = "markdown")]
        output: String,

        /// Output file (defaults to stdout)
        #[arg(short = 'O', long)]
        output_file: Option<PathBuf>,
    },

    /// Verify reported metrics against activity data
    Verify {
        /// Path to activity records (JSON)
        #[arg(short, long)]
        activities: PathBuf,

        /// Path to extracted claims (JSON)
        #[arg(short, long)]
        claims: PathBuf,

        /// Report format for --output-file (json, markdown)
        #[arg(short, long, default_value = "markdown")]
        output: String,

        /// Write the full report to this file
        #[arg(short = 'O', long)]
        output_file: Option<PathBuf>,
    },

    /// List conversion factors
    Factors {
        /// Only this category (electricity, fuel, transport, waste, water)
        #[arg(short, long)]
        category: Option<String>,
    },

    /// List countries with their own grid electricity factor
    Countries,
}

/// Activity files hold either a bare list or `{"activities": [...]}`
#[derive(Deserialize)]
#[serde(untagged)]
enum ActivityFile {
    List(Vec<ActivityRecord>),
    Wrapped { activities: Vec<ActivityRecord> },
}

/// Claim files hold either a bare list, `{"claims": [...]}` or `{"metrics": [...]}`
#[derive(Deserialize)]
#[serde(untagged)]
enum ClaimFile {
    List(Vec<ExtractedMetric>),
    Claims { claims: Vec<ExtractedMetric> },
    Metrics { metrics: Vec<ExtractedMetric> },
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set subscriber: {}", e);
    }

    let engine = match build_engine(cli.config.as_deref(), cli.factors_dir) {
        Ok(engine) => engine,
        Err(e) => {
            error!("Failed to start engine: {}", e);
            std::process::exit(1);
        }
    };

    match cli.command {
        Commands::Calculate { file, output, output_file } => {
            cmd_calculate(&engine, file, output, output_file);
        }
        Commands::Verify { activities, claims, output, output_file } => {
            cmd_verify(&engine, activities, claims, output, output_file);
        }
        Commands::Factors { category } => {
            cmd_factors(&engine, category);
        }
        Commands::Countries => {
            cmd_countries(&engine);
        }
    }
}

/// Defaults, then the config file, then `GHG_*` environment, then flags
fn build_engine(config_path: Option<&Path>, factors_dir: Option<PathBuf>) -> CoreResult<Engine> {
    let config = match config_path {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            EngineConfig::from_toml_file(path)?
        }
        None => EngineConfig::default(),
    };

    let mut config = config.with_env_overrides()?;
    if let Some(dir) = factors_dir {
        config.factors_dir = Some(dir);
    }

    Engine::with_config(config)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> CoreResult<T> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| CoreError::Serialization(format!("{}: {}", path.display(), e)))
}

fn load_activities(path: &Path) -> CoreResult<Vec<ActivityRecord>> {
    Ok(match read_json::<ActivityFile>(path)? {
        ActivityFile::List(records) | ActivityFile::Wrapped { activities: records } => records,
    })
}

fn load_claims(path: &Path) -> CoreResult<Vec<ExtractedMetric>> {
    Ok(match read_json::<ClaimFile>(path)? {
        ClaimFile::List(claims) | ClaimFile::Claims { claims } | ClaimFile::Metrics { metrics: claims } => claims,
    })
}

fn parse_format(raw: &str) -> ReportFormat {
    raw.parse().unwrap_or_else(|e: String| {
        error!("{}", e);
        std::process::exit(1);
    })
}

fn write_output(content: &str, output_file: Option<PathBuf>) {
    if let Some(out_path) = output_file {
        if let Err(e) = std::fs::write(&out_path, content) {
            error!("Failed to write {}: {}", out_path.display(), e);
            std::process::exit(1);
        }
        info!("Report written to: {}", out_path.display());
    } else {
        println!("{}", content);
    }
}

fn cmd_calculate(engine: &Engine, file: PathBuf, output_format: String, output_file: Option<PathBuf>) {
    info!("Calculating emissions: {}", file.display());
    let format = parse_format(&output_format);

    let records = match load_activities(&file) {
        Ok(records) => records,
        Err(e) => {
            error!("Failed to read activities: {}", e);
            std::process::exit(1);
        }
    };

    let totals = engine.calculate_bulk(&records);
    info!(
        "Calculated {} of {} records: {:.2} kg CO2e",
        totals.breakdown.len(),
        records.len(),
        totals.total_kg_co2e
    );

    let report = engine.report(totals, None);
    match report::generate_report(&report, format) {
        Ok(content) => write_output(&content, output_file),
        Err(e) => {
            error!("Failed to generate report: {}", e);
            std::process::exit(1);
        }
    }
}

fn cmd_verify(
    engine: &Engine,
    activities: PathBuf,
    claims: PathBuf,
    output_format: String,
    output_file: Option<PathBuf>,
) {
    info!("Verifying {} against {}", claims.display(), activities.display());
    let format = parse_format(&output_format);

    let (records, claims) = match (load_activities(&activities), load_claims(&claims)) {
        (Ok(records), Ok(claims)) => (records, claims),
        (Err(e), _) | (_, Err(e)) => {
            error!("Failed to read input: {}", e);
            std::process::exit(1);
        }
    };

    let totals = engine.calculate_bulk(&records);
    let result = engine.verify(&claims, &totals);

    println!("\nClaim Verification Results\n{}", "=".repeat(50));
    println!(
        "Calculated: {:.2} t CO2e (Scope 1 {:.2}, Scope 2 {:.2}, Scope 3 {:.2})",
        totals.total_tonnes_co2e(),
        totals.scope_total(Scope::One) / 1000.0,
        totals.scope_total(Scope::Two) / 1000.0,
        totals.scope_total(Scope::Three) / 1000.0
    );
    if !totals.warnings.is_empty() {
        println!("Skipped records: {}", totals.warnings.len());
    }

    for metric in &result.verified_metrics {
        let status = match (metric.status, metric.severity) {
            (MetricStatus::Verified, _) => "PASS".to_string(),
            (MetricStatus::Discrepancy, Some(severity)) => format!("FAIL ({})", severity),
            (MetricStatus::Discrepancy, None) => "FAIL".to_string(),
            (MetricStatus::Unverified, _) => "UNVERIFIED".to_string(),
            (MetricStatus::NotCalculated, _) => "NOT CALCULATED".to_string(),
        };

        println!("\n{}: {}", metric.metric_type, status);
        match metric.calculated_value {
            Some(calculated) => println!(
                "  reported {:.2} {}, calculated {:.2} {}",
                metric.reported_value, metric.reported_unit, calculated, metric.reported_unit
            ),
            None => println!("  reported {:.2} {}", metric.reported_value, metric.reported_unit),
        }
        if let Some(note) = &metric.note {
            println!("  {}", note);
        }
    }

    if !result.recommendations.is_empty() {
        println!("\nRecommendations:");
        for recommendation in &result.recommendations {
            println!("  - {}", recommendation);
        }
    }

    println!("\n{}", "=".repeat(50));
    println!(
        "Match score: {:.1}/100, data completeness: {:.1}%",
        result.match_score, result.data_completeness
    );
    println!("{}", result.summary);

    let major = result.count_severity(Severity::Major);

    if output_file.is_some() {
        let report = engine.report(totals, Some(result));
        match report::generate_report(&report, format) {
            Ok(content) => write_output(&content, output_file),
            Err(e) => {
                error!("Failed to generate report: {}", e);
                std::process::exit(1);
            }
        }
    }

    if major > 0 {
        error!("{} major discrepancy(ies) found", major);
        std::process::exit(1);
    }
}

fn cmd_factors(engine: &Engine, category: Option<String>) {
    let categories: Vec<FactorCategory> = match category {
        Some(raw) => match raw.parse() {
            Ok(category) => vec![category],
            Err(e) => {
                error!("{}", e);
                std::process::exit(1);
            }
        },
        None => FactorCategory::ALL.to_vec(),
    };

    println!("\nConversion Factors\n{}", "=".repeat(50));
    println!("Table version: {}", engine.registry().version());

    for category in categories {
        println!("\n{}:", category);
        for factor in engine.list_factors(category) {
            println!(
                "  {:<22} {:>10} kg CO2e/{:<13} {}",
                factor.key,
                factor.entry.value,
                factor.entry.unit,
                factor.entry.provenance()
            );
            for alternate in &factor.entry.alternates {
                println!("  {:<22} {:>10} kg CO2e/{}", "", alternate.value, alternate.unit);
            }
        }
    }
}

fn cmd_countries(engine: &Engine) {
    let countries = engine.list_countries();

    println!("\nCountries with grid factors\n{}", "=".repeat(50));
    for country in &countries {
        println!("  {:<16} {}", country.code, country.name);
    }
    println!("\n{} countries; others use the world average", countries.len());
}
