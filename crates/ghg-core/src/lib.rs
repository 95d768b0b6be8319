//! Emissions Calculation & Verification Engine
//!
//! This crate converts activity records (electricity, fuel, transport,
//! flights, waste, water) into greenhouse-gas emission figures using
//! versioned conversion-factor tables, aggregates them by scope and
//! category, and reconciles the calculated totals against claims extracted
//! from sustainability reports.

pub mod aggregate;
pub mod calculator;
pub mod factors;
pub mod report;
pub mod units;
pub mod verification;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

pub use aggregate::{aggregate, ActivityTotal, RecordWarning, TotalEmissions};
pub use calculator::{
    Activity, ActivityKind, ActivityRecord, CalculationError, EmissionResult, EmissionsCalculator,
};
pub use factors::{Country, FactorCategory, FactorEntry, FactorError, FactorListing, FactorRegistry};
pub use report::EmissionsReport;
pub use units::{Dimension, Unit};
pub use verification::{
    Discrepancy, ExtractedMetric, MetricStatus, Severity, VerificationEngine, VerificationResult,
    VerifiedMetric,
};

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Factor table error: {0}")]
    Factors(#[from] FactorError),

    #[error("Calculation error: {0}")]
    Calculation(#[from] CalculationError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

/// Environment variable overriding [`EngineConfig::factors_dir`]
pub const ENV_FACTORS_DIR: &str = "GHG_FACTORS_DIR";
/// Environment variable overriding [`EngineConfig::large_amount_threshold`]
pub const ENV_LARGE_AMOUNT_THRESHOLD: &str = "GHG_LARGE_AMOUNT_THRESHOLD";

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding the factor tables; built-in tables when unset
    pub factors_dir: Option<PathBuf>,
    /// Amounts above this are accepted but flagged for review
    pub large_amount_threshold: f64,
    /// Calculate bulk batches on the rayon thread pool
    pub parallel_bulk: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            factors_dir: None,
            large_amount_threshold: 1_000_000_000.0,
            parallel_bulk: true,
        }
    }
}

impl EngineConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> CoreResult<Self> {
        toml::from_str(content).map_err(|e| CoreError::Config(e.to_string()))
    }

    /// Load configuration from a TOML file
    pub fn from_toml_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Apply `GHG_*` environment overrides on top of this configuration
    pub fn with_env_overrides(self) -> CoreResult<Self> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from<F>(mut self, lookup: F) -> CoreResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_FACTORS_DIR).filter(|v| !v.trim().is_empty()) {
            self.factors_dir = Some(PathBuf::from(dir));
        }

        if let Some(raw) = lookup(ENV_LARGE_AMOUNT_THRESHOLD) {
            let threshold: f64 = raw.trim().parse().map_err(|_| {
                CoreError::Config(format!(
                    "{} must be a number, got '{}'",
                    ENV_LARGE_AMOUNT_THRESHOLD, raw
                ))
            })?;
            self.large_amount_threshold = threshold;
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if !self.large_amount_threshold.is_finite() || self.large_amount_threshold <= 0.0 {
            return Err(CoreError::Config(format!(
                "large_amount_threshold must be a positive number, got {}",
                self.large_amount_threshold
            )));
        }
        Ok(())
    }
}

/// GHG Protocol reporting scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Scope {
    /// Direct emissions from owned or controlled sources
    One,
    /// Indirect emissions from purchased energy
    Two,
    /// Other indirect emissions across the value chain
    Three,
}

impl Scope {
    pub const ALL: [Scope; 3] = [Scope::One, Scope::Two, Scope::Three];

    pub fn number(&self) -> u8 {
        match self {
            Scope::One => 1,
            Scope::Two => 2,
            Scope::Three => 3,
        }
    }

    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Scope::One),
            2 => Some(Scope::Two),
            3 => Some(Scope::Three),
            _ => None,
        }
    }
}

impl From<Scope> for u8 {
    fn from(scope: Scope) -> Self {
        scope.number()
    }
}

impl TryFrom<u8> for Scope {
    type Error = String;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        Scope::from_number(n).ok_or_else(|| format!("scope must be 1, 2 or 3, got {}", n))
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Scope {}", self.number())
    }
}

/// Main engine interface
///
/// Owns the shared factor registry and wires the calculator and the
/// verification engine to it.
pub struct Engine {
    config: EngineConfig,
    registry: Arc<FactorRegistry>,
    calculator: EmissionsCalculator,
    verifier: VerificationEngine,
}

impl Engine {
    /// Create an engine over the built-in factor tables
    pub fn new() -> CoreResult<Self> {
        Self::with_config(EngineConfig::default())
    }

    /// Create an engine, loading the factor tables named by the configuration.
    ///
    /// Fails if any factor table is missing or malformed.
    pub fn with_config(config: EngineConfig) -> CoreResult<Self> {
        config.validate()?;

        let registry = match &config.factors_dir {
            Some(dir) => FactorRegistry::load(dir)?,
            None => FactorRegistry::builtin()?,
        };

        info!(
            "Factor registry ready: version {} ({} factors)",
            registry.short_version(),
            registry.len()
        );

        Ok(Self::with_registry(config, Arc::new(registry)))
    }

    /// Create an engine over an already loaded registry
    pub fn with_registry(config: EngineConfig, registry: Arc<FactorRegistry>) -> Self {
        let calculator = EmissionsCalculator::new(Arc::clone(&registry))
            .with_large_amount_threshold(config.large_amount_threshold);

        Self {
            config,
            registry,
            calculator,
            verifier: VerificationEngine::new(),
        }
    }

    /// Calculate emissions for a single activity record
    pub fn calculate(&self, record: &ActivityRecord) -> Result<EmissionResult, CalculationError> {
        self.calculator.calculate_record(record)
    }

    /// Calculate emissions for an already typed activity
    pub fn calculate_activity(&self, activity: &Activity) -> Result<EmissionResult, CalculationError> {
        self.calculator.calculate(activity)
    }

    /// Calculate and aggregate a batch of records.
    ///
    /// Records that fail are excluded from the totals and reported as warnings.
    pub fn calculate_bulk(&self, records: &[ActivityRecord]) -> TotalEmissions {
        self.calculator.calculate_bulk(records, self.config.parallel_bulk)
    }

    /// Reconcile claimed metrics against calculated totals
    pub fn verify(&self, claims: &[ExtractedMetric], totals: &TotalEmissions) -> VerificationResult {
        self.verifier.compare(claims, totals)
    }

    pub fn list_factors(&self, category: FactorCategory) -> Vec<FactorListing> {
        self.registry.list_factors(category)
    }

    pub fn list_countries(&self) -> Vec<Country> {
        self.registry.list_countries()
    }

    /// Wrap totals and an optional verification run into a report envelope
    pub fn report(
        &self,
        totals: TotalEmissions,
        verification: Option<VerificationResult>,
    ) -> EmissionsReport {
        EmissionsReport::new(self.registry.version(), totals, verification)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &FactorRegistry {
        &self.registry
    }
}
