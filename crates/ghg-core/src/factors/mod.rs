//! Conversion-factor registry
//!
//! Factor tables for electricity, fuel, transport, waste and water are
//! loaded once, validated, and then shared read-only by every calculation.
//! A registry that fails validation is never constructed.

pub mod tables;

pub use tables::{FactorEntry, FactorTable, UnitFactor};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Electricity key used when a country has no factor of its own
pub const WORLD_AVERAGE: &str = "world_average";

#[derive(Error, Debug)]
pub enum FactorError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Factor table '{category}' not found at {location}")]
    MissingTable {
        category: FactorCategory,
        location: String,
    },

    #[error("Malformed factor table '{category}': {source}")]
    Parse {
        category: FactorCategory,
        source: serde_json::Error,
    },

    #[error("Factor table declares category '{found}' but was loaded as '{expected}'")]
    CategoryMismatch {
        expected: FactorCategory,
        found: FactorCategory,
    },

    #[error("Invalid factor {category}/{key}: {reason}")]
    InvalidEntry {
        category: FactorCategory,
        key: String,
        reason: String,
    },

    #[error("Factor table '{category}' supplied more than once")]
    DuplicateTable { category: FactorCategory },

    #[error("Factor table '{category}' is missing required key '{key}'")]
    MissingKey {
        category: FactorCategory,
        key: &'static str,
    },
}

/// Lookup of a key that the registry does not hold
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Unknown {category} factor '{key}'")]
pub struct UnknownFactorKey {
    pub category: FactorCategory,
    pub key: String,
    pub available: Vec<String>,
}

/// Factor table categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactorCategory {
    Electricity,
    Fuel,
    Transport,
    Waste,
    Water,
}

impl FactorCategory {
    pub const ALL: [FactorCategory; 5] = [
        FactorCategory::Electricity,
        FactorCategory::Fuel,
        FactorCategory::Transport,
        FactorCategory::Waste,
        FactorCategory::Water,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FactorCategory::Electricity => "electricity",
            FactorCategory::Fuel => "fuel",
            FactorCategory::Transport => "transport",
            FactorCategory::Waste => "waste",
            FactorCategory::Water => "water",
        }
    }

    /// File name of this category's table inside a factors directory
    pub fn file_name(&self) -> String {
        format!("{}.json", self.as_str())
    }
}

impl std::fmt::Display for FactorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FactorCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalise_key(s).as_str() {
            "electricity" => Ok(FactorCategory::Electricity),
            "fuel" | "fuels" => Ok(FactorCategory::Fuel),
            "transport" | "flight" | "flights" => Ok(FactorCategory::Transport),
            "waste" => Ok(FactorCategory::Waste),
            "water" => Ok(FactorCategory::Water),
            other => Err(format!(
                "unknown factor category '{}' (expected electricity, fuel, transport, waste or water)",
                other
            )),
        }
    }
}

/// A factor together with its key, for discovery listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorListing {
    pub key: String,
    pub name: String,
    #[serde(flatten)]
    pub entry: FactorEntry,
}

/// A country with a grid electricity factor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Country {
    pub code: String,
    pub name: String,
}

/// Result of an electricity lookup, noting whether the fallback was used
#[derive(Debug, Clone, Copy)]
pub struct ElectricityFactor<'a> {
    pub key: &'a str,
    pub entry: &'a FactorEntry,
    pub fallback: bool,
}

static KEY_SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s\-/]+").unwrap());
static KEY_STRIPPED: Lazy<Regex> = Lazy::new(|| Regex::new(r"[()'.,]").unwrap());

static COUNTRY_ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    [
        ("uk", "united_kingdom"),
        ("gb", "united_kingdom"),
        ("gbr", "united_kingdom"),
        ("great_britain", "united_kingdom"),
        ("england", "united_kingdom"),
        ("us", "united_states"),
        ("usa", "united_states"),
        ("united_states_of_america", "united_states"),
        ("america", "united_states"),
        ("ae", "uae"),
        ("emirates", "uae"),
        ("united_arab_emirates", "uae"),
        ("kr", "south_korea"),
        ("korea", "south_korea"),
        ("republic_of_korea", "south_korea"),
        ("lk", "sri_lanka"),
        ("srilanka", "sri_lanka"),
        ("in", "india"),
        ("cn", "china"),
        ("de", "germany"),
        ("fr", "france"),
        ("jp", "japan"),
        ("au", "australia"),
        ("ca", "canada"),
        ("br", "brazil"),
        ("za", "south_africa"),
        ("sg", "singapore"),
        ("no", "norway"),
        ("se", "sweden"),
        ("id", "indonesia"),
        ("pk", "pakistan"),
        ("bd", "bangladesh"),
        ("world", WORLD_AVERAGE),
        ("global", WORLD_AVERAGE),
    ]
    .into_iter()
    .collect()
});

const BUILTIN_TABLES: [(FactorCategory, &str); 5] = [
    (
        FactorCategory::Electricity,
        include_str!("../../data/factors/electricity.json"),
    ),
    (FactorCategory::Fuel, include_str!("../../data/factors/fuel.json")),
    (
        FactorCategory::Transport,
        include_str!("../../data/factors/transport.json"),
    ),
    (FactorCategory::Waste, include_str!("../../data/factors/waste.json")),
    (FactorCategory::Water, include_str!("../../data/factors/water.json")),
];

/// Normalise a lookup key to snake_case
pub fn normalise_key(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    let stripped = KEY_STRIPPED.replace_all(&lowered, "");
    KEY_SEPARATORS.replace_all(&stripped, "_").into_owned()
}

/// Normalise a country name or code to an electricity table key
pub fn normalise_country(raw: &str) -> String {
    let key = normalise_key(raw);
    match COUNTRY_ALIASES.get(key.as_str()) {
        Some(alias) => alias.to_string(),
        None => key,
    }
}

/// Immutable, validated set of factor tables
#[derive(Debug, Clone)]
pub struct FactorRegistry {
    tables: BTreeMap<FactorCategory, FactorTable>,
    version: String,
}

impl FactorRegistry {
    /// Load all five tables from `<dir>/<category>.json`
    pub fn load(dir: &Path) -> Result<Self, FactorError> {
        let mut tables = Vec::with_capacity(FactorCategory::ALL.len());

        for category in FactorCategory::ALL {
            let path = dir.join(category.file_name());
            if !path.is_file() {
                return Err(FactorError::MissingTable {
                    category,
                    location: path.display().to_string(),
                });
            }

            let content = std::fs::read_to_string(&path).map_err(|e| FactorError::Io {
                path: path.clone(),
                source: e,
            })?;

            debug!("Loaded factor table {}", path.display());
            tables.push(FactorTable::from_json(category, &content)?);
        }

        let registry = Self::from_tables(tables)?;
        info!("Factor tables loaded from {}", dir.display());
        Ok(registry)
    }

    /// Registry over the tables compiled into the crate
    pub fn builtin() -> Result<Self, FactorError> {
        let tables = BUILTIN_TABLES
            .iter()
            .map(|(category, content)| FactorTable::from_json(*category, content))
            .collect::<Result<Vec<_>, _>>()?;

        Self::from_tables(tables)
    }

    /// Build a registry from already parsed tables; all five categories are required
    pub fn from_tables<I>(tables: I) -> Result<Self, FactorError>
    where
        I: IntoIterator<Item = FactorTable>,
    {
        let mut by_category = BTreeMap::new();
        for table in tables {
            table.validate()?;
            let category = table.category;
            if by_category.insert(category, table).is_some() {
                return Err(FactorError::DuplicateTable { category });
            }
        }

        for category in FactorCategory::ALL {
            if !by_category.contains_key(&category) {
                return Err(FactorError::MissingTable {
                    category,
                    location: "supplied tables".to_string(),
                });
            }
        }

        let version = fingerprint(&by_category);

        Ok(Self {
            tables: by_category,
            version,
        })
    }

    /// SHA-256 fingerprint of the loaded tables
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn short_version(&self) -> &str {
        &self.version[..12]
    }

    /// Total number of factors across all categories
    pub fn len(&self) -> usize {
        self.tables.values().map(|t| t.entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve a factor by category and key; unknown keys are an error
    pub fn resolve(&self, category: FactorCategory, key: &str) -> Result<&FactorEntry, UnknownFactorKey> {
        let normalised = normalise_key(key);
        self.table(category)
            .and_then(|t| t.entries.get(&normalised))
            .ok_or_else(|| UnknownFactorKey {
                category,
                key: key.trim().to_string(),
                available: self.list_keys(category).into_iter().map(str::to_string).collect(),
            })
    }

    /// Resolve a grid factor, falling back to the world average for
    /// countries without their own entry
    pub fn resolve_electricity(&self, country: Option<&str>) -> Result<ElectricityFactor<'_>, UnknownFactorKey> {
        let entries = self.table(FactorCategory::Electricity).map(|t| &t.entries);

        if let Some(raw) = country.filter(|c| !c.trim().is_empty()) {
            let key = normalise_country(raw);
            if let Some((key, entry)) = entries.and_then(|e| e.get_key_value(&key)) {
                return Ok(ElectricityFactor {
                    key,
                    entry,
                    fallback: false,
                });
            }
        }

        let requested_average = country.map_or(true, |c| normalise_country(c) == WORLD_AVERAGE || c.trim().is_empty());

        entries
            .and_then(|e| e.get_key_value(WORLD_AVERAGE))
            .map(|(key, entry)| ElectricityFactor {
                key,
                entry,
                fallback: !requested_average,
            })
            .ok_or_else(|| UnknownFactorKey {
                category: FactorCategory::Electricity,
                key: WORLD_AVERAGE.to_string(),
                available: self.list_keys(FactorCategory::Electricity).into_iter().map(str::to_string).collect(),
            })
    }

    /// Sub-keys available in a category, sorted
    pub fn list_keys(&self, category: FactorCategory) -> Vec<&str> {
        self.table(category)
            .map(|t| t.entries.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn list_factors(&self, category: FactorCategory) -> Vec<FactorListing> {
        self.table(category)
            .map(|t| {
                t.entries
                    .iter()
                    .map(|(key, entry)| FactorListing {
                        key: key.clone(),
                        name: entry.name.clone().unwrap_or_else(|| key.clone()),
                        entry: FactorEntry {
                            name: None,
                            ..entry.clone()
                        },
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Countries with their own grid factor (the world average is excluded)
    pub fn list_countries(&self) -> Vec<Country> {
        let mut countries: Vec<Country> = self
            .list_factors(FactorCategory::Electricity)
            .into_iter()
            .filter(|f| f.key != WORLD_AVERAGE)
            .map(|f| Country {
                code: f.key,
                name: f.name,
            })
            .collect();
        countries.sort_by(|a, b| a.name.cmp(&b.name));
        countries
    }

    pub fn table(&self, category: FactorCategory) -> Option<&FactorTable> {
        self.tables.get(&category)
    }
}

fn fingerprint(tables: &BTreeMap<FactorCategory, FactorTable>) -> String {
    let mut hasher = Sha256::new();
    for (category, table) in tables {
        for (key, entry) in &table.entries {
            let factors: Vec<String> = entry.factors().map(|f| format!("{:?}/{}", f.value, f.unit)).collect();
            hasher.update(
                format!(
                    "{}/{}={}|{}|{}\n",
                    category,
                    key,
                    factors.join(","),
                    entry.source,
                    entry.year
                )
                .as_bytes(),
            );
        }
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::Unit;

    fn write_builtin_tables(dir: &Path) {
        for (category, content) in BUILTIN_TABLES {
            std::fs::write(dir.join(category.file_name()), content).unwrap();
        }
    }

    #[test]
    fn test_builtin_registry_loads() {
        let registry = FactorRegistry::builtin().unwrap();
        assert!(!registry.is_empty());
        assert_eq!(registry.version().len(), 64);

        let diesel = registry.resolve(FactorCategory::Fuel, "diesel").unwrap();
        assert_eq!(diesel.value, 2.68);
        assert_eq!(diesel.unit, Unit::Litres);
        assert_eq!(diesel.year, 2024);
    }

    #[test]
    fn test_resolve_normalises_keys() {
        let registry = FactorRegistry::builtin().unwrap();
        assert!(registry.resolve(FactorCategory::Fuel, " Natural Gas ").is_ok());
        assert!(registry.resolve(FactorCategory::Transport, "medium-diesel-car").is_ok());
    }

    #[test]
    fn test_unknown_key_is_an_error() {
        let registry = FactorRegistry::builtin().unwrap();
        let err = registry.resolve(FactorCategory::Fuel, "unobtainium").unwrap_err();
        assert_eq!(err.category, FactorCategory::Fuel);
        assert_eq!(err.key, "unobtainium");
        assert!(err.available.iter().any(|k| k == "diesel"));
    }

    #[test]
    fn test_electricity_fallback() {
        let registry = FactorRegistry::builtin().unwrap();

        let lk = registry.resolve_electricity(Some("Sri Lanka")).unwrap();
        assert_eq!(lk.key, "sri_lanka");
        assert_eq!(lk.entry.value, 0.731);
        assert!(!lk.fallback);

        let uk = registry.resolve_electricity(Some("UK")).unwrap();
        assert_eq!(uk.key, "united_kingdom");

        let atlantis = registry.resolve_electricity(Some("Atlantis")).unwrap();
        assert_eq!(atlantis.key, WORLD_AVERAGE);
        assert!(atlantis.fallback);

        let unspecified = registry.resolve_electricity(None).unwrap();
        assert_eq!(unspecified.key, WORLD_AVERAGE);
        assert!(!unspecified.fallback);
    }

    #[test]
    fn test_list_countries_excludes_world_average() {
        let registry = FactorRegistry::builtin().unwrap();
        let countries = registry.list_countries();
        assert!(countries.iter().all(|c| c.code != WORLD_AVERAGE));
        assert!(countries.iter().any(|c| c.code == "sri_lanka" && c.name == "Sri Lanka"));
        assert!(countries.windows(2).all(|w| w[0].name <= w[1].name));
    }

    #[test]
    fn test_list_keys_sorted() {
        let registry = FactorRegistry::builtin().unwrap();
        let keys = registry.list_keys(FactorCategory::Water);
        assert_eq!(keys, vec!["supply", "treatment"]);
    }

    #[test]
    fn test_load_from_directory_matches_builtin() {
        let dir = tempfile::tempdir().unwrap();
        write_builtin_tables(dir.path());

        let loaded = FactorRegistry::load(dir.path()).unwrap();
        let builtin = FactorRegistry::builtin().unwrap();
        assert_eq!(loaded.version(), builtin.version());
    }

    #[test]
    fn test_load_fails_fast_on_missing_table() {
        let dir = tempfile::tempdir().unwrap();
        write_builtin_tables(dir.path());
        std::fs::remove_file(dir.path().join("waste.json")).unwrap();

        assert!(matches!(
            FactorRegistry::load(dir.path()),
            Err(FactorError::MissingTable {
                category: FactorCategory::Waste,
                ..
            })
        ));
    }

    #[test]
    fn test_load_fails_fast_on_malformed_table() {
        let dir = tempfile::tempdir().unwrap();
        write_builtin_tables(dir.path());
        std::fs::write(
            dir.path().join("fuel.json"),
            r#"{ "category": "fuel", "entries": { "diesel": { "value": 2.68, "unit": "litres" } } }"#,
        )
        .unwrap();

        assert!(matches!(
            FactorRegistry::load(dir.path()),
            Err(FactorError::Parse {
                category: FactorCategory::Fuel,
                ..
            })
        ));
    }

    #[test]
    fn test_fixture_tables_change_version() {
        let builtin = FactorRegistry::builtin().unwrap();
        let mut tables: Vec<FactorTable> = FactorCategory::ALL
            .iter()
            .filter_map(|c| builtin.table(*c).cloned())
            .collect();
        tables[1] = tables[1]
            .clone()
            .with_entry("biodiesel", FactorEntry::new(0.17, Unit::Litres, "Fixture", 2024));

        let fixture = FactorRegistry::from_tables(tables).unwrap();
        assert_ne!(fixture.version(), builtin.version());
        assert!(fixture.resolve(FactorCategory::Fuel, "biodiesel").is_ok());
    }

    #[test]
    fn test_from_tables_requires_every_category() {
        let builtin = FactorRegistry::builtin().unwrap();
        let tables: Vec<FactorTable> = builtin
            .table(FactorCategory::Fuel)
            .cloned()
            .into_iter()
            .collect();
        assert!(matches!(
            FactorRegistry::from_tables(tables),
            Err(FactorError::MissingTable { .. })
        ));
    }

    #[test]
    fn test_from_tables_rejects_duplicate_category() {
        let builtin = FactorRegistry::builtin().unwrap();
        let mut tables: Vec<FactorTable> = FactorCategory::ALL
            .iter()
            .filter_map(|c| builtin.table(*c).cloned())
            .collect();
        let replacement = FactorTable::new(FactorCategory::Water)
            .with_entry("supply", FactorEntry::new(9.0, Unit::CubicMetres, "Fixture", 2024))
            .with_entry("treatment", FactorEntry::new(9.0, Unit::CubicMetres, "Fixture", 2024));
        tables.push(replacement);

        assert!(matches!(
            FactorRegistry::from_tables(tables),
            Err(FactorError::DuplicateTable {
                category: FactorCategory::Water
            })
        ));
    }

    #[test]
    fn test_fuel_alternates_change_version() {
        let builtin = FactorRegistry::builtin().unwrap();
        let mut tables: Vec<FactorTable> = FactorCategory::ALL
            .iter()
            .filter_map(|c| builtin.table(*c).cloned())
            .collect();
        if let Some(diesel) = tables[1].entries.get_mut("diesel") {
            diesel.alternates.retain(|f| f.unit != Unit::Kg);
        }

        let fixture = FactorRegistry::from_tables(tables).unwrap();
        assert_ne!(fixture.version(), builtin.version());
    }

    #[test]
    fn test_category_parse() {
        assert_eq!("Fuels".parse::<FactorCategory>().unwrap(), FactorCategory::Fuel);
        assert!("steel".parse::<FactorCategory>().is_err());
    }
}
