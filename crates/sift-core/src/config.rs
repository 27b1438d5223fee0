//! Source institution configuration
//!
//! Each source declares how its CSV export maps onto the canonical transaction
//! shape: which columns hold the date, description, amount and category, which
//! date formats it uses, and how amount sign maps to direction.
//!
//! ## Configuration Resolution
//!
//! Config is loaded with a two-layer resolution:
//! 1. An explicit path, or the override in the data dir
//!    (~/.local/share/sift/config/sources.toml) if it exists
//! 2. Fall back to embedded defaults (compiled into binary)

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Embedded default config (compiled into binary)
const DEFAULT_CONFIG: &str = include_str!("../../../config/sources.toml");

/// Full ingestion configuration. Immutable once loaded.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Rows whose description contains any of these (case-insensitive) are skipped
    #[serde(default)]
    pub exclude_keywords: Vec<String>,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub vendor_rules: Vec<VendorRule>,
}

/// Storage timeouts and retry policy
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// How long SQLite waits on a locked database before failing
    pub busy_timeout_ms: u64,
    pub pool_size: u32,
    /// Retries after the first attempt, for transient failures only
    pub max_retries: u32,
    /// Initial backoff, doubled on each retry
    pub retry_backoff_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5000,
            pool_size: 8,
            max_retries: 3,
            retry_backoff_ms: 100,
        }
    }
}

impl StorageConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Column mapping and conventions for one institution feed
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Identifier stored in the `source` column
    pub id: String,
    /// Human-readable name
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub detect: DetectRule,
    #[serde(default)]
    pub date_column: String,
    /// Tried in order; first match wins
    #[serde(default)]
    pub date_formats: Vec<String>,
    #[serde(default)]
    pub description_column: String,
    #[serde(default)]
    pub category_column: Option<String>,
    pub amount: AmountConvention,
}

/// Header signature used to recognize a source's export
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DetectRule {
    /// All of these headers must be present
    pub headers: Vec<String>,
    /// None of these headers may be present
    pub absent_headers: Vec<String>,
}

/// How a source encodes amount and direction
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "convention", rename_all = "snake_case")]
pub enum AmountConvention {
    /// One signed amount column
    Signed {
        column: String,
        /// Which sign means money leaving the account
        debit_when: SignRule,
    },
    /// Separate debit and credit columns
    Split {
        debit_column: String,
        credit_column: String,
    },
    /// Amount column plus a column naming the direction (e.g. "DEBIT"/"CREDIT")
    Indicator {
        column: String,
        indicator_column: String,
        debit_values: Vec<String>,
        credit_values: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignRule {
    Negative,
    Positive,
}

/// Assigns a category to descriptions matching a pattern
#[derive(Debug, Clone, Deserialize)]
pub struct VendorRule {
    pub pattern: String,
    #[serde(rename = "match", default)]
    pub match_type: MatchType,
    pub category: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    /// Case-insensitive substring
    #[default]
    Contains,
    Regex,
}

impl SourceConfig {
    /// Display name, falling back to the id
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Check the mapping is complete enough to normalize any row
    pub fn validate(&self) -> Result<()> {
        let missing = |what: &str| {
            Err(Error::Configuration(format!(
                "source '{}' has no {}",
                self.id, what
            )))
        };

        if self.id.trim().is_empty() {
            return Err(Error::Configuration("source with empty id".to_string()));
        }
        if self.date_column.trim().is_empty() {
            return missing("date_column");
        }
        if self.date_formats.is_empty() {
            return missing("date_formats");
        }
        if self.description_column.trim().is_empty() {
            return missing("description_column");
        }

        match &self.amount {
            AmountConvention::Signed { column, .. } if column.trim().is_empty() => {
                missing("amount column")
            }
            AmountConvention::Split {
                debit_column,
                credit_column,
            } if debit_column.trim().is_empty() || credit_column.trim().is_empty() => {
                missing("debit_column/credit_column")
            }
            AmountConvention::Indicator {
                column,
                indicator_column,
                ..
            } if column.trim().is_empty() || indicator_column.trim().is_empty() => {
                missing("amount column/indicator_column")
            }
            AmountConvention::Indicator {
                debit_values,
                credit_values,
                ..
            } if debit_values.is_empty() || credit_values.is_empty() => {
                missing("debit_values/credit_values")
            }
            _ => Ok(()),
        }
    }
}

impl IngestConfig {
    /// Load config: explicit path, then data-dir override, then embedded default
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let content = match path {
            Some(path) => fs::read_to_string(path).map_err(|e| {
                Error::Configuration(format!("Failed to read {}: {}", path.display(), e))
            })?,
            None => match default_config_path().filter(|p| p.exists()) {
                Some(override_path) => fs::read_to_string(&override_path).map_err(|e| {
                    Error::Configuration(format!(
                        "Failed to read {}: {}",
                        override_path.display(),
                        e
                    ))
                })?,
                None => DEFAULT_CONFIG.to_string(),
            },
        };

        Self::from_toml(&content)
    }

    /// The configuration compiled into the binary
    pub fn embedded() -> Result<Self> {
        Self::from_toml(DEFAULT_CONFIG)
    }

    /// Parse and validate config from TOML content
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: IngestConfig = toml::from_str(content)
            .map_err(|e| Error::Configuration(format!("Invalid config TOML: {}", e)))?;

        for (i, source) in config.sources.iter().enumerate() {
            source.validate()?;
            if config.sources[..i].iter().any(|s| s.id == source.id) {
                return Err(Error::Configuration(format!(
                    "duplicate source id '{}'",
                    source.id
                )));
            }
        }

        Ok(config)
    }

    /// Look up a source by id
    pub fn source(&self, id: &str) -> Result<&SourceConfig> {
        self.sources
            .iter()
            .find(|s| s.id.eq_ignore_ascii_case(id))
            .ok_or_else(|| Error::Configuration(format!("unknown source '{}'", id)))
    }

    pub fn source_ids(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.id.as_str()).collect()
    }
}

/// Default config override path
pub fn default_config_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("sift").join("config").join("sources.toml"))
}
