//! Description matching: vendor categorization and exclusion keywords
//!
//! Categorization runs after ingestion and only ever fills in `category`, the
//! one mutable column. Exclusion keywords run during ingestion and drop rows
//! before they reach storage.

use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::{IngestConfig, MatchType, VendorRule};
use crate::db::Database;
use crate::error::Result;

enum Matcher {
    /// Uppercased needles; any one matching is enough
    Contains(Vec<String>),
    Regex(Regex),
}

impl Matcher {
    fn new(pattern: &str, match_type: MatchType) -> Result<Self> {
        Ok(match match_type {
            // Support pipe-separated OR patterns
            MatchType::Contains => Self::Contains(
                pattern
                    .split('|')
                    .map(|p| p.trim().to_uppercase())
                    .filter(|p| !p.is_empty())
                    .collect(),
            ),
            MatchType::Regex => Self::Regex(Regex::new(pattern)?),
        })
    }

    fn is_match(&self, description: &str) -> bool {
        match self {
            Self::Contains(needles) => {
                let desc_upper = description.to_uppercase();
                needles.iter().any(|n| desc_upper.contains(n.as_str()))
            }
            Self::Regex(re) => re.is_match(description),
        }
    }
}

/// Assigns categories from configured vendor rules; first matching rule wins
pub struct VendorCategorizer {
    rules: Vec<(Matcher, String)>,
}

/// Outcome of a categorization pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct CategorizeResult {
    pub examined: usize,
    pub categorized: usize,
    /// How many of `categorized` came from remembered manual corrections
    pub from_feedback: usize,
    /// Transactions still without a category afterwards
    pub remaining: i64,
}

/// Rows fetched per query while categorizing
const PAGE_SIZE: i64 = 500;

impl VendorCategorizer {
    pub fn new(rules: &[VendorRule]) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|rule| Ok((Matcher::new(&rule.pattern, rule.match_type)?, rule.category.clone())))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn from_config(config: &IngestConfig) -> Result<Self> {
        Self::new(&config.vendor_rules)
    }

    pub fn category_for(&self, description: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|(matcher, _)| matcher.is_match(description))
            .map(|(_, category)| category.as_str())
    }

    /// Fill in categories for every stored transaction that has none
    ///
    /// Vendor rules are tried first, then categories remembered from manual
    /// corrections of the same description.
    pub fn categorize_uncategorized(&self, db: &Database) -> Result<CategorizeResult> {
        self.categorize_in_pages(db, PAGE_SIZE)
    }

    fn categorize_in_pages(&self, db: &Database, page_size: i64) -> Result<CategorizeResult> {
        let mut result = CategorizeResult::default();
        let mut after_id = 0;

        loop {
            let page = db.uncategorized_transactions(after_id, page_size)?;
            let Some(last) = page.last() else {
                break;
            };
            after_id = last.id;
            result.examined += page.len();

            for stored in &page {
                let description = &stored.transaction.description;
                let category = match self.category_for(description) {
                    Some(category) => category.to_string(),
                    None => match db.feedback_category(description)? {
                        Some(category) => {
                            result.from_feedback += 1;
                            category
                        }
                        None => continue,
                    },
                };
                debug!("Categorized #{} '{}' as {}", stored.id, description, category);
                db.set_category(stored.id, Some(&category))?;
                result.categorized += 1;
            }
        }

        result.remaining = db.count_uncategorized()?;
        info!(
            "Categorized {} of {} uncategorized transactions ({} from feedback, {} remain)",
            result.categorized, result.examined, result.from_feedback, result.remaining
        );
        Ok(result)
    }
}

/// Case-insensitive exclusion keywords
#[derive(Debug, Clone, Default)]
pub struct KeywordFilter {
    keywords: Vec<String>,
}

impl KeywordFilter {
    pub fn new<S: AsRef<str>>(keywords: &[S]) -> Self {
        Self {
            keywords: keywords
                .iter()
                .map(|k| k.as_ref().trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    pub fn from_config(config: &IngestConfig) -> Self {
        Self::new(&config.exclude_keywords)
    }

    /// The first keyword found in `description`, if any
    pub fn matched(&self, description: &str) -> Option<&str> {
        let desc = description.to_lowercase();
        self.keywords
            .iter()
            .find(|k| desc.contains(k.as_str()))
            .map(String::as_str)
    }
}
