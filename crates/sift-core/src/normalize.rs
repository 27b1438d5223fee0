//! Record normalization: raw institution rows to canonical transactions
//!
//! Normalization is a pure function of the row, the batch filename and the
//! source's (immutable) configuration.

use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::config::{AmountConvention, SignRule, SourceConfig};
use crate::error::{MalformedRowError, Result};
use crate::models::{Direction, RawRow, Transaction};

/// Converts raw rows from one source into transactions
#[derive(Debug, Clone, Copy)]
pub struct Normalizer<'a> {
    source: &'a SourceConfig,
}

impl<'a> Normalizer<'a> {
    /// Fails with a configuration error if the source mapping is incomplete
    pub fn new(source: &'a SourceConfig) -> Result<Self> {
        source.validate()?;
        Ok(Self { source })
    }

    pub fn source(&self) -> &'a SourceConfig {
        self.source
    }

    /// Normalize one row from the batch `filename`
    pub fn normalize(
        &self,
        row: &RawRow,
        filename: &str,
    ) -> std::result::Result<Transaction, MalformedRowError> {
        let source = self.source;

        let date_str = required(row, &source.date_column)?;
        let date = parse_date(date_str, &source.date_column, &source.date_formats)?;

        let description = normalize_description(required(row, &source.description_column)?);

        let (amount, direction) = match &source.amount {
            AmountConvention::Signed { column, debit_when } => {
                let signed = parse_amount(required(row, column)?, column)?;
                (signed, direction_from_sign(signed, *debit_when))
            }
            AmountConvention::Split {
                debit_column,
                credit_column,
            } => split_amount(row, debit_column, credit_column)?,
            AmountConvention::Indicator {
                column,
                indicator_column,
                debit_values,
                credit_values,
            } => {
                let amount = parse_amount(required(row, column)?, column)?;
                let indicator = required(row, indicator_column)?.trim();
                let is = |values: &[String]| values.iter().any(|v| v.eq_ignore_ascii_case(indicator));
                let direction = if is(debit_values.as_slice()) {
                    Direction::Debit
                } else if is(credit_values.as_slice()) {
                    Direction::Credit
                } else {
                    return Err(MalformedRowError::UnknownIndicator {
                        column: indicator_column.clone(),
                        value: indicator.to_string(),
                    });
                };
                (amount, direction)
            }
        };

        let category = source
            .category_column
            .as_deref()
            .and_then(|col| row.get(col))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        Ok(Transaction {
            date,
            description,
            amount: canonical_amount(amount),
            category,
            direction,
            source: source.id.clone(),
            filename: filename.to_string(),
        })
    }
}

/// A mapped column must exist in the row; its value may be empty
fn required<'r>(row: &'r RawRow, column: &str) -> std::result::Result<&'r str, MalformedRowError> {
    row.get(column).ok_or_else(|| MalformedRowError::MissingColumn {
        column: column.to_string(),
    })
}

fn direction_from_sign(amount: Decimal, debit_when: SignRule) -> Direction {
    let is_debit = match debit_when {
        SignRule::Negative => amount.is_sign_negative() && !amount.is_zero(),
        SignRule::Positive => amount.is_sign_positive() && !amount.is_zero(),
    };
    if is_debit {
        Direction::Debit
    } else {
        Direction::Credit
    }
}

/// Exactly one of the two columns must hold a non-zero value
fn split_amount(
    row: &RawRow,
    debit_column: &str,
    credit_column: &str,
) -> std::result::Result<(Decimal, Direction), MalformedRowError> {
    let parse_optional = |column: &str| -> std::result::Result<Option<Decimal>, MalformedRowError> {
        let raw = required(row, column)?;
        if raw.trim().is_empty() {
            return Ok(None);
        }
        let value = parse_amount(raw, column)?;
        Ok((!value.is_zero()).then_some(value))
    };

    match (parse_optional(debit_column)?, parse_optional(credit_column)?) {
        (Some(debit), None) => Ok((debit, Direction::Debit)),
        (None, Some(credit)) => Ok((credit, Direction::Credit)),
        (None, None) => Err(MalformedRowError::NoAmount {
            debit_column: debit_column.to_string(),
            credit_column: credit_column.to_string(),
        }),
        (Some(_), Some(_)) => Err(MalformedRowError::AmbiguousAmount {
            debit_column: debit_column.to_string(),
            credit_column: credit_column.to_string(),
        }),
    }
}

/// Parse a date string against the source's formats, in order
pub fn parse_date(
    value: &str,
    column: &str,
    formats: &[String],
) -> std::result::Result<NaiveDate, MalformedRowError> {
    let value = value.trim();

    formats
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
        .ok_or_else(|| MalformedRowError::InvalidDate {
            column: column.to_string(),
            value: value.to_string(),
        })
}

/// Parse an amount string, handling currency symbols, thousands separators
/// and accounting-style parentheses
pub fn parse_amount(value: &str, column: &str) -> std::result::Result<Decimal, MalformedRowError> {
    let invalid = || MalformedRowError::InvalidAmount {
        column: column.to_string(),
        value: value.to_string(),
    };

    let cleaned: String = value.trim().replace(['$', ',', ' '], "");
    let (negated, digits) = match cleaned.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        Some(inner) => (true, inner),
        None => (false, cleaned.as_str()),
    };
    // A sign inside parentheses is contradictory
    if negated && digits.starts_with(['+', '-']) {
        return Err(invalid());
    }
    let digits = digits.strip_prefix('+').unwrap_or(digits);

    if digits.is_empty() {
        return Err(invalid());
    }

    let parsed = Decimal::from_str(digits).map_err(|_| invalid())?;
    if parsed.round_dp(2) != parsed {
        return Err(MalformedRowError::ExcessPrecision {
            value: value.to_string(),
        });
    }

    // rescale leaves the scale untouched when the magnitude has no room for
    // two fractional digits
    let mut magnitude = parsed.abs();
    magnitude.rescale(2);
    if magnitude.scale() != 2 {
        return Err(invalid());
    }

    Ok(if negated { -parsed } else { parsed })
}

/// Magnitude with exactly two fractional digits
pub fn canonical_amount(amount: Decimal) -> Decimal {
    let mut magnitude = amount.abs();
    magnitude.rescale(2);
    magnitude
}

/// Trim and collapse internal whitespace
pub fn normalize_description(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
