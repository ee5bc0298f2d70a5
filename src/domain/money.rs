use std::error::Error;
use std::fmt;

use serde::{Deserialize, Serialize};

/// An amount in minor units (cents) tagged with an ISO 4217 currency code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Money {
    pub amount_minor: i64,
    pub currency: String,
}

impl Money {
    pub fn new(amount_minor: i64, currency: &str) -> Result<Self, MoneyError> {
        Ok(Self {
            amount_minor,
            currency: normalize_currency(currency)?,
        })
    }

    /// Parses a major-unit decimal string such as "12.34" or "-5".
    pub fn parse(amount: &str, currency: &str) -> Result<Self, MoneyError> {
        let amount_minor = parse_amount_minor(amount)?;
        Self::new(amount_minor, currency)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.amount_minor < 0 { "-" } else { "" };
        let abs = self.amount_minor.unsigned_abs();
        write!(f, "{}{}.{:02} {}", sign, abs / 100, abs % 100, self.currency)
    }
}

/// The same value carried in the currency it was recorded in and the
/// currency the user wants to see it in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DualMoney {
    pub native: Money,
    pub display: Money,
}

impl DualMoney {
    pub fn same(native: Money) -> Self {
        Self {
            display: native.clone(),
            native,
        }
    }

    pub fn with_display(native: Money, display: Money) -> Self {
        Self { native, display }
    }
}

fn normalize_currency(raw: &str) -> Result<String, MoneyError> {
    let code = raw.trim().to_ascii_uppercase();
    if code.len() == 3 && code.chars().all(|ch| ch.is_ascii_alphabetic()) {
        Ok(code)
    } else {
        Err(MoneyError::InvalidCurrency(raw.to_string()))
    }
}

fn parse_amount_minor(raw: &str) -> Result<i64, MoneyError> {
    let trimmed = raw.trim();
    let invalid = || MoneyError::InvalidAmount(raw.to_string());

    let (sign, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1i64, rest),
        None => (1i64, trimmed),
    };
    if digits.is_empty() {
        return Err(invalid());
    }

    let (major, minor) = match digits.split_once('.') {
        Some((major, minor)) => (major, minor),
        None => (digits, ""),
    };
    if major.is_empty() && minor.is_empty() {
        return Err(invalid());
    }
    if minor.len() > 2 {
        return Err(invalid());
    }
    if !major.chars().all(|ch| ch.is_ascii_digit()) || !minor.chars().all(|ch| ch.is_ascii_digit())
    {
        return Err(invalid());
    }

    let major_value: i64 = if major.is_empty() {
        0
    } else {
        major.parse().map_err(|_| invalid())?
    };
    let minor_value: i64 = match minor.len() {
        0 => 0,
        1 => minor.parse::<i64>().map_err(|_| invalid())? * 10,
        _ => minor.parse().map_err(|_| invalid())?,
    };

    major_value
        .checked_mul(100)
        .and_then(|cents| cents.checked_add(minor_value))
        .map(|cents| sign * cents)
        .ok_or_else(invalid)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoneyError {
    InvalidCurrency(String),
    InvalidAmount(String),
}

impl fmt::Display for MoneyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MoneyError::InvalidCurrency(raw) => {
                write!(f, "invalid currency code '{}': expected 3 letters", raw)
            }
            MoneyError::InvalidAmount(raw) => {
                write!(
                    f,
                    "invalid amount '{}': expected a decimal with at most 2 fraction digits",
                    raw
                )
            }
        }
    }
}

impl Error for MoneyError {}
