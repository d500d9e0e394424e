//! Payment methods and their method-specific fields.
//!
//! Field validation is local: a submit with malformed fields is rejected
//! before the gateway is ever contacted, and the fields themselves never
//! leave the session. Only the method label travels on the settle request.

use std::fmt;

use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Card,
    Upi,
}

impl PaymentMethod {
    /// Label the billing backend expects on the settle request.
    pub fn wire_label(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "Credit Card",
            PaymentMethod::Upi => "UPI",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardFields {
    pub number: String,
    pub expiry: String,
    pub cvv: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpiFields {
    pub upi_id: String,
}

/// Entered fields tagged with the method they belong to.
///
/// Wire shape: `{"method": "card", "number": ..., "expiry": ..., "cvv": ...}`
/// or `{"method": "upi", "upi_id": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum MethodFields {
    Card(CardFields),
    Upi(UpiFields),
}

impl MethodFields {
    pub fn method(&self) -> PaymentMethod {
        match self {
            MethodFields::Card(_) => PaymentMethod::Card,
            MethodFields::Upi(_) => PaymentMethod::Upi,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.validate_at(Utc::now().date_naive())
    }

    /// Validation against an explicit reference date, so expiry checks are
    /// deterministic in tests.
    pub fn validate_at(&self, today: NaiveDate) -> Result<(), ValidationError> {
        match self {
            MethodFields::Card(card) => card.validate_at(today),
            MethodFields::Upi(upi) => upi.validate(),
        }
    }
}

impl CardFields {
    pub fn validate_at(&self, today: NaiveDate) -> Result<(), ValidationError> {
        let digits: Vec<u8> = self
            .number
            .chars()
            .filter(|c| *c != ' ')
            .map(|c| {
                c.to_digit(10)
                    .map(|d| d as u8)
                    .ok_or(ValidationError::CardNumber)
            })
            .collect::<Result<_, _>>()?;
        if !(13..=19).contains(&digits.len()) || !luhn_valid(&digits) {
            return Err(ValidationError::CardNumber);
        }

        let (month, year) = parse_expiry(&self.expiry).ok_or(ValidationError::CardExpiry)?;
        if (year, month) < (today.year(), today.month()) {
            return Err(ValidationError::CardExpiry);
        }

        let cvv = self.cvv.trim();
        if !(3..=4).contains(&cvv.len()) || !cvv.chars().all(|c| c.is_ascii_digit()) {
            return Err(ValidationError::CardCvv);
        }
        Ok(())
    }
}

impl UpiFields {
    /// UPI ids look like `name@bank`: a non-empty local part of
    /// alphanumerics plus `.`/`_`/`-`, then a non-empty alphabetic handle.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let id = self.upi_id.trim();
        let (local, handle) = id.split_once('@').ok_or(ValidationError::UpiId)?;
        let local_ok = !local.is_empty()
            && local
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        let handle_ok = !handle.is_empty() && handle.chars().all(|c| c.is_ascii_alphabetic());
        if local_ok && handle_ok {
            Ok(())
        } else {
            Err(ValidationError::UpiId)
        }
    }
}

/// `MM/YY` → (month, full year).
fn parse_expiry(raw: &str) -> Option<(u32, i32)> {
    let (mm, yy) = raw.trim().split_once('/')?;
    if mm.len() != 2 || yy.len() != 2 {
        return None;
    }
    let month: u32 = mm.parse().ok()?;
    let year: i32 = yy.parse().ok()?;
    if !(1..=12).contains(&month) {
        return None;
    }
    Some((month, 2000 + year))
}

fn luhn_valid(digits: &[u8]) -> bool {
    let mut sum = 0u32;
    for (i, d) in digits.iter().rev().enumerate() {
        let mut value = *d as u32;
        if i % 2 == 1 {
            value *= 2;
            if value > 9 {
                value -= 9;
            }
        }
        sum += value;
    }
    sum % 10 == 0
}
