//! Bill snapshot model
//!
//! A read-only projection of a bill taken at session start. Money is held
//! as i64 cents; wire amounts arrive as decimal strings and are parsed
//! exactly, with no floating point on the money path.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::FetchError;

/// Payment status as recorded by the billing backend.
///
/// Parsing is strict: an unrecognized status string is a malformed
/// payload, not Unpaid. Defaulting an unknown status to Unpaid would
/// re-open the stale-link double-payment window the Paid check closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Unpaid,
    Paid,
}

impl PaymentStatus {
    pub fn parse(raw: &str) -> Result<Self, FetchError> {
        match raw {
            "Paid" => Ok(PaymentStatus::Paid),
            "Unpaid" => Ok(PaymentStatus::Unpaid),
            other => Err(FetchError::MalformedPayload(format!(
                "unknown payment_status '{other}'"
            ))),
        }
    }

    pub fn is_paid(&self) -> bool {
        matches!(self, PaymentStatus::Paid)
    }
}

/// Read-only projection of a bill at session start.
///
/// Fetched once when the session is created and never mutated locally. If
/// it goes stale, the settle call surfaces a gateway-reported conflict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillSnapshot {
    pub bill_id: String,
    pub total_amount_cents: i64,
    pub payment_status: PaymentStatus,
    pub doctor_name: Option<String>,
    pub appointment_date: Option<NaiveDate>,
}

impl BillSnapshot {
    pub fn new(
        bill_id: impl Into<String>,
        total_amount_cents: i64,
        payment_status: PaymentStatus,
    ) -> Result<Self, FetchError> {
        let bill_id = bill_id.into();
        if bill_id.trim().is_empty() {
            return Err(FetchError::MalformedPayload("empty bill_id".to_string()));
        }
        if total_amount_cents < 0 {
            return Err(FetchError::MalformedPayload(format!(
                "negative total_amount {total_amount_cents}"
            )));
        }
        Ok(Self {
            bill_id,
            total_amount_cents,
            payment_status,
            doctor_name: None,
            appointment_date: None,
        })
    }

    pub fn with_doctor(mut self, doctor_name: impl Into<String>) -> Self {
        self.doctor_name = Some(doctor_name.into());
        self
    }

    pub fn with_appointment_date(mut self, date: NaiveDate) -> Self {
        self.appointment_date = Some(date);
        self
    }

    /// Display string for the presenter, e.g. `$500.00`.
    pub fn formatted_amount(&self) -> String {
        format_cents(self.total_amount_cents)
    }
}

/// Parse a decimal amount string ("500", "500.5", "500.50") into cents.
///
/// At most two fractional digits are accepted; anything else is a
/// malformed payload, including negative amounts.
pub fn parse_amount_cents(raw: &str) -> Result<i64, FetchError> {
    let malformed = || FetchError::MalformedPayload(format!("bad total_amount '{raw}'"));

    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.starts_with('-') || trimmed.starts_with('+') {
        return Err(malformed());
    }

    let (whole, frac) = match trimmed.split_once('.') {
        Some((_, f)) if f.is_empty() => return Err(malformed()),
        Some((w, f)) => (w, f),
        None => (trimmed, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(malformed());
    }
    if frac.len() > 2 || !whole.chars().all(|c| c.is_ascii_digit()) {
        return Err(malformed());
    }
    if !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(malformed());
    }

    let dollars: i64 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| malformed())?
    };
    let cents: i64 = if frac.is_empty() {
        0
    } else {
        // "5" means 50 cents, "05" means 5 cents
        let parsed: i64 = frac.parse().map_err(|_| malformed())?;
        if frac.len() == 1 { parsed * 10 } else { parsed }
    };

    dollars
        .checked_mul(100)
        .and_then(|d| d.checked_add(cents))
        .ok_or_else(malformed)
}

pub fn format_cents(cents: i64) -> String {
    format!("${}.{:02}", cents / 100, (cents % 100).abs())
}
