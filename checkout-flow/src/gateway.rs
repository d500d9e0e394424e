//! Billing gateway contract.
//!
//! The gateway holds the authoritative bill and payment-status records and
//! is the sole source of truth for whether money moved: the session never
//! assumes success without an explicit `SettleOutcome::Success`.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{bill::BillSnapshot, error::FetchError, method::PaymentMethod};

/// Why a settle call did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// The bill became Paid concurrently; the session must redirect, not
    /// offer a retry.
    AlreadyPaid,
    /// The payment was rejected; retrying with different details is fine.
    Declined,
    /// The gateway could not be reached. The charge state is ambiguous, so
    /// bill status must be re-checked before any retry.
    NetworkError,
    /// The gateway did not answer in time. Same ambiguity as NetworkError.
    Timeout,
    Unknown,
}

impl FailureReason {
    /// Failures where the charge may have landed server-side even though
    /// no success was observed. Retrying without re-checking the bill
    /// could double-charge.
    pub fn requires_verification(&self) -> bool {
        matches!(self, FailureReason::NetworkError | FailureReason::Timeout)
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FailureReason::AlreadyPaid => "This bill has already been paid",
            FailureReason::Declined => "The payment was declined",
            FailureReason::NetworkError => "Could not reach the billing service",
            FailureReason::Timeout => "The billing service did not respond in time",
            FailureReason::Unknown => "The payment could not be completed",
        };
        f.write_str(text)
    }
}

/// Result of a settle call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SettleOutcome {
    Success {
        transaction_ref: String,
    },
    Failure {
        reason: FailureReason,
        /// Human-readable text for the presenter.
        message: String,
    },
}

impl SettleOutcome {
    pub fn failure(reason: FailureReason, message: impl Into<String>) -> Self {
        SettleOutcome::Failure {
            reason,
            message: message.into(),
        }
    }
}

/// External billing collaborator.
///
/// Production uses [`crate::rest::RestBillingGateway`]; tests substitute
/// their own implementation.
#[async_trait]
pub trait BillingGateway: Send + Sync {
    async fn fetch_bill(&self, bill_id: &str) -> Result<BillSnapshot, FetchError>;

    /// Ask the gateway to settle the bill. All failures must be reported
    /// as a `SettleOutcome::Failure`, never as a panic or a transport
    /// error leaking through.
    async fn settle(&self, bill_id: &str, method: PaymentMethod) -> SettleOutcome;
}
