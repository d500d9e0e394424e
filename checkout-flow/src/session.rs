//! PaymentSession state machine.
//!
//! One session owns one checkout attempt for one bill. The machine is
//! synchronous and pure: gateway I/O lives in
//! [`crate::runner::CheckoutRunner`], which feeds results back in through
//! `bill_loaded`, `settle_resolved` and `bill_verified`. Each operation
//! fully completes its transition before the next is accepted.
//!
//! ```text
//! Loading ──► AwaitingMethod ──► Submitting ──► Succeeded
//!    │              ▲   ▲            │
//!    │              │   └── retry ── Failed
//!    └──────────────┼────────────────┴──► AlreadyPaidRedirect
//!                   └─ bill_verified (refresh after network/timeout)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    bill::BillSnapshot,
    error::{CheckoutError, FetchError, Result, ValidationError},
    gateway::{FailureReason, SettleOutcome},
    method::{MethodFields, PaymentMethod},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionState {
    /// Bill snapshot not fetched yet; no payment entry possible.
    Loading,
    /// Bill is Unpaid; waiting for method selection and submission.
    AwaitingMethod,
    /// A settle call is in flight. Exactly one attempt is Pending and any
    /// further submit is rejected until it resolves.
    Submitting,
    /// Terminal. Redirect fires after the configured grace period.
    Succeeded,
    Failed {
        reason: FailureReason,
        /// True after NetworkError/Timeout: the charge state is ambiguous
        /// and the bill must be re-fetched before a retry is allowed.
        needs_verification: bool,
    },
    /// Bill was (or became) Paid. Terminal; forces immediate redirect with
    /// no payment entry.
    AlreadyPaidRedirect,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Loading => "loading",
            SessionState::AwaitingMethod => "awaiting_method",
            SessionState::Submitting => "submitting",
            SessionState::Succeeded => "succeeded",
            SessionState::Failed { .. } => "failed",
            SessionState::AlreadyPaidRedirect => "already_paid_redirect",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttemptResult {
    Pending,
    Success { transaction_ref: String },
    Failure { reason: FailureReason },
}

/// One submission. At most one attempt is Pending per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentAttempt {
    pub method: PaymentMethod,
    pub submitted_at: DateTime<Utc>,
    pub result: AttemptResult,
}

/// Last settle failure, kept for display after the state moves on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureNotice {
    pub reason: FailureReason,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSession {
    pub id: String,
    pub bill_id: String,
    state: SessionState,
    bill: Option<BillSnapshot>,
    selected_method: Option<PaymentMethod>,
    draft_fields: Option<MethodFields>,
    attempts: Vec<PaymentAttempt>,
    last_failure: Option<FailureNotice>,
}

impl PaymentSession {
    pub fn new(bill_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            bill_id: bill_id.into(),
            state: SessionState::Loading,
            bill: None,
            selected_method: None,
            draft_fields: None,
            attempts: Vec::new(),
            last_failure: None,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn bill(&self) -> Option<&BillSnapshot> {
        self.bill.as_ref()
    }

    pub fn selected_method(&self) -> Option<PaymentMethod> {
        self.selected_method
    }

    pub fn draft_fields(&self) -> Option<&MethodFields> {
        self.draft_fields.as_ref()
    }

    pub fn attempts(&self) -> &[PaymentAttempt] {
        &self.attempts
    }

    pub fn last_failure(&self) -> Option<&FailureNotice> {
        self.last_failure.as_ref()
    }

    /// Reference of the successful settlement, once there is one.
    pub fn transaction_ref(&self) -> Option<&str> {
        self.attempts.iter().rev().find_map(|a| match &a.result {
            AttemptResult::Success { transaction_ref } => Some(transaction_ref.as_str()),
            _ => None,
        })
    }

    /// Apply the snapshot fetched at session start.
    ///
    /// A Paid bill goes straight to `AlreadyPaidRedirect` so a stale link
    /// never shows payment entry, let alone settles twice.
    pub fn bill_loaded(&mut self, bill: BillSnapshot) -> Result<()> {
        self.ensure_state(&SessionState::Loading, "bill_loaded")?;
        if bill.bill_id != self.bill_id {
            return Err(CheckoutError::Fetch(FetchError::MalformedPayload(format!(
                "expected bill {} but gateway returned {}",
                self.bill_id, bill.bill_id
            ))));
        }
        self.state = if bill.payment_status.is_paid() {
            SessionState::AlreadyPaidRedirect
        } else {
            SessionState::AwaitingMethod
        };
        self.bill = Some(bill);
        Ok(())
    }

    /// Select (or switch) the payment method. Switching discards any
    /// entered method-specific fields; no cross-method state survives.
    pub fn select_method(&mut self, method: PaymentMethod) -> Result<()> {
        self.ensure_state(&SessionState::AwaitingMethod, "select_method")?;
        self.selected_method = Some(method);
        self.draft_fields = None;
        Ok(())
    }

    /// Record the fields the presenter has bound so far. They must belong
    /// to the selected method.
    pub fn update_fields(&mut self, fields: MethodFields) -> Result<()> {
        self.ensure_state(&SessionState::AwaitingMethod, "update_fields")?;
        let method = self.selected_method.ok_or(CheckoutError::NoMethodSelected)?;
        if fields.method() != method {
            return Err(ValidationError::MethodMismatch.into());
        }
        self.draft_fields = Some(fields);
        Ok(())
    }

    /// Validate the submission locally and enter `Submitting` with a
    /// Pending attempt. Returns the method the caller must settle with.
    ///
    /// The gateway is not involved here: malformed fields fail before any
    /// network traffic, and a submit while an attempt is Pending is
    /// rejected without a second settle call.
    pub fn begin_submit(&mut self, fields: MethodFields) -> Result<PaymentMethod> {
        match self.state {
            SessionState::Submitting => return Err(CheckoutError::AttemptInFlight),
            SessionState::AwaitingMethod => {}
            _ => {
                return Err(CheckoutError::InvalidTransition {
                    state: self.state.name(),
                    operation: "submit",
                });
            }
        }
        let method = self.selected_method.ok_or(CheckoutError::NoMethodSelected)?;
        if fields.method() != method {
            return Err(ValidationError::MethodMismatch.into());
        }
        fields.validate()?;

        self.attempts.push(PaymentAttempt {
            method,
            submitted_at: Utc::now(),
            result: AttemptResult::Pending,
        });
        self.state = SessionState::Submitting;
        Ok(method)
    }

    /// Apply the gateway's settle result to the Pending attempt.
    pub fn settle_resolved(&mut self, outcome: SettleOutcome) -> Result<()> {
        self.ensure_state(&SessionState::Submitting, "settle_resolved")?;
        let attempt = self
            .attempts
            .last_mut()
            .filter(|a| a.result == AttemptResult::Pending)
            .ok_or(CheckoutError::InvalidTransition {
                state: "submitting",
                operation: "settle_resolved",
            })?;

        match outcome {
            SettleOutcome::Success { transaction_ref } => {
                attempt.result = AttemptResult::Success { transaction_ref };
                self.last_failure = None;
                self.state = SessionState::Succeeded;
            }
            SettleOutcome::Failure { reason, message } => {
                attempt.result = AttemptResult::Failure { reason };
                self.last_failure = Some(FailureNotice { reason, message });
                self.state = match reason {
                    FailureReason::AlreadyPaid => SessionState::AlreadyPaidRedirect,
                    _ => SessionState::Failed {
                        reason,
                        needs_verification: reason.requires_verification(),
                    },
                };
            }
        }
        Ok(())
    }

    /// Return to `AwaitingMethod` after a failure, keeping the selected
    /// method and the failure notice, clearing any draft.
    ///
    /// Rejected after NetworkError/Timeout until `bill_verified` has
    /// confirmed the bill is still Unpaid.
    pub fn retry(&mut self) -> Result<()> {
        match self.state {
            SessionState::Failed {
                needs_verification: true,
                ..
            } => Err(CheckoutError::VerificationRequired),
            SessionState::Failed { .. } => {
                self.state = SessionState::AwaitingMethod;
                self.draft_fields = None;
                Ok(())
            }
            _ => Err(CheckoutError::InvalidTransition {
                state: self.state.name(),
                operation: "retry",
            }),
        }
    }

    /// Apply a re-fetched snapshot after an ambiguous failure. A bill that
    /// turned Paid means the charge landed: force the redirect instead of
    /// offering a retry that would charge twice.
    pub fn bill_verified(&mut self, bill: BillSnapshot) -> Result<()> {
        if !matches!(self.state, SessionState::Failed { .. }) {
            return Err(CheckoutError::InvalidTransition {
                state: self.state.name(),
                operation: "bill_verified",
            });
        }
        if bill.bill_id != self.bill_id {
            return Err(CheckoutError::Fetch(FetchError::MalformedPayload(format!(
                "expected bill {} but gateway returned {}",
                self.bill_id, bill.bill_id
            ))));
        }
        self.state = if bill.payment_status.is_paid() {
            SessionState::AlreadyPaidRedirect
        } else {
            SessionState::AwaitingMethod
        };
        self.bill = Some(bill);
        self.draft_fields = None;
        Ok(())
    }

    fn ensure_state(&self, expected: &SessionState, operation: &'static str) -> Result<()> {
        if &self.state == expected {
            Ok(())
        } else {
            Err(CheckoutError::InvalidTransition {
                state: self.state.name(),
                operation,
            })
        }
    }
}
