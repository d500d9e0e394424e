use thiserror::Error;

pub type Result<T> = std::result::Result<T, CheckoutError>;

/// Errors surfaced by checkout operations.
///
/// Settlement failures are not errors: the gateway reports them as a
/// [`crate::gateway::SettleOutcome::Failure`] and the session records the
/// reason on the attempt. This enum covers everything that stops an
/// operation before (or instead of) a settle call.
#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("No payment method selected")]
    NoMethodSelected,

    #[error("A payment attempt is already in flight")]
    AttemptInFlight,

    #[error("Bill status must be re-checked before retrying")]
    VerificationRequired,

    #[error("Operation '{operation}' is not valid in state '{state}'")]
    InvalidTransition {
        state: &'static str,
        operation: &'static str,
    },
}

/// Bill lookup failed. Shown as a blocking message; no payment form is
/// rendered and no session is registered.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("Billing service unreachable: {0}")]
    Unreachable(String),

    #[error("Billing service rejected the lookup: {0}")]
    Gateway(String),

    #[error("Malformed bill payload: {0}")]
    MalformedPayload(String),
}

/// Local, per-field input validation. Never reaches the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Card number is invalid")]
    CardNumber,

    #[error("Card expiry must be MM/YY and not in the past")]
    CardExpiry,

    #[error("CVV must be 3 or 4 digits")]
    CardCvv,

    #[error("UPI id must look like name@bank")]
    UpiId,

    #[error("Entered fields do not match the selected payment method")]
    MethodMismatch,
}
