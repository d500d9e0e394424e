//! CheckoutRunner – drives a [`PaymentSession`] through its suspension
//! points: it loads the session from the store, applies one transition,
//! performs the gateway call where the machine demands one, and feeds the
//! result back in.
//!
//! The session lock is released across the settle await, so while the
//! call is in flight the session observably sits in `Submitting` and a
//! concurrent submit is rejected without a second gateway call. The
//! settle future is additionally bounded by `CheckoutConfig::settle_timeout`
//! so a Pending attempt always resolves, even if the gateway hangs.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::{
    bill::BillSnapshot,
    error::{CheckoutError, Result},
    gateway::{BillingGateway, FailureReason, SettleOutcome},
    method::{MethodFields, PaymentMethod},
    session::{PaymentSession, SessionState},
    storage::{SessionStore, SharedSession},
};

#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    /// Upper bound on a settle call. Elapsing resolves the attempt to
    /// `Failure(Timeout)`; it never stays Pending.
    pub settle_timeout: Duration,
    /// Grace period before the success redirect fires, so the user can
    /// read the confirmation. A parameter on the redirect signal, not a
    /// sleep anywhere in the core.
    pub success_redirect_delay: Duration,
    pub dashboard_route: String,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            settle_timeout: Duration::from_secs(30),
            success_redirect_delay: Duration::from_millis(2500),
            dashboard_route: "/dashboard".to_string(),
        }
    }
}

/// Tells the presenter where to navigate and how long to wait first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RedirectSignal {
    pub to: String,
    pub after_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BillSummary {
    pub bill_id: String,
    pub total_amount_cents: i64,
    pub total_amount: String,
    pub doctor_name: Option<String>,
    pub appointment_date: Option<String>,
}

impl BillSummary {
    fn from_snapshot(bill: &BillSnapshot) -> Self {
        Self {
            bill_id: bill.bill_id.clone(),
            total_amount_cents: bill.total_amount_cents,
            total_amount: bill.formatted_amount(),
            doctor_name: bill.doctor_name.clone(),
            appointment_date: bill.appointment_date.map(|d| d.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureView {
    pub reason: FailureReason,
    pub message: String,
    /// True when the bill must be re-fetched (refresh) before retrying.
    pub needs_verification: bool,
}

/// Presenter-facing projection of a session after an operation.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutView {
    pub session_id: String,
    pub bill_id: String,
    pub state: String,
    pub bill: Option<BillSummary>,
    pub selected_method: Option<PaymentMethod>,
    pub failure: Option<FailureView>,
    pub transaction_ref: Option<String>,
    pub redirect: Option<RedirectSignal>,
}

#[derive(Clone)]
pub struct CheckoutRunner {
    gateway: Arc<dyn BillingGateway>,
    store: Arc<dyn SessionStore>,
    config: CheckoutConfig,
}

impl CheckoutRunner {
    pub fn new(gateway: Arc<dyn BillingGateway>, store: Arc<dyn SessionStore>) -> Self {
        Self::with_config(gateway, store, CheckoutConfig::default())
    }

    pub fn with_config(
        gateway: Arc<dyn BillingGateway>,
        store: Arc<dyn SessionStore>,
        config: CheckoutConfig,
    ) -> Self {
        Self {
            gateway,
            store,
            config,
        }
    }

    /// Start a checkout for a bill: fetch the snapshot, create the
    /// session, register it. A fetch failure is returned as-is and no
    /// session is registered, so the presenter shows a blocking message
    /// with no payment form.
    pub async fn start(&self, bill_id: &str) -> Result<CheckoutView> {
        info!("starting checkout for bill {}", bill_id);
        let bill = self.gateway.fetch_bill(bill_id).await?;

        let mut session = PaymentSession::new(bill_id);
        session.bill_loaded(bill)?;
        if matches!(session.state(), SessionState::AlreadyPaidRedirect) {
            info!("bill {} already paid, redirecting", bill_id);
        }

        let view = self.view_of(&session);
        self.store.insert(session).await?;
        Ok(view)
    }

    pub async fn select_method(&self, session_id: &str, method: PaymentMethod) -> Result<CheckoutView> {
        let shared = self.load(session_id).await?;
        let mut session = shared.lock().await;
        session.select_method(method)?;
        Ok(self.view_of(&session))
    }

    pub async fn update_fields(&self, session_id: &str, fields: MethodFields) -> Result<CheckoutView> {
        let shared = self.load(session_id).await?;
        let mut session = shared.lock().await;
        session.update_fields(fields)?;
        Ok(self.view_of(&session))
    }

    /// Validate and settle one submission.
    ///
    /// The lock is held only for the transitions; the settle call itself
    /// runs with the session visibly in `Submitting`.
    pub async fn submit(&self, session_id: &str, fields: MethodFields) -> Result<CheckoutView> {
        let shared = self.load(session_id).await?;

        let (bill_id, method) = {
            let mut session = shared.lock().await;
            let method = session.begin_submit(fields)?;
            (session.bill_id.clone(), method)
        };

        info!("settling bill {} via {}", bill_id, method);
        let outcome = match tokio::time::timeout(
            self.config.settle_timeout,
            self.gateway.settle(&bill_id, method),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!("settle for bill {} timed out", bill_id);
                SettleOutcome::failure(FailureReason::Timeout, FailureReason::Timeout.to_string())
            }
        };

        let mut session = shared.lock().await;
        session.settle_resolved(outcome)?;
        match session.state() {
            SessionState::Succeeded => {
                info!("bill {} settled, ref {:?}", bill_id, session.transaction_ref())
            }
            state => warn!("settle for bill {} resolved to {}", bill_id, state.name()),
        }
        Ok(self.view_of(&session))
    }

    /// Clear a non-ambiguous failure and return to method entry.
    pub async fn retry(&self, session_id: &str) -> Result<CheckoutView> {
        let shared = self.load(session_id).await?;
        let mut session = shared.lock().await;
        session.retry()?;
        Ok(self.view_of(&session))
    }

    /// Re-fetch the bill after an ambiguous failure and apply the fresh
    /// status. Required before retrying a NetworkError/Timeout failure.
    pub async fn refresh(&self, session_id: &str) -> Result<CheckoutView> {
        let shared = self.load(session_id).await?;
        let bill_id = { shared.lock().await.bill_id.clone() };

        let bill = self.gateway.fetch_bill(&bill_id).await?;

        let mut session = shared.lock().await;
        session.bill_verified(bill)?;
        Ok(self.view_of(&session))
    }

    pub async fn view(&self, session_id: &str) -> Result<CheckoutView> {
        let shared = self.load(session_id).await?;
        let session = shared.lock().await;
        Ok(self.view_of(&session))
    }

    async fn load(&self, session_id: &str) -> Result<SharedSession> {
        self.store
            .get(session_id)
            .await?
            .ok_or_else(|| CheckoutError::SessionNotFound(session_id.to_string()))
    }

    fn view_of(&self, session: &PaymentSession) -> CheckoutView {
        let redirect = match session.state() {
            SessionState::Succeeded => Some(RedirectSignal {
                to: self.config.dashboard_route.clone(),
                after_ms: self.config.success_redirect_delay.as_millis() as u64,
            }),
            SessionState::AlreadyPaidRedirect => Some(RedirectSignal {
                to: self.config.dashboard_route.clone(),
                after_ms: 0,
            }),
            _ => None,
        };

        let failure = match session.state() {
            SessionState::Failed {
                reason,
                needs_verification,
            } => session.last_failure().map(|notice| FailureView {
                reason: *reason,
                message: notice.message.clone(),
                needs_verification: *needs_verification,
            }),
            // after retry() the notice is still shown alongside the form
            _ => session.last_failure().map(|notice| FailureView {
                reason: notice.reason,
                message: notice.message.clone(),
                needs_verification: false,
            }),
        };

        CheckoutView {
            session_id: session.id.clone(),
            bill_id: session.bill_id.clone(),
            state: session.state().name().to_string(),
            bill: session.bill().map(BillSummary::from_snapshot),
            selected_method: session.selected_method(),
            failure,
            transaction_ref: session.transaction_ref().map(str::to_string),
            redirect,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bill::PaymentStatus;
    use crate::error::FetchError;
    use crate::gateway::SettleOutcome;
    use crate::method::{CardFields, UpiFields};
    use crate::storage::InMemorySessionStore;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    struct MockGateway {
        bill: StdMutex<BillSnapshot>,
        settle_outcome: StdMutex<Option<SettleOutcome>>,
        settle_calls: AtomicUsize,
        fetch_calls: AtomicUsize,
        hold: Option<Arc<Notify>>,
    }

    impl MockGateway {
        fn new(bill: BillSnapshot, outcome: Option<SettleOutcome>) -> Self {
            Self {
                bill: StdMutex::new(bill),
                settle_outcome: StdMutex::new(outcome),
                settle_calls: AtomicUsize::new(0),
                fetch_calls: AtomicUsize::new(0),
                hold: None,
            }
        }

        fn holding(mut self, hold: Arc<Notify>) -> Self {
            self.hold = Some(hold);
            self
        }

        /// Snapshot served by every fetch from now on.
        fn set_bill(&self, bill: BillSnapshot) {
            *self.bill.lock().unwrap() = bill;
        }
    }

    #[async_trait]
    impl BillingGateway for MockGateway {
        async fn fetch_bill(&self, _bill_id: &str) -> std::result::Result<BillSnapshot, FetchError> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.bill.lock().unwrap().clone())
        }

        async fn settle(&self, _bill_id: &str, _method: PaymentMethod) -> SettleOutcome {
            self.settle_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(hold) = &self.hold {
                hold.notified().await;
            }
            let outcome = { self.settle_outcome.lock().unwrap().clone() };
            match outcome {
                Some(outcome) => outcome,
                None => std::future::pending().await,
            }
        }
    }

    fn unpaid_bill() -> BillSnapshot {
        BillSnapshot::new("42", 50_000, PaymentStatus::Unpaid).unwrap()
    }

    fn paid_bill() -> BillSnapshot {
        BillSnapshot::new("42", 50_000, PaymentStatus::Paid).unwrap()
    }

    fn card_fields() -> MethodFields {
        MethodFields::Card(CardFields {
            number: "4111 1111 1111 1111".to_string(),
            expiry: "12/29".to_string(),
            cvv: "123".to_string(),
        })
    }

    fn runner_with(gateway: Arc<MockGateway>) -> CheckoutRunner {
        CheckoutRunner::new(gateway, Arc::new(InMemorySessionStore::new()))
    }

    #[tokio::test]
    async fn full_card_checkout_redirects_after_grace_period() {
        let gateway = Arc::new(MockGateway::new(
            unpaid_bill(),
            Some(SettleOutcome::Success {
                transaction_ref: "AB12".to_string(),
            }),
        ));
        let runner = runner_with(gateway.clone());

        let view = runner.start("42").await.unwrap();
        assert_eq!(view.state, "awaiting_method");
        assert_eq!(view.bill.as_ref().unwrap().total_amount, "$500.00");
        assert!(view.redirect.is_none());

        runner
            .select_method(&view.session_id, PaymentMethod::Card)
            .await
            .unwrap();
        let view = runner.submit(&view.session_id, card_fields()).await.unwrap();

        assert_eq!(view.state, "succeeded");
        assert_eq!(view.transaction_ref.as_deref(), Some("AB12"));
        let redirect = view.redirect.unwrap();
        assert_eq!(redirect.to, "/dashboard");
        assert_eq!(redirect.after_ms, 2500);
        assert_eq!(gateway.settle_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn paid_bill_redirects_immediately_without_settling() {
        let gateway = Arc::new(MockGateway::new(paid_bill(), None));
        let runner = runner_with(gateway.clone());

        let view = runner.start("42").await.unwrap();
        assert_eq!(view.state, "already_paid_redirect");
        assert_eq!(
            view.redirect,
            Some(RedirectSignal {
                to: "/dashboard".to_string(),
                after_ms: 0
            })
        );
        assert_eq!(gateway.settle_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn validation_failure_never_reaches_the_gateway() {
        let gateway = Arc::new(MockGateway::new(unpaid_bill(), None));
        let runner = runner_with(gateway.clone());

        let view = runner.start("42").await.unwrap();
        runner
            .select_method(&view.session_id, PaymentMethod::Upi)
            .await
            .unwrap();

        let err = runner
            .submit(
                &view.session_id,
                MethodFields::Upi(UpiFields {
                    upi_id: "notanid".to_string(),
                }),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::Validation(_)));
        assert_eq!(gateway.settle_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn concurrent_submit_is_rejected_while_pending() {
        let release = Arc::new(Notify::new());
        let gateway = Arc::new(
            MockGateway::new(
                unpaid_bill(),
                Some(SettleOutcome::Success {
                    transaction_ref: "AB12".to_string(),
                }),
            )
            .holding(release.clone()),
        );
        let runner = runner_with(gateway.clone());

        let view = runner.start("42").await.unwrap();
        let session_id = view.session_id.clone();
        runner
            .select_method(&session_id, PaymentMethod::Card)
            .await
            .unwrap();

        let first = tokio::spawn({
            let runner = runner.clone();
            let session_id = session_id.clone();
            async move { runner.submit(&session_id, card_fields()).await }
        });

        // wait until the first submit is parked inside the settle call
        for _ in 0..100 {
            tokio::task::yield_now().await;
            if runner.view(&session_id).await.unwrap().state == "submitting" {
                break;
            }
        }
        assert_eq!(runner.view(&session_id).await.unwrap().state, "submitting");

        let err = runner.submit(&session_id, card_fields()).await.unwrap_err();
        assert!(matches!(err, CheckoutError::AttemptInFlight));

        release.notify_one();
        let view = first.await.unwrap().unwrap();
        assert_eq!(view.state, "succeeded");
        assert_eq!(gateway.settle_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn network_failure_requires_refresh_then_allows_retry() {
        let gateway = Arc::new(MockGateway::new(
            unpaid_bill(),
            Some(SettleOutcome::failure(
                FailureReason::NetworkError,
                "connection reset",
            )),
        ));
        let runner = runner_with(gateway.clone());

        let view = runner.start("42").await.unwrap();
        let session_id = view.session_id.clone();
        runner
            .select_method(&session_id, PaymentMethod::Card)
            .await
            .unwrap();

        let view = runner.submit(&session_id, card_fields()).await.unwrap();
        assert_eq!(view.state, "failed");
        let failure = view.failure.unwrap();
        assert_eq!(failure.reason, FailureReason::NetworkError);
        assert!(failure.needs_verification);
        // local snapshot untouched by the failure
        assert_eq!(view.bill.unwrap().bill_id, "42");

        assert!(matches!(
            runner.retry(&session_id).await.unwrap_err(),
            CheckoutError::VerificationRequired
        ));

        let view = runner.refresh(&session_id).await.unwrap();
        assert_eq!(view.state, "awaiting_method");
        assert_eq!(gateway.fetch_calls.load(Ordering::SeqCst), 2);

        *gateway.settle_outcome.lock().unwrap() = Some(SettleOutcome::Success {
            transaction_ref: "CD34".to_string(),
        });
        let view = runner.submit(&session_id, card_fields()).await.unwrap();
        assert_eq!(view.state, "succeeded");
        assert_eq!(view.transaction_ref.as_deref(), Some("CD34"));
    }

    #[tokio::test]
    async fn refresh_discovering_paid_forces_redirect() {
        let gateway = Arc::new(MockGateway::new(
            unpaid_bill(),
            Some(SettleOutcome::failure(FailureReason::Timeout, "timed out")),
        ));
        let runner = runner_with(gateway.clone());

        let view = runner.start("42").await.unwrap();
        let session_id = view.session_id.clone();
        runner
            .select_method(&session_id, PaymentMethod::Card)
            .await
            .unwrap();
        runner.submit(&session_id, card_fields()).await.unwrap();

        // the charge actually landed server-side
        gateway.set_bill(paid_bill());
        let view = runner.refresh(&session_id).await.unwrap();
        assert_eq!(view.state, "already_paid_redirect");
        assert_eq!(view.redirect.unwrap().after_ms, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_settle_resolves_to_timeout() {
        let gateway = Arc::new(MockGateway::new(unpaid_bill(), None));
        let config = CheckoutConfig {
            settle_timeout: Duration::from_millis(100),
            ..CheckoutConfig::default()
        };
        let runner = CheckoutRunner::with_config(
            gateway.clone(),
            Arc::new(InMemorySessionStore::new()),
            config,
        );

        let view = runner.start("42").await.unwrap();
        let session_id = view.session_id.clone();
        runner
            .select_method(&session_id, PaymentMethod::Card)
            .await
            .unwrap();

        let view = runner.submit(&session_id, card_fields()).await.unwrap();
        assert_eq!(view.state, "failed");
        let failure = view.failure.unwrap();
        assert_eq!(failure.reason, FailureReason::Timeout);
        assert!(failure.needs_verification);
    }

    #[tokio::test]
    async fn already_paid_conflict_during_settle_redirects() {
        let gateway = Arc::new(MockGateway::new(
            unpaid_bill(),
            Some(SettleOutcome::failure(
                FailureReason::AlreadyPaid,
                "Bill already paid",
            )),
        ));
        let runner = runner_with(gateway);

        let view = runner.start("42").await.unwrap();
        let session_id = view.session_id.clone();
        runner
            .select_method(&session_id, PaymentMethod::Card)
            .await
            .unwrap();

        let view = runner.submit(&session_id, card_fields()).await.unwrap();
        assert_eq!(view.state, "already_paid_redirect");
        assert_eq!(view.redirect.unwrap().after_ms, 0);
    }

    #[tokio::test]
    async fn unknown_session_is_reported() {
        let gateway = Arc::new(MockGateway::new(unpaid_bill(), None));
        let runner = runner_with(gateway);
        assert!(matches!(
            runner.view("nope").await.unwrap_err(),
            CheckoutError::SessionNotFound(_)
        ));
    }
}
