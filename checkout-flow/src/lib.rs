pub mod bill;
pub mod error;
pub mod gateway;
pub mod method;
pub mod rest;
pub mod runner;
pub mod session;
pub mod storage;

// Re-export commonly used types
pub use bill::{BillSnapshot, PaymentStatus};
pub use error::{CheckoutError, FetchError, Result, ValidationError};
pub use gateway::{BillingGateway, FailureReason, SettleOutcome};
pub use method::{CardFields, MethodFields, PaymentMethod, UpiFields};
pub use rest::{RestBillingGateway, RestGatewayConfig};
pub use runner::{
    BillSummary, CheckoutConfig, CheckoutRunner, CheckoutView, FailureView, RedirectSignal,
};
pub use session::{
    AttemptResult, FailureNotice, PaymentAttempt, PaymentSession, SessionState,
};
pub use storage::{InMemorySessionStore, SessionStore, SharedSession};

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct FixedGateway {
        bill: BillSnapshot,
    }

    #[async_trait]
    impl BillingGateway for FixedGateway {
        async fn fetch_bill(&self, _bill_id: &str) -> std::result::Result<BillSnapshot, FetchError> {
            Ok(self.bill.clone())
        }

        async fn settle(&self, _bill_id: &str, _method: PaymentMethod) -> SettleOutcome {
            SettleOutcome::Success {
                transaction_ref: "AB12".to_string(),
            }
        }
    }

    #[tokio::test]
    async fn end_to_end_checkout() {
        let bill = BillSnapshot::new("42", 50_000, PaymentStatus::Unpaid).unwrap();
        let runner = CheckoutRunner::new(
            Arc::new(FixedGateway { bill }),
            Arc::new(InMemorySessionStore::new()),
        );

        let view = runner.start("42").await.unwrap();
        runner
            .select_method(&view.session_id, PaymentMethod::Card)
            .await
            .unwrap();

        let fields = MethodFields::Card(CardFields {
            number: "4111 1111 1111 1111".to_string(),
            expiry: "12/29".to_string(),
            cvv: "123".to_string(),
        });
        let view = runner.submit(&view.session_id, fields).await.unwrap();

        assert_eq!(view.state, "succeeded");
        assert_eq!(view.transaction_ref.as_deref(), Some("AB12"));
        assert!(view.redirect.is_some());
    }
}
