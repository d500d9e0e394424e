use checkout_flow::PaymentMethod;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct StartCheckoutRequest {
    pub bill_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SelectMethodRequest {
    pub method: PaymentMethod,
}

// Field updates and submissions post the tagged wire shape of
// `checkout_flow::MethodFields` directly, e.g.
// `{"method":"card","number":...,"expiry":...,"cvv":...}` or
// `{"method":"upi","upi_id":...}`.
