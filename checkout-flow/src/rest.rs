//! REST client for the hospital billing backend.
//!
//! Consumes `GET /billing/get_details?bill_id=<id>` and
//! `POST /billing/pay`. Every transport or payload problem on the settle
//! path is normalized into a [`SettleOutcome::Failure`] here, at the
//! gateway boundary; nothing propagates as an uncaught fault.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::warn;
use uuid::Uuid;

use crate::{
    bill::{BillSnapshot, PaymentStatus, parse_amount_cents},
    error::FetchError,
    gateway::{BillingGateway, FailureReason, SettleOutcome},
    method::PaymentMethod,
};

#[derive(Debug, Clone)]
pub struct RestGatewayConfig {
    /// Base URL of the billing API, e.g. `https://host/api`.
    pub base_url: String,
    /// Bearer token attached to every request when present. The billing
    /// backend guards both endpoints with JWT.
    pub bearer_token: Option<String>,
    pub request_timeout: Duration,
}

impl RestGatewayConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bearer_token: None,
            request_timeout: Duration::from_secs(20),
        }
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }
}

pub struct RestBillingGateway {
    client: reqwest::Client,
    config: RestGatewayConfig,
}

#[derive(Debug, Deserialize)]
struct FetchEnvelope {
    status: String,
    message: Option<String>,
    data: Option<BillPayload>,
}

/// Wire shape of a bill row. The backend serializes DB values loosely, so
/// ids and amounts may arrive as strings or numbers.
#[derive(Debug, Deserialize)]
struct BillPayload {
    bill_id: Value,
    total_amount: Value,
    payment_status: String,
    doctor_fname: Option<String>,
    doctor_lname: Option<String>,
    appointment_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PayEnvelope {
    status: String,
    message: Option<String>,
    transaction_ref: Option<String>,
}

impl RestBillingGateway {
    pub fn new(config: RestGatewayConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl BillingGateway for RestBillingGateway {
    async fn fetch_bill(&self, bill_id: &str) -> Result<BillSnapshot, FetchError> {
        let request = self
            .authorize(self.client.get(self.url("billing/get_details")))
            .query(&[("bill_id", bill_id)]);

        let response = request
            .send()
            .await
            .map_err(|e| FetchError::Unreachable(e.to_string()))?;

        let envelope: FetchEnvelope = response
            .json()
            .await
            .map_err(|e| FetchError::MalformedPayload(e.to_string()))?;

        if envelope.status != "success" {
            return Err(FetchError::Gateway(
                envelope
                    .message
                    .unwrap_or_else(|| "bill lookup failed".to_string()),
            ));
        }
        let payload = envelope
            .data
            .ok_or_else(|| FetchError::MalformedPayload("missing data".to_string()))?;
        snapshot_from_payload(payload)
    }

    async fn settle(&self, bill_id: &str, method: PaymentMethod) -> SettleOutcome {
        let body = json!({
            "bill_id": bill_id,
            "method": method.wire_label(),
        });
        let request = self
            .authorize(self.client.post(self.url("billing/pay")))
            .json(&body);

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return SettleOutcome::failure(FailureReason::Timeout, e.to_string());
            }
            Err(e) => {
                return SettleOutcome::failure(FailureReason::NetworkError, e.to_string());
            }
        };

        let envelope: PayEnvelope = match response.json().await {
            Ok(envelope) => envelope,
            Err(e) => {
                // the charge may or may not have landed; let the refresh
                // policy sort it out
                warn!("unreadable settle response for bill {}: {}", bill_id, e);
                return SettleOutcome::failure(
                    FailureReason::Unknown,
                    "Unreadable response from the billing service".to_string(),
                );
            }
        };

        if envelope.status == "success" {
            SettleOutcome::Success {
                transaction_ref: envelope.transaction_ref.unwrap_or_else(generated_ref),
            }
        } else {
            let message = envelope
                .message
                .unwrap_or_else(|| FailureReason::Unknown.to_string());
            SettleOutcome::failure(classify_failure_message(&message), message)
        }
    }
}

fn snapshot_from_payload(payload: BillPayload) -> Result<BillSnapshot, FetchError> {
    let bill_id = value_to_string(&payload.bill_id)
        .ok_or_else(|| FetchError::MalformedPayload("bad bill_id".to_string()))?;
    let amount_raw = value_to_string(&payload.total_amount)
        .ok_or_else(|| FetchError::MalformedPayload("bad total_amount".to_string()))?;
    let total_amount_cents = parse_amount_cents(&amount_raw)?;
    let payment_status = PaymentStatus::parse(&payload.payment_status)?;

    let mut snapshot = BillSnapshot::new(bill_id, total_amount_cents, payment_status)?;
    if let Some(name) = doctor_display_name(&payload.doctor_fname, &payload.doctor_lname) {
        snapshot = snapshot.with_doctor(name);
    }
    if let Some(raw) = payload.appointment_date.as_deref() {
        // display-only: dates the backend formats oddly are dropped, not fatal
        match parse_sql_date(raw) {
            Some(date) => snapshot = snapshot.with_appointment_date(date),
            None => warn!("unparseable appointment_date '{}'", raw),
        }
    }
    Ok(snapshot)
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn doctor_display_name(fname: &Option<String>, lname: &Option<String>) -> Option<String> {
    let parts: Vec<&str> = [fname, lname]
        .into_iter()
        .flatten()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(format!("Dr. {}", parts.join(" ")))
    }
}

/// Accepts `YYYY-MM-DD`, with or without a trailing time part.
fn parse_sql_date(raw: &str) -> Option<chrono::NaiveDate> {
    let date_part = raw.get(..10)?;
    chrono::NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

fn classify_failure_message(message: &str) -> FailureReason {
    let lowered = message.to_lowercase();
    if lowered.contains("already paid") || lowered.contains("already been paid") {
        FailureReason::AlreadyPaid
    } else if lowered.contains("declined") || lowered.contains("insufficient") {
        FailureReason::Declined
    } else {
        FailureReason::Unknown
    }
}

/// The backend's pay endpoint reports only success; give the receipt a
/// reference when none is supplied.
fn generated_ref() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_uppercase()
}
