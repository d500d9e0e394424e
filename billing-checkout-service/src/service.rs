use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use checkout_flow::{
    CheckoutError, CheckoutRunner, CheckoutView, InMemorySessionStore, MethodFields,
    RestBillingGateway, RestGatewayConfig,
};
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::models::{SelectMethodRequest, StartCheckoutRequest};

type ApiResult<T> = Result<Json<T>, ApiError>;
type ApiError = (StatusCode, Json<Value>);

fn error_response(status: StatusCode, message: &str) -> ApiError {
    (status, Json(json!({ "error": message })))
}

fn map_checkout_error(err: CheckoutError) -> ApiError {
    let status = match &err {
        CheckoutError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        CheckoutError::Fetch(_) => StatusCode::BAD_GATEWAY,
        CheckoutError::Validation(_) | CheckoutError::NoMethodSelected => StatusCode::BAD_REQUEST,
        CheckoutError::AttemptInFlight
        | CheckoutError::VerificationRequired
        | CheckoutError::InvalidTransition { .. } => StatusCode::CONFLICT,
    };
    if status.is_server_error() {
        error!("checkout operation failed: {}", err);
    }
    error_response(status, &err.to_string())
}

#[derive(Clone)]
pub struct AppState {
    pub runner: CheckoutRunner,
}

/// Build the checkout runner from environment configuration.
pub fn runner_from_env() -> anyhow::Result<CheckoutRunner> {
    let base_url = std::env::var("BILLING_API_URL")
        .map_err(|_| anyhow::anyhow!("BILLING_API_URL not set"))?;

    let mut config = RestGatewayConfig::new(base_url);
    if let Ok(token) = std::env::var("BILLING_API_TOKEN") {
        config = config.with_bearer_token(token);
    }

    let gateway = Arc::new(RestBillingGateway::new(config)?);
    let store = Arc::new(InMemorySessionStore::new());
    Ok(CheckoutRunner::new(gateway, store))
}

pub fn create_app(runner: CheckoutRunner) -> Router {
    build_router(AppState { runner })
}

fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/checkout", post(start_checkout))
        .route("/checkout/{session_id}", get(get_checkout))
        .route("/checkout/{session_id}/method", post(select_method))
        .route("/checkout/{session_id}/fields", post(update_fields))
        .route("/checkout/{session_id}/pay", post(pay))
        .route("/checkout/{session_id}/retry", post(retry))
        .route("/checkout/{session_id}/refresh", post(refresh))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "Billing Checkout Service",
        "version": "1.0.0",
        "description": "Checkout workflow for hospital bills with card and UPI payment",
        "endpoints": {
            "POST /checkout": "Start a checkout session for a bill",
            "GET /checkout/{session_id}": "Current session view",
            "POST /checkout/{session_id}/method": "Select the payment method",
            "POST /checkout/{session_id}/fields": "Update entered method fields",
            "POST /checkout/{session_id}/pay": "Validate and settle the payment",
            "POST /checkout/{session_id}/retry": "Return to method entry after a failure",
            "POST /checkout/{session_id}/refresh": "Re-check bill status after an ambiguous failure",
            "GET /health": "Health check"
        }
    }))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn start_checkout(
    State(state): State<AppState>,
    Json(request): Json<StartCheckoutRequest>,
) -> ApiResult<CheckoutView> {
    if request.bill_id.trim().is_empty() {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "bill_id is required",
        ));
    }

    info!("starting checkout for bill {}", request.bill_id);
    state
        .runner
        .start(request.bill_id.trim())
        .await
        .map(Json)
        .map_err(map_checkout_error)
}

async fn get_checkout(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<CheckoutView> {
    state
        .runner
        .view(&session_id)
        .await
        .map(Json)
        .map_err(map_checkout_error)
}

async fn select_method(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<SelectMethodRequest>,
) -> ApiResult<CheckoutView> {
    state
        .runner
        .select_method(&session_id, request.method)
        .await
        .map(Json)
        .map_err(map_checkout_error)
}

async fn update_fields(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(fields): Json<MethodFields>,
) -> ApiResult<CheckoutView> {
    state
        .runner
        .update_fields(&session_id, fields)
        .await
        .map(Json)
        .map_err(map_checkout_error)
}

async fn pay(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(fields): Json<MethodFields>,
) -> ApiResult<CheckoutView> {
    info!("submitting payment for session {}", session_id);
    state
        .runner
        .submit(&session_id, fields)
        .await
        .map(Json)
        .map_err(map_checkout_error)
}

async fn retry(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<CheckoutView> {
    state
        .runner
        .retry(&session_id)
        .await
        .map(Json)
        .map_err(map_checkout_error)
}

async fn refresh(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<CheckoutView> {
    info!("re-checking bill status for session {}", session_id);
    state
        .runner
        .refresh(&session_id)
        .await
        .map(Json)
        .map_err(map_checkout_error)
}
