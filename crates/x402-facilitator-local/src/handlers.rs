//! HTTP endpoints implemented by the x402 **facilitator**.
//!
//! These are the server-side handlers for processing client-submitted x402 payments.
//! They include protocol-critical endpoints (`/verify`, `/settle`), discoverability
//! endpoints (`/supported`, `/healthcheck`), and facilitator-local extras
//! (`/discovery/resources`, `/info`) that are not part of the core x402 wire protocol.
//!
//! All payloads follow the types defined in the `x402-types` crate.

use std::time::Instant;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router, response::IntoResponse};
use serde::{Deserialize, Serialize};
use serde_json::json;
use x402_types::chain::ChainId;
use x402_types::proto;
use x402_types::proto::{AsPaymentProblem, ErrorReason};
use x402_types::scheme::X402SchemeFacilitatorError;
use x402_types::timestamp::UnixTimestamp;
use tracing::instrument;

use crate::facilitator_local::{FacilitatorExtras, FacilitatorLocalError};
use x402_types::facilitator::Facilitator;

/// Shared axum state: the facilitator itself plus the moment this process started,
/// used to compute `uptime` for `/healthcheck` and `/info`.
#[derive(Clone)]
pub struct AppState<A> {
    pub facilitator: A,
    pub started_at: Instant,
}

impl<A> AppState<A> {
    pub fn new(facilitator: A) -> Self {
        Self {
            facilitator,
            started_at: Instant::now(),
        }
    }
}

/// `GET /verify`: Returns a machine-readable description of the `/verify` endpoint.
#[instrument(skip_all)]
pub async fn get_verify_info() -> impl IntoResponse {
    Json(json!({
        "endpoint": "/verify",
        "description": "POST to verify x402 payments",
        "body": {
            "paymentPayload": "PaymentPayload",
            "paymentRequirements": "PaymentRequirements",
        }
    }))
}

/// `GET /settle`: Returns a machine-readable description of the `/settle` endpoint.
#[instrument(skip_all)]
pub async fn get_settle_info() -> impl IntoResponse {
    Json(json!({
        "endpoint": "/settle",
        "description": "POST to settle x402 payments",
        "body": {
            "paymentPayload": "PaymentPayload",
            "paymentRequirements": "PaymentRequirements",
        }
    }))
}

pub fn routes<A>() -> Router<AppState<A>>
where
    A: Facilitator + FacilitatorExtras + Clone + Send + Sync + 'static,
    A::Error: IntoResponse,
{
    Router::new()
        .route("/", get(get_root))
        .route("/verify", get(get_verify_info))
        .route("/verify", post(post_verify::<A>))
        .route("/settle", get(get_settle_info))
        .route("/settle", post(post_settle::<A>))
        .route("/health", get(get_health::<A>))
        .route("/supported", get(get_supported::<A>))
        .route("/healthcheck", get(get_healthcheck::<A>))
        .route("/discovery/resources", get(get_discovery_resources::<A>))
        .route("/info", get(get_info::<A>))
}

/// `GET /`: Returns a simple greeting message from the facilitator.
#[instrument(skip_all)]
pub async fn get_root() -> impl IntoResponse {
    let pkg_name = env!("CARGO_PKG_NAME");
    (StatusCode::OK, format!("Hello from {pkg_name}!"))
}

/// `GET /supported`: Lists the x402 payment schemes and networks supported by this facilitator.
#[instrument(skip_all)]
pub async fn get_supported<A>(State(state): State<AppState<A>>) -> impl IntoResponse
where
    A: Facilitator,
    A::Error: IntoResponse,
{
    match state.facilitator.supported().await {
        Ok(supported) => (StatusCode::OK, Json(json!(supported))).into_response(),
        Err(error) => error.into_response(),
    }
}

/// `GET /health`: Alias for `/supported`, kept for clients that poll liveness this way.
#[instrument(skip_all)]
pub async fn get_health<A>(state: State<AppState<A>>) -> impl IntoResponse
where
    A: Facilitator,
    A::Error: IntoResponse,
{
    get_supported(state).await
}

/// `GET /healthcheck`: Lightweight liveness probe, independent of chain connectivity.
#[instrument(skip_all)]
pub async fn get_healthcheck<A>(State(state): State<AppState<A>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "uptime": state.started_at.elapsed().as_secs(),
        "timestamp": UnixTimestamp::now().as_secs(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct DiscoveryQuery {
    #[serde(default = "DiscoveryQuery::default_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
    #[serde(rename = "type")]
    type_filter: Option<String>,
}

impl DiscoveryQuery {
    fn default_limit() -> usize {
        20
    }
}

/// `GET /discovery/resources`: Lists resources previously paid for through this facilitator.
#[instrument(skip_all)]
pub async fn get_discovery_resources<A>(
    State(state): State<AppState<A>>,
    Query(query): Query<DiscoveryQuery>,
) -> impl IntoResponse
where
    A: FacilitatorExtras,
{
    let page = state
        .facilitator
        .discovery()
        .list(query.limit, query.offset, query.type_filter.as_deref());
    Json(json!({
        "x402Version": 2,
        "items": page.items,
        "pagination": {
            "limit": query.limit,
            "offset": query.offset,
            "total": page.total,
        }
    }))
}

#[derive(Debug, Deserialize)]
pub struct InfoQuery {
    chain_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RelayerInfoResponse {
    chain_id: String,
    address: Option<String>,
    native_balance: Option<String>,
}

/// `GET /info`: Reports the relayer address and native balance per configured chain.
#[instrument(skip_all)]
pub async fn get_info<A>(
    State(state): State<AppState<A>>,
    Query(query): Query<InfoQuery>,
) -> impl IntoResponse
where
    A: FacilitatorExtras,
{
    let chain_id: Option<ChainId> = match query.chain_id.as_deref().map(str::parse) {
        Some(Ok(chain_id)) => Some(chain_id),
        Some(Err(_)) => {
            return (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid chainId"})))
                .into_response();
        }
        None => None,
    };
    let relayers = state.facilitator.relayer_info(chain_id.as_ref()).await;
    let relayers: Vec<RelayerInfoResponse> = relayers
        .into_iter()
        .map(|info| RelayerInfoResponse {
            chain_id: info.chain_id.to_string(),
            address: info.address,
            native_balance: info.native_balance,
        })
        .collect();
    Json(json!({
        "relayers": relayers,
        "uptime": state.started_at.elapsed().as_secs(),
    }))
    .into_response()
}

/// `POST /verify`: Facilitator-side verification of a proposed x402 payment.
#[instrument(skip_all)]
pub async fn post_verify<A>(
    State(state): State<AppState<A>>,
    Json(body): Json<proto::VerifyRequest>,
) -> impl IntoResponse
where
    A: Facilitator,
    A::Error: IntoResponse,
{
    match state.facilitator.verify(&body).await {
        Ok(valid_response) => (StatusCode::OK, Json(valid_response)).into_response(),
        Err(error) => {
            tracing::warn!(
                error = ?error,
                body = %serde_json::to_string(&body).unwrap_or_else(|_| "<can-not-serialize>".to_string()),
                "Verification failed"
            );
            error.into_response()
        }
    }
}

/// `POST /settle`: Facilitator-side execution of a valid x402 payment on-chain.
#[instrument(skip_all)]
pub async fn post_settle<A>(
    State(state): State<AppState<A>>,
    Json(body): Json<proto::SettleRequest>,
) -> impl IntoResponse
where
    A: Facilitator,
    A::Error: IntoResponse,
{
    match state.facilitator.settle(&body).await {
        Ok(valid_response) => {
            tracing::info!(
                body = %serde_json::to_string(&body).unwrap_or_else(|_| "<can-not-serialize>".to_string()),
                "Settlement succeeded"
            );
            (StatusCode::OK, Json(valid_response)).into_response()
        }
        Err(error) => {
            tracing::warn!(
                error = ?error,
                body = %serde_json::to_string(&body).unwrap_or_else(|_| "<can-not-serialize>".to_string()),
                "Settlement failed"
            );
            error.into_response()
        }
    }
}

impl IntoResponse for FacilitatorLocalError {
    fn into_response(self) -> Response {
        #[derive(Serialize, Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct VerificationErrorResponse<'a> {
            is_valid: bool,
            invalid_reason: ErrorReason,
            invalid_reason_details: &'a str,
            payer: &'a str,
        }

        #[derive(Serialize, Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct SettlementErrorResponse<'a> {
            success: bool,
            network: &'a str,
            transaction: &'a str,
            error_reason: ErrorReason,
            error_reason_details: &'a str,
            payer: &'a str,
        }

        match self {
            FacilitatorLocalError::Verification(scheme_handler_error) => {
                let problem = scheme_handler_error.as_payment_problem();
                let verification_error_response = VerificationErrorResponse {
                    is_valid: false,
                    invalid_reason: problem.reason(),
                    invalid_reason_details: problem.details(),
                    payer: "",
                };
                let status_code = match scheme_handler_error {
                    X402SchemeFacilitatorError::PaymentVerification(_) => StatusCode::BAD_REQUEST,
                    X402SchemeFacilitatorError::OnchainFailure(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status_code, Json(verification_error_response)).into_response()
            }
            FacilitatorLocalError::Settlement(scheme_handler_error) => {
                let problem = scheme_handler_error.as_payment_problem();
                let settlement_error_response = SettlementErrorResponse {
                    success: false,
                    network: "",
                    transaction: "",
                    error_reason: problem.reason(),
                    error_reason_details: problem.details(),
                    payer: "",
                };
                let status_code = match scheme_handler_error {
                    X402SchemeFacilitatorError::PaymentVerification(_) => StatusCode::BAD_REQUEST,
                    X402SchemeFacilitatorError::OnchainFailure(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status_code, Json(settlement_error_response)).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_query_defaults_limit_and_offset() {
        let query: DiscoveryQuery = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(query.limit, 20);
        assert_eq!(query.offset, 0);
        assert_eq!(query.type_filter, None);
    }

    #[test]
    fn discovery_query_honors_explicit_values() {
        let query: DiscoveryQuery = serde_json::from_value(serde_json::json!({
            "limit": 5,
            "offset": 10,
            "type": "http",
        }))
        .unwrap();
        assert_eq!(query.limit, 5);
        assert_eq!(query.offset, 10);
        assert_eq!(query.type_filter, Some("http".to_string()));
    }

    #[test]
    fn info_query_accepts_missing_chain_id() {
        let query: InfoQuery = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(query.chain_id, None);
    }
}
