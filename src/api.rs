//! REST API for the exchange engine

use crate::engine::{EngineError, MatchingEngine};
use crate::order::{Order, PlaceOrderRequest};
use crate::orderbook::OrderBookSnapshot;
use crate::rewards::RewardAccount;
use crate::trades::{TradeLeg, TradeSummary};
use crate::types::{AccountId, Asset, OrderId};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Header carrying the caller's authenticated account
pub const ACCOUNT_HEADER: &str = "x-account-id";

/// API state
pub struct ApiState {
    pub engine: Arc<MatchingEngine>,
}

/// Create the API router
pub fn create_router(engine: Arc<MatchingEngine>) -> Router {
    let state = Arc::new(ApiState { engine });

    Router::new()
        .route("/health", get(health_check))
        .route("/orders", post(place_order).get(open_orders))
        .route("/orders/:order_id", get(get_order))
        .route("/orderbook/:asset", get(get_orderbook))
        .route("/trades", get(trade_history))
        .route("/trades/summary", get(trade_summary))
        .route("/wallet", get(wallet_balances))
        .route("/wallet/deposit", post(deposit))
        .route("/wallet/withdraw", post(withdraw))
        .route("/rewards", get(rewards))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        match self {
            EngineError::Validation(reason) => {
                error_response(StatusCode::BAD_REQUEST, &reason.to_string())
            }
            EngineError::Internal(reason) => {
                tracing::error!("Request failed: {}", reason);
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
        }
    }
}

/// Identity is established upstream; an absent header means unauthenticated.
fn caller(headers: &HeaderMap) -> Result<AccountId, Response> {
    headers
        .get(ACCOUNT_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(AccountId::new)
        .ok_or_else(|| error_response(StatusCode::UNAUTHORIZED, "missing account identity"))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Serialize)]
struct PlaceOrderResponse {
    order: Order,
    fills: Vec<TradeLeg>,
    skipped: Vec<OrderId>,
}

async fn place_order(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(request): Json<PlaceOrderRequest>,
) -> Response {
    let owner = match caller(&headers) {
        Ok(owner) => owner,
        Err(response) => return response,
    };
    match state.engine.place_order(&owner, request) {
        Ok(outcome) => (
            StatusCode::CREATED,
            Json(PlaceOrderResponse {
                order: outcome.order,
                fills: outcome.fills,
                skipped: outcome.skipped,
            }),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn open_orders(State(state): State<Arc<ApiState>>, headers: HeaderMap) -> Response {
    let owner = match caller(&headers) {
        Ok(owner) => owner,
        Err(response) => return response,
    };
    match state.engine.open_orders(&owner) {
        Ok(orders) => Json(orders).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn get_order(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(order_id): Path<u64>,
) -> Response {
    let owner = match caller(&headers) {
        Ok(owner) => owner,
        Err(response) => return response,
    };
    match state.engine.order(OrderId(order_id)) {
        Ok(Some(order)) if order.owner == owner => Json(order).into_response(),
        Ok(_) => error_response(StatusCode::NOT_FOUND, "order not found"),
        Err(e) => e.into_response(),
    }
}

async fn get_orderbook(State(state): State<Arc<ApiState>>, Path(asset): Path<String>) -> Response {
    match state.engine.order_book(&asset) {
        Ok(snapshot) => Json::<OrderBookSnapshot>(snapshot).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn trade_history(State(state): State<Arc<ApiState>>, headers: HeaderMap) -> Response {
    let owner = match caller(&headers) {
        Ok(owner) => owner,
        Err(response) => return response,
    };
    match state.engine.trade_history(&owner) {
        Ok(legs) => Json(legs).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn trade_summary(State(state): State<Arc<ApiState>>, headers: HeaderMap) -> Response {
    let owner = match caller(&headers) {
        Ok(owner) => owner,
        Err(response) => return response,
    };
    match state.engine.trade_summary(&owner) {
        Ok(summary) => Json::<TradeSummary>(summary).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct BalanceView {
    asset: Asset,
    balance: Decimal,
}

async fn wallet_balances(State(state): State<Arc<ApiState>>, headers: HeaderMap) -> Response {
    let owner = match caller(&headers) {
        Ok(owner) => owner,
        Err(response) => return response,
    };
    match state.engine.balances(&owner) {
        Ok(balances) => Json(
            balances
                .into_iter()
                .map(|(asset, balance)| BalanceView { asset, balance })
                .collect::<Vec<_>>(),
        )
        .into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct WalletRequest {
    asset: String,
    amount: Decimal,
}

async fn deposit(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(request): Json<WalletRequest>,
) -> Response {
    let owner = match caller(&headers) {
        Ok(owner) => owner,
        Err(response) => return response,
    };
    match state.engine.deposit(&owner, &request.asset, request.amount) {
        Ok(balance) => Json(BalanceView {
            asset: Asset::new(&request.asset),
            balance,
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn withdraw(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(request): Json<WalletRequest>,
) -> Response {
    let owner = match caller(&headers) {
        Ok(owner) => owner,
        Err(response) => return response,
    };
    match state.engine.withdraw(&owner, &request.asset, request.amount) {
        Ok(balance) => Json(BalanceView {
            asset: Asset::new(&request.asset),
            balance,
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn rewards(State(state): State<Arc<ApiState>>, headers: HeaderMap) -> Response {
    let owner = match caller(&headers) {
        Ok(owner) => owner,
        Err(response) => return response,
    };
    match state.engine.rewards(&owner) {
        Ok(standing) => Json::<RewardAccount>(standing).into_response(),
        Err(e) => e.into_response(),
    }
}
