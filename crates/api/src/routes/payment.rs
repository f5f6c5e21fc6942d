//! Buy and sell endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use common::{ItemId, PlayerId};
use saga::{Operation, PurchaseRequest, TransferReceipt};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

/// Header carrying the authenticated player's id.
pub const PLAYER_ID_HEADER: &str = "x-player-id";

// -- Request types --

#[derive(Deserialize)]
pub struct PaymentRequest {
    pub items: Vec<PaymentItem>,
}

#[derive(Deserialize)]
pub struct PaymentItem {
    pub item_id: String,
}

// -- Response types --

#[derive(Serialize)]
pub struct PaymentResponse {
    pub items: Vec<TransferReceipt>,
}

// -- Handlers --

/// POST /payment/buy: debit the wallet and add the items to the inventory.
pub async fn buy(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<PaymentRequest>,
) -> Result<Json<PaymentResponse>, ApiError> {
    execute(state, Operation::Buy, &headers, req).await
}

/// POST /payment/sell: remove the items from the inventory and credit the wallet.
pub async fn sell(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<PaymentRequest>,
) -> Result<Json<PaymentResponse>, ApiError> {
    execute(state, Operation::Sell, &headers, req).await
}

#[tracing::instrument(skip(state, headers, req), fields(items = req.items.len()))]
async fn execute(
    state: Arc<AppState>,
    operation: Operation,
    headers: &HeaderMap,
    req: PaymentRequest,
) -> Result<Json<PaymentResponse>, ApiError> {
    let player_id = player_id(headers)?;
    let request = PurchaseRequest::new(
        player_id,
        operation,
        req.items.into_iter().map(|item| ItemId::new(item.item_id)),
    );

    // The saga runs on its own task: a client hanging up must not abandon
    // legs that are already in flight.
    let cancel = state.cancel_signal();
    let coordinator = Arc::clone(&state.coordinator);
    let report = tokio::spawn(async move { coordinator.run(request, cancel).await })
        .await
        .map_err(|e| ApiError::Internal(format!("saga task ended abnormally: {e}")))?;

    let items = report.result?;
    Ok(Json(PaymentResponse { items }))
}

fn player_id(headers: &HeaderMap) -> Result<PlayerId, ApiError> {
    headers
        .get(PLAYER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(PlayerId::new)
        .ok_or_else(|| ApiError::BadRequest(format!("missing {PLAYER_ID_HEADER} header")))
}
