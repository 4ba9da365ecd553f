// File: keyshop-core/src/http/status.rs
//
// Pull-based reconciliation entry point: the buyer (or the holder of the
// pending-order cookie set at checkout) forces a gateway status query when
// the webhook has not arrived yet. Authentication itself is external; a
// fronting proxy passes the resolved user id in a header.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;
use tracing::error;

use keyshop_common::error::Error;

use crate::services::order_service::{OrderAccess, OrderService};

pub const PENDING_ORDER_COOKIE: &str = "ldc_pending_order";
pub const USER_HEADER: &str = "x-authenticated-user";

pub struct StatusState {
    pub orders: Arc<OrderService>,
}

fn pending_cookie(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == PENDING_ORDER_COOKIE).then(|| value.to_string())
    })
}

fn access_from_headers(headers: &HeaderMap) -> OrderAccess {
    OrderAccess {
        user_id: headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(String::from),
        pending_cookie: pending_cookie(headers),
    }
}

async fn check_status(
    State(state): State<Arc<StatusState>>,
    Path(order_id): Path<String>,
    headers: HeaderMap,
) -> (StatusCode, Json<serde_json::Value>) {
    let access = access_from_headers(&headers);

    match state.orders.check_order_status(&order_id, &access).await {
        Ok(status) => (
            StatusCode::OK,
            Json(json!({ "success": true, "status": status.as_str() })),
        ),
        Err(Error::NotFound(_)) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "success": false, "error": "order not found" })),
        ),
        Err(Error::Forbidden(_)) => (
            StatusCode::FORBIDDEN,
            Json(json!({ "success": false, "error": "forbidden" })),
        ),
        Err(e) => {
            error!(%order_id, "status check failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "error": "internal error" })),
            )
        }
    }
}

pub fn status_router(state: Arc<StatusState>) -> Router {
    Router::new()
        .route("/api/order/{order_id}/status", post(check_status))
        .with_state(state)
}
