// File: keyshop-core/src/http/notify.rs
//
// The payment gateway's asynchronous callback endpoint. The gateway sends
// GET or POST depending on deployment and expects a plain-text
// success/fail token back (not JSON); anything other than `success` makes
// it retry, so non-recoverable fulfillment errors are swallowed here and
// only signature/amount problems are rejected.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Form, Router};
use axum_server::{Handle, Server};
use rust_decimal::Decimal;
use tokio::sync::oneshot;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use keyshop_common::error::Error;

use crate::services::fulfillment_service::FulfillmentService;

pub struct NotifyState {
    pub merchant_key: String,
    pub fulfillment: Arc<FulfillmentService>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyReply {
    Success,
    Fail,
}

impl NotifyReply {
    fn into_response(self) -> (StatusCode, &'static str) {
        match self {
            NotifyReply::Success => (StatusCode::OK, "success"),
            NotifyReply::Fail => (StatusCode::BAD_REQUEST, "fail"),
        }
    }
}

/// Strip the retry suffix a re-payment appends to `out_trade_no`
/// (`ORDER123_retry1736...` refers to the logical order ORDER123).
fn strip_retry_suffix(out_trade_no: &str) -> &str {
    match out_trade_no.find("_retry") {
        Some(idx) => &out_trade_no[..idx],
        None => out_trade_no,
    }
}

/// Core of the webhook: verify, gate, fulfill. Stateless per call.
pub async fn process_notify(
    state: &NotifyState,
    params: BTreeMap<String, String>,
) -> NotifyReply {
    if !crate::crypto::verify_sign(&params, &state.merchant_key) {
        warn!(
            out_trade_no = params.get("out_trade_no").map(String::as_str),
            "notify signature mismatch"
        );
        return NotifyReply::Fail;
    }

    if params.get("trade_status").map(String::as_str) != Some("TRADE_SUCCESS") {
        // Unknown or non-success status: acknowledge so the gateway stops.
        return NotifyReply::Success;
    }

    let Some(out_trade_no) = params.get("out_trade_no") else {
        warn!("notify without out_trade_no");
        return NotifyReply::Success;
    };
    let order_id = strip_retry_suffix(out_trade_no);

    let Some(paid_amount) = params
        .get("money")
        .and_then(|m| Decimal::from_str(m).ok())
    else {
        warn!(order_id, "notify with unparsable money field");
        return NotifyReply::Success;
    };

    let trade_no = params.get("trade_no").map(String::as_str).unwrap_or("");

    info!(order_id, %paid_amount, "processing payment notification");
    match state.fulfillment.fulfill(order_id, paid_amount, trade_no).await {
        Ok(outcome) => {
            info!(order_id, ?outcome, "notification processed");
            NotifyReply::Success
        }
        // Tampering: reject hard so the gateway logs a failure.
        Err(e @ Error::AmountMismatch { .. }) => {
            error!(order_id, "rejecting notification: {e}");
            NotifyReply::Fail
        }
        // Unknown order ids and internal errors are acknowledged: retrying
        // a non-recoverable condition forever helps no one.
        Err(e) => {
            error!(order_id, "fulfillment error on notification (acknowledged): {e}");
            NotifyReply::Success
        }
    }
}

async fn notify_get(
    State(state): State<Arc<NotifyState>>,
    Query(params): Query<BTreeMap<String, String>>,
) -> (StatusCode, &'static str) {
    process_notify(&state, params).await.into_response()
}

async fn notify_post(
    State(state): State<Arc<NotifyState>>,
    Form(params): Form<BTreeMap<String, String>>,
) -> (StatusCode, &'static str) {
    process_notify(&state, params).await.into_response()
}

pub fn notify_router(state: Arc<NotifyState>) -> Router {
    Router::new()
        .route("/api/notify", get(notify_get).post(notify_post))
        .with_state(state)
}

/// Bind the HTTP surface (notify + status-check) and serve it until the
/// returned sender fires.
pub async fn start_http_server(port: u16, app: Router) -> Result<oneshot::Sender<()>, Error> {
    let app = app.layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    let (shutdown_send, shutdown_recv) = oneshot::channel::<()>();
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("payment HTTP endpoints listening on http://{}", addr);

    let handle = Handle::new();
    let handle_clone = handle.clone();

    tokio::spawn(async move {
        let _ = shutdown_recv.await;
        handle_clone.graceful_shutdown(None);
    });

    let server = Server::bind(addr).handle(handle).serve(app.into_make_service());

    tokio::spawn(async move {
        if let Err(e) = server.await {
            error!("notify server error: {}", e);
        }
        info!("notify server shut down.");
    });

    Ok(shutdown_send)
}
