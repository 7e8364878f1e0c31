//! JSON API, payment pages and gateway webhooks.

pub mod error;
pub mod orders;
pub mod payment;
pub mod pickup;

use crate::application::ledger::{OrderLedger, ReminderPolicy};
use crate::application::pickup::PickupTracker;
use crate::application::reconciler::GatewayReconciler;
use crate::infrastructure::ecpay::EcPayGateway;
use crate::infrastructure::linepay::LinePayGateway;
use axum::Router;
use axum::routing::get;
use payment::InFlight;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Everything a handler can reach. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<OrderLedger>,
    pub reconciler: Arc<GatewayReconciler>,
    pub pickup: Arc<PickupTracker>,
    pub linepay: Option<Arc<LinePayGateway>>,
    pub ecpay: Option<Arc<EcPayGateway>>,
    pub reminder_policy: ReminderPolicy,
    pub public_base_url: String,
    pub linepay_in_flight: InFlight,
}

/// Gateway routes are only mounted for gateways that are configured.
pub fn router(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .merge(orders::routes())
        .merge(pickup::routes())
        .merge(payment::request_routes());

    if state.linepay.is_some() {
        app = app.merge(payment::linepay_routes());
    }
    if state.ecpay.is_some() {
        app = app.merge(payment::ecpay_routes());
    }

    app.layer(TraceLayer::new_for_http()).with_state(state)
}
