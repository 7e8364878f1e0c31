use super::AppState;
use crate::domain::order::{Amount, Order, OrderStatus};
use crate::domain::payment::{GatewaySignal, Outcome, PaymentMethod, pay_link};
use crate::error::{NotifyError, Result};
use crate::infrastructure::ecpay::ack;
use crate::infrastructure::linepay::LinePayGateway;
use axum::extract::rejection::{FormRejection, JsonRejection};
use axum::extract::{Form, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Duration, Utc};
use maud::{DOCTYPE, Markup, html};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

/// A stored checkout URL younger than this is handed out again instead of opening a new session.
fn payment_url_reuse_window() -> Duration {
    Duration::minutes(15)
}

/// Per-order guard against opening two checkout sessions at once.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    orders: Arc<Mutex<HashSet<String>>>,
}

/// Releases the order when dropped.
pub struct InFlightClaim {
    orders: Arc<Mutex<HashSet<String>>>,
    order_id: String,
}

impl InFlight {
    pub fn try_claim(&self, order_id: &str) -> Option<InFlightClaim> {
        let mut orders = self.orders.lock().unwrap_or_else(|e| e.into_inner());
        if !orders.insert(order_id.to_string()) {
            return None;
        }
        Some(InFlightClaim {
            orders: self.orders.clone(),
            order_id: order_id.to_string(),
        })
    }
}

impl Drop for InFlightClaim {
    fn drop(&mut self) {
        let mut orders = self.orders.lock().unwrap_or_else(|e| e.into_inner());
        orders.remove(&self.order_id);
    }
}

pub fn request_routes() -> Router<AppState> {
    Router::new().route("/payment/request", post(create_payment_request))
}

pub fn linepay_routes() -> Router<AppState> {
    Router::new()
        .route("/payment/linepay/pay/{order_id}", get(linepay_pay_page))
        .route(
            "/payment/linepay/confirm",
            get(linepay_confirm).post(linepay_confirm),
        )
        .route("/payment/linepay/cancel", get(linepay_cancel))
}

pub fn ecpay_routes() -> Router<AppState> {
    Router::new()
        .route("/payment/ecpay/pay/{order_id}", get(ecpay_pay_page))
        .route("/payment/ecpay/callback", post(ecpay_callback))
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GatewayChoice {
    LinePay,
    EcPay,
    #[default]
    Both,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    user_id: String,
    #[serde(default)]
    user_name: String,
    amount: Decimal,
    #[serde(default, rename = "type")]
    gateway: GatewayChoice,
}

/// Creates one order per requested gateway and returns their pay links.
async fn create_payment_request(
    State(state): State<AppState>,
    payload: std::result::Result<Json<PaymentRequest>, JsonRejection>,
) -> Result<Json<Value>> {
    let Json(request) = payload.map_err(|e| NotifyError::Validation(e.body_text()))?;
    let amount = Amount::new(request.amount)?;

    let configured = |method: PaymentMethod| match method {
        PaymentMethod::LinePay => state.linepay.is_some(),
        PaymentMethod::EcPay => state.ecpay.is_some(),
    };
    let methods: Vec<PaymentMethod> = match request.gateway {
        GatewayChoice::LinePay => vec![PaymentMethod::LinePay],
        GatewayChoice::EcPay => vec![PaymentMethod::EcPay],
        GatewayChoice::Both => [PaymentMethod::LinePay, PaymentMethod::EcPay]
            .into_iter()
            .filter(|m| configured(*m))
            .collect(),
    };
    if methods.is_empty() {
        return Err(NotifyError::Validation(
            "No payment gateway is configured".to_string(),
        ));
    }
    if let Some(missing) = methods.iter().find(|m| !configured(**m)) {
        return Err(NotifyError::Validation(format!("{} is not configured", missing)));
    }

    let mut links = Vec::with_capacity(methods.len());
    for method in methods {
        let order_id = method.generate_order_id(state.ledger.now());
        state
            .ledger
            .create(&order_id, &request.user_id, &request.user_name, amount)
            .await?;
        links.push(json!({
            "orderId": order_id,
            "gateway": method,
            "payUrl": pay_link(&state.public_base_url, &order_id),
        }));
    }

    Ok(Json(json!({
        "success": true,
        "userId": request.user_id,
        "amount": amount,
        "orders": links,
    })))
}

fn message_markup(title: &str, body: &str) -> Markup {
    html! {
        (DOCTYPE)
        html {
            head {
                meta charset="utf-8";
                title { (title) }
            }
            body {
                h1 { (title) }
                p { (body) }
            }
        }
    }
}

fn message_page(status: StatusCode, title: &str, body: &str) -> Response {
    (status, Html(message_markup(title, body).into_string())).into_response()
}

/// Auto-submitting form; the provider only accepts a POST.
fn checkout_form(action: &str, fields: &BTreeMap<String, String>) -> Markup {
    html! {
        (DOCTYPE)
        html {
            head {
                meta charset="utf-8";
                title { "ECPay" }
            }
            body onload="document.forms[0].submit()" {
                form method="post" action=(action) {
                    @for (name, value) in fields {
                        input type="hidden" name=(name) value=(value);
                    }
                    noscript {
                        button type="submit" { "前往付款" }
                    }
                }
            }
        }
    }
}

/// Page for an order that can no longer be paid, if it is in that state.
fn terminal_page(order: &Order, now: DateTime<Utc>) -> Option<Response> {
    match order.effective_status(now) {
        OrderStatus::Pending => None,
        OrderStatus::Paid => Some(message_page(
            StatusCode::OK,
            "此訂單已付款",
            &format!("訂單 {} 已完成付款，感謝您！", order.order_id),
        )),
        OrderStatus::Expired => Some(message_page(
            StatusCode::GONE,
            "付款連結已過期",
            "此訂單已超過付款期限，請聯繫客服重新取得付款連結。",
        )),
    }
}

async fn load_for_gateway(state: &AppState, order_id: &str, method: PaymentMethod) -> Result<Order> {
    if PaymentMethod::from_order_id(order_id) != Some(method) {
        return Err(NotifyError::NotFound(format!("Order {}", order_id)));
    }
    state.ledger.get(order_id).await
}

fn reusable_checkout(order: &Order, now: DateTime<Utc>) -> Option<&str> {
    let requested_at = order.last_payment_request_at?;
    let url = order.payment_url.as_deref()?;
    (now - requested_at < payment_url_reuse_window()).then_some(url)
}

/// Hands out a checkout URL, reusing a recent one or opening a new session.
async fn linepay_pay_page(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Response> {
    let gateway = state
        .linepay
        .clone()
        .ok_or_else(|| NotifyError::NotFound("LINE Pay is not configured".to_string()))?;
    let order = load_for_gateway(&state, &order_id, PaymentMethod::LinePay).await?;
    let now = state.ledger.now();
    if let Some(page) = terminal_page(&order, now) {
        return Ok(page);
    }

    if let Some(url) = reusable_checkout(&order, now) {
        tracing::debug!(%order_id, "Reusing recent LINE Pay checkout");
        return Ok(Redirect::to(url).into_response());
    }

    let Some(_claim) = state.linepay_in_flight.try_claim(&order_id) else {
        tracing::warn!(%order_id, "Duplicate LINE Pay request blocked");
        return Ok(message_page(
            StatusCode::TOO_MANY_REQUESTS,
            "請稍候",
            "付款頁面正在生成中，請勿重複點擊，請於 3 秒後重新整理。",
        ));
    };

    open_checkout(&state, &gateway, &order_id, now).await
}

/// Runs under the order's claim. The previous holder may have opened a
/// session since the caller's read, so the order is read again here.
async fn open_checkout(
    state: &AppState,
    gateway: &LinePayGateway,
    order_id: &str,
    now: DateTime<Utc>,
) -> Result<Response> {
    let order = state.ledger.get(order_id).await?;
    if let Some(page) = terminal_page(&order, now) {
        return Ok(page);
    }
    if let Some(url) = reusable_checkout(&order, now) {
        tracing::debug!(order_id, "Reusing LINE Pay checkout opened concurrently");
        return Ok(Redirect::to(url).into_response());
    }

    let session = gateway.request_payment(&order).await?;
    state
        .ledger
        .record_payment_attempt(order_id, &session.transaction_id, &session.payment_url)
        .await?;
    Ok(Redirect::to(&session.payment_url).into_response())
}

async fn linepay_confirm(
    State(state): State<AppState>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Result<Json<Value>> {
    let gateway = state
        .linepay
        .clone()
        .ok_or_else(|| NotifyError::NotFound("LINE Pay is not configured".to_string()))?;
    let report = state
        .reconciler
        .reconcile(gateway.as_ref(), &GatewaySignal::new(params))
        .await?;
    Ok(Json(json!({
        "success": report.outcome == Outcome::Success,
        "orderId": report.order_id,
        "applied": report.applied,
        "evidence": report.evidence,
    })))
}

async fn linepay_cancel() -> Response {
    message_page(StatusCode::OK, "付款已取消", "您已取消付款。")
}

async fn ecpay_pay_page(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Response> {
    let gateway = state
        .ecpay
        .clone()
        .ok_or_else(|| NotifyError::NotFound("ECPay is not configured".to_string()))?;
    let order = load_for_gateway(&state, &order_id, PaymentMethod::EcPay).await?;
    let now = state.ledger.now();
    if let Some(page) = terminal_page(&order, now) {
        return Ok(page);
    }

    let fields = gateway.checkout_fields(&order, now)?;
    Ok(Html(checkout_form(gateway.checkout_url(), &fields).into_string()).into_response())
}

/// Always answers 200 with one of the provider's acknowledgement strings.
async fn ecpay_callback(
    State(state): State<AppState>,
    payload: std::result::Result<Form<BTreeMap<String, String>>, FormRejection>,
) -> &'static str {
    let (Some(gateway), Ok(Form(fields))) = (state.ecpay.clone(), payload) else {
        return ack::ERROR;
    };
    match state
        .reconciler
        .reconcile(gateway.as_ref(), &GatewaySignal::new(fields))
        .await
    {
        Ok(_) => ack::OK,
        // The failure was reported to the admin; the provider must not resend it.
        Err(NotifyError::Gateway(_)) => ack::OK,
        Err(NotifyError::Signature(_)) => ack::CHECK_MAC_ERROR,
        Err(e) => {
            tracing::error!(error = %e, "ECPay callback failed");
            ack::ERROR
        }
    }
}
