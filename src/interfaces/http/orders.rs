use super::AppState;
use crate::domain::order::{Amount, Order, OrderStatus};
use crate::error::{NotifyError, Result};
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Value, json};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/orders", get(list_orders))
        .route("/api/orders/pending", get(list_pending))
        .route("/api/orders/lookup", get(lookup))
        .route("/api/order/{order_id}", get(get_order).delete(delete_order))
        .route("/api/order/{order_id}/renew", post(renew_order))
        .route("/api/stats", get(stats))
}

#[derive(Debug, Deserialize)]
pub struct StatusFilter {
    status: Option<String>,
}

/// Reports the status an operator would see: overdue pending orders read as expired.
fn view(mut order: Order, now: DateTime<Utc>) -> Order {
    order.status = order.effective_status(now);
    order
}

fn views(orders: Vec<Order>, now: DateTime<Utc>) -> Vec<Order> {
    orders.into_iter().map(|o| view(o, now)).collect()
}

async fn list_orders(
    State(state): State<AppState>,
    Query(filter): Query<StatusFilter>,
) -> Result<Json<Value>> {
    let orders = match filter.status.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => {
            let status: OrderStatus = raw.parse()?;
            state.ledger.list_by_status(status).await?
        }
        None => state.ledger.list().await?,
    };
    let now = state.ledger.now();
    Ok(Json(json!({
        "success": true,
        "total": orders.len(),
        "orders": views(orders, now),
    })))
}

async fn list_pending(State(state): State<AppState>) -> Result<Json<Value>> {
    let orders = state.ledger.list_pending().await?;
    Ok(Json(json!({
        "success": true,
        "total": orders.len(),
        "orders": orders,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupQuery {
    user_id: String,
    amount: Decimal,
}

/// Open orders a user could be paying for with a given amount.
async fn lookup(
    State(state): State<AppState>,
    Query(query): Query<LookupQuery>,
) -> Result<Json<Value>> {
    let amount = Amount::new(query.amount)?;
    let orders = state
        .ledger
        .find_pending_by_user_and_amount(&query.user_id, amount)
        .await?;
    Ok(Json(json!({
        "success": true,
        "total": orders.len(),
        "orders": orders,
    })))
}

async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Json<Value>> {
    let order = state.ledger.get(&order_id).await?;
    Ok(Json(json!({
        "success": true,
        "order": view(order, state.ledger.now()),
    })))
}

async fn delete_order(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Json<Value>> {
    if !state.ledger.remove(&order_id).await? {
        return Err(NotifyError::NotFound(format!("Order {}", order_id)));
    }
    Ok(Json(json!({ "success": true, "orderId": order_id })))
}

async fn renew_order(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Json<Value>> {
    let order = state.ledger.renew(&order_id).await?;
    Ok(Json(json!({ "success": true, "order": order })))
}

async fn stats(State(state): State<AppState>) -> Result<Json<Value>> {
    let stats = state.ledger.statistics(&state.reminder_policy).await?;
    Ok(Json(json!({ "success": true, "stats": stats })))
}
