use super::AppState;
use crate::error::Result;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};

pub fn routes() -> Router<AppState> {
    Router::new().route("/api/pickup/items", get(list_items))
}

async fn list_items(State(state): State<AppState>) -> Result<Json<Value>> {
    let items = state.pickup.items().await?;
    Ok(Json(json!({
        "success": true,
        "total": items.len(),
        "items": items,
    })))
}
