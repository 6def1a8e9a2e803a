use axum::{extract::State, Json};
use chrono::Utc;
use serde_json::{json, Value};

use crate::state::AppState;

pub async fn handle_health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": state.config.version,
        "timestamp": Utc::now().timestamp(),
    }))
}

pub async fn handle_root(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "message": format!("Welcome to the {}", state.config.app_name),
    }))
}
