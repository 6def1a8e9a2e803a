use axum::{
    extract::{Path, State},
    Json,
};
use relay_core::Model;

use crate::{error::ApiError, state::AppState};

/// `GET /v1/models`: every catalog entry, ordered by id.
pub async fn list_models(State(state): State<AppState>) -> Json<Vec<Model>> {
    Json(state.relay.catalog().list_models())
}

/// `GET /v1/models/{model_id}`
pub async fn get_model(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
) -> Result<Json<Model>, ApiError> {
    let model = state.relay.catalog().get_model(&model_id)?;
    Ok(Json(model.clone()))
}
