//! `GET /v1/models/status`.

use axum::extract::State;
use axum::Json;

use crate::inference::ModelStatus;
use crate::state::AppState;

/// Reports loaded model versions and artifact provenance.
pub async fn status(State(state): State<AppState>) -> Json<ModelStatus> {
    Json(state.inference.status())
}
