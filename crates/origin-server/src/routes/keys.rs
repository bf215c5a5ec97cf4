//! `GET /v1/keys/jwks.json`.

use axum::extract::State;
use axum::Json;

use origin_core::crypto::JwkSet;

use crate::state::AppState;

/// The published key set. Multiple keys are permitted; retired keys stay
/// listed so old certificates remain verifiable.
pub async fn jwks(State(state): State<AppState>) -> Json<JwkSet> {
    Json(state.signer.jwks())
}
