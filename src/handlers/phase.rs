use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};

use crate::db::Connector;
use crate::{PhaseError, router::PhaseState};

/// `{"angle": <float>}`, or `{"angle": null}` when there is nothing to sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseResponse {
    pub angle: Option<f64>,
}

/// GET /api/phase -> one randomly sampled phase angle.
pub async fn phase_handler<C: Connector>(
    State(state): State<PhaseState<C>>,
) -> Result<Json<PhaseResponse>, PhaseError> {
    let angle = state.service.sample().await?;
    Ok(Json(PhaseResponse { angle }))
}
