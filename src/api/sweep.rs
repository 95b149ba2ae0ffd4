//! On-demand sweep

use axum::{extract::State, Json};

use crate::{error::AppResult, services::sweep::SweepReport};

use super::AuthenticatedActor;

/// Run one overdue / expired-hold sweep now
#[utoipa::path(
    post,
    path = "/sweep",
    tag = "maintenance",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Sweep finished", body = SweepReport),
        (status = 403, description = "Staff role required")
    )
)]
pub async fn run_sweep(
    State(state): State<crate::AppState>,
    AuthenticatedActor(claims): AuthenticatedActor,
) -> AppResult<Json<SweepReport>> {
    claims.require_staff()?;

    let report = state.services.sweeper.sweep_once().await?;
    Ok(Json(report))
}
