//! Circulation policy endpoints

use axum::{extract::State, Json};

use crate::{
    error::AppResult,
    services::policy::{CirculationPolicy, UpdateCirculationPolicy},
};

use super::AuthenticatedActor;

/// Current circulation policy
#[utoipa::path(
    get,
    path = "/settings/circulation",
    tag = "settings",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Circulation policy", body = CirculationPolicy)
    )
)]
pub async fn get_circulation_settings(
    State(state): State<crate::AppState>,
    AuthenticatedActor(_claims): AuthenticatedActor,
) -> AppResult<Json<CirculationPolicy>> {
    Ok(Json(state.services.settings.get()))
}

/// Update the circulation policy; applies to operations started afterwards
#[utoipa::path(
    put,
    path = "/settings/circulation",
    tag = "settings",
    security(("bearer_auth" = [])),
    request_body = UpdateCirculationPolicy,
    responses(
        (status = 200, description = "Policy updated", body = CirculationPolicy),
        (status = 400, description = "Invalid policy"),
        (status = 403, description = "Admin role required")
    )
)]
pub async fn update_circulation_settings(
    State(state): State<crate::AppState>,
    AuthenticatedActor(claims): AuthenticatedActor,
    Json(request): Json<UpdateCirculationPolicy>,
) -> AppResult<Json<CirculationPolicy>> {
    claims.require_admin()?;

    let policy = state.services.settings.update(request, claims.user_id).await?;
    Ok(Json(policy))
}
