use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};

use crate::{
    dto::race::{RaceActionResponse, RaceOverview},
    error::AppError,
    services::race_service,
    state::SharedState,
};

/// Routes driving the race state machine.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/race", get(get_race))
        .route("/race/arm", post(arm_race))
        .route("/race/cancel", post(cancel_race))
        .route("/race/reset", post(reset_race))
}

/// Current race state, session status and recent triggers.
#[utoipa::path(
    get,
    path = "/race",
    tag = "race",
    responses((status = 200, description = "Race snapshot", body = RaceOverview))
)]
pub async fn get_race(State(state): State<SharedState>) -> Json<RaceOverview> {
    Json(race_service::race_overview(&state).await)
}

/// Arm every gate for a new race.
#[utoipa::path(
    post,
    path = "/race/arm",
    tag = "race",
    responses(
        (status = 200, description = "Race armed", body = RaceActionResponse),
        (status = 409, description = "No START gate, or a race is already armed or running")
    )
)]
pub async fn arm_race(
    State(state): State<SharedState>,
) -> Result<Json<RaceActionResponse>, AppError> {
    Ok(Json(race_service::arm_system(&state).await?))
}

/// Abort the armed or running race.
#[utoipa::path(
    post,
    path = "/race/cancel",
    tag = "race",
    responses(
        (status = 200, description = "Race cancelled", body = RaceActionResponse),
        (status = 409, description = "Nothing to cancel")
    )
)]
pub async fn cancel_race(
    State(state): State<SharedState>,
) -> Result<Json<RaceActionResponse>, AppError> {
    Ok(Json(race_service::cancel_race(&state).await?))
}

/// Return host and gates to idle, whatever the current phase.
#[utoipa::path(
    post,
    path = "/race/reset",
    tag = "race",
    responses((status = 200, description = "Race reset", body = RaceActionResponse))
)]
pub async fn reset_race(
    State(state): State<SharedState>,
) -> Result<Json<RaceActionResponse>, AppError> {
    Ok(Json(race_service::reset(&state).await?))
}
