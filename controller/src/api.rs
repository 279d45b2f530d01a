use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::warn;

use heater_common::{
    ControllerStatus, HeaterError, HourInput, NewProgram, PartialSettings, ProgramId,
    ScheduleCell,
};

use crate::store::{ProgramStore, SettingsStore};

/// Shared state of the local HTTP bridge. Every write goes through the stores.
#[derive(Clone)]
pub struct ApiState {
    pub store: SettingsStore,
    pub programs: ProgramStore,
    pub status: watch::Receiver<ControllerStatus>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewProgramRequest {
    #[serde(default)]
    copy_from: Option<ProgramId>,
}

#[derive(Debug, Serialize)]
struct NewProgramResponse {
    id: ProgramId,
}

#[derive(Debug, Deserialize)]
struct EditRequest {
    days: Vec<String>,
    hours: Vec<HourInput>,
    value: ScheduleCell,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/status", get(handle_get_status))
        .route(
            "/api/settings",
            get(handle_get_settings).post(handle_post_settings),
        )
        .route(
            "/api/programs",
            get(handle_get_programs).post(handle_post_programs),
        )
        .route("/api/programs/{id}", get(handle_get_program))
        .route("/api/programs/{id}/edit", post(handle_edit_program))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_get_status(State(state): State<ApiState>) -> impl IntoResponse {
    let status = state.status.borrow().clone();
    Json(status)
}

async fn handle_get_settings(State(state): State<ApiState>) -> Response {
    match state.store.load().await {
        Ok(settings) => Json(settings).into_response(),
        Err(err) => heater_error_response(err),
    }
}

async fn handle_post_settings(
    State(state): State<ApiState>,
    Json(changes): Json<PartialSettings>,
) -> Response {
    if changes.relay.is_some() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "relay state is owned by the controller",
        );
    }
    if let Some(log) = &changes.log {
        if log.time_elapsed.is_some() || log.last_day_on.is_some() {
            return error_response(
                StatusCode::BAD_REQUEST,
                "log.timeElapsed and log.lastDayOn are kept by the controller",
            );
        }
    }

    match state.store.apply(&changes).await {
        Ok(settings) => Json(settings).into_response(),
        Err(err) => heater_error_response(err),
    }
}

async fn handle_get_programs(State(state): State<ApiState>) -> Response {
    match state.programs.ids().await {
        Ok(ids) => Json(ids).into_response(),
        Err(err) => heater_error_response(err),
    }
}

async fn handle_post_programs(State(state): State<ApiState>, body: Bytes) -> Response {
    // An empty body asks for a fresh copy of the built-in program.
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        NewProgramRequest::default()
    } else {
        match serde_json::from_slice::<NewProgramRequest>(&body) {
            Ok(request) => request,
            Err(err) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    &format!("invalid request body: {err}"),
                )
            }
        }
    };
    let source = match request.copy_from {
        Some(id) => NewProgram::CopyOf(id),
        None => NewProgram::Example,
    };

    match state.programs.add(source).await {
        Ok(id) => (StatusCode::CREATED, Json(NewProgramResponse { id })).into_response(),
        Err(err) => heater_error_response(err),
    }
}

async fn handle_get_program(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    let id = match id.parse::<ProgramId>() {
        Ok(id) => id,
        Err(err) => return heater_error_response(err),
    };

    match state.programs.load(id).await {
        Ok(program) => Json(program).into_response(),
        Err(err) => heater_error_response(err),
    }
}

async fn handle_edit_program(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(edit): Json<EditRequest>,
) -> Response {
    let id = match id.parse::<ProgramId>() {
        Ok(id) => id,
        Err(err) => return heater_error_response(err),
    };

    match state
        .programs
        .edit(id, &edit.days, &edit.hours, edit.value)
        .await
    {
        Ok(program) => Json(program).into_response(),
        Err(err) => heater_error_response(err),
    }
}

fn status_for(err: &HeaterError) -> StatusCode {
    match err {
        HeaterError::ProgramNotFound(_) => StatusCode::NOT_FOUND,
        HeaterError::InvalidScheduleInput(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn heater_error_response(err: HeaterError) -> Response {
    let status = status_for(&err);
    if status.is_server_error() {
        warn!("api request failed: {err}");
    }
    error_response(status, &err.to_string())
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}
