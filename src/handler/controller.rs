use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use sox_bus::{bus::BusStatus, command::Command};

use crate::{api::AppState, handler::ApiJsonResult};

#[derive(Serialize, Deserialize)]
pub struct CommandRequest {
    command: String,
}

#[derive(Serialize, Deserialize)]
pub struct CommandResponse {
    result: String,
}

pub async fn command(
    State(state): State<AppState>,
    Json(req): Json<CommandRequest>,
) -> ApiJsonResult<CommandResponse> {
    let command = Command::parse(&req.command);
    log::info!("command received: {}", command);
    state.bus.execute(command).await?;
    Ok(Json(CommandResponse {
        result: "ok".to_string(),
    }))
}

pub async fn status(State(state): State<AppState>) -> ApiJsonResult<BusStatus> {
    Ok(Json(state.bus.status().await?))
}
