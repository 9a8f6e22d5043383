use axum::{
    Json,
    extract::State,
    http::StatusCode,
};

use crate::{
    error::HttpError,
    worker::{MessageReply, StatusReport, WorkerMessage},
};

use super::ProxyState;

pub async fn status(State(state): State<ProxyState>) -> Result<Json<StatusReport>, HttpError> {
    state.manager.status_report().await.map(Json).map_err(|err| {
        HttpError::from_error(
            "infra::http::control::status",
            StatusCode::SERVICE_UNAVAILABLE,
            "Cache storage unavailable",
            &err,
        )
    })
}

pub async fn message(
    State(state): State<ProxyState>,
    Json(message): Json<WorkerMessage>,
) -> Json<MessageReply> {
    Json(state.manager.handle_message(message).await)
}
