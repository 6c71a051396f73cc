use std::convert::Infallible;

use axum::{
    body::Body,
    extract::State,
    http::header,
    response::IntoResponse,
};
use futures::StreamExt;

use crate::api::AppState;

/// Live audio for one client. The listener unregisters when the client
/// goes away and the body is dropped.
pub async fn stream(State(state): State<AppState>) -> impl IntoResponse {
    let listener = state.bus.register();
    log::info!(
        "listener {} connected ({} total)",
        listener.id(),
        state.bus.registry().len()
    );
    let body = Body::from_stream(listener.map(Ok::<_, Infallible>));
    (
        [
            (header::CONTENT_TYPE, "audio/mpeg"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
}
