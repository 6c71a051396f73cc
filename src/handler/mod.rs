use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use sox_bus::error::BusError;

pub mod assets;
pub mod controller;
pub mod stream;

pub type ApiResult<T> = Result<T, ApiError>;
pub type ApiJsonResult<T> = ApiResult<Json<T>>;

pub struct ApiError(anyhow::Error);

impl ApiError {
    fn status(&self) -> StatusCode {
        match BusError::find(&self.0) {
            Some(BusError::EffectNotFound(_)) => return StatusCode::NOT_FOUND,
            Some(BusError::NotPlaying) => return StatusCode::CONFLICT,
            Some(_) => return StatusCode::INTERNAL_SERVER_ERROR,
            None => {}
        }
        let missing = self
            .0
            .chain()
            .filter_map(|e| e.downcast_ref::<std::io::Error>())
            .any(|e| e.kind() == std::io::ErrorKind::NotFound);
        if missing {
            StatusCode::NOT_FOUND
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("caught error on API: {:#}", self.0);
        } else {
            log::warn!("{}: {:#}", status, self.0);
        }
        let body = serde_json::json!({ "error": format!("{:#}", self.0) });
        (status, Json(body)).into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (anyhow::Error::from(BusError::EffectNotFound("x".into())), StatusCode::NOT_FOUND),
            (BusError::NotPlaying.into(), StatusCode::CONFLICT),
            (BusError::Closed.into(), StatusCode::INTERNAL_SERVER_ERROR),
            (
                anyhow::Error::from(std::io::Error::from(std::io::ErrorKind::NotFound))
                    .context("read asset"),
                StatusCode::NOT_FOUND,
            ),
            (anyhow::anyhow!("boom"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError(err).status(), expected);
        }
    }
}
