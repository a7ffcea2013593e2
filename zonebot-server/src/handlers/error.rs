use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[derive(Debug)]
pub enum AppError {
    SignatureMissing,
    SignatureNotValid,
    PayloadNotValid,
    InteractionNotKnown,
    ResponseFailed,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            Self::SignatureMissing => (StatusCode::UNAUTHORIZED, "signature headers are missing"),
            Self::SignatureNotValid => (StatusCode::UNAUTHORIZED, "invalid request signature"),
            Self::PayloadNotValid => (StatusCode::BAD_REQUEST, "interaction is not valid"),
            Self::InteractionNotKnown => (StatusCode::BAD_REQUEST, "interaction type is not known"),
            Self::ResponseFailed => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "could not build the response",
            ),
        }
        .into_response()
    }
}
