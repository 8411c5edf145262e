//! API response types.

use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use fanout_common::AppError;
use serde::Serialize;
use serde_json::json;

/// Content type of every JSON body the API writes.
pub const CONTENT_TYPE_JSON: &str = "application/json; charset=UTF-8";

/// Result type of handlers and middleware.
pub type ApiResult<T> = Result<T, ApiError>;

/// Envelope codes that do not follow the HTTP status.
#[allow(missing_docs)]
pub mod codes {
    pub const APP_NOT_FOUND: u16 = 1001;
    pub const USER_CREDENTIALS: u16 = 4007;
    pub const SESSION_TOKEN_MISSING: u16 = 4013;
    pub const USER_AGENT_MISSING: u16 = 5002;
    pub const CONTENT_LENGTH_INVALID: u16 = 5003;
    pub const CONTENT_LENGTH_MISSING: u16 = 5004;
    pub const CONTENT_LENGTH_MISMATCH: u16 = 5005;
    pub const CONTENT_TYPE_UNSUPPORTED: u16 = 5006;
    pub const CONTENT_TYPE_MISSING: u16 = 5007;
    pub const PAYLOAD_TOO_BIG: u16 = 5011;
}

/// An [`AppError`] with an optional envelope code override.
///
/// `NotFound` and `NotUnique` always report their own codes.
#[derive(Debug)]
pub struct ApiError {
    code: Option<u16>,
    error: AppError,
}

impl ApiError {
    /// `error` reported under `code`.
    #[must_use]
    pub const fn new(code: u16, error: AppError) -> Self {
        Self {
            code: Some(code),
            error,
        }
    }

    /// Shorthand for a bad request carrying `msg`.
    #[must_use]
    pub fn bad_request(msg: impl std::fmt::Display) -> Self {
        AppError::BadRequest(msg.to_string()).into()
    }

    /// The wrapped error.
    #[must_use]
    pub const fn error(&self) -> &AppError {
        &self.error
    }

    /// Code written to the envelope.
    #[must_use]
    pub const fn code(&self) -> u16 {
        match (&self.error, self.code) {
            (AppError::NotFound(_) | AppError::NotUnique(_), _) | (_, None) => {
                self.error.error_code()
            }
            (_, Some(code)) => code,
        }
    }
}

impl From<AppError> for ApiError {
    fn from(error: AppError) -> Self {
        Self { code: None, error }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.error.status_code();
        let code = self.code();

        if self.error.is_server_error() {
            tracing::error!(error = %self.error, code, "Server error occurred");
        } else {
            tracing::debug!(error = %self.error, code, "Client error occurred");
        }

        json_response(
            status,
            &json!({
                "errors": [{
                    "code": code,
                    "message": self.error.to_string(),
                }]
            }),
        )
    }
}

/// Serialize `body` with `status` and the JSON content type.
pub fn json_response<T: Serialize + ?Sized>(status: StatusCode, body: &T) -> Response {
    match serde_json::to_vec(body) {
        Ok(bytes) => (
            status,
            [(header::CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_JSON))],
            bytes,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// 200 with `body`.
pub fn ok<T: Serialize + ?Sized>(body: &T) -> Response {
    json_response(StatusCode::OK, body)
}

/// 201 with `body`.
pub fn created<T: Serialize + ?Sized>(body: &T) -> Response {
    json_response(StatusCode::CREATED, body)
}

/// Empty 204.
#[must_use]
pub fn no_content() -> Response {
    StatusCode::NO_CONTENT.into_response()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_code_override() {
        let err = ApiError::new(codes::APP_NOT_FOUND, AppError::Unauthorized("x".into()));
        assert_eq!(err.code(), 1001);
        assert_eq!(err.error().status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_not_found_keeps_its_code() {
        let err = ApiError::new(codes::USER_CREDENTIALS, AppError::NotFound("x".into()));
        assert_eq!(err.code(), 404);
    }

    #[test]
    fn test_user_exists_code() {
        let err: ApiError = AppError::NotUnique("email".into()).into();
        assert_eq!(err.code(), 4001);
    }

    #[tokio::test]
    async fn test_envelope() {
        let resp = ApiError::bad_request("limit").into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            CONTENT_TYPE_JSON
        );
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v["errors"][0]["code"], 400);
        assert_eq!(v["errors"][0]["message"], "bad request: limit");
    }
}
