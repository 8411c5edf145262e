//! Request extractors.

use axum::{
    extract::{
        FromRequest, FromRequestParts,
        rejection::{JsonRejection, PathRejection},
    },
    http::request::Parts,
};
use fanout_common::AppError;
use fanout_core::{Integration, Origin, origin::DEFAULT_DEVICE_ID};
use fanout_db::entities::{App, User};

use crate::response::ApiError;

/// App resolved from the basic auth username.
#[derive(Debug, Clone)]
pub struct CurrentApp(pub App, pub Integration);

impl<S> FromRequestParts<S> for CurrentApp
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // Set by the app context middleware
        parts
            .extensions
            .get::<Self>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized("application not found".to_string()).into())
    }
}

/// User resolved from the basic auth password.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Self>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized("user not found".to_string()).into())
    }
}

/// Device the request originates from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceId(pub String);

impl Default for DeviceId {
    fn default() -> Self {
        Self(DEFAULT_DEVICE_ID.to_string())
    }
}

impl<S> FromRequestParts<S> for DeviceId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<Self>().cloned().unwrap_or_default())
    }
}

/// The caller as seen by core operations.
#[derive(Debug, Clone)]
pub struct Caller(pub Origin);

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let integration = parts
            .extensions
            .get::<CurrentApp>()
            .map(|a| a.1)
            .unwrap_or_default();
        let user_id = parts
            .extensions
            .get::<CurrentUser>()
            .map_or(0, |u| u.0.id);
        let device = parts
            .extensions
            .get::<DeviceId>()
            .cloned()
            .unwrap_or_default();

        Ok(Self(Origin {
            integration,
            user_id,
            device_id: device.0,
        }))
    }
}

/// Path parameters; malformed values are bad requests.
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct PathParams<T>(pub T);

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

/// JSON body; malformed documents are bad requests.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct JsonBody<T>(pub T);

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}
