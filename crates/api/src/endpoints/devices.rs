//! Push device registration of the current user.

use axum::{Router, extract::State, response::Response, routing::put};
use fanout_db::entities::Platform;
use serde::Deserialize;

use crate::{
    extractors::{CurrentApp, CurrentUser, JsonBody, PathParams},
    response::{ApiError, ApiResult, no_content},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/me/devices/{device_id}", put(update).delete(remove))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DeviceInput {
    language: String,
    platform: u8,
    token: String,
}

impl DeviceInput {
    fn platform(&self) -> ApiResult<Platform> {
        Platform::try_from(self.platform)
            .map_err(|_| ApiError::bad_request(format!("platform {} not supported", self.platform)))
    }
}

async fn update(
    State(state): State<AppState>,
    CurrentApp(app, _): CurrentApp,
    CurrentUser(me): CurrentUser,
    PathParams(device_id): PathParams<String>,
    JsonBody(input): JsonBody<DeviceInput>,
) -> ApiResult<Response> {
    if input.token.is_empty() {
        return Err(ApiError::bad_request("token must be set"));
    }
    let platform = input.platform()?;
    state
        .core
        .device_update(&app, me.id, &device_id, platform, &input.token, &input.language)
        .await?;
    Ok(no_content())
}

async fn remove(
    State(state): State<AppState>,
    CurrentApp(app, _): CurrentApp,
    CurrentUser(me): CurrentUser,
    PathParams(device_id): PathParams<String>,
) -> ApiResult<Response> {
    state.core.device_delete(&app, me.id, &device_id).await?;
    Ok(no_content())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_device_platform() {
        let input: DeviceInput =
            serde_json::from_value(json!({ "platform": 3, "token": "t", "language": "de" }))
                .unwrap();
        assert_eq!(input.platform().unwrap(), Platform::Android);

        let input: DeviceInput = serde_json::from_value(json!({ "platform": 9 })).unwrap();
        assert!(input.platform().is_err());
    }
}
