//! Request middleware.
//!
//! Every versioned route passes through the app chain: secure headers, CORS,
//! user agent, content validation, app and device resolution and the rate
//! limit. Routes acting for a user additionally resolve the [`CurrentUser`].

use axum::{
    body::{Body, to_bytes},
    extract::{Request, State},
    http::{HeaderValue, Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Basic};
use fanout_common::{AppError, Timer, get_metrics};
use fanout_core::Integration;
use fanout_db::entities::User;

use crate::extractors::{CurrentApp, CurrentUser, DeviceId};
use crate::response::{ApiError, ApiResult, codes};
use crate::state::AppState;

/// Header carrying the device id of the caller.
pub const HEADER_DEVICE_ID: &str = "x-tapglue-idfv";
/// Largest request body accepted.
pub const PAYLOAD_MAX: usize = 32768;

const CONTENT_TYPES: [&str; 2] = ["application/json", "application/json; charset=UTF-8"];

fn reject(code: u16, error: AppError) -> Response {
    ApiError::new(code, error).into_response()
}

fn bad_request(code: u16, msg: &str) -> Response {
    reject(code, AppError::BadRequest(msg.to_string()))
}

/// Transport security headers on every response.
pub async fn secure_headers(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::STRICT_TRANSPORT_SECURITY,
        HeaderValue::from_static("max-age=63072000"),
    );
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    response
}

/// Permissive CORS. Preflight requests are answered directly.
pub async fn cors(req: Request, next: Next) -> Response {
    let mut response = if req.method() == Method::OPTIONS {
        StatusCode::OK.into_response()
    } else {
        next.run(req).await
    };

    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("POST, GET, OPTIONS, PUT, DELETE"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(
            "User-Agent, Content-Type, Content-Length, Accept-Encoding, Authorization",
        ),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );
    response
}

/// Rejects requests without a `User-Agent`.
pub async fn has_user_agent(req: Request, next: Next) -> Response {
    let present = req
        .headers()
        .get(header::USER_AGENT)
        .is_some_and(|v| !v.is_empty());
    if !present {
        return bad_request(codes::USER_AGENT_MISSING, "User-Agent header missing");
    }
    next.run(req).await
}

/// Checks the declared length and type of `POST` and `PUT` bodies.
pub async fn validate_content(req: Request, next: Next) -> Response {
    if req.method() != Method::POST && req.method() != Method::PUT {
        return next.run(req).await;
    }

    let Some(declared) = req.headers().get(header::CONTENT_LENGTH) else {
        return bad_request(codes::CONTENT_LENGTH_MISSING, "Content-Length header missing");
    };
    let Some(length) = declared
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
    else {
        return bad_request(codes::CONTENT_LENGTH_INVALID, "Content-Length header is invalid");
    };
    if length > PAYLOAD_MAX {
        return bad_request(codes::PAYLOAD_TOO_BIG, "payload too big");
    }

    let (parts, body) = req.into_parts();
    let Ok(bytes) = to_bytes(body, PAYLOAD_MAX + 1).await else {
        return bad_request(codes::CONTENT_LENGTH_MISMATCH, "Content-Length header size mismatch");
    };
    if bytes.len() != length {
        return bad_request(codes::CONTENT_LENGTH_MISMATCH, "Content-Length header size mismatch");
    }

    if length > 0 {
        let content_type = parts
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if content_type.is_empty() {
            return bad_request(codes::CONTENT_TYPE_MISSING, "Content-Type header missing");
        }
        if !CONTENT_TYPES.contains(&content_type) {
            return bad_request(codes::CONTENT_TYPE_UNSUPPORTED, "Content-Type header mismatch");
        }
    }

    next.run(Request::from_parts(parts, Body::from(bytes))).await
}

fn credentials(req: &Request) -> Option<Authorization<Basic>> {
    req.headers().typed_get::<Authorization<Basic>>()
}

/// Resolves the app from the basic auth username.
pub async fn ctx_app(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let Some(auth) = credentials(&req) else {
        return reject(
            codes::APP_NOT_FOUND,
            AppError::Unauthorized("application user not found".to_string()),
        );
    };

    let (app, integration) = match state.core.app_by_token(auth.username()).await {
        Ok(found) => found,
        Err(e) if e.is_server_error() => return ApiError::from(e).into_response(),
        Err(_) => {
            return reject(
                codes::APP_NOT_FOUND,
                AppError::Unauthorized("application not found".to_string()),
            );
        }
    };

    req.extensions_mut().insert(CurrentApp(app, integration));
    next.run(req).await
}

/// Records the device id header, falling back to the default device.
pub async fn ctx_device_id(mut req: Request, next: Next) -> Response {
    let device = req
        .headers()
        .get(HEADER_DEVICE_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map_or_else(DeviceId::default, |v| DeviceId(v.to_string()));
    req.extensions_mut().insert(device);
    next.run(req).await
}

fn credentials_error(msg: &str) -> ApiError {
    ApiError::new(codes::USER_CREDENTIALS, AppError::Unauthorized(msg.to_string()))
}

async fn authenticate(
    state: &AppState,
    current: Option<CurrentApp>,
    auth: Option<Authorization<Basic>>,
) -> ApiResult<User> {
    let (Some(CurrentApp(app, integration)), Some(auth)) = (current, auth) else {
        return Err(credentials_error("error while reading user credentials"));
    };

    let token = auth.password();
    if token.is_empty() {
        return Err(ApiError::new(
            codes::SESSION_TOKEN_MISSING,
            AppError::Unauthorized("session token missing from request".to_string()),
        ));
    }

    let resolved = match integration {
        Integration::Application => state
            .core
            .user_by_session(&app, token)
            .await
            .map_err(|e| (e, "invalid session token")),
        Integration::Backend => {
            let id: u64 = token
                .parse()
                .map_err(|_| ApiError::bad_request(format!("invalid user id '{token}'")))?;
            state
                .core
                .user_fetch(&app, id)
                .await
                .map_err(|e| (e, "user not found"))
        }
    };

    resolved.map_err(|(e, msg)| {
        if e.is_server_error() {
            e.into()
        } else {
            credentials_error(msg)
        }
    })
}

/// Resolves the user from the basic auth password: a session token for
/// application callers, a user id for backend callers.
pub async fn ctx_user(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let current = req.extensions().get::<CurrentApp>().cloned();
    match authenticate(&state, current, credentials(&req)).await {
        Ok(user) => {
            req.extensions_mut().insert(CurrentUser(user));
            next.run(req).await
        }
        Err(e) => e.into_response(),
    }
}

/// Counts responses by status and latency.
pub async fn track_metrics(req: Request, next: Next) -> Response {
    let timer = Timer::start();
    let response = next.run(req).await;
    get_metrics().record_http_request(response.status().as_u16(), timer.elapsed());
    response
}
