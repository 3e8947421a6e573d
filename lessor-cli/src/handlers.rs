use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use lessor_core::context::RequestContext;
use lessor_core::error::ManagerError;

// ─── Caller Headers ─────────────────────────────────────────────────────────

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_NAME_HEADER: &str = "x-user-name";
pub const PROJECT_ID_HEADER: &str = "x-project-id";
pub const PROJECT_NAME_HEADER: &str = "x-project-name";
pub const ROLES_HEADER: &str = "x-roles";
pub const AUTH_TOKEN_HEADER: &str = "x-auth-token";

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Build the caller's context from the headers an authenticating proxy sets.
pub fn context_from_headers(headers: &HeaderMap) -> Result<RequestContext, String> {
    let user_id = header(headers, USER_ID_HEADER)
        .ok_or_else(|| format!("{} header is required", USER_ID_HEADER))?;
    let project_id = header(headers, PROJECT_ID_HEADER)
        .ok_or_else(|| format!("{} header is required", PROJECT_ID_HEADER))?;

    let roles = header(headers, ROLES_HEADER)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Ok(RequestContext {
        user_id: Some(user_id),
        user_name: header(headers, USER_NAME_HEADER),
        project_id: Some(project_id),
        project_name: header(headers, PROJECT_NAME_HEADER),
        auth_token: header(headers, AUTH_TOKEN_HEADER),
        roles,
        ..RequestContext::default()
    })
}

// ─── Response Types ─────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub manager_topic: String,
}

// ─── Errors ─────────────────────────────────────────────────────────────────

pub fn status_for(error: &ManagerError) -> StatusCode {
    match error {
        ManagerError::NotFound { .. } => StatusCode::NOT_FOUND,
        ManagerError::DuplicateEntry(_) => StatusCode::CONFLICT,
        ManagerError::Validation(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// A manager failure on its way out as an HTTP response
#[derive(Debug)]
pub struct ApiError(pub ManagerError);

impl From<ManagerError> for ApiError {
    fn from(error: ManagerError) -> Self {
        ApiError(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        } else {
            tracing::info!(status = status.as_u16(), error = %self.0, "Request rejected");
        }
        (status, Json(ApiResponse::<()>::err(self.0.to_string()))).into_response()
    }
}
