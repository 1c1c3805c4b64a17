//! Caller identity asserted by the upstream gateway

use crate::error::AppError;
use crate::models::Requester;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const ROLES_HEADER: &str = "x-user-roles";
pub const ORGANIZATION_HEADER: &str = "x-organization-id";
pub const CAN_PUBLISH_HEADER: &str = "x-can-publish";

/// Extracts the [`Requester`] from gateway headers; 401 without a user id
#[derive(Debug, Clone)]
pub struct Identity(pub Requester);

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

impl Identity {
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, AppError> {
        let user_id = header(headers, USER_ID_HEADER).ok_or_else(|| {
            AppError::Unauthenticated(format!("missing {} header", USER_ID_HEADER))
        })?;

        let roles = header(headers, ROLES_HEADER)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let can_publish = header(headers, CAN_PUBLISH_HEADER)
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false);

        Ok(Self(Requester {
            user_id: user_id.to_string(),
            roles,
            organization_id: header(headers, ORGANIZATION_HEADER).map(str::to_string),
            can_publish,
        }))
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Self::from_headers(&parts.headers)
    }
}
