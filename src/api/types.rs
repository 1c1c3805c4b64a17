//! Request and response types for the HTTP API

use crate::callback::CallbackDeliveryFailure;
use crate::validation::{ValidationError, ValidationWarning};
use serde::{Deserialize, Serialize};

/// Uniform response envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T: Serialize> {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ValidationError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<ValidationWarning>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success_with_message(message: &str) -> Self {
        Self {
            status: "success".to_string(),
            message: Some(message.to_string()),
            data: None,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn success_with_data(data: T) -> Self {
        Self {
            status: "success".to_string(),
            message: None,
            data: Some(data),
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<ValidationWarning>) -> Self {
        self.warnings = warnings;
        self
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthData {
    pub version: String,
    pub jurisdictions: Vec<String>,
    /// Callbacks that exhausted their retries, newest first
    pub recent_callback_failures: Vec<CallbackDeliveryFailure>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

impl ListQuery {
    pub const DEFAULT_LIMIT: usize = 50;
    pub const MAX_LIMIT: usize = 200;

    pub fn limit(&self) -> usize {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_collections_are_omitted() {
        let body = serde_json::to_value(ApiResponse::<()>::success_with_message("ok")).unwrap();
        assert_eq!(body, serde_json::json!({ "status": "success", "message": "ok" }));
    }

    #[test]
    fn test_list_limit_is_clamped() {
        assert_eq!(ListQuery::default().limit(), 50);
        assert_eq!(ListQuery { limit: Some(0) }.limit(), 1);
        assert_eq!(ListQuery { limit: Some(10_000) }.limit(), 200);
    }
}
