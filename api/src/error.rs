use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use toolgate_core::error::{self, ApiError};

/// Errors of the non-invocation endpoints, rendered as [`ApiError`].
/// Tool invocations answer with an invocation result instead.
#[derive(Debug)]
pub enum AppError {
    /// Malformed request (400)
    Validation {
        message: String,
        field: Option<String>,
        received: Option<serde_json::Value>,
        docs_hint: Option<String>,
    },
    /// Unknown resource (404)
    NotFound { resource: String },
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::now_v7().to_string();

        let (status, api_error) = match self {
            AppError::Validation {
                message,
                field,
                received,
                docs_hint,
            } => (
                StatusCode::BAD_REQUEST,
                ApiError {
                    error: error::codes::VALIDATION_FAILED.to_string(),
                    message,
                    field,
                    received,
                    request_id,
                    docs_hint,
                },
            ),
            AppError::NotFound { resource } => (
                StatusCode::NOT_FOUND,
                ApiError {
                    error: error::codes::NOT_FOUND.to_string(),
                    message: format!("{resource} not found"),
                    field: None,
                    received: None,
                    request_id,
                    docs_hint: None,
                },
            ),
        };

        (status, Json(api_error)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should be readable");
        serde_json::from_slice(&bytes).expect("body should be JSON")
    }

    #[tokio::test]
    async fn not_found_names_the_resource() {
        let response = AppError::NotFound {
            resource: "invocation 'abc'".to_string(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["error"], "not_found");
        assert_eq!(body["message"], "invocation 'abc' not found");
        assert!(body["request_id"].as_str().is_some());
    }

    #[tokio::test]
    async fn validation_errors_carry_field_details() {
        let response = AppError::Validation {
            message: "id must be a UUID".to_string(),
            field: Some("id".to_string()),
            received: Some(serde_json::json!("nope")),
            docs_hint: None,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"], "validation_failed");
        assert_eq!(body["field"], "id");
        assert_eq!(body["received"], "nope");
    }
}
