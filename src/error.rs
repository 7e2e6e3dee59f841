//! Error types for the store and the HTTP layer.

use std::collections::BTreeMap;

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use validator::{ValidationErrors, ValidationErrorsKind};

/// Field name to list of messages, rendered as the 400 body.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Errors raised by the record store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("validation failed: {0:?}")]
    Validation(FieldErrors),
    #[error("cannot {action} a {entity} in status '{status}'")]
    InvalidTransition {
        entity: &'static str,
        action: &'static str,
        status: String,
    },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("unable to generate a unique {0} after exhausting retries")]
    IdExhausted(&'static str),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Single-field validation failure.
    pub fn field(field: &str, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(field.to_string(), vec![message.into()]);
        StoreError::Validation(errors)
    }

    pub fn transition(entity: &'static str, action: &'static str, status: impl Into<String>) -> Self {
        StoreError::InvalidTransition {
            entity,
            action,
            status: status.into(),
        }
    }

    /// True when the underlying database rejected a duplicate key.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            StoreError::Database(sqlx::Error::Database(db)) => db.is_unique_violation(),
            _ => false,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    detail: &'a str,
    code: &'static str,
}

/// API-level errors with HTTP status mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("validation failed")]
    Validation(FieldErrors),
    #[error("{0}")]
    InvalidTransition(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn unauthenticated() -> Self {
        ApiError::Unauthorized("Authentication credentials were not provided.".into())
    }

    pub fn forbidden() -> Self {
        ApiError::Forbidden("You do not have permission to perform this action.".into())
    }

    pub fn field(field: &str, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(field.to_string(), vec![message.into()]);
        ApiError::Validation(errors)
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized(_) => "not_authenticated",
            ApiError::Forbidden(_) => "permission_denied",
            ApiError::NotFound(_) => "not_found",
            ApiError::Validation(_) => "invalid",
            ApiError::InvalidTransition(_) => "invalid_transition",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Conflict(_) => "conflict",
            ApiError::Internal(_) => "internal",
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Validation(_) | ApiError::InvalidTransition(_) | ApiError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut builder = HttpResponse::build(self.status_code());
        match self {
            ApiError::Validation(errors) => builder.json(errors),
            ApiError::Internal(detail) => {
                tracing::error!(detail = %detail, "API internal error");
                builder.json(ErrorBody {
                    detail: "An internal error occurred",
                    code: self.code(),
                })
            }
            ApiError::Unauthorized(detail)
            | ApiError::Forbidden(detail)
            | ApiError::NotFound(detail)
            | ApiError::InvalidTransition(detail)
            | ApiError::BadRequest(detail)
            | ApiError::Conflict(detail) => builder.json(ErrorBody {
                detail,
                code: self.code(),
            }),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        if err.is_unique_violation() {
            return ApiError::Conflict("A record with these values already exists.".into());
        }
        match err {
            StoreError::NotFound(entity) => ApiError::NotFound(format!("{entity} not found.")),
            StoreError::Validation(errors) => ApiError::Validation(errors),
            e @ StoreError::InvalidTransition { .. } => ApiError::InvalidTransition(e.to_string()),
            StoreError::Conflict(detail) => ApiError::Conflict(detail),
            e @ StoreError::IdExhausted(_) => ApiError::Internal(e.to_string()),
            StoreError::Database(e) => ApiError::Internal(e.to_string()),
            StoreError::Serialization(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<crate::security::SecurityError> for ApiError {
    fn from(err: crate::security::SecurityError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(errors: ValidationErrors) -> Self {
        let mut fields = FieldErrors::new();
        flatten_validation("", &errors, &mut fields);
        ApiError::Validation(fields)
    }
}

fn flatten_validation(prefix: &str, errors: &ValidationErrors, out: &mut FieldErrors) {
    for (field, kind) in errors.errors() {
        let key = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{prefix}.{field}")
        };
        match kind {
            ValidationErrorsKind::Field(list) => {
                let messages = out.entry(key).or_default();
                for e in list {
                    messages.push(
                        e.message
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| format!("invalid value ({})", e.code)),
                    );
                }
            }
            ValidationErrorsKind::Struct(inner) => flatten_validation(&key, inner, out),
            ValidationErrorsKind::List(items) => {
                for (index, inner) in items {
                    flatten_validation(&format!("{key}[{index}]"), inner, out);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;
    use test_case::test_case;

    async fn body_json(err: ApiError) -> (StatusCode, serde_json::Value) {
        let response = err.error_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body()).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test_case(ApiError::unauthenticated(), StatusCode::UNAUTHORIZED ; "unauthorized")]
    #[test_case(ApiError::forbidden(), StatusCode::FORBIDDEN ; "forbidden")]
    #[test_case(ApiError::NotFound("x".into()), StatusCode::NOT_FOUND ; "not found")]
    #[test_case(ApiError::Conflict("x".into()), StatusCode::CONFLICT ; "conflict")]
    #[test_case(ApiError::InvalidTransition("x".into()), StatusCode::BAD_REQUEST ; "transition")]
    fn status_mapping(err: ApiError, expected: StatusCode) {
        assert_eq!(err.status_code(), expected);
    }

    #[actix_web::test]
    async fn validation_body_is_keyed_by_field() {
        let (status, json) = body_json(ApiError::field("personal_number", "This field is required.")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["personal_number"][0], "This field is required.");
    }

    #[actix_web::test]
    async fn internal_error_hides_cause() {
        let (status, json) = body_json(ApiError::Internal("disk on fire".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["detail"], "An internal error occurred");
        assert_eq!(json["code"], "internal");
    }

    #[test]
    fn store_not_found_maps_to_404() {
        let err: ApiError = StoreError::NotFound("Patient").into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "Patient not found.");
    }

    #[test]
    fn id_exhaustion_is_internal() {
        let err: ApiError = StoreError::IdExhausted("patient ID").into();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn transition_message_names_status() {
        let err = StoreError::transition("lab test", "process", "pending");
        assert_eq!(err.to_string(), "cannot process a lab test in status 'pending'");
    }
}
