use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::balancer::BalanceError;
use crate::repo::StoreError;

/// API error types that can be returned from handlers
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid grid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Computation failure: {0}")]
    ComputationFailure(String),

    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("Partial persistence: {0}")]
    PartialPersistence(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

/// Error response that gets serialized to JSON
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl ApiError {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidIdentifier(_) | ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::ComputationFailure(_)
            | ApiError::PersistenceFailure(_)
            | ApiError::PartialPersistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Get the error type string
    fn error_type(&self) -> &'static str {
        match self {
            ApiError::InvalidIdentifier(_) => "InvalidIdentifier",
            ApiError::NotFound(_) => "NotFound",
            ApiError::InvalidInput(_) => "InvalidInput",
            ApiError::ComputationFailure(_) => "ComputationFailure",
            ApiError::PersistenceFailure(_) => "PersistenceFailure",
            ApiError::PartialPersistence(_) => "PartialPersistence",
            ApiError::ServiceUnavailable(_) => "ServiceUnavailable",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_type = self.error_type();

        let message = match &self {
            ApiError::ComputationFailure(_) | ApiError::PersistenceFailure(_) => {
                tracing::error!(error = %self, "API error occurred");
                "An internal error occurred".to_string()
            }
            ApiError::PartialPersistence(_) => {
                tracing::error!(error = %self, "balance only partially persisted");
                "Balance was only partially persisted; grid state may be inconsistent".to_string()
            }
            ApiError::ServiceUnavailable(_) => {
                tracing::warn!(error = %self, "Service unavailable");
                "Service temporarily unavailable".to_string()
            }
            _ => {
                tracing::debug!(error = %self, "Client error");
                self.to_string()
            }
        };

        let error_response = ErrorResponse {
            error: error_type.to_string(),
            message,
        };

        (status, Json(error_response)).into_response()
    }
}

impl From<BalanceError> for ApiError {
    fn from(error: BalanceError) -> Self {
        match error {
            BalanceError::InvalidIdentifier(raw) => ApiError::InvalidIdentifier(raw),
            BalanceError::NotFound(id) => ApiError::NotFound(format!("grid network {id}")),
            e @ BalanceError::NodeNotFound { .. } => ApiError::NotFound(e.to_string()),
            e @ BalanceError::InvalidDemand(_) => ApiError::InvalidInput(e.to_string()),
            e @ BalanceError::Computation { .. } => ApiError::ComputationFailure(e.to_string()),
            BalanceError::Persistence(e) => match e {
                StoreError::NotFound(id) => ApiError::NotFound(format!("grid network {id}")),
                StoreError::NodeNotFound { .. } => ApiError::NotFound(e.to_string()),
                StoreError::Unavailable(_) => ApiError::ServiceUnavailable(e.to_string()),
                StoreError::PartialCommit { .. } => ApiError::PartialPersistence(e.to_string()),
                StoreError::Backend(_) => ApiError::PersistenceFailure(e.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::BalanceStage;
    use crate::domain::GridId;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            ApiError::InvalidIdentifier("x".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::NotFound("test".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::ComputationFailure("test".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::ServiceUnavailable("test".to_string()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_balance_error_mapping() {
        let id = GridId::new();
        assert_eq!(
            ApiError::from(BalanceError::NotFound(id)).error_type(),
            "NotFound"
        );
        assert_eq!(
            ApiError::from(BalanceError::computation(BalanceStage::Matched, "bad distance"))
                .error_type(),
            "ComputationFailure"
        );

        let partial = BalanceError::Persistence(StoreError::PartialCommit {
            grid_id: id,
            committed: "grid allocations",
            source: Box::new(StoreError::Backend("disk full".into())),
        });
        let api = ApiError::from(partial);
        assert_eq!(api.error_type(), "PartialPersistence");
        assert!(api.to_string().contains("disk full"));

        let node = BalanceError::from(StoreError::NodeNotFound {
            grid_id: id,
            node_id: uuid::Uuid::new_v4(),
        });
        assert_eq!(ApiError::from(node).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::from(BalanceError::InvalidDemand(-3.0)).status_code(),
            StatusCode::BAD_REQUEST
        );

        let backend = BalanceError::Persistence(StoreError::Backend("boom".into()));
        assert_eq!(ApiError::from(backend).error_type(), "PersistenceFailure");
    }

    #[test]
    fn test_error_display() {
        let error = ApiError::NotFound("grid network 123".to_string());
        assert_eq!(error.to_string(), "Resource not found: grid network 123");
    }
}
