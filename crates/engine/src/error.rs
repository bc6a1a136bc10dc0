//! Engine error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// PostgreSQL SQLSTATE for `unique_violation`.
const UNIQUE_VIOLATION: &str = "23505";

/// PostgreSQL SQLSTATE for `foreign_key_violation`.
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// Errors raised while compiling or executing a query.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The caller handed the engine a structurally invalid request.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A single-row operation matched nothing.
    #[error("{entity} not found")]
    NotFound { entity: &'static str },

    /// The store rejected the statement.
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    /// Statement construction failed inside sea-query.
    #[error("statement error: {0}")]
    Statement(#[from] sea_query::error::Error),

    /// A row could not be converted to or from the entity type.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Coarse classification of store failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreErrorKind {
    UniqueViolation,
    ForeignKeyViolation,
    /// Any other SQLSTATE, or `None` when the failure never reached the server.
    Other(Option<String>),
}

impl QueryError {
    /// Shorthand for a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        QueryError::Configuration(message.into())
    }

    /// Classify a store error by SQLSTATE. Returns `None` for non-store errors.
    pub fn store_kind(&self) -> Option<StoreErrorKind> {
        let QueryError::Store(err) = self else {
            return None;
        };
        let code = err
            .as_database_error()
            .and_then(|db| db.code())
            .map(|c| c.into_owned());
        Some(match code.as_deref() {
            Some(UNIQUE_VIOLATION) => StoreErrorKind::UniqueViolation,
            Some(FOREIGN_KEY_VIOLATION) => StoreErrorKind::ForeignKeyViolation,
            _ => StoreErrorKind::Other(code),
        })
    }

    /// Whether this is a [`QueryError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, QueryError::NotFound { .. })
    }
}

impl IntoResponse for QueryError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            QueryError::NotFound { .. } => (StatusCode::NOT_FOUND, self.to_string()),
            QueryError::Store(_) => match self.store_kind() {
                Some(StoreErrorKind::UniqueViolation) => {
                    (StatusCode::BAD_REQUEST, "duplicate entry".to_string())
                }
                Some(StoreErrorKind::ForeignKeyViolation) => (
                    StatusCode::BAD_REQUEST,
                    "referenced record not found".to_string(),
                ),
                _ => {
                    tracing::error!(error = %self, "database error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "internal server error".to_string(),
                    )
                }
            },
            // Configuration, statement and serialization failures are defects
            // in the calling code, never bad user input.
            _ => {
                tracing::error!(error = %self, "query engine misuse");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };

        (status, body).into_response()
    }
}

/// Result type alias using QueryError.
pub type EngineResult<T> = Result<T, QueryError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404() {
        let resp = QueryError::NotFound { entity: "users" }.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn configuration_maps_to_500() {
        let resp = QueryError::config("missing condition").into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn non_database_store_error_has_no_code() {
        let err = QueryError::Store(sqlx::Error::RowNotFound);
        assert_eq!(err.store_kind(), Some(StoreErrorKind::Other(None)));
        assert_eq!(QueryError::config("x").store_kind(), None);
    }

    #[test]
    fn not_found_message_names_entity() {
        let err = QueryError::NotFound { entity: "users" };
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "users not found");
    }
}
