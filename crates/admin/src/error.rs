//! Unified error handling for the back office.

use thiserror::Error;

use stockroom_core::InventoryError;

use crate::db::RepositoryError;

/// Application-level error type for back-office operations.
#[derive(Debug, Error)]
pub enum AppError {
    /// A stock or catalog rule rejected the operation.
    #[error(transparent)]
    Inventory(#[from] InventoryError),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] RepositoryError),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request from the caller.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether the failure is ours rather than the caller's.
    #[must_use]
    pub const fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::Database(RepositoryError::Database(_) | RepositoryError::DataCorruption(_))
                | Self::Internal(_)
        )
    }

    /// Log server errors and send them to Sentry. Caller errors are logged
    /// at debug level only.
    pub fn report(&self) {
        if self.is_server_error() {
            let event_id = sentry::capture_error(self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Back-office operation failed"
            );
        } else {
            tracing::debug!(error = %self, "Operation rejected");
        }
    }

    /// The stock shortage carried by this error, if any.
    #[must_use]
    pub const fn shortage(&self) -> Option<i64> {
        match self {
            Self::Inventory(InventoryError::InsufficientStock { shortage }) => Some(*shortage),
            _ => None,
        }
    }
}
