//! Hardware error type.

use thiserror::Error;

/// Error type for hardware operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SaiError {
    #[error("invalid parameter: {message}")]
    InvalidParameter { message: String },

    #[error("item not found: {item}")]
    NotFound { item: String },

    /// No free entries (or no run of consecutive free entries) left in a table.
    #[error("table full: {table}")]
    TableFull { table: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl SaiError {
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        SaiError::InvalidParameter {
            message: message.into(),
        }
    }

    pub fn not_found(item: impl Into<String>) -> Self {
        SaiError::NotFound { item: item.into() }
    }

    pub fn table_full(table: impl Into<String>) -> Self {
        SaiError::TableFull {
            table: table.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        SaiError::Internal {
            message: message.into(),
        }
    }
}

/// Result type for hardware operations.
pub type SaiResult<T> = Result<T, SaiError>;
