//! Vector repository error types.

use thiserror::Error;

/// Type alias for boxed dynamic errors that can be sent across threads.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for vector repository operations.
pub type VectorResult<T> = Result<T, VectorError>;

/// Errors surfaced by vector repository adapters.
///
/// Local validation failures ([`DimensionMismatch`], [`UnsupportedFilter`],
/// [`InvalidInput`], [`ConfirmationRequired`]) are always raised before any
/// network call is made.
///
/// [`DimensionMismatch`]: VectorError::DimensionMismatch
/// [`UnsupportedFilter`]: VectorError::UnsupportedFilter
/// [`InvalidInput`]: VectorError::InvalidInput
/// [`ConfirmationRequired`]: VectorError::ConfirmationRequired
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum VectorError {
    /// The remote engine rejected the collection schema or it never became ready.
    #[error("schema creation failed for '{collection}': {reason}")]
    SchemaCreationFailed { collection: String, reason: String },

    /// Embedding length disagrees with the known collection dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A filter node has no native translation.
    #[error("unsupported filter: {0}")]
    UnsupportedFilter(String),

    /// Both the create and the update path failed for a record.
    #[error(
        "upsert of '{key}' into '{collection}' failed: create: {create}; update: {update}"
    )]
    UpsertFailed {
        collection: String,
        key: String,
        create: BoxedError,
        update: BoxedError,
    },

    /// Query construction or the remote query call failed.
    #[error("search in '{collection}' failed: {reason}")]
    SearchFailed { collection: String, reason: String },

    /// The requested record does not exist.
    #[error("record '{key}' not found in '{collection}'")]
    NotFound { collection: String, key: String },

    /// A remote call failed.
    #[error("{operation} on '{collection}' failed: {source}")]
    Remote {
        collection: String,
        operation: &'static str,
        #[source]
        source: BoxedError,
    },

    /// The caller cancelled the operation.
    #[error("{operation} cancelled")]
    Cancelled { operation: &'static str },

    /// A destructive operation was invoked without explicit confirmation.
    #[error("{operation} is destructive and requires explicit confirmation")]
    ConfirmationRequired { operation: &'static str },

    /// Offset-based export reached the engine's result window.
    #[error("export of '{collection}' stopped at the offset ceiling of {ceiling} records")]
    ExportLimitReached { collection: String, ceiling: usize },

    /// Caller supplied an invalid argument.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Adapter configuration is invalid.
    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl VectorError {
    /// Creates a schema creation error.
    pub fn schema_creation_failed(collection: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SchemaCreationFailed {
            collection: collection.into(),
            reason: reason.into(),
        }
    }

    /// Creates a dimension mismatch error.
    pub fn dimension_mismatch(expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch { expected, actual }
    }

    /// Creates an unsupported filter error.
    pub fn unsupported_filter(msg: impl Into<String>) -> Self {
        Self::UnsupportedFilter(msg.into())
    }

    /// Creates an aggregated upsert failure carrying both causes.
    pub fn upsert_failed(
        collection: impl Into<String>,
        key: impl Into<String>,
        create: impl Into<BoxedError>,
        update: impl Into<BoxedError>,
    ) -> Self {
        Self::UpsertFailed {
            collection: collection.into(),
            key: key.into(),
            create: create.into(),
            update: update.into(),
        }
    }

    /// Creates a search failure.
    pub fn search_failed(collection: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SearchFailed {
            collection: collection.into(),
            reason: reason.into(),
        }
    }

    /// Creates a not found error.
    pub fn not_found(collection: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            collection: collection.into(),
            key: key.into(),
        }
    }

    /// Wraps a remote failure with the collection and operation it belongs to.
    pub fn remote(
        collection: impl Into<String>,
        operation: &'static str,
        source: impl Into<BoxedError>,
    ) -> Self {
        Self::Remote {
            collection: collection.into(),
            operation,
            source: source.into(),
        }
    }

    /// Creates a cancellation error.
    pub fn cancelled(operation: &'static str) -> Self {
        Self::Cancelled { operation }
    }

    /// Creates a missing-confirmation error.
    pub fn confirmation_required(operation: &'static str) -> Self {
        Self::ConfirmationRequired { operation }
    }

    /// Creates an invalid input error.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Creates an invalid configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Returns `true` for [`VectorError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` for [`VectorError::Cancelled`].
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

impl From<serde_json::Error> for VectorError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidInput(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_failed_reports_both_causes() {
        let err = VectorError::upsert_failed("Koan_Doc_default", "doc-1", "conflict", "timeout");
        let text = err.to_string();
        assert!(text.contains("create: conflict"));
        assert!(text.contains("update: timeout"));
    }

    #[test]
    fn classification_helpers() {
        assert!(VectorError::not_found("c", "k").is_not_found());
        assert!(VectorError::cancelled("upsert").is_cancelled());
        assert!(!VectorError::invalid_input("x").is_not_found());
    }
}
