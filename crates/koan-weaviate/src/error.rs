//! Remote failures and their classification.
//!
//! Every decision the adapter takes on a failed remote call (treat a duplicate
//! create as success, fall back from create to update, wait for a class to
//! propagate, retry schema creation on the legacy route) goes through
//! [`ConflictKind::classify`].

use strum::{AsRefStr, IntoStaticStr};
use thiserror::Error;

/// Result type for raw transport calls.
pub type RemoteResult<T, E = RemoteError> = std::result::Result<T, E>;

/// Failure reported by the remote engine or the HTTP layer.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    /// Non-success HTTP status with the engine's error text.
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// The request never produced a response.
    #[error("transport error: {message}")]
    Transport { message: String, timeout: bool },

    /// A GraphQL response carried an `errors` array.
    #[error("GraphQL error: {0}")]
    GraphQl(String),

    /// The response body did not have the expected shape.
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Creates a status error.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            timeout: false,
        }
    }

    /// Creates a transport timeout.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            timeout: true,
        }
    }

    /// Creates a GraphQL error.
    pub fn graphql(message: impl Into<String>) -> Self {
        Self::GraphQl(message.into())
    }

    /// Creates a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// Returns the HTTP status, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns the error text used for classification.
    pub fn message(&self) -> &str {
        match self {
            Self::Status { message, .. } | Self::Transport { message, .. } => message,
            Self::GraphQl(message) | Self::Decode(message) => message,
        }
    }

    /// Classifies this failure.
    pub fn kind(&self) -> ConflictKind {
        match self {
            Self::Transport { .. } => ConflictKind::Transient,
            Self::Decode(_) => ConflictKind::Other,
            _ => ConflictKind::classify(self.status_code(), self.message()),
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::timeout(err.to_string())
        } else if err.is_decode() {
            Self::decode(err.to_string())
        } else if let Some(status) = err.status() {
            Self::status(status.as_u16(), err.to_string())
        } else {
            Self::transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(err: serde_json::Error) -> Self {
        Self::decode(err.to_string())
    }
}

/// What a remote failure means for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ConflictKind {
    /// The class or object already exists.
    AlreadyExists,
    /// The class has not propagated yet.
    SchemaNotReady,
    /// The route does not accept this method; try the alternate route.
    MethodNotAllowed,
    /// The addressed resource does not exist.
    NotFound,
    /// Credentials were missing or rejected.
    Unauthorized,
    /// Timeouts, throttling and gateway errors.
    Transient,
    /// Anything else.
    Other,
}

impl ConflictKind {
    /// Classifies a status code and engine error text.
    pub fn classify(status: Option<u16>, message: &str) -> Self {
        let message = message.to_ascii_lowercase();

        if status == Some(409) || message.contains("already exists") {
            return Self::AlreadyExists;
        }
        if Self::mentions_missing_class(&message) {
            return Self::SchemaNotReady;
        }

        match status {
            Some(405) => Self::MethodNotAllowed,
            Some(404) => Self::NotFound,
            Some(401 | 403) => Self::Unauthorized,
            Some(408 | 429 | 502 | 503 | 504) => Self::Transient,
            _ => Self::Other,
        }
    }

    fn mentions_missing_class(message: &str) -> bool {
        const SIGNALS: &[&str] = &[
            "no such class",
            "class not found",
            "not ready",
            "shard not found",
            "could not find class",
        ];
        SIGNALS.iter().any(|signal| message.contains(signal))
            || (message.contains("class")
                && (message.contains("does not exist") || message.contains("not found")))
    }

    /// Returns `true` if retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::SchemaNotReady | Self::Transient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_object_and_class_are_already_exists() {
        let object = RemoteError::status(
            422,
            "id '1b4e28ba-2fa1-5d37-8c6a-7d7a6f1a6c8e' already exists",
        );
        assert_eq!(object.kind(), ConflictKind::AlreadyExists);

        let class = RemoteError::status(422, "class name \"Koan_Doc_default\" already exists");
        assert_eq!(class.kind(), ConflictKind::AlreadyExists);

        assert_eq!(ConflictKind::classify(Some(409), ""), ConflictKind::AlreadyExists);
    }

    #[test]
    fn missing_class_is_schema_not_ready() {
        for message in [
            "class Koan_Doc_default does not exist",
            "no such class with name 'Koan_Doc_default' found in the schema",
            "index not ready",
            "Class Not Found",
        ] {
            assert_eq!(
                ConflictKind::classify(Some(422), message),
                ConflictKind::SchemaNotReady,
                "{message}"
            );
        }
    }

    #[test]
    fn status_codes_map_to_kinds() {
        assert_eq!(ConflictKind::classify(Some(405), ""), ConflictKind::MethodNotAllowed);
        assert_eq!(ConflictKind::classify(Some(404), "object"), ConflictKind::NotFound);
        assert_eq!(ConflictKind::classify(Some(401), ""), ConflictKind::Unauthorized);
        assert_eq!(ConflictKind::classify(Some(503), ""), ConflictKind::Transient);
        assert_eq!(ConflictKind::classify(Some(500), "boom"), ConflictKind::Other);
        assert_eq!(ConflictKind::classify(None, "boom"), ConflictKind::Other);
    }

    #[test]
    fn transport_failures_are_transient() {
        assert_eq!(RemoteError::timeout("slow").kind(), ConflictKind::Transient);
        assert_eq!(RemoteError::transport("refused").kind(), ConflictKind::Transient);
        assert!(ConflictKind::Transient.is_retryable());
        assert!(!ConflictKind::AlreadyExists.is_retryable());
    }
}
