//! Error types for the service broker operators

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using the operator's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Operator error types
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Resource store error that is not a Kubernetes transport error
    #[error("Resource store error: {0}")]
    Store(String),

    /// Resource not found in the store
    #[error("Resource not found: {kind}/{name}")]
    NotFound { kind: String, name: String },

    /// Optimistic update lost against a concurrent writer
    #[error("Conflict updating {kind}/{name}: resource version changed")]
    Conflict { kind: String, name: String },

    /// Internal error (bad input, missing task id, failed task)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Plan not present in the catalog
    #[error("Plan not found in catalog: {0}")]
    PlanNotFound(String),

    /// Failure reported by a service executor
    #[error("Service error: {0}")]
    Service(String),

    /// Director task lookup failed
    #[error("Director task error: {0}")]
    Task(String),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a service executor error
    pub fn service(msg: impl Into<String>) -> Self {
        Error::Service(msg.into())
    }

    /// Create a resource store error
    pub fn store(msg: impl Into<String>) -> Self {
        Error::Store(msg.into())
    }

    /// Create a director task error
    pub fn task(msg: impl Into<String>) -> Self {
        Error::Task(msg.into())
    }

    /// Error class name persisted in `status.error.code`
    pub fn code(&self) -> &'static str {
        match self {
            Error::Kube(_) | Error::Store(_) => "StoreError",
            Error::NotFound { .. } | Error::PlanNotFound(_) => "NotFound",
            Error::Conflict { .. } => "Conflict",
            Error::Internal(_) => "InternalServerError",
            Error::Validation(_) => "BadRequest",
            Error::Config(_) => "ConfigurationError",
            Error::Service(_) => "ServiceError",
            Error::Task(_) | Error::Http(_) => "ServiceUnavailable",
            Error::Serialization(_) | Error::Yaml(_) => "UnprocessableEntity",
            Error::Io(_) => "IoError",
        }
    }

    /// HTTP-style status persisted in `status.error.status`
    pub fn status_code(&self) -> u16 {
        match self {
            Error::NotFound { .. } | Error::PlanNotFound(_) => 404,
            Error::Conflict { .. } => 409,
            Error::Validation(_) => 400,
            Error::Serialization(_) | Error::Yaml(_) => 422,
            Error::Task(_) | Error::Http(_) => 503,
            _ => 500,
        }
    }

    /// Whether the error comes from the resource store layer itself
    pub fn is_store_error(&self) -> bool {
        matches!(
            self,
            Error::Kube(_) | Error::Store(_) | Error::NotFound { .. } | Error::Conflict { .. }
        )
    }

    /// Message without the variant prefix, as handed to the user
    pub fn description(&self) -> String {
        match self {
            Error::Internal(m)
            | Error::Validation(m)
            | Error::Config(m)
            | Error::Service(m)
            | Error::Store(m)
            | Error::Task(m) => m.clone(),
            other => other.to_string(),
        }
    }
}

/// Structured error persisted in a resource's `status.error`
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub struct ErrorJson {
    /// Error class
    pub code: String,

    /// HTTP-style status
    pub status: u16,

    /// Full error message
    pub message: String,

    /// Message meant for the end user
    pub description: String,
}

impl From<&Error> for ErrorJson {
    fn from(err: &Error) -> Self {
        ErrorJson {
            code: err.code().to_string(),
            status: err.status_code(),
            message: err.to_string(),
            description: err.description(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_json_carries_class_and_description() {
        let err = Error::service("disk full");
        let json = ErrorJson::from(&err);

        assert_eq!(json.code, "ServiceError");
        assert_eq!(json.status, 500);
        assert_eq!(json.description, "disk full");
        assert!(json.message.contains("disk full"));
    }

    #[test]
    fn test_store_errors_are_classified() {
        assert!(Error::store("boom").is_store_error());
        assert!(Error::Conflict {
            kind: "DefaultBackup".into(),
            name: "b1".into()
        }
        .is_store_error());
        assert!(!Error::internal("boom").is_store_error());
    }
}
