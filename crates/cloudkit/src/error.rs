//! Error types for provider API operations.
//!
//! Errors are categorized so the caller can decide between retrying
//! (throttling, rate limits, service hiccups) and aborting (bad
//! parameters, missing dependencies). Each variant carries the context a
//! user needs to understand which resource failed and why.

use std::path::PathBuf;
use thiserror::Error;

/// Categories of provider errors for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Request was throttled or rate limited (transient, retryable)
    Throttled,
    /// Provider endpoint temporarily unavailable (transient, retryable)
    Unavailable,
    /// A parameter was rejected by the provider
    InvalidParameter,
    /// The referenced remote object does not exist
    NotFound,
    /// The object is still in use by another object
    DependencyViolation,
    /// The object conflicts with an existing one
    Conflict,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Whether this error category is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Throttled | Self::Unavailable)
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Throttled => "Request throttled",
            Self::Unavailable => "Service unavailable",
            Self::InvalidParameter => "Invalid parameter",
            Self::NotFound => "Object not found",
            Self::DependencyViolation => "Object still in use",
            Self::Conflict => "Object conflict",
            Self::Other => "Unexpected error",
        }
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Throttled => "Lower --jobs or raise the retry budget and try again",
            Self::Unavailable => "Try again later",
            Self::InvalidParameter => "Fix the attribute value in the declaration",
            Self::NotFound => "Run again to refresh state, the object was removed remotely",
            Self::DependencyViolation => "Remove the objects that still reference it first",
            Self::Conflict => "Choose a unique value or import the existing object",
            Self::Other => "Check the error details for more information",
        }
    }
}

/// Errors returned by a [`crate::CloudApi`] backend.
#[derive(Debug, Error)]
pub enum Error {
    /// Request throttled or rate limited by the provider
    #[error("throttled: {message}")]
    Throttled {
        /// Provider message
        message: String,
    },

    /// Provider temporarily unavailable
    #[error("service unavailable: {message}")]
    Unavailable {
        /// Provider message
        message: String,
    },

    /// A request parameter was rejected
    #[error("invalid parameter {parameter}: {message}")]
    InvalidParameter {
        /// Name of the offending parameter
        parameter: String,
        /// Why it was rejected
        message: String,
    },

    /// Remote object does not exist
    #[error("{kind} {id} not found")]
    NotFound {
        /// Resource kind
        kind: String,
        /// Remote id
        id: String,
    },

    /// Object cannot be deleted while other objects reference it
    #[error("{id} is still referenced by {dependent}")]
    DependencyViolation {
        /// Remote id of the object being removed
        id: String,
        /// Remote id of the first object still referencing it
        dependent: String,
    },

    /// Object conflicts with an existing one
    #[error("conflict: {message}")]
    Conflict {
        /// Description of the conflict
        message: String,
    },

    /// Sandbox account file could not be read or written
    #[error("sandbox account {}: {source}", .path.display())]
    Account {
        /// Path of the account file
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Get the error category for retry logic.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Throttled { .. } => ErrorCategory::Throttled,
            Error::Unavailable { .. } => ErrorCategory::Unavailable,
            Error::InvalidParameter { .. } => ErrorCategory::InvalidParameter,
            Error::NotFound { .. } => ErrorCategory::NotFound,
            Error::DependencyViolation { .. } => ErrorCategory::DependencyViolation,
            Error::Conflict { .. } => ErrorCategory::Conflict,
            _ => ErrorCategory::Other,
        }
    }

    /// Whether this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Create an error from a provider error code and message.
    ///
    /// Provider APIs report failures as a short code plus free text; the
    /// code decides the category.
    pub fn from_code(code: &str, message: &str) -> Self {
        let message = message.trim().to_string();
        match code {
            "Throttling" | "ThrottlingException" | "RequestLimitExceeded" | "TooManyRequests"
            | "RateLimitExceeded" => Error::Throttled { message },
            "ServiceUnavailable" | "InternalError" | "RequestTimeout" => {
                Error::Unavailable { message }
            }
            "DependencyViolation" => Error::DependencyViolation {
                id: String::new(),
                dependent: message,
            },
            "Conflict" | "AlreadyExists" | "InvalidGroup.Duplicate" => Error::Conflict { message },
            c if c.ends_with(".NotFound") => Error::NotFound {
                kind: c.trim_end_matches(".NotFound").to_string(),
                id: message,
            },
            c if c.starts_with("InvalidParameter") || c.ends_with(".Malformed") => {
                Error::InvalidParameter {
                    parameter: c.to_string(),
                    message,
                }
            }
            _ => Error::Other(format!("{code}: {message}")),
        }
    }
}

/// Result type for provider operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category_retryable() {
        assert!(ErrorCategory::Throttled.is_retryable());
        assert!(ErrorCategory::Unavailable.is_retryable());
        assert!(!ErrorCategory::InvalidParameter.is_retryable());
        assert!(!ErrorCategory::DependencyViolation.is_retryable());
    }

    #[test]
    fn test_from_code_throttling() {
        let err = Error::from_code("RequestLimitExceeded", "Request limit exceeded.");
        assert_eq!(err.category(), ErrorCategory::Throttled);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_from_code_invalid_parameter() {
        let err = Error::from_code("InvalidParameterValue", "cidr_block is malformed");
        assert_eq!(err.category(), ErrorCategory::InvalidParameter);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_from_code_not_found() {
        let err = Error::from_code("InvalidSubnetID.NotFound", "subnet-123");
        assert_eq!(err.category(), ErrorCategory::NotFound);
    }

    #[test]
    fn test_from_code_unknown() {
        let err = Error::from_code("Weird", "something odd");
        assert_eq!(err.category(), ErrorCategory::Other);
        assert_eq!(err.to_string(), "Weird: something odd");
    }
}
