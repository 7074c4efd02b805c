//! Error types for the provisioning engine

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading, planning or applying a resource graph
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed declaration file
    #[error("{}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },

    /// Resource block that does not fit its kind's schema
    #[error("{address}: {message}")]
    InvalidResource { address: String, message: String },

    /// Same `kind.name`, variable or output declared twice
    #[error("{what} is declared in both {} and {}", .first.display(), .second.display())]
    DuplicateDeclaration {
        what: String,
        first: PathBuf,
        second: PathBuf,
    },

    /// Variable without a value, or with a value of the wrong type
    #[error("variable '{name}': {message}")]
    InvalidVariable { name: String, message: String },

    /// Reference cycle between resources
    #[error("dependency cycle: {}", .cycle.join(" -> "))]
    Cycle { cycle: Vec<String> },

    /// Reference to a resource, attribute or variable that does not exist
    #[error("{from} references {reference}, which does not exist")]
    UnresolvedReference { from: String, reference: String },

    /// Two resources declare the same remote-unique attribute values
    #[error("{first} and {second} both declare {attributes} = {value}")]
    AttributeConflict {
        first: String,
        second: String,
        attributes: String,
        value: String,
    },

    /// Plan would destroy a resource marked `prevent_destroy`
    #[error("{address} has prevent_destroy set, but the plan would {action} it")]
    PreventDestroy { address: String, action: String },

    /// `--target` naming nothing declared or stored
    #[error("target '{0}' matches no declared or stored resource")]
    UnknownTarget(String),

    /// Provider API call failed
    #[error("{address}: {source}")]
    Provider {
        address: String,
        #[source]
        source: cloudkit::Error,
    },

    /// State file exists but cannot be trusted
    #[error("state file {} is corrupt: {message}", .path.display())]
    StateCorruption { path: PathBuf, message: String },

    /// Another run holds the state lock
    #[error("state file {} is locked by another run (remove {} if that run is gone)", .path.display(), .lock.display())]
    StateLocked { path: PathBuf, lock: PathBuf },

    /// Plan would create resources whose earlier create may have reached the provider
    #[error("interrupted creates for {} are unresolved; refresh to reconcile them before planning", .addresses.join(", "))]
    PendingCreate { addresses: Vec<String> },

    /// Output name not present in state
    #[error("no output named '{0}'")]
    UnknownOutput(String),

    /// Worker pool could not be created
    #[error("failed to start worker pool: {0}")]
    WorkerPool(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Short machine-readable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Parse { .. }
            | Error::InvalidResource { .. }
            | Error::DuplicateDeclaration { .. }
            | Error::InvalidVariable { .. } => "parse",
            Error::Cycle { .. } => "cycle",
            Error::UnresolvedReference { .. } => "unresolved_reference",
            Error::AttributeConflict { .. } => "attribute_conflict",
            Error::PreventDestroy { .. } => "prevent_destroy",
            Error::UnknownTarget(_) => "unknown_target",
            Error::Provider { source, .. } if source.is_retryable() => "provider_transient",
            Error::Provider { .. } => "provider_terminal",
            Error::StateCorruption { .. } => "state_corruption",
            Error::StateLocked { .. } => "state_locked",
            Error::PendingCreate { .. } => "pending_create",
            Error::UnknownOutput(_) => "unknown_output",
            Error::WorkerPool(_) | Error::Io(_) | Error::Json(_) => "internal",
        }
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;
