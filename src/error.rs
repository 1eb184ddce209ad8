//! Error types for conductor-proxy

use std::time::Duration;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ProxyError>;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Malformed cell locator: {0}")]
    MalformedLocator(String),

    #[error("No hApp with id \"{0}\" found")]
    UnknownApp(String),

    #[error("Role \"{role}\" not found in hApp \"{app}\"")]
    UnknownRole { app: String, role: String },

    #[error("Clone not found for locator \"{0}\"")]
    UnknownClone(String),

    #[error("No provisioned cell found for role \"{0}\"")]
    NoOriginalInstance(String),

    #[error("No cell proxy found for cell {0}")]
    ProxyNotFound(String),

    #[error("Blocking call admission timed out after {waited:?} for cell \"{cell}\"")]
    AdmissionTimeout { cell: String, waited: Duration },

    #[error("Role \"{0}\" is not clonable")]
    RoleNotClonable(String),

    #[error("No original instance created for role \"{0}\"")]
    NoOriginal(String),

    #[error("Original instance already exists for role \"{0}\"")]
    DuplicateOriginal(String),

    #[error("Locator \"{0}\" does not refer to a clone cell")]
    NotAClone(String),

    #[error("Introspection call failed on zome \"{0}\"")]
    IntrospectionFailed(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Wire protocol error: {0}")]
    Wire(String),
}
