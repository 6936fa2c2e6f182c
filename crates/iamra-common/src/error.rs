//! Error types for the credential operator
//!
//! Errors are structured with fields to aid debugging in production. The
//! variants follow how each failure is handled: missing objects are no-ops
//! for the controller and denials for admission, validation failures are
//! never retried, execution failures are reported per target and aggregated
//! per pass, and conflicts are left to the controller's requeue.

use thiserror::Error;

use crate::validation::FieldError;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for operator operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A definition or target disappeared
    #[error("{kind} {name} not found")]
    NotFound {
        /// Kind of the missing object (e.g. "RoleProfile", "Pod")
        kind: String,
        /// `namespace/name` of the missing object
        name: String,
    },

    /// Malformed identifier or inconsistent spec
    #[error("validation error for {resource}: {}", render_field_errors(.errors))]
    Validation {
        /// Resource that failed validation
        resource: String,
        /// Every field-level failure found
        errors: Vec<FieldError>,
    },

    /// Remote credential issuance failed for one or more targets
    #[error("execution error for {target}: {message}")]
    Execution {
        /// Target (or targets) the failure applies to
        target: String,
        /// Description of what failed
        message: String,
    },

    /// Concurrent status update detected by the API server
    #[error("conflict updating {resource}: {message}")]
    Conflict {
        /// Resource whose status update was rejected
        resource: String,
        /// Message returned by the API server
        message: String,
    },

    /// Required environment or annotation missing
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of what is missing
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "controller", "webhook")
        context: String,
    },
}

fn render_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Create a not-found error
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a validation error from collected field errors
    pub fn validation(resource: impl Into<String>, errors: Vec<FieldError>) -> Self {
        Self::Validation {
            resource: resource.into(),
            errors,
        }
    }

    /// Create an execution error for a target
    pub fn execution(target: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Execution {
            target: target.into(),
            message: msg.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Conflict {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Map a kube error, turning 404 into `NotFound` and 409 into `Conflict`
    pub fn from_kube(kind: &str, name: &str, source: kube::Error) -> Self {
        match &source {
            kube::Error::Api(ae) if ae.code == 404 => Self::not_found(kind, name),
            kube::Error::Api(ae) if ae.code == 409 => {
                Self::conflict(format!("{kind} {name}"), ae.message.clone())
            }
            _ => Self::Kube { source },
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation, configuration and serialization errors need a spec or
    /// deployment fix. Execution failures are transient by nature (the
    /// sidecar may still be starting). Kubernetes errors depend on the code.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => {
                !matches!(
                    source,
                    kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 409 && ae.code != 429
                )
            }
            Error::NotFound { .. } => false,
            Error::Validation { .. } => false,
            Error::Execution { .. } => true,
            Error::Conflict { .. } => true,
            Error::Configuration { .. } => false,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Whether this error is an optimistic-concurrency conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    /// Whether this error means the object no longer exists
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}
