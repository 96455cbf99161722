//! Error types for sparkle
//!
//! Errors are structured with fields to aid debugging in production. Each
//! variant maps onto one failure category of the scheduling layer: opaque
//! API failures, retryable write conflicts, malformed user input, and
//! missing cluster preconditions.

use thiserror::Error;

/// Main error type for sparkle operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error that is not a conflict
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Write lost a race: the object already exists or its resourceVersion moved
    #[error("conflict on {kind} {name}: {message}")]
    Conflict {
        /// Kind of the object being written (e.g. "PodGroup")
        kind: String,
        /// Name of the object being written
        name: String,
        /// Message returned by the API server
        message: String,
    },

    /// A quantity string could not be parsed where precision matters
    #[error("invalid quantity '{value}' for {field}: {message}")]
    Quantity {
        /// Field path the quantity came from (e.g. "spec.driver.coreLimit")
        field: String,
        /// The raw, unparseable value
        value: String,
        /// Description of what's wrong
        message: String,
    },

    /// A cluster-level precondition (such as an installed CRD) is absent
    #[error("precondition missing: {resource} is not installed in the cluster")]
    PreconditionMissing {
        /// The missing resource, e.g. a CRD name
        resource: String,
    },

    /// Validation error for job specs
    #[error("validation error for {job}: {message}")]
    Validation {
        /// Name of the job with invalid configuration
        job: String,
        /// Description of what's invalid
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
        /// Context where the error occurred (e.g. "coordinator", "webhook")
        context: String,
    },
}

impl Error {
    /// Create a conflict error for a named object
    pub fn conflict(
        kind: impl Into<String>,
        name: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Conflict {
            kind: kind.into(),
            name: name.into(),
            message: msg.into(),
        }
    }

    /// Create a malformed-quantity error
    pub fn quantity(
        field: impl Into<String>,
        value: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Quantity {
            field: field.into(),
            value: value.into(),
            message: msg.into(),
        }
    }

    /// Create a missing-precondition error
    pub fn precondition_missing(resource: impl Into<String>) -> Self {
        Self::PreconditionMissing {
            resource: resource.into(),
        }
    }

    /// Create a validation error with job context
    pub fn validation_for(job: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            job: job.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// True if this is a write conflict that should be retried as read-modify-write
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_is_flagged_and_names_object() {
        let err = Error::conflict("PodGroup", "spark-pi-pg", "already exists");
        assert!(err.is_conflict());
        assert!(err.to_string().contains("spark-pi-pg"));
    }

    #[test]
    fn malformed_quantity_names_field_and_value() {
        let err = Error::quantity("spec.driver.coreLimit", "two", "invalid number");
        assert!(!err.is_conflict());
        assert!(err.to_string().contains("spec.driver.coreLimit"));
        assert!(err.to_string().contains("'two'"));
    }

    #[test]
    fn missing_crd_names_the_resource() {
        let err = Error::precondition_missing("podgroups.scheduling.volcano.sh");
        assert!(!err.is_conflict());
        assert!(err
            .to_string()
            .contains("podgroups.scheduling.volcano.sh is not installed"));
    }

    #[test]
    fn validation_carries_job_context() {
        let err = Error::validation_for("spark-pi", "missing namespace");
        match &err {
            Error::Validation { job, message } => {
                assert_eq!(job, "spark-pi");
                assert_eq!(message, "missing namespace");
            }
            _ => panic!("Expected Validation variant"),
        }
    }

    #[test]
    fn serde_errors_convert_to_serialization() {
        let err: Error = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, Error::Serialization { .. }));
        assert!(err.to_string().starts_with("serialization error:"));
    }

    #[test]
    fn internal_error_has_context() {
        let err = Error::internal_with_context("coordinator", "retry budget exhausted");
        assert!(err.to_string().contains("[coordinator]"));
        assert!(!err.is_conflict());
    }
}
