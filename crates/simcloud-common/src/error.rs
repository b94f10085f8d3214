//! Error types for the simulated provider
//!
//! Every error carries an [`ErrorCode`] so callers can tell a quota rejection
//! from a store failure without matching on message text. The codes mirror the
//! status codes a machine-controller-manager driver is expected to return.

use std::fmt;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Kind of failure, independent of the variant that produced it
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The request itself is malformed or targets an unsupported provider
    InvalidArgument,
    /// Admission rejected the request because a quota is used up
    ResourceExhausted,
    /// The machine is not known to the driver
    NotFound,
    /// Store failure or a synthetic node that could not be built
    Internal,
    /// The operation is not supported by the simulator
    Unimplemented,
}

impl ErrorCode {
    /// Stable name used in logs and HTTP status bodies
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidArgument => "InvalidArgument",
            ErrorCode::ResourceExhausted => "ResourceExhausted",
            ErrorCode::NotFound => "NotFound",
            ErrorCode::Internal => "Internal",
            ErrorCode::Unimplemented => "Unimplemented",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for simcloud operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error talking to the cluster state store
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Request rejected before any work was done
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of what's invalid
        message: String,
    },

    /// Quota for the requested (region, machine type) is used up
    #[error("quota (region: {region}, machine type: {machine_type}, amount: {amount}) exhausted")]
    ResourceExhausted {
        /// Region of the exhausted quota
        region: String,
        /// Machine type of the exhausted quota
        machine_type: String,
        /// Maximum number of nodes the quota allows
        amount: i64,
    },

    /// Machine not present in the node inventory
    #[error("instance {machine:?} not found")]
    NotFound {
        /// Name of the machine that was looked up
        machine: String,
    },

    /// Policy file could not be read, parsed or written
    #[error("policy error for {path}: {message}")]
    Policy {
        /// Path of the policy file
        path: String,
        /// Description of what failed
        message: String,
    },

    /// Operation the simulator does not provide
    #[error("unimplemented: {operation}")]
    Unimplemented {
        /// Name of the unsupported operation
        operation: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "create_machine", "build_node")
        context: String,
    },
}

impl Error {
    /// Create an invalid-argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: msg.into(),
        }
    }

    /// Create a quota-exhausted error for the given quota
    pub fn resource_exhausted(
        region: impl Into<String>,
        machine_type: impl Into<String>,
        amount: i64,
    ) -> Self {
        Self::ResourceExhausted {
            region: region.into(),
            machine_type: machine_type.into(),
            amount,
        }
    }

    /// Create a not-found error for a machine
    pub fn not_found(machine: impl Into<String>) -> Self {
        Self::NotFound {
            machine: machine.into(),
        }
    }

    /// Create a policy error for a file path
    pub fn policy(path: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Policy {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create an unimplemented error for an operation
    pub fn unimplemented(operation: impl Into<String>) -> Self {
        Self::Unimplemented {
            operation: operation.into(),
        }
    }

    /// Create an internal error with the given message
    ///
    /// For simple internal errors without specific context.
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

    /// Kind of this error
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Kube { .. } => ErrorCode::Internal,
            Error::InvalidArgument { .. } => ErrorCode::InvalidArgument,
            Error::ResourceExhausted { .. } => ErrorCode::ResourceExhausted,
            Error::NotFound { .. } => ErrorCode::NotFound,
            Error::Policy { .. } => ErrorCode::Internal,
            Error::Unimplemented { .. } => ErrorCode::Unimplemented,
            Error::Internal { .. } => ErrorCode::Internal,
        }
    }

    /// Whether the error is a Kubernetes 404
    ///
    /// Used where a missing object in the store is not a failure.
    pub fn is_kube_not_found(&self) -> bool {
        matches!(
            self,
            Error::Kube {
                source: kube::Error::Api(ae)
            } if ae.code == 404
        )
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Internal { context, .. } => Some(context),
            _ => None,
        }
    }
}
