// File: testing-framework/src/error.rs
//
// Framework Error Types
//
// Typed errors raised by the registry, the topology resolver, the compiler
// and the in-process runner. Hook and case bodies themselves return
// `anyhow::Result<()>`; their failures are wrapped into these variants when
// they cross back into the framework.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::topology::TopoTypeId;

/// Result alias used across the framework
pub type Result<T> = std::result::Result<T, FrameworkError>;

/// Errors produced by the suite framework
#[derive(Debug, Clone, Error)]
pub enum FrameworkError {
    /// Members were registered for a suite type that was never generated
    #[error("suite '{suite}' has registered members but was never generated")]
    Registration {
        /// Type name of the orphaned suite
        suite: String,
    },

    /// A suite type was generated (or extended) after it had already been generated
    #[error("suite '{0}' has already been generated")]
    DuplicateSuite(String),

    /// The topology store has no factory for this id
    #[error("topology '{0}' is not registered")]
    UnknownTopology(TopoTypeId),

    /// `activate()` rejected
    #[error("topology '{id}' failed to activate: {cause:#}")]
    Activation {
        /// Topology that failed
        id: TopoTypeId,
        /// Underlying failure, shared between every caller awaiting the activation
        cause: Arc<anyhow::Error>,
    },

    /// The suite was released while its topologies were still activating
    #[error("suite '{0}' was released before its topologies finished activating")]
    ActivationAbandoned(String),

    /// A case exceeded its timeout and was abandoned
    #[error("case '{case}' timed out after {}ms", timeout.as_millis())]
    Timeout {
        /// Case description
        case: String,
        /// Timeout that elapsed
        timeout: Duration,
    },

    /// A case body failed or panicked
    #[error("assertion failed: {0}")]
    Assertion(String),

    /// A lifecycle hook failed
    #[error("{phase} hook '{hook}' failed: {message}")]
    Hook {
        /// Phase name (beforeAll, afterEach, ...)
        phase: String,
        /// Hook name
        hook: String,
        /// Failure message
        message: String,
    },

    /// The requested field has no topology binding in this suite
    #[error("no topology is bound to field '{0}'")]
    UnboundTopology(String),

    /// The bound topology is not of the requested concrete type
    #[error("topology bound to field '{field}' is not a {expected}")]
    TopologyTypeMismatch {
        /// Field name
        field: String,
        /// Requested type name
        expected: &'static str,
    },

    /// A hook or case ran while the suite had no live context
    #[error("suite '{0}' has no live context (topology activation did not complete)")]
    ContextUnavailable(String),

    /// Invalid runner configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Writing a report failed
    #[error("failed to write report: {0}")]
    Report(String),
}

impl FrameworkError {
    /// Whether this error came from a topology activation
    pub fn is_activation(&self) -> bool {
        matches!(self, FrameworkError::Activation { .. })
    }
}
