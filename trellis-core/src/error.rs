//! Error types for tracked storage and derived values.

use thiserror::Error;

use crate::reactive::NodeId;

/// Boxed error raised by a derivation function.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by cells, computations, and the tracking runtime.
#[derive(Debug, Error)]
pub enum Error {
    /// A cell was read before it ever held a value.
    #[error("cell {cell} was read before any value was set")]
    UninitializedAccess {
        /// The cell that was read.
        cell: NodeId,
    },

    /// A derivation function reported a failure.
    ///
    /// The computation keeps its previous value and retries on the next read.
    #[error("computation failed: {0}")]
    ComputationFailure(#[source] BoxError),

    /// A computation read itself, directly or through other computations,
    /// while it was being evaluated.
    #[error("computation {node} depends on itself")]
    Cycle {
        /// The computation that was re-entered.
        node: NodeId,
    },

    /// Evaluation nested deeper than the configured limit, either in tracking
    /// frames or in computations bringing their dependencies up to date.
    #[error("nesting depth limit of {limit} exceeded")]
    DepthExceeded {
        /// The configured maximum depth.
        limit: usize,
    },
}

impl Error {
    /// Wrap an arbitrary error as a computation failure.
    pub fn failed<E>(error: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::ComputationFailure(error.into())
    }

    /// Whether this error came from a derivation function rather than from
    /// the tracking machinery.
    pub fn is_computation_failure(&self) -> bool {
        matches!(self, Self::ComputationFailure(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_wraps_messages() {
        let err = Error::failed("disk on fire");
        assert!(err.is_computation_failure());
        assert_eq!(err.to_string(), "computation failed: disk on fire");
    }

    #[test]
    fn failed_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err = Error::failed(io);
        let source = std::error::Error::source(&err).expect("source should be kept");
        assert_eq!(source.to_string(), "boom");
    }
}
