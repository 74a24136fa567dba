/*!
Error taxonomy for signal handling, transports, sinks and world state
*/

use thiserror::Error;

use territory_database::WorldId;

/// Errors raised while governing territory state.
///
/// Only [`GovernorError::InvariantViolation`] is fatal, and only for the world it
/// names. Everything else is resolved where it happens and counted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GovernorError {
    /// Input that cannot be turned into a capture signal
    #[error("malformed signal: {0}")]
    MalformedSignal(String),

    /// An adapter or poll client could not reach its transport
    #[error("transport failure ({origin}): {reason}")]
    TransportFailure { origin: String, reason: String },

    /// A sink kept failing after every retry
    #[error("sink {sink} failed after {attempts} attempts: {reason}")]
    SinkDeliveryFailure {
        sink: &'static str,
        attempts: u32,
        reason: String,
    },

    /// The world's state no longer agrees with the reference data it was built from
    #[error("invariant violation on world {world_id}: {detail}")]
    InvariantViolation { world_id: WorldId, detail: String },

    /// The world's decision loop has stopped and no longer takes signals
    #[error("world {0} is not accepting signals")]
    WorldUnavailable(WorldId),
}

impl GovernorError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        GovernorError::MalformedSignal(reason.into())
    }

    pub fn invariant(world_id: WorldId, detail: impl Into<String>) -> Self {
        GovernorError::InvariantViolation {
            world_id,
            detail: detail.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, GovernorError::InvariantViolation { .. })
    }
}
