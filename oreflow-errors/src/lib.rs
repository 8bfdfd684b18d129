//! Shared error types for the oreflow workspace.
//!
//! A single transport failure fans out to every action queued behind it, so
//! [`OreflowError`] is cheaply cloneable: variants carry rendered strings
//! rather than source errors.

use thiserror::Error;

/// An error occurring anywhere in the controller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OreflowError {
    /// An action was enqueued for a login with no connected client.
    #[error("{client} is not connected")]
    NotConnected {
        /// The login the action was addressed to
        client: String,
    },

    /// The peer connection closed while actions were queued or in flight.
    #[error("{peer} disconnected")]
    Disconnected {
        /// Remote address (and login, once known) of the dropped peer
        peer: String,
    },

    /// The peer was replaced by a newer connection using the same login.
    #[error("{peer} evicted by a new login")]
    Evicted {
        /// Remote address and login of the evicted peer
        peer: String,
    },

    /// The peer sent something the session layer could not accept: a
    /// malformed encoding, a non-string login, or a response with nothing
    /// awaiting one.
    #[error("protocol error from {peer}: {cause}")]
    Protocol {
        /// Remote address of the offending peer
        peer: String,
        /// Rendered description of what was wrong
        cause: String,
    },

    /// An action response decoded fine but did not have the shape its op
    /// requires.
    #[error("bad {op} response: {cause}")]
    BadResponse {
        /// The action op whose response was malformed
        op: &'static str,
        /// Rendered description of the shape mismatch
        cause: String,
    },

    /// An item-stack encoding was missing a required key or carried a value
    /// of the wrong type.
    #[error("malformed item stack: {0}")]
    BadItemStack(String),

    /// A bus allocation asked for more slots than the bus has; it can never
    /// be satisfied.
    #[error("requested {requested} bus slots but the bus only has {size}")]
    BusExhausted {
        /// Number of slots requested
        requested: usize,
        /// Total size of the bus
        size: usize,
    },

    /// A process-level failure, labeled with the process name.
    #[error("{name}: {cause}")]
    Process {
        /// Name of the failing process
        name: String,
        /// Rendered description of the failure
        cause: String,
    },

    /// The other end of a promise went away before completing it.
    #[error("dropped before completion")]
    Dropped,
}

impl OreflowError {
    /// Wrap an error with a process name, as process cycle failures are
    /// reported.
    pub fn process(name: impl Into<String>, cause: impl ToString) -> Self {
        Self::Process {
            name: name.into(),
            cause: cause.to_string(),
        }
    }
}

/// Result type alias used throughout the workspace.
pub type OreflowResult<T> = Result<T, OreflowError>;
