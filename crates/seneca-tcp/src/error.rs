//! Error type for transport operations.

use seneca_core::{ActionError, SettingsError};
use thiserror::Error;

/// Errors surfaced by the listener and client managers.
///
/// Every dispatched call resolves with either a reply or one of these; the
/// transport never terminates the hosting process and never leaves a caller
/// hanging.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The listen address or path stayed unavailable through every allowed
    /// attempt, or failed for a reason that is never retried.
    #[error("bind failed on {target} after {attempts} attempt(s): {source}")]
    Bind {
        target: String,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    /// The initial outbound connection was refused or unreachable. Reported
    /// once; the caller decides whether to retry.
    #[error("connect failed to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: std::io::Error,
    },

    /// The connection dropped mid-session before a reply arrived.
    #[error("connection lost before a reply arrived")]
    ConnectionLost,

    /// The listener or client was explicitly closed.
    #[error("transport closed")]
    Closed,

    /// The remote action failed; the payload is the standardized envelope.
    #[error(transparent)]
    Action(#[from] ActionError),

    /// The settings block is contradictory or selects a foreign transport.
    #[error(transparent)]
    Settings(#[from] SettingsError),
}
