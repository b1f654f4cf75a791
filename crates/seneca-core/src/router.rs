//! Dispatch contract between the transport and the surrounding runtime.
//!
//! The transport moves [`Message`](crate::Message)s; deciding what a call
//! *means* belongs to the [`Router`] collaborator supplied by the caller. The
//! transport invokes `dispatch` for every inbound call and turns the outcome
//! into the reply frame: a result on success, or a standardized error
//! envelope on failure. Dispatch failures never close a connection.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde_json::Value;
use thiserror::Error;

/// Namespace prefix carried by every wrapped action error.
pub const ERROR_NAMESPACE: &str = "seneca";

/// Failure reported by a router for one specific call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct DispatchError {
    pub message: String,
}

impl DispatchError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// What a waiting caller observes when the remote action failed.
///
/// The `Display` form is exactly the wire envelope, e.g.
/// `seneca: Action a:1 failed: bad-wire.`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ActionError {
    pub message: String,
}

impl ActionError {
    /// Wraps an envelope received off the wire.
    pub fn from_wire(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Builds the standardized envelope for a failed dispatch of `pattern`.
pub fn error_envelope(pattern: &str, err: &DispatchError) -> String {
    format!(
        "{ERROR_NAMESPACE}: Action {pattern} failed: {}.",
        err.message
    )
}

/// External collaborator that executes a call and produces its reply.
///
/// Implementations must tolerate concurrent invocation: a listener dispatches
/// from every accepted connection, so `dispatch` may run for several peers at
/// once.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Router: Send + Sync {
    /// Executes the action selected by `pattern` against `body`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] when the action itself fails; the transport
    /// wraps it with [`error_envelope`] and delivers it to the caller.
    async fn dispatch(&self, pattern: &str, body: Value) -> Result<Value, DispatchError>;
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_envelope_exact_text() {
        let envelope = error_envelope("a:1", &DispatchError::new("bad-wire"));
        assert_eq!(envelope, "seneca: Action a:1 failed: bad-wire.");
    }

    #[test]
    fn test_action_error_displays_the_envelope_verbatim() {
        let err = ActionError::from_wire("seneca: Action a:1 failed: bad-wire.");
        assert_eq!(err.to_string(), "seneca: Action a:1 failed: bad-wire.");
    }

    #[tokio::test]
    async fn test_mock_router_dispatches_success() {
        let mut router = MockRouter::new();
        router
            .expect_dispatch()
            .withf(|pattern, _| pattern == "c:1")
            .returning(|_, body| Ok(json!({ "echo": body })));

        let reply = router.dispatch("c:1", json!({ "d": 1 })).await.unwrap();
        assert_eq!(reply, json!({ "echo": { "d": 1 } }));
    }

    #[tokio::test]
    async fn test_mock_router_failure_wraps_into_envelope() {
        let mut router = MockRouter::new();
        router
            .expect_dispatch()
            .returning(|_, _| Err(DispatchError::new("bad-wire")));

        let err = router.dispatch("a:1", json!({})).await.unwrap_err();
        assert_eq!(
            error_envelope("a:1", &err),
            "seneca: Action a:1 failed: bad-wire."
        );
    }
}
