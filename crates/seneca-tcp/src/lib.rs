//! # seneca-tcp
//!
//! TCP transport for the Seneca messaging runtime: moves encoded
//! call/result messages between a process that issues calls and a process
//! that executes them, over a raw byte-stream socket (TCP host:port or a
//! filesystem socket path).
//!
//! The work here is connection lifecycle, not message semantics:
//!
//! - [`Listener`] binds with bounded retry, accepts peers, and runs one
//!   handler per connection against the supplied [`Router`].
//! - [`Client`] performs a single-shot initial connect, correlates calls
//!   with replies, and silently re-establishes the connection across peer
//!   restarts without losing queued calls.
//!
//! What a message *means* belongs to the [`Router`] collaborator from
//! `seneca-core`; this crate only frames, moves, and correlates them.
//!
//! ```no_run
//! use std::sync::Arc;
//! use seneca_core::TransportSettings;
//! use seneca_tcp::{client, listen};
//! # use async_trait::async_trait;
//! # use seneca_core::{DispatchError, Router};
//! # use serde_json::{json, Value};
//! # struct EchoRouter;
//! # #[async_trait]
//! # impl Router for EchoRouter {
//! #     async fn dispatch(&self, _: &str, body: Value) -> Result<Value, DispatchError> {
//! #         Ok(body)
//! #     }
//! # }
//!
//! # async fn example() -> Result<(), seneca_tcp::TransportError> {
//! let router: Arc<dyn Router> = Arc::new(EchoRouter);
//!
//! let settings = TransportSettings { port: Some(0), ..Default::default() };
//! let listener = listen(settings, Arc::clone(&router)).await?;
//!
//! let back = TransportSettings {
//!     port: listener.address().port(),
//!     ..Default::default()
//! };
//! let client = client(back, router).await?;
//! let _reply = client.call("c:1", json!({ "d": 0 })).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod connection;
pub mod error;
pub mod listener;

pub use client::{Client, ClientState};
pub use connection::ConnectionState;
pub use error::TransportError;
pub use listener::Listener;

use std::sync::Arc;

use seneca_core::{Router, TransportSettings};

/// Binds a listening endpoint. Resolves exactly once with the listener
/// (carrying its resolved address) or the terminal bind error.
///
/// # Errors
///
/// See [`Listener::bind`].
pub async fn listen(
    settings: TransportSettings,
    router: Arc<dyn Router>,
) -> Result<Listener, TransportError> {
    Listener::bind(settings, router).await
}

/// Connects to a listening endpoint. Resolves exactly once with the client
/// or the error of the first attempt; later drops are handled by the
/// client's reconnect machinery, not by this call.
///
/// # Errors
///
/// See [`Client::connect`].
pub async fn client(
    settings: TransportSettings,
    router: Arc<dyn Router>,
) -> Result<Client, TransportError> {
    Client::connect(settings, router).await
}
