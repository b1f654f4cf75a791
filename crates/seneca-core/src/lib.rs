//! # seneca-core
//!
//! Shared library for the Seneca TCP transport containing the wire message
//! model, the frame codec, transport settings, and the router contract.
//!
//! This crate is used by both the listening and the calling side of the
//! transport. It has zero dependencies on sockets or timers: everything here
//! is pure data transformation, so it can be tested without any I/O.
//!
//! - **`protocol`** – How messages travel over the wire. Each message is a
//!   closed tagged variant ([`Message`]) serialized as one newline-delimited
//!   JSON frame; [`FrameBuffer`] turns an arbitrary byte stream back into
//!   complete messages.
//!
//! - **`settings`** – The transport settings block (host/port or filesystem
//!   path, bind retry knobs) with serde defaults and validation.
//!
//! - **`router`** – The dispatch contract the transport depends on but never
//!   implements, plus the standardized action-error envelope.

pub mod protocol;
pub mod router;
pub mod settings;

// Re-export the most-used types at the crate root so callers can write
// `seneca_core::Message` instead of `seneca_core::protocol::messages::Message`.
pub use protocol::codec::{encode_frame, FrameBuffer, FrameError, FRAME_DELIMITER};
pub use protocol::messages::{Message, MessageKind};
pub use router::{error_envelope, ActionError, DispatchError, Router, ERROR_NAMESPACE};
pub use settings::{Address, SettingsError, Target, TransportSettings};
