//! Protocol module containing the wire message model and the frame codec.

pub mod codec;
pub mod messages;

pub use codec::{encode_frame, FrameBuffer, FrameError};
pub use messages::{Message, MessageKind};
