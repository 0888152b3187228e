//! # clipsync-shared
//!
//! Wire types shared by the clipsync relay and its device clients: the JSON
//! envelope exchanged over the WebSocket, user/device identifiers, protocol
//! constants and the protocol error type.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::ProtocolError;
pub use protocol::{Clip, Envelope, Hello, Message};
pub use types::{DeviceId, UserId};
