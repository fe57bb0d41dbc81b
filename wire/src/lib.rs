//! The wire protocol spoken between the runtime bridge and the in-process
//! debug engine: length-prefixed JSON frames of the form
//! `<decimal-byte-length>\n<payload>` over a duplex byte stream.
//!
//! The async half ([`FrameCodec`]) plugs into `tokio_util`'s framed streams
//! on the bridge side; the blocking half ([`FrameReader`]/[`FrameWriter`])
//! runs inside the target process, where the debug engine deliberately blocks
//! the embedding while paused.
mod blocking;
mod codec;
pub mod messages;
pub mod types;

pub use blocking::{FrameReader, FrameWriter};
pub use codec::{encode_frame, CodecError, FrameCodec};

/// Fixed request the target runtime sends on the control channel to learn
/// whether a debug session is pending.
pub const SESSION_PORT_REQUEST: &str = "get-session-port";

/// Control channel reply when no session is pending; the runtime proceeds
/// unobstructed.
pub const NO_SESSION_REPLY: &str = "no-session";
