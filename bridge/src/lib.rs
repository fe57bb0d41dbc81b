//! The process-side half of the debugger: owns one socket per debug session,
//! runs the protocol state machine, multiplexes unsolicited engine events
//! against outstanding requests, and exposes a narrow imperative API to the
//! editor-facing layer.
mod bridge;
mod handoff;
mod signal;
mod sourcemap;
pub(crate) mod state;

pub use bridge::RuntimeBridge;
pub use handoff::SessionHandoff;
pub use signal::{Signal, SignalError};
pub use sourcemap::{IdentityMapper, SourceMapper};
pub use state::{BridgeEvent, RuntimeState};
