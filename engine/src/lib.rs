//! The in-process debug engine: runs inside the target process, uses the
//! embedding engine's introspection API to track scripts, install
//! breakpoints, single-step and reify live values, and speaks the session
//! wire protocol back to the runtime bridge.
//!
//! The embedding owns a [`DebugEngine`] and drives it at well-defined
//! points:
//!
//! - [`poll_session_port`] at a natural yield point, to learn whether a
//!   debug session is pending;
//! - [`DebugEngine::connect`] once the session socket is dialled;
//! - [`DebugEngine::on_new_script`] for every newly loaded script;
//! - [`DebugEngine::on_enter_frame`], [`DebugEngine::on_step`],
//!   [`DebugEngine::on_pop`] and [`DebugEngine::on_breakpoint_hit`] when the
//!   hooks armed through [`Inspect`] fire.
//!
//! While paused the engine blocks the embedding entirely, servicing
//! inspection requests inline; that is intentional — inspection happens
//! while nothing else in the target runs.
mod control;
mod engine;
mod inspect;
mod refs;

pub use control::poll_session_port;
pub use engine::DebugEngine;
pub use inspect::{Completion, Inspect, Position, PropertyDescriptor, ValueKind};
pub use refs::{GLOBAL_OBJECT_REF, MAX_FRAME_REFS, OBJECT_REFS_START};
