//! The session protocol as one tagged union per direction. Each side decodes
//! by tag; a payload that doesn't match any known tag fails deserialization
//! and is discarded by the codec rather than aborting the session.
use serde::{Deserialize, Serialize};

use crate::types::{
    Breakpoint, BreakpointLocation, EvaluateResult, FrameIndex, Scope, StackFrame, Variable,
    VariablesReference,
};

/// Window of stack frames to reify, counted from the newest frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackSelection {
    pub index: i64,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakpointQuery {
    pub path: String,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakpointRequest {
    pub path: String,
    pub line: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

/// `value` is an arbitrary JSON value, not a doubly-encoded string, so that
/// scalar assignments deserialize as their native type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableAssignment {
    pub variables_reference: VariablesReference,
    pub name: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluateRequest {
    pub expression: String,
}

/// Bridge → engine requests. `loadProgram` is only valid while the engine
/// waits for first attach; the resume commands and inspection requests are
/// serviced from the engine's pause loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum Command {
    LoadProgram(String),
    Continue,
    Next,
    StepIn,
    StepOut,
    GetStack(StackSelection),
    GetScopes(FrameIndex),
    GetBreakpointsForLine(BreakpointQuery),
    SetBreakpoint(BreakpointRequest),
    GetVariables(VariablesReference),
    SetVariable(VariableAssignment),
    Evaluate(EvaluateRequest),
    StartDebugLogging,
    StopDebugLogging,
}

/// Engine → bridge traffic: the unsolicited events (`connect`,
/// `programLoaded`, `breakpointHit`, `stopOnStep`) and the responses paired
/// with [`Command`] requests by type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum EngineMessage {
    Connect,
    ProgramLoaded(String),
    BreakpointHit(u32),
    StopOnStep,
    Stack(Vec<StackFrame>),
    Scopes(Vec<Scope>),
    BreakpointsForLine(Vec<BreakpointLocation>),
    BreakpointSet(Breakpoint),
    Variables(Vec<Variable>),
    VariableSet(Variable),
    Evaluate(EvaluateResult),
}
