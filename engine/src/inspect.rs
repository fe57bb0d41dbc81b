//! The target engine's introspection surface, as consumed by the debug
//! engine. The embedding provides opaque handles for scripts, frames,
//! objects and values; all operations on them go through this trait, so the
//! debug engine itself stays independent of any particular embedding.
use std::hash::Hash;

/// A source position reported for a bytecode offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

/// Classification used when rendering values for transmission. Only
/// `Object` values are structured: they are the only ones that receive a
/// variables reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueKind {
    Undefined,
    Null,
    /// A binding that exists but has not been initialized yet.
    Uninitialized,
    Boolean,
    Number,
    BigInt,
    String,
    Symbol,
    Function,
    Object { class: String },
}

/// A property as reported by the engine: a plain value, or an accessor with
/// getter and/or setter.
#[derive(Debug, Clone)]
pub struct PropertyDescriptor<V> {
    pub value: Option<V>,
    pub get: Option<V>,
    pub set: Option<V>,
}

/// Outcome of evaluating an expression.
#[derive(Debug, Clone)]
pub enum Completion<V> {
    Return(V),
    Throw(V),
    /// Evaluation was cut short by the engine, e.g. because of an active
    /// debugger stop.
    Terminated,
}

pub trait Inspect {
    type Script: Clone + PartialEq;
    type Frame: Clone;
    type Object: Clone + Eq + Hash;
    type Value: Clone;

    // scripts

    /// All scripts currently known to the engine. Used to snapshot scripts
    /// that loaded before the debugger attached.
    fn find_scripts(&self) -> Vec<Self::Script>;
    fn script_url(&self, script: &Self::Script) -> String;
    fn script_start_line(&self, script: &Self::Script) -> u32;
    fn script_start_column(&self, script: &Self::Script) -> u32;
    fn script_line_count(&self, script: &Self::Script) -> u32;
    fn script_global(&self, script: &Self::Script) -> Self::Object;
    fn offset_position(&self, script: &Self::Script, offset: u32) -> Position;
    /// Offsets at which a breakpoint can be installed on `line` of this
    /// script, not including child scripts.
    fn possible_breakpoint_offsets(&self, script: &Self::Script, line: u32) -> Vec<u32>;
    /// Nested function/closure scripts.
    fn child_scripts(&self, script: &Self::Script) -> Vec<Self::Script>;
    fn set_breakpoint(&mut self, script: &Self::Script, offset: u32);
    /// Register the program chosen by the controller (first attach).
    fn load_program(&mut self, path: &str);

    // frames

    fn frame_script(&self, frame: &Self::Frame) -> Option<Self::Script>;
    fn frame_offset(&self, frame: &Self::Frame) -> u32;
    /// The frame's kind tag; stands in as a name when the callee is
    /// anonymous.
    fn frame_kind(&self, frame: &Self::Frame) -> String;
    fn frame_callee_name(&self, frame: &Self::Frame) -> Option<String>;
    fn frame_this(&self, frame: &Self::Frame) -> Option<Self::Value>;
    /// The classic call-chain link.
    fn frame_older(&self, frame: &Self::Frame) -> Option<Self::Frame>;
    /// The resumed/async continuation link.
    fn frame_older_saved(&self, frame: &Self::Frame) -> Option<Self::Frame>;

    // environments

    fn environment_names(&self, frame: &Self::Frame) -> Vec<String>;
    fn environment_get(&self, frame: &Self::Frame, name: &str) -> Option<Self::Value>;
    fn environment_set(&mut self, frame: &Self::Frame, name: &str, value: Self::Value);

    // objects and values

    fn object_property_names(&self, object: &Self::Object) -> Vec<String>;
    fn object_property(
        &self,
        object: &Self::Object,
        name: &str,
    ) -> Option<PropertyDescriptor<Self::Value>>;
    fn object_set_property(&mut self, object: &Self::Object, name: &str, value: Self::Value);
    fn value_kind(&self, value: &Self::Value) -> ValueKind;
    /// The engine's display string for a value (unquoted for strings).
    fn value_display(&self, value: &Self::Value) -> String;
    /// The object behind a structured value, if any.
    fn value_object(&self, value: &Self::Value) -> Option<Self::Object>;
    fn value_from_json(&mut self, json: &serde_json::Value) -> Self::Value;

    // execution hooks

    fn arm_step_hook(&mut self, frame: &Self::Frame, armed: bool);
    fn arm_pop_hook(&mut self, frame: &Self::Frame, armed: bool);
    /// Arm or disarm the engine-wide new-frame hook.
    fn arm_enter_frame_hook(&mut self, armed: bool);

    // evaluation

    /// Evaluate `expression` with the given names bound in the evaluation
    /// context rather than directly in the frame: directly-produced values
    /// would not be reachable through the normal object-reference table.
    fn evaluate(
        &mut self,
        frame: &Self::Frame,
        expression: &str,
        bindings: &[(String, Self::Value)],
    ) -> Completion<Self::Value>;
}
