//! A small scripted VM implementing the introspection surface, enough to
//! drive the debug engine through attach, pauses, stepping and inspection.
use std::collections::HashMap;

use engine::{Completion, Inspect, Position, PropertyDescriptor, ValueKind};

pub type ScriptId = usize;
pub type FrameId = usize;
pub type ObjectId = usize;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Undefined,
    Uninitialized,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Function(String),
    Object(ObjectId),
}

#[derive(Debug, Clone)]
pub enum Property {
    Value(Value),
    Accessor {
        get: Option<Value>,
        set: Option<Value>,
    },
}

#[derive(Debug, Default)]
pub struct ScriptData {
    pub url: String,
    pub start_line: u32,
    pub start_column: u32,
    pub line_count: u32,
    pub global: ObjectId,
    pub children: Vec<ScriptId>,
    /// offset → source position
    pub positions: HashMap<u32, Position>,
    /// line → breakpoint-able offsets
    pub line_offsets: HashMap<u32, Vec<u32>>,
}

#[derive(Debug, Default)]
pub struct FrameData {
    pub script: Option<ScriptId>,
    pub offset: u32,
    pub kind: String,
    pub callee: Option<String>,
    pub this: Option<Value>,
    pub older: Option<FrameId>,
    pub older_saved: Option<FrameId>,
    pub environment: Vec<(String, Value)>,
}

#[derive(Debug, Default)]
pub struct ObjectData {
    pub class: String,
    pub properties: Vec<(String, Property)>,
}

#[derive(Debug, Clone)]
pub enum EvalOutcome {
    Return(Value),
    Throw(Value),
    Terminated,
}

#[derive(Default)]
pub struct FakeVm {
    pub scripts: Vec<ScriptData>,
    pub roots: Vec<ScriptId>,
    pub frames: Vec<FrameData>,
    pub objects: Vec<ObjectData>,
    pub installed_breakpoints: Vec<(ScriptId, u32)>,
    pub step_hooks: Vec<FrameId>,
    pub pop_hooks: Vec<FrameId>,
    pub enter_frame_armed: bool,
    pub loaded_program: Option<String>,
    pub eval_outcomes: HashMap<String, EvalOutcome>,
    pub last_eval_bindings: Vec<(String, Value)>,
}

impl FakeVm {
    pub fn add_object(&mut self, class: &str, properties: Vec<(String, Property)>) -> ObjectId {
        self.objects.push(ObjectData {
            class: class.to_string(),
            properties,
        });
        self.objects.len() - 1
    }

    pub fn add_script(&mut self, data: ScriptData) -> ScriptId {
        self.scripts.push(data);
        self.scripts.len() - 1
    }

    pub fn add_frame(&mut self, data: FrameData) -> FrameId {
        self.frames.push(data);
        self.frames.len() - 1
    }
}

fn arm(hooks: &mut Vec<FrameId>, frame: FrameId, armed: bool) {
    if armed {
        if !hooks.contains(&frame) {
            hooks.push(frame);
        }
    } else {
        hooks.retain(|&hooked| hooked != frame);
    }
}

impl Inspect for FakeVm {
    type Script = ScriptId;
    type Frame = FrameId;
    type Object = ObjectId;
    type Value = Value;

    fn find_scripts(&self) -> Vec<ScriptId> {
        self.roots.clone()
    }

    fn script_url(&self, script: &ScriptId) -> String {
        self.scripts[*script].url.clone()
    }

    fn script_start_line(&self, script: &ScriptId) -> u32 {
        self.scripts[*script].start_line
    }

    fn script_start_column(&self, script: &ScriptId) -> u32 {
        self.scripts[*script].start_column
    }

    fn script_line_count(&self, script: &ScriptId) -> u32 {
        self.scripts[*script].line_count
    }

    fn script_global(&self, script: &ScriptId) -> ObjectId {
        self.scripts[*script].global
    }

    fn offset_position(&self, script: &ScriptId, offset: u32) -> Position {
        self.scripts[*script]
            .positions
            .get(&offset)
            .copied()
            .unwrap_or(Position { line: 0, column: 0 })
    }

    fn possible_breakpoint_offsets(&self, script: &ScriptId, line: u32) -> Vec<u32> {
        self.scripts[*script]
            .line_offsets
            .get(&line)
            .cloned()
            .unwrap_or_default()
    }

    fn child_scripts(&self, script: &ScriptId) -> Vec<ScriptId> {
        self.scripts[*script].children.clone()
    }

    fn set_breakpoint(&mut self, script: &ScriptId, offset: u32) {
        self.installed_breakpoints.push((*script, offset));
    }

    fn load_program(&mut self, path: &str) {
        self.loaded_program = Some(path.to_string());
    }

    fn frame_script(&self, frame: &FrameId) -> Option<ScriptId> {
        self.frames[*frame].script
    }

    fn frame_offset(&self, frame: &FrameId) -> u32 {
        self.frames[*frame].offset
    }

    fn frame_kind(&self, frame: &FrameId) -> String {
        self.frames[*frame].kind.clone()
    }

    fn frame_callee_name(&self, frame: &FrameId) -> Option<String> {
        self.frames[*frame].callee.clone()
    }

    fn frame_this(&self, frame: &FrameId) -> Option<Value> {
        self.frames[*frame].this.clone()
    }

    fn frame_older(&self, frame: &FrameId) -> Option<FrameId> {
        self.frames[*frame].older
    }

    fn frame_older_saved(&self, frame: &FrameId) -> Option<FrameId> {
        self.frames[*frame].older_saved
    }

    fn environment_names(&self, frame: &FrameId) -> Vec<String> {
        self.frames[*frame]
            .environment
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn environment_get(&self, frame: &FrameId, name: &str) -> Option<Value> {
        self.frames[*frame]
            .environment
            .iter()
            .find(|(bound, _)| bound == name)
            .map(|(_, value)| value.clone())
    }

    fn environment_set(&mut self, frame: &FrameId, name: &str, value: Value) {
        let environment = &mut self.frames[*frame].environment;
        match environment.iter_mut().find(|(bound, _)| bound == name) {
            Some((_, slot)) => *slot = value,
            None => environment.push((name.to_string(), value)),
        }
    }

    fn object_property_names(&self, object: &ObjectId) -> Vec<String> {
        self.objects[*object]
            .properties
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn object_property(&self, object: &ObjectId, name: &str) -> Option<PropertyDescriptor<Value>> {
        self.objects[*object]
            .properties
            .iter()
            .find(|(bound, _)| bound == name)
            .map(|(_, property)| match property {
                Property::Value(value) => PropertyDescriptor {
                    value: Some(value.clone()),
                    get: None,
                    set: None,
                },
                Property::Accessor { get, set } => PropertyDescriptor {
                    value: None,
                    get: get.clone(),
                    set: set.clone(),
                },
            })
    }

    fn object_set_property(&mut self, object: &ObjectId, name: &str, value: Value) {
        let properties = &mut self.objects[*object].properties;
        match properties.iter_mut().find(|(bound, _)| bound == name) {
            Some((_, slot)) => *slot = Property::Value(value),
            None => properties.push((name.to_string(), Property::Value(value))),
        }
    }

    fn value_kind(&self, value: &Value) -> ValueKind {
        match value {
            Value::Undefined => ValueKind::Undefined,
            Value::Uninitialized => ValueKind::Uninitialized,
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Boolean,
            Value::Number(_) => ValueKind::Number,
            Value::Str(_) => ValueKind::String,
            Value::Function(_) => ValueKind::Function,
            Value::Object(id) => ValueKind::Object {
                class: self.objects[*id].class.clone(),
            },
        }
    }

    fn value_display(&self, value: &Value) -> String {
        match value {
            Value::Undefined => "undefined".to_string(),
            Value::Uninitialized => "<uninitialized>".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) if n.fract() == 0.0 && n.is_finite() => format!("{}", *n as i64),
            Value::Number(n) => n.to_string(),
            Value::Str(s) => s.clone(),
            Value::Function(text) => text.clone(),
            Value::Object(id) => format!("[object {}]", self.objects[*id].class),
        }
    }

    fn value_object(&self, value: &Value) -> Option<ObjectId> {
        match value {
            Value::Object(id) => Some(*id),
            _ => None,
        }
    }

    fn value_from_json(&mut self, json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::Str(s.clone()),
            _ => Value::Undefined,
        }
    }

    fn arm_step_hook(&mut self, frame: &FrameId, armed: bool) {
        arm(&mut self.step_hooks, *frame, armed);
    }

    fn arm_pop_hook(&mut self, frame: &FrameId, armed: bool) {
        arm(&mut self.pop_hooks, *frame, armed);
    }

    fn arm_enter_frame_hook(&mut self, armed: bool) {
        self.enter_frame_armed = armed;
    }

    fn evaluate(
        &mut self,
        _frame: &FrameId,
        expression: &str,
        bindings: &[(String, Value)],
    ) -> Completion<Value> {
        self.last_eval_bindings = bindings.to_vec();
        match self.eval_outcomes.get(expression) {
            Some(EvalOutcome::Return(value)) => Completion::Return(value.clone()),
            Some(EvalOutcome::Throw(value)) => Completion::Throw(value.clone()),
            Some(EvalOutcome::Terminated) | None => Completion::Terminated,
        }
    }
}
