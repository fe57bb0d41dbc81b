use std::collections::HashMap;
use std::io::{BufReader, Read, Write};

use anyhow::Context;

use wire::messages::{
    BreakpointQuery, BreakpointRequest, Command, EngineMessage, EvaluateRequest, StackSelection,
    VariableAssignment,
};
use wire::types::{
    Breakpoint, BreakpointLocation, EvaluateResult, FrameIndex, Scope, SourceLocation, StackFrame,
    Variable, VariablesReference, BREAKPOINT_UNRESOLVED,
};
use wire::{FrameReader, FrameWriter};

use crate::inspect::{Completion, Inspect, PropertyDescriptor, ValueKind};
use crate::refs::{RefTable, GLOBAL_OBJECT_REF, MAX_FRAME_REFS};

/// Why the engine-wide enter-frame hook is armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnterFrameHook {
    /// Waiting for the first frame of the program (first attach).
    FirstAttach,
    /// A step-in, or a step-out past the oldest frame, is pending.
    StepIn,
}

/// A transmissible rendering of a live value.
struct Rendered {
    value: String,
    r#type: String,
    variables_reference: VariablesReference,
}

impl Rendered {
    fn undefined() -> Self {
        Self {
            value: "undefined".to_string(),
            r#type: "Undefined".to_string(),
            variables_reference: 0,
        }
    }
}

struct BreakpointSite<S> {
    script: S,
    offsets: Vec<u32>,
}

/// The in-process debug engine. Synchronous and blocking from the target
/// engine's point of view: while paused it runs a receive loop that services
/// inspection requests inline and only returns control to the embedding on a
/// resume command.
pub struct DebugEngine<I, R, W>
where
    I: Inspect,
{
    inspector: I,
    reader: FrameReader<BufReader<R>>,
    writer: FrameWriter<W>,
    scripts: HashMap<String, Vec<I::Script>>,
    current: Option<I::Frame>,
    last_line: u32,
    last_column: u32,
    refs: RefTable<I::Object>,
    enter_hook: Option<EnterFrameHook>,
    program: Option<String>,
    verbose: bool,
}

impl<I, R, W> DebugEngine<I, R, W>
where
    I: Inspect,
    R: Read,
    W: Write,
{
    pub fn new(inspector: I, read: R, write: W) -> Self {
        Self {
            inspector,
            reader: FrameReader::new(BufReader::new(read)),
            writer: FrameWriter::new(write),
            scripts: HashMap::new(),
            current: None,
            last_line: 0,
            last_column: 0,
            refs: RefTable::new(),
            enter_hook: None,
            program: None,
            verbose: false,
        }
    }

    pub fn inspector(&self) -> &I {
        &self.inspector
    }

    pub fn inspector_mut(&mut self) -> &mut I {
        &mut self.inspector
    }

    /// Announce the session and block until the controller names the program
    /// to load. Execution then proceeds under the enter-frame hook, which
    /// delivers the first pause.
    pub fn connect(&mut self) -> anyhow::Result<String> {
        self.enter_hook = Some(EnterFrameHook::FirstAttach);
        self.inspector.arm_enter_frame_hook(true);
        self.send(&EngineMessage::Connect)?;
        self.receive_loop()?;
        self.program
            .clone()
            .context("no program registered during attach")
    }

    /// The embedding must call this for every newly loaded script.
    pub fn on_new_script(&mut self, script: I::Script) {
        let url = self.inspector.script_url(&script);
        if self.verbose && self.scripts.contains_key(&url) {
            tracing::debug!(%url, "script with already-known url loaded");
        }
        self.add_script(script);
    }

    /// Fires when the engine-wide enter-frame hook triggers: the program's
    /// first frame on first attach, or the next frame entered after a
    /// step-in.
    pub fn on_enter_frame(&mut self, frame: I::Frame) -> anyhow::Result<()> {
        self.inspector.arm_enter_frame_hook(false);
        let Some(hook) = self.enter_hook.take() else {
            return Ok(());
        };
        match hook {
            EnterFrameHook::FirstAttach => {
                // catch up on scripts that loaded before the debugger attached
                for script in self.inspector.find_scripts() {
                    self.add_script(script);
                }
                let path = self.program.clone().unwrap_or_default();
                self.send(&EngineMessage::ProgramLoaded(path))?;
                self.pause(frame)
            }
            EnterFrameHook::StepIn => {
                self.send(&EngineMessage::StopOnStep)?;
                self.pause(frame)
            }
        }
    }

    /// Fires on each step of a frame with an armed step hook. Stops only
    /// once the source position actually differs from the step baseline, so
    /// sub-statement bytecode steps on the same position keep running.
    pub fn on_step(&mut self, frame: I::Frame) -> anyhow::Result<()> {
        if !self.position_changed(&frame) {
            return Ok(());
        }
        self.send(&EngineMessage::StopOnStep)?;
        self.pause(frame)
    }

    /// Fires when a frame with an armed pop hook returns. The next frame up
    /// becomes the step target; with no frame above, execution stops at the
    /// next frame entered (the callee returned to a non-debuggee caller).
    pub fn on_pop(&mut self, frame: I::Frame) {
        self.inspector.arm_pop_hook(&frame, false);
        match next_link(&self.inspector, &frame) {
            Some(older) => self.inspector.arm_step_hook(&older, true),
            None => {
                self.enter_hook = Some(EnterFrameHook::StepIn);
                self.inspector.arm_enter_frame_hook(true);
            }
        }
    }

    /// Fires when an installed breakpoint is hit.
    pub fn on_breakpoint_hit(&mut self, frame: I::Frame) -> anyhow::Result<()> {
        let offset = self.inspector.frame_offset(&frame);
        self.send(&EngineMessage::BreakpointHit(offset))?;
        self.pause(frame)
    }

    /// Capture `frame` as current, reset per-pause inspection state, record
    /// the step baseline, and block servicing requests until a resume
    /// command arrives.
    fn pause(&mut self, frame: I::Frame) -> anyhow::Result<()> {
        if let Some(previous) = self.current.take() {
            self.inspector.arm_step_hook(&previous, false);
            self.inspector.arm_pop_hook(&previous, false);
        }
        let global = self
            .inspector
            .frame_script(&frame)
            .map(|script| self.inspector.script_global(&script));
        self.refs.reset(global);
        self.current = Some(frame);
        self.set_step_baseline();
        self.receive_loop()
    }

    /// The synchronous receive loop. Inspection requests are handled inline
    /// without leaving the pause; resume commands install their hooks and
    /// return control to the embedding. Only wire-level failures propagate.
    fn receive_loop(&mut self) -> anyhow::Result<()> {
        loop {
            let Some(command) = self.reader.read_message::<Command>()? else {
                anyhow::bail!("session socket closed");
            };
            if self.verbose {
                tracing::debug!(?command, "received command");
            }
            match command {
                Command::LoadProgram(path) => {
                    if self.program.is_some() {
                        tracing::warn!(%path, "program already loaded, resuming");
                        self.current = None;
                        return Ok(());
                    }
                    self.inspector.load_program(&path);
                    self.program = Some(path);
                    return Ok(());
                }
                Command::GetBreakpointsForLine(query) => self.breakpoints_for_line(query)?,
                Command::SetBreakpoint(request) => self.set_breakpoint(request)?,
                Command::GetStack(selection) => self.stack(selection)?,
                Command::GetScopes(index) => self.scopes(index)?,
                Command::GetVariables(reference) => self.variables(reference)?,
                Command::SetVariable(assignment) => self.set_variable(assignment)?,
                Command::Evaluate(request) => self.evaluate(request)?,
                Command::Next => match self.current.clone() {
                    Some(frame) => {
                        self.inspector.arm_step_hook(&frame, true);
                        return Ok(());
                    }
                    None => tracing::warn!("step requested while not paused"),
                },
                Command::StepIn => match self.current.clone() {
                    Some(frame) => {
                        self.inspector.arm_step_hook(&frame, true);
                        self.enter_hook = Some(EnterFrameHook::StepIn);
                        self.inspector.arm_enter_frame_hook(true);
                        return Ok(());
                    }
                    None => tracing::warn!("step requested while not paused"),
                },
                Command::StepOut => match self.current.clone() {
                    Some(frame) => {
                        self.inspector.arm_pop_hook(&frame, true);
                        return Ok(());
                    }
                    None => tracing::warn!("step requested while not paused"),
                },
                Command::Continue => {
                    self.current = None;
                    return Ok(());
                }
                Command::StartDebugLogging => self.verbose = true,
                Command::StopDebugLogging => self.verbose = false,
            }
        }
    }

    fn add_script(&mut self, script: I::Script) {
        let url = self.inspector.script_url(&script);
        let entries = self.scripts.entry(url).or_default();
        if !entries.contains(&script) {
            entries.push(script);
        }
    }

    fn set_step_baseline(&mut self) {
        let position = self.current.as_ref().and_then(|frame| {
            let script = self.inspector.frame_script(frame)?;
            Some(
                self.inspector
                    .offset_position(&script, self.inspector.frame_offset(frame)),
            )
        });
        match position {
            Some(position) => {
                self.last_line = position.line;
                self.last_column = position.column;
            }
            None => {
                self.last_line = 0;
                self.last_column = 0;
            }
        }
    }

    fn position_changed(&self, frame: &I::Frame) -> bool {
        let Some(script) = self.inspector.frame_script(frame) else {
            return true;
        };
        let position = self
            .inspector
            .offset_position(&script, self.inspector.frame_offset(frame));
        position.line != self.last_line || position.column != self.last_column
    }

    // breakpoints

    /// Depth-first search across the scripts indexed under `path` and their
    /// child-script trees; the first script with offsets on the line wins.
    fn find_breakpoint_offsets(&self, path: &str, line: u32) -> Option<BreakpointSite<I::Script>> {
        let scripts = self.scripts.get(path)?;
        scripts
            .iter()
            .find_map(|script| self.find_offsets_recursive(script, line))
    }

    fn find_offsets_recursive(
        &self,
        script: &I::Script,
        line: u32,
    ) -> Option<BreakpointSite<I::Script>> {
        let offsets = self.inspector.possible_breakpoint_offsets(script, line);
        if !offsets.is_empty() {
            return Some(BreakpointSite {
                script: script.clone(),
                offsets,
            });
        }
        self.inspector
            .child_scripts(script)
            .iter()
            .find_map(|child| self.find_offsets_recursive(child, line))
    }

    fn breakpoints_for_line(&mut self, query: BreakpointQuery) -> anyhow::Result<()> {
        let locations = match self.find_breakpoint_offsets(&query.path, query.line) {
            Some(site) => site
                .offsets
                .iter()
                .map(|&offset| {
                    let position = self.inspector.offset_position(&site.script, offset);
                    BreakpointLocation {
                        line: position.line,
                        column: position.column,
                    }
                })
                .collect(),
            None => Vec::new(),
        };
        self.send(&EngineMessage::BreakpointsForLine(locations))
    }

    fn set_breakpoint(&mut self, request: BreakpointRequest) -> anyhow::Result<()> {
        let mut resolved = BREAKPOINT_UNRESOLVED;
        if !self.scripts.contains_key(&request.path) {
            // nothing loaded under this path: report the sentinel without
            // engaging the introspection API at all
            tracing::debug!(path = %request.path, "no scripts for breakpoint path");
        } else if let Some(site) = self.find_breakpoint_offsets(&request.path, request.line) {
            // the first offset whose column matches exactly, otherwise the
            // last offset examined
            let mut chosen = BREAKPOINT_UNRESOLVED;
            for &offset in &site.offsets {
                chosen = i64::from(offset);
                let position = self.inspector.offset_position(&site.script, offset);
                if request.column == Some(position.column) {
                    break;
                }
            }
            self.inspector.set_breakpoint(&site.script, chosen as u32);
            resolved = chosen;
        } else {
            tracing::debug!(
                path = %request.path,
                line = request.line,
                "no breakpoint-able location on line"
            );
        }
        self.send(&EngineMessage::BreakpointSet(Breakpoint {
            id: resolved,
            line: request.line,
            column: request.column,
        }))
    }

    // stack and scopes

    fn stack(&mut self, selection: StackSelection) -> anyhow::Result<()> {
        let mut frames = Vec::new();
        match self.find_frame(selection.index) {
            Some(mut frame) => {
                while (frames.len() as i64) < selection.count {
                    let name = self
                        .inspector
                        .frame_callee_name(&frame)
                        .unwrap_or_else(|| self.inspector.frame_kind(&frame));
                    let source_location = self.inspector.frame_script(&frame).map(|script| {
                        let position = self
                            .inspector
                            .offset_position(&script, self.inspector.frame_offset(&frame));
                        SourceLocation {
                            path: self.inspector.script_url(&script),
                            line: position.line,
                            column: position.column,
                        }
                    });
                    frames.push(StackFrame {
                        index: frames.len() as i64,
                        name,
                        source_location,
                        instruction: None,
                    });
                    match next_link(&self.inspector, &frame) {
                        Some(next) => frame = next,
                        None => break,
                    }
                }
            }
            None => tracing::warn!(index = selection.index, "no frame at stack index"),
        }
        self.send(&EngineMessage::Stack(frames))
    }

    fn scopes(&mut self, index: FrameIndex) -> anyhow::Result<()> {
        let mut scopes = Vec::new();
        match self.find_frame(index) {
            Some(frame) => {
                let script = self.inspector.frame_script(&frame);
                let (line, column, end_line) = match &script {
                    Some(script) => {
                        let start_line = self.inspector.script_start_line(script);
                        (
                            Some(start_line),
                            Some(self.inspector.script_start_column(script)),
                            Some(start_line + self.inspector.script_line_count(script)),
                        )
                    }
                    None => (None, None, None),
                };
                scopes.push(Scope {
                    name: "Locals".to_string(),
                    presentation_hint: Some("locals".to_string()),
                    // frame-local scopes use index + 1, clear of the
                    // reserved object ranges
                    variables_reference: index + 1,
                    expensive: false,
                    line,
                    column,
                    end_line,
                });
                scopes.push(Scope {
                    name: "Globals".to_string(),
                    presentation_hint: Some("globals".to_string()),
                    variables_reference: GLOBAL_OBJECT_REF,
                    expensive: true,
                    line: None,
                    column: None,
                    end_line: None,
                });
            }
            None => tracing::warn!(index, "scopes requested for unknown frame"),
        }
        self.send(&EngineMessage::Scopes(scopes))
    }

    /// Walk up from the current frame to the requested index, following
    /// whichever of the aliased links exists at each step.
    fn find_frame(&self, index: i64) -> Option<I::Frame> {
        let mut frame = self.current.clone()?;
        for _ in 0..index {
            frame = next_link(&self.inspector, &frame)?;
        }
        Some(frame)
    }

    // variables

    fn variables(&mut self, reference: VariablesReference) -> anyhow::Result<()> {
        let mut variables = Vec::new();
        if reference > MAX_FRAME_REFS {
            match self.refs.lookup(reference).cloned() {
                Some(object) => variables = self.members(&object),
                // a reference from an earlier pause cycle: reject, never
                // rebind
                None => tracing::warn!(reference, "stale or unknown variables reference"),
            }
        } else {
            match self.find_frame(reference - 1) {
                Some(frame) => {
                    for name in self.inspector.environment_names(&frame) {
                        let rendered = match self.inspector.environment_get(&frame, &name) {
                            Some(value) => self.format_value(&value),
                            None => Rendered::undefined(),
                        };
                        variables.push(make_variable(name, rendered));
                    }
                    if let Some(this) = self.inspector.frame_this(&frame) {
                        let rendered = self.format_value(&this);
                        variables.push(make_variable("<this>".to_string(), rendered));
                    }
                }
                None => tracing::warn!(reference, "variables requested for unknown frame"),
            }
        }
        self.send(&EngineMessage::Variables(variables))
    }

    fn set_variable(&mut self, assignment: VariableAssignment) -> anyhow::Result<()> {
        let VariableAssignment {
            variables_reference,
            name,
            value,
        } = assignment;
        let new_value = self.inspector.value_from_json(&value);

        let reported = if variables_reference > MAX_FRAME_REFS {
            match self.refs.lookup(variables_reference).cloned() {
                Some(object) => {
                    self.inspector.object_set_property(&object, &name, new_value);
                    Some(self.member(&object, &name))
                }
                None => {
                    tracing::warn!(variables_reference, "stale or unknown variables reference");
                    None
                }
            }
        } else {
            match self.find_frame(variables_reference - 1) {
                Some(frame) => {
                    self.inspector.environment_set(&frame, &name, new_value);
                    let rendered = match self.inspector.environment_get(&frame, &name) {
                        Some(value) => self.format_value(&value),
                        None => Rendered::undefined(),
                    };
                    Some(make_variable(name.clone(), rendered))
                }
                None => {
                    tracing::warn!(variables_reference, "assignment to unknown frame");
                    None
                }
            }
        };

        let reported = reported.unwrap_or_else(|| make_variable(name, Rendered::undefined()));
        self.send(&EngineMessage::VariableSet(reported))
    }

    fn members(&mut self, object: &I::Object) -> Vec<Variable> {
        self.inspector
            .object_property_names(object)
            .into_iter()
            .map(|name| self.member(object, &name))
            .collect()
    }

    fn member(&mut self, object: &I::Object, name: &str) -> Variable {
        let rendered = match self.inspector.object_property(object, name) {
            Some(descriptor) => self.format_descriptor(&descriptor),
            None => Rendered::undefined(),
        };
        make_variable(name.to_string(), rendered)
    }

    // value formatting

    /// Render a live value into its transmissible form, allocating a
    /// variables reference when it is structured.
    fn format_value(&mut self, value: &I::Value) -> Rendered {
        match self.inspector.value_kind(value) {
            ValueKind::Null => Rendered {
                value: "null".to_string(),
                r#type: "Null".to_string(),
                variables_reference: 0,
            },
            ValueKind::Uninitialized => Rendered {
                value: "<uninitialized>".to_string(),
                r#type: "Uninitialized Binding".to_string(),
                variables_reference: 0,
            },
            ValueKind::String => Rendered {
                value: format!("\"{}\"", self.inspector.value_display(value)),
                r#type: "String".to_string(),
                variables_reference: 0,
            },
            ValueKind::Object { class } => {
                let variables_reference = match self.inspector.value_object(value) {
                    Some(object) => self.refs.reference_for(object),
                    None => 0,
                };
                Rendered {
                    value: format!("[object {class}]"),
                    r#type: class,
                    variables_reference,
                }
            }
            ValueKind::Undefined => self.plain(value, "Undefined"),
            ValueKind::Boolean => self.plain(value, "Boolean"),
            ValueKind::Number => self.plain(value, "Number"),
            ValueKind::BigInt => self.plain(value, "BigInt"),
            ValueKind::Symbol => self.plain(value, "Symbol"),
            ValueKind::Function => self.plain(value, "Function"),
        }
    }

    fn plain(&self, value: &I::Value, type_name: &str) -> Rendered {
        Rendered {
            value: self.inspector.value_display(value),
            r#type: type_name.to_string(),
            variables_reference: 0,
        }
    }

    /// Accessor properties render getter and/or setter as parenthetical
    /// values joined by a comma.
    fn format_descriptor(&mut self, descriptor: &PropertyDescriptor<I::Value>) -> Rendered {
        if let Some(value) = &descriptor.value {
            return self.format_value(value);
        }

        let mut formatted = None;
        if let Some(get) = &descriptor.get {
            formatted = Some(format!("({})", self.format_value(get).value));
        }
        if let Some(set) = &descriptor.set {
            let setter = format!("({})", self.format_value(set).value);
            formatted = Some(match formatted {
                Some(getter) => format!("{getter}, {setter}"),
                None => setter,
            });
        }

        Rendered {
            value: formatted.unwrap_or_default(),
            r#type: "Accessor".to_string(),
            variables_reference: 0,
        }
    }

    // evaluation

    fn evaluate(&mut self, request: EvaluateRequest) -> anyhow::Result<()> {
        let result = match self.current.clone() {
            Some(frame) => {
                let bindings: Vec<(String, I::Value)> = self
                    .inspector
                    .environment_names(&frame)
                    .into_iter()
                    .filter_map(|name| {
                        self.inspector
                            .environment_get(&frame, &name)
                            .map(|value| (name, value))
                    })
                    .collect();
                match self
                    .inspector
                    .evaluate(&frame, &request.expression, &bindings)
                {
                    Completion::Return(value) => {
                        let rendered = self.format_value(&value);
                        EvaluateResult {
                            result: rendered.value,
                            variables_reference: rendered.variables_reference,
                        }
                    }
                    Completion::Throw(value) => {
                        // reported as text only; the thrown value does not
                        // join the reference table
                        let rendered = self.format_value(&value);
                        EvaluateResult {
                            result: rendered.value,
                            variables_reference: 0,
                        }
                    }
                    Completion::Terminated => EvaluateResult {
                        result: "<terminated>".to_string(),
                        variables_reference: 0,
                    },
                }
            }
            None => {
                tracing::warn!("evaluate requested while not paused");
                EvaluateResult {
                    result: "undefined".to_string(),
                    variables_reference: 0,
                }
            }
        };
        self.send(&EngineMessage::Evaluate(result))
    }

    fn send(&mut self, message: &EngineMessage) -> anyhow::Result<()> {
        if self.verbose {
            tracing::debug!(?message, "sending message");
        }
        self.writer
            .write_message(message)
            .context("writing wire message")
    }
}

/// The single upward traversal over the aliased frame links: whichever of
/// the call-chain or saved-continuation link exists is "next".
fn next_link<I: Inspect>(inspector: &I, frame: &I::Frame) -> Option<I::Frame> {
    inspector
        .frame_older(frame)
        .or_else(|| inspector.frame_older_saved(frame))
}

fn make_variable(name: String, rendered: Rendered) -> Variable {
    Variable {
        name,
        value: rendered.value,
        r#type: rendered.r#type,
        variables_reference: rendered.variables_reference,
    }
}
