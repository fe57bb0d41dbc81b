use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use eyre::WrapErr;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;

use host::{Host, OutputLine};
use wire::messages::{
    BreakpointQuery, BreakpointRequest, Command, EngineMessage, EvaluateRequest, StackSelection,
    VariableAssignment,
};
use wire::types::{
    Breakpoint, BreakpointLocation, EvaluateResult, FrameIndex, Scope, SourceLocation, StackFrame,
    Variable, VariablesReference,
};
use wire::{encode_frame, FrameCodec};

use crate::handoff::SessionHandoff;
use crate::signal::{Signal, SignalError};
use crate::sourcemap::SourceMapper;
use crate::state::{BridgeEvent, RuntimeState};

/// One awaiter per response message type. Responses are matched to requests
/// by type alone; the protocol is half-duplex per type, so a single slot per
/// type is sufficient.
#[derive(Default)]
struct ResponseSignals {
    stack: Signal<Vec<StackFrame>>,
    scopes: Signal<Vec<Scope>>,
    breakpoints_for_line: Signal<Vec<BreakpointLocation>>,
    breakpoint_set: Signal<Breakpoint>,
    variables: Signal<Vec<Variable>>,
    variable_set: Signal<Variable>,
    evaluate: Signal<EvaluateResult>,
}

impl ResponseSignals {
    fn reject_all(&self) {
        self.stack.reject(SignalError::SessionClosed);
        self.scopes.reject(SignalError::SessionClosed);
        self.breakpoints_for_line.reject(SignalError::SessionClosed);
        self.breakpoint_set.reject(SignalError::SessionClosed);
        self.variables.reject(SignalError::SessionClosed);
        self.variable_set.reject(SignalError::SessionClosed);
        self.evaluate.reject(SignalError::SessionClosed);
    }
}

struct Session {
    outgoing: mpsc::UnboundedSender<Command>,
    state: Arc<Mutex<RuntimeState>>,
    signals: Arc<ResponseSignals>,
    stop_on_entry: bool,
    debug: bool,
}

/// The runtime bridge: owns the control channel and, per debug run, one
/// session socket to the in-process debug engine. Imperative calls follow a
/// uniform shape — send the request, await the paired [`Signal`], return its
/// value — while unsolicited engine events surface on the notification
/// stream returned by [`RuntimeBridge::events`].
pub struct RuntimeBridge {
    workspace_root: PathBuf,
    handoff: SessionHandoff,
    host: Mutex<Box<dyn Host + Send>>,
    mapper: Arc<dyn SourceMapper>,
    notifications: crossbeam_channel::Sender<BridgeEvent>,
    events: crossbeam_channel::Receiver<BridgeEvent>,
    session: Mutex<Option<Session>>,
    loaded_program: Arc<Mutex<Option<String>>>,
    verbose: AtomicBool,
}

impl RuntimeBridge {
    /// Create the bridge and bind its control channel. The target runtime
    /// (spawned through `host` with the control port in its environment)
    /// polls that channel for session ports; output lines received on
    /// `host_output` are forwarded as [`BridgeEvent::Output`].
    pub async fn new(
        workspace_root: impl Into<PathBuf>,
        host: Box<dyn Host + Send>,
        host_output: crossbeam_channel::Receiver<OutputLine>,
        mapper: Arc<dyn SourceMapper>,
    ) -> eyre::Result<Self> {
        let handoff = SessionHandoff::bind().await?;
        let (notifications, events) = crossbeam_channel::unbounded();

        let outbox = notifications.clone();
        std::thread::spawn(move || {
            for line in host_output.iter() {
                let _ = outbox.send(BridgeEvent::Output(line));
            }
        });

        Ok(Self {
            workspace_root: workspace_root.into(),
            handoff,
            host: Mutex::new(host),
            mapper,
            notifications,
            events,
            session: Mutex::new(None),
            loaded_program: Arc::new(Mutex::new(None)),
            verbose: AtomicBool::new(false),
        })
    }

    /// Begin a debug session: make sure the target runtime is up, open the
    /// per-session listener and stage its port on the control channel. The
    /// session advances through the protocol states as the engine connects
    /// and loads the program; progress surfaces on the notification stream.
    #[tracing::instrument(skip(self, debug))]
    pub async fn start(&self, program: &str, stop_on_entry: bool, debug: bool) -> eyre::Result<()> {
        let program = self.normalize_path(program);

        self.host
            .lock()
            .unwrap()
            .ensure(&self.workspace_root, &program, self.handoff.port())
            .wrap_err("ensuring target runtime")?;

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .wrap_err("binding session listener")?;
        let port = listener
            .local_addr()
            .wrap_err("resolving session listener address")?
            .port();

        let state = Arc::new(Mutex::new(RuntimeState::Init));
        let signals = Arc::new(ResponseSignals::default());
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();

        let actor = SessionActor {
            state: Arc::clone(&state),
            signals: Arc::clone(&signals),
            outgoing: outgoing.clone(),
            notifications: self.notifications.clone(),
            program,
            loaded_program: Arc::clone(&self.loaded_program),
            verbose: self.verbose.load(Ordering::SeqCst),
        };
        actor.set_state(RuntimeState::Connecting);
        tokio::spawn(run_session(listener, outgoing_rx, actor));
        self.handoff.publish(port);

        *self.session.lock().unwrap() = Some(Session {
            outgoing,
            state,
            signals,
            stop_on_entry,
            debug,
        });
        Ok(())
    }

    pub fn events(&self) -> crossbeam_channel::Receiver<BridgeEvent> {
        self.events.clone()
    }

    pub fn control_port(&self) -> u16 {
        self.handoff.port()
    }

    /// Absolute path of the program as reported by the engine, once loaded.
    pub fn loaded_program(&self) -> Option<String> {
        self.loaded_program.lock().unwrap().clone()
    }

    pub fn state(&self) -> Option<RuntimeState> {
        let guard = self.session.lock().unwrap();
        guard.as_ref().map(|session| *session.state.lock().unwrap())
    }

    /// Toggle the engine's verbose wire logging. Takes effect immediately for
    /// a running session and is remembered for sessions started later.
    pub fn set_engine_logging(&self, enabled: bool) {
        self.verbose.store(enabled, Ordering::SeqCst);
        if let Ok((outgoing, _)) = self.running_session() {
            let command = if enabled {
                Command::StartDebugLogging
            } else {
                Command::StopDebugLogging
            };
            let _ = outgoing.send(command);
        }
    }

    /// Begin execution after the program has loaded. Stop-on-entry notifies
    /// upward without any wire traffic (the engine is already paused at its
    /// first frame); otherwise the program resumes.
    pub fn run(&self) -> eyre::Result<()> {
        let (stop_on_entry, debug) = {
            let guard = self.session.lock().unwrap();
            let Some(session) = guard.as_ref() else {
                eyre::bail!("no active session");
            };
            (session.stop_on_entry, session.debug)
        };

        if debug && stop_on_entry {
            let _ = self.notifications.send(BridgeEvent::StopOnEntry);
            Ok(())
        } else {
            self.r#continue()
        }
    }

    /// Resume execution of the debuggee
    pub fn r#continue(&self) -> eyre::Result<()> {
        self.send_resume(Command::Continue)
    }

    /// Step over a statement
    pub fn next(&self) -> eyre::Result<()> {
        self.send_resume(Command::Next)
    }

    /// Step into a statement
    pub fn step_in(&self) -> eyre::Result<()> {
        self.send_resume(Command::StepIn)
    }

    /// Step out of the current frame
    pub fn step_out(&self) -> eyre::Result<()> {
        self.send_resume(Command::StepOut)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_stack(&self, index: i64, count: i64) -> eyre::Result<Vec<StackFrame>> {
        let (outgoing, signals) = self.running_session()?;
        let _ = outgoing.send(Command::GetStack(StackSelection { index, count }));
        let mut frames = signals.stack.wait().await.wrap_err("awaiting stack")?;

        for frame in &mut frames {
            if let Some(location) = frame.source_location.as_mut() {
                location.path = self.qualify_path(&location.path);
                self.mapper.map_to_source(location);
            }
        }
        Ok(frames)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_scopes(&self, frame_id: FrameIndex) -> eyre::Result<Vec<Scope>> {
        let (outgoing, signals) = self.running_session()?;
        let _ = outgoing.send(Command::GetScopes(frame_id));
        signals.scopes.wait().await.wrap_err("awaiting scopes")
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_variables(
        &self,
        reference: VariablesReference,
    ) -> eyre::Result<Vec<Variable>> {
        let (outgoing, signals) = self.running_session()?;
        let _ = outgoing.send(Command::GetVariables(reference));
        signals.variables.wait().await.wrap_err("awaiting variables")
    }

    #[tracing::instrument(skip(self, value))]
    pub async fn set_variable(
        &self,
        reference: VariablesReference,
        name: &str,
        value: serde_json::Value,
    ) -> eyre::Result<Variable> {
        let (outgoing, signals) = self.running_session()?;
        let _ = outgoing.send(Command::SetVariable(VariableAssignment {
            variables_reference: reference,
            name: name.to_string(),
            value,
        }));
        signals
            .variable_set
            .wait()
            .await
            .wrap_err("awaiting variable assignment")
    }

    #[tracing::instrument(skip(self))]
    pub async fn set_breakpoint(
        &self,
        path: &str,
        line: u32,
        column: Option<u32>,
    ) -> eyre::Result<Breakpoint> {
        let (outgoing, signals) = self.running_session()?;

        let mut location = SourceLocation {
            path: path.to_string(),
            line,
            column: column.unwrap_or(0),
        };
        self.mapper.map_from_source(&mut location);

        let _ = outgoing.send(Command::SetBreakpoint(BreakpointRequest {
            path: self.normalize_path(&location.path),
            line: location.line,
            column: column.map(|_| location.column),
        }));
        signals
            .breakpoint_set
            .wait()
            .await
            .wrap_err("awaiting breakpoint confirmation")
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_breakpoints_for_line(
        &self,
        path: &str,
        line: u32,
    ) -> eyre::Result<Vec<BreakpointLocation>> {
        let (outgoing, signals) = self.running_session()?;

        let mut query = SourceLocation {
            path: path.to_string(),
            line,
            column: 0,
        };
        self.mapper.map_from_source(&mut query);

        let _ = outgoing.send(Command::GetBreakpointsForLine(BreakpointQuery {
            path: self.normalize_path(&query.path),
            line: query.line,
        }));
        let locations = signals
            .breakpoints_for_line
            .wait()
            .await
            .wrap_err("awaiting breakpoint locations")?;

        Ok(locations
            .into_iter()
            .map(|location| {
                let mut mapped = SourceLocation {
                    path: path.to_string(),
                    line: location.line,
                    column: location.column,
                };
                self.mapper.map_to_source(&mut mapped);
                BreakpointLocation {
                    line: mapped.line,
                    column: mapped.column,
                }
            })
            .collect())
    }

    #[tracing::instrument(skip(self))]
    pub async fn evaluate(&self, expression: &str) -> eyre::Result<EvaluateResult> {
        let (outgoing, signals) = self.running_session()?;
        let _ = outgoing.send(Command::Evaluate(EvaluateRequest {
            expression: expression.to_string(),
        }));
        signals.evaluate.wait().await.wrap_err("awaiting evaluation")
    }

    /// Resume-style commands outside `running` are dropped with a warning:
    /// the session stays alive and no message reaches the engine.
    fn send_resume(&self, command: Command) -> eyre::Result<()> {
        let guard = self.session.lock().unwrap();
        match guard.as_ref() {
            Some(session) => {
                let state = *session.state.lock().unwrap();
                if state == RuntimeState::Running {
                    let _ = session.outgoing.send(command);
                } else {
                    tracing::warn!(?state, ?command, "ignoring resume request outside running state");
                }
            }
            None => {
                tracing::warn!(?command, "ignoring resume request without a session");
            }
        }
        Ok(())
    }

    fn running_session(
        &self,
    ) -> eyre::Result<(mpsc::UnboundedSender<Command>, Arc<ResponseSignals>)> {
        let guard = self.session.lock().unwrap();
        let Some(session) = guard.as_ref() else {
            eyre::bail!("no active session");
        };
        let state = *session.state.lock().unwrap();
        if state != RuntimeState::Running {
            eyre::bail!("session is in state {state:?}, not running");
        }
        Ok((session.outgoing.clone(), Arc::clone(&session.signals)))
    }

    /// Workspace-relative form with forward slashes, the form the engine
    /// indexes scripts under.
    fn normalize_path(&self, path: &str) -> String {
        let path = path.replace('\\', "/");
        let workspace = self.workspace_root.display().to_string().replace('\\', "/");
        match path.strip_prefix(&format!("{workspace}/")) {
            Some(relative) => relative.to_string(),
            None => path,
        }
    }

    fn qualify_path(&self, path: &str) -> String {
        if Path::new(path).is_absolute() {
            return path.to_string();
        }
        format!("{}/{}", self.workspace_root.display(), path)
    }
}

/// State machine and message dispatch for one session, run on the session
/// task.
struct SessionActor {
    state: Arc<Mutex<RuntimeState>>,
    signals: Arc<ResponseSignals>,
    outgoing: mpsc::UnboundedSender<Command>,
    notifications: crossbeam_channel::Sender<BridgeEvent>,
    program: String,
    loaded_program: Arc<Mutex<Option<String>>>,
    verbose: bool,
}

impl SessionActor {
    fn on_message(&self, message: EngineMessage) {
        // responses are routed to their Signal before state dispatch: they
        // can legitimately arrive interleaved with state-changing events
        let message = match message {
            EngineMessage::Stack(value) => return self.signals.stack.resolve(value),
            EngineMessage::Scopes(value) => return self.signals.scopes.resolve(value),
            EngineMessage::BreakpointsForLine(value) => {
                return self.signals.breakpoints_for_line.resolve(value)
            }
            EngineMessage::BreakpointSet(value) => {
                return self.signals.breakpoint_set.resolve(value)
            }
            EngineMessage::Variables(value) => return self.signals.variables.resolve(value),
            EngineMessage::VariableSet(value) => return self.signals.variable_set.resolve(value),
            EngineMessage::Evaluate(value) => return self.signals.evaluate.resolve(value),
            other => other,
        };

        let state = *self.state.lock().unwrap();
        match (state, message) {
            (RuntimeState::Connecting, EngineMessage::Connect) => {
                if self.verbose {
                    let _ = self.outgoing.send(Command::StartDebugLogging);
                }
                let _ = self
                    .outgoing
                    .send(Command::LoadProgram(self.program.clone()));
                self.set_state(RuntimeState::LoadingScript);
            }
            (RuntimeState::LoadingScript, EngineMessage::ProgramLoaded(path)) => {
                *self.loaded_program.lock().unwrap() = Some(path.clone());
                self.set_state(RuntimeState::Running);
                let _ = self.notifications.send(BridgeEvent::ProgramLoaded(path));
            }
            (RuntimeState::Running, EngineMessage::BreakpointHit(offset)) => {
                tracing::debug!(offset, "engine stopped on breakpoint");
                let _ = self.notifications.send(BridgeEvent::StopOnBreakpoint);
            }
            (RuntimeState::Running, EngineMessage::StopOnStep) => {
                let _ = self.notifications.send(BridgeEvent::StopOnStep);
            }
            (state, message) => {
                tracing::warn!(?state, ?message, "unexpected message for current state, dropping");
            }
        }
    }

    fn set_state(&self, new_state: RuntimeState) {
        let mut state = self.state.lock().unwrap();
        tracing::debug!(from = ?*state, to = ?new_state, "session state change");
        *state = new_state;
    }

    fn teardown(&self) {
        self.signals.reject_all();
        let _ = self.notifications.send(BridgeEvent::End);
    }
}

async fn run_session(
    listener: TcpListener,
    mut outgoing: mpsc::UnboundedReceiver<Command>,
    actor: SessionActor,
) {
    // one session per listener: exactly one connection is accepted
    let (socket, addr) = match listener.accept().await {
        Ok(accepted) => accepted,
        Err(e) => {
            tracing::warn!(error = %e, "accepting session connection");
            actor.teardown();
            return;
        }
    };
    tracing::debug!(%addr, "session server accepted connection from target runtime");

    let (read, mut write) = socket.into_split();
    let mut frames = FramedRead::new(read, FrameCodec::<EngineMessage>::new());

    loop {
        tokio::select! {
            command = outgoing.recv() => {
                let Some(command) = command else { break };
                let frame = match encode_frame(&command) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::error!(error = %e, "encoding command");
                        continue;
                    }
                };
                tracing::debug!(?command, "sending command to engine");
                if let Err(e) = write.write_all(&frame).await {
                    tracing::warn!(error = %e, "writing to session socket");
                    break;
                }
            }
            message = frames.next() => {
                match message {
                    Some(Ok(message)) => actor.on_message(message),
                    Some(Err(e)) => tracing::warn!(error = %e, "reading session frame"),
                    None => {
                        tracing::debug!("session socket closed");
                        break;
                    }
                }
            }
        }
    }

    actor.teardown();
}
