use host::OutputLine;

/// Per-session lifecycle. Strictly forward-moving; the terminal state is
/// implicit on socket close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Init,
    Connecting,
    LoadingScript,
    Running,
}

/// Notifications published to the editor-facing layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    /// The engine finished loading the program; carries the loaded path.
    ProgramLoaded(String),
    StopOnEntry,
    StopOnBreakpoint,
    StopOnStep,
    /// A line of target-process output.
    Output(OutputLine),
    /// The session socket closed.
    End,
}
