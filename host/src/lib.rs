//! Launching and supervising the long-lived target-runtime process.
//!
//! The runtime outlives any single debug session: it is started once per
//! workspace and polls the bridge's control channel (advertised through the
//! `DEBUGGER_PORT` environment variable) whenever it is ready to consider a
//! new session.
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use eyre::WrapErr;
use serde::Deserialize;

/// Launch description for the target runtime, loadable from a front end's
/// launch configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostConfig {
    pub executable: String,
    /// Argument template; `${workspace_folder}` and `${program}` are
    /// substituted at launch.
    #[serde(default)]
    pub options: Vec<String>,
    /// Options handed to the embedded scripting runtime through
    /// [`HostConfig::runtime_env`].
    #[serde(default)]
    pub runtime_options: Vec<String>,
    #[serde(default = "default_runtime_env")]
    pub runtime_env: String,
}

fn default_runtime_env() -> String {
    "RUNTIME_CONFIG".to_string()
}

/// A line of target-process output, forwarded upward as an `output`
/// notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLine {
    Stdout(String),
    Stderr(String),
}

pub trait Host {
    /// Make sure the target runtime is running for this workspace root.
    /// Idempotent when it already runs in the same root; an error if it runs
    /// in a different one.
    fn ensure(
        &mut self,
        workspace_root: &Path,
        program: &str,
        control_port: u16,
    ) -> eyre::Result<()>;

    fn is_running(&self) -> bool;
}

pub struct ProcessHost {
    config: HostConfig,
    output: crossbeam_channel::Sender<OutputLine>,
    child: Option<Arc<Mutex<Child>>>,
    workspace_root: Option<PathBuf>,
    running: Arc<AtomicBool>,
}

impl ProcessHost {
    pub fn new(config: HostConfig, output: crossbeam_channel::Sender<OutputLine>) -> Self {
        Self {
            config,
            output,
            child: None,
            workspace_root: None,
            running: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Host for ProcessHost {
    #[tracing::instrument(skip(self))]
    fn ensure(
        &mut self,
        workspace_root: &Path,
        program: &str,
        control_port: u16,
    ) -> eyre::Result<()> {
        if self.running.load(Ordering::SeqCst) {
            match self.workspace_root.as_deref() {
                Some(root) if root == workspace_root => return Ok(()),
                Some(root) => eyre::bail!(
                    "target runtime already running in workspace {}",
                    root.display()
                ),
                None => {}
            }
        }

        let workspace = workspace_root.display().to_string();
        let args: Vec<String> = self
            .config
            .options
            .iter()
            .map(|opt| {
                opt.replace("${workspace_folder}", &workspace)
                    .replace("${program}", program)
            })
            .collect();

        tracing::debug!(executable = %self.config.executable, ?args, control_port, "starting target runtime");
        let mut child = Command::new(&self.config.executable)
            .args(&args)
            .env(
                &self.config.runtime_env,
                self.config.runtime_options.join(" "),
            )
            .env("DEBUGGER_PORT", control_port.to_string())
            .current_dir(workspace_root)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .wrap_err("spawning target runtime")?;

        let stdout = child.stdout.take().unwrap();
        let outbox = self.output.clone();
        thread::spawn(move || {
            for line in BufReader::new(stdout).lines().map_while(Result::ok) {
                let _ = outbox.send(OutputLine::Stdout(line));
            }
        });

        let stderr = child.stderr.take().unwrap();
        let outbox = self.output.clone();
        thread::spawn(move || {
            for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                let _ = outbox.send(OutputLine::Stderr(line));
            }
        });

        let child = Arc::new(Mutex::new(child));
        self.running.store(true, Ordering::SeqCst);
        self.workspace_root = Some(workspace_root.to_path_buf());
        self.child = Some(Arc::clone(&child));

        // watch for exit so a later ensure() can relaunch
        let running = Arc::clone(&self.running);
        thread::spawn(move || loop {
            match child.lock().unwrap().try_wait() {
                Ok(Some(status)) => {
                    tracing::info!(%status, "target runtime exited");
                    running.store(false, Ordering::SeqCst);
                    return;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "could not poll target runtime");
                    running.store(false, Ordering::SeqCst);
                    return;
                }
            }
            thread::sleep(Duration::from_millis(100));
        });

        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for ProcessHost {
    fn drop(&mut self) {
        let Some(child) = self.child.take() else {
            return;
        };
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        tracing::debug!("terminating target runtime");
        let mut child = child.lock().unwrap();
        match child.kill() {
            Ok(_) => {
                let _ = child.wait();
            }
            Err(e) => tracing::warn!(error = %e, "could not terminate target runtime"),
        }
    }
}
