//! Backend process supervision
//!
//! At startup the supervisor makes sure a backend is reachable: it probes the
//! configured URL once, and if nothing answers it spawns the backend locally
//! and polls `/health` until the backend is ready, a poll budget is exhausted,
//! or the child dies. At shutdown it terminates the child gracefully, with a
//! forced kill as fallback, within bounded waits.
//!
//! The supervisor exclusively owns the child handle and its poll timer; no
//! other component may signal or reap the process.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::timeout;

use crate::config::BackendConfig;
use crate::error::{Error, Result};

/// Environment variable that disables the backend's own auto-reload.
const RELOAD_ENV: &str = "MACHSIGHT_RELOAD";

/// Lifecycle state of the supervised backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    PreChecking,
    AlreadyRunning,
    Spawning,
    Polling,
    Ready,
    TimedOut,
    SpawnFailed,
    Stopping,
    Stopped,
}

impl SupervisorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SupervisorState::Idle => "idle",
            SupervisorState::PreChecking => "pre_checking",
            SupervisorState::AlreadyRunning => "already_running",
            SupervisorState::Spawning => "spawning",
            SupervisorState::Polling => "polling",
            SupervisorState::Ready => "ready",
            SupervisorState::TimedOut => "timed_out",
            SupervisorState::SpawnFailed => "spawn_failed",
            SupervisorState::Stopping => "stopping",
            SupervisorState::Stopped => "stopped",
        }
    }
}

/// Progress notifications emitted while the supervisor works.
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    PreChecking,
    /// A backend already answered the pre-check; nothing was spawned.
    AlreadyRunning,
    Spawned {
        pid: Option<u32>,
    },
    /// Periodic progress notice while waiting for the backend to come up.
    WaitingForBackend {
        attempt: u32,
        elapsed_secs: u64,
    },
    Ready {
        elapsed_secs: u64,
    },
    SpawnFailed(String),
    TimedOut {
        attempts: u32,
        elapsed_secs: u64,
    },
    Stopped,
}

/// How the backend ended up reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Startup {
    /// A backend was already answering; no process was spawned.
    AlreadyRunning,
    /// We spawned the backend and it became healthy.
    Spawned { attempts: u32 },
}

/// Timing knobs for the supervisor state machine.
///
/// Defaults carry the production values; tests shrink them.
#[derive(Debug, Clone)]
pub struct Timings {
    /// Timeout of a single health probe (pre-check and polling alike)
    pub probe_timeout: Duration,
    /// Delay between health polls after a spawn
    pub poll_interval: Duration,
    /// Poll attempts before giving up
    pub max_poll_attempts: u32,
    /// Emit a progress notice every N attempts
    pub progress_every: u32,
    /// Grace period after the terminate signal
    pub terminate_wait: Duration,
    /// Wait after the forced kill
    pub kill_wait: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(1),
            poll_interval: Duration::from_secs(2),
            max_poll_attempts: 60,
            progress_every: 5,
            terminate_wait: Duration::from_secs(3),
            kill_wait: Duration::from_secs(1),
        }
    }
}

/// Fully resolved spawn parameters for the backend process.
#[derive(Debug, Clone)]
pub struct BackendCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

impl BackendCommand {
    /// Resolve the command from configuration, filling defaults from the
    /// install layout: the backend lives in a `backend` directory next to
    /// the install directory and runs from its own virtualenv.
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        let working_dir = match &config.working_dir {
            Some(dir) => dir.clone(),
            None => install_dir()?.join("..").join("backend"),
        };

        let program = match &config.executable {
            Some(path) => path.clone(),
            None => {
                if cfg!(windows) {
                    working_dir.join("venv").join("Scripts").join("python.exe")
                } else {
                    working_dir.join("venv").join("bin").join("python")
                }
            }
        };

        Ok(Self {
            program,
            args: config.args.clone(),
            working_dir,
        })
    }
}

fn install_dir() -> Result<PathBuf> {
    let exe = std::env::current_exe()?;
    exe.parent()
        .map(PathBuf::from)
        .ok_or_else(|| Error::ProcessStart("executable has no parent directory".to_string()))
}

/// Ensures a backend is reachable, spawning and supervising one if needed.
pub struct BackendSupervisor {
    base_url: String,
    command: BackendCommand,
    timings: Timings,
    probe: reqwest::Client,
    state: SupervisorState,
    child: Option<Child>,
    subscribers: Vec<UnboundedSender<SupervisorEvent>>,
}

impl BackendSupervisor {
    pub fn new(base_url: impl Into<String>, command: BackendCommand, timings: Timings) -> Result<Self> {
        let probe = reqwest::Client::builder()
            .timeout(timings.probe_timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to create probe client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            command,
            timings,
            probe,
            state: SupervisorState::Idle,
            child: None,
            subscribers: Vec::new(),
        })
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Subscribe to supervisor progress events.
    pub fn subscribe(&mut self) -> UnboundedReceiver<SupervisorEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    fn emit(&mut self, event: SupervisorEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn set_state(&mut self, state: SupervisorState) {
        tracing::debug!(from = self.state.as_str(), to = state.as_str(), "supervisor state");
        self.state = state;
    }

    /// Make sure a backend is reachable, spawning one if necessary.
    ///
    /// Returns how the backend came up, or a fatal
    /// [`Error::ProcessStart`] / [`Error::HealthCheckTimeout`]. Fatal
    /// outcomes are terminal for this startup attempt; there is no
    /// automatic retry.
    pub async fn ensure_running(&mut self) -> Result<Startup> {
        self.set_state(SupervisorState::PreChecking);
        self.emit(SupervisorEvent::PreChecking);

        if self.probe_health().await {
            tracing::info!("backend already running, skipping spawn");
            self.set_state(SupervisorState::AlreadyRunning);
            self.emit(SupervisorEvent::AlreadyRunning);
            self.set_state(SupervisorState::Ready);
            return Ok(Startup::AlreadyRunning);
        }

        self.set_state(SupervisorState::Spawning);
        if let Err(e) = self.spawn_backend() {
            let message = e.to_string();
            self.set_state(SupervisorState::SpawnFailed);
            self.emit(SupervisorEvent::SpawnFailed(message));
            return Err(e);
        }

        self.set_state(SupervisorState::Polling);
        self.poll_until_ready().await
    }

    /// Poll `/health` until the backend answers, the attempt budget runs
    /// out, or the child exits.
    async fn poll_until_ready(&mut self) -> Result<Startup> {
        let started = Instant::now();

        for attempt in 1..=self.timings.max_poll_attempts {
            tokio::time::sleep(self.timings.poll_interval).await;

            // A child that exits while we wait is a failed start, not a
            // timeout; don't burn the remaining poll budget on it.
            if let Some(status) = self.child_exited() {
                let message = format!("backend process exited during startup ({})", status);
                self.set_state(SupervisorState::SpawnFailed);
                self.emit(SupervisorEvent::SpawnFailed(message.clone()));
                self.child = None;
                return Err(Error::ProcessStart(message));
            }

            let elapsed_secs = started.elapsed().as_secs();
            if attempt % self.timings.progress_every == 0 {
                self.emit(SupervisorEvent::WaitingForBackend {
                    attempt,
                    elapsed_secs,
                });
            }

            if self.probe_health().await {
                tracing::info!(attempt, elapsed_secs, "backend became healthy");
                self.set_state(SupervisorState::Ready);
                self.emit(SupervisorEvent::Ready { elapsed_secs });
                return Ok(Startup::Spawned { attempts: attempt });
            }

            tracing::debug!(attempt, "backend not ready yet");
        }

        let attempts = self.timings.max_poll_attempts;
        let elapsed_secs = started.elapsed().as_secs();
        self.set_state(SupervisorState::TimedOut);
        self.emit(SupervisorEvent::TimedOut {
            attempts,
            elapsed_secs,
        });
        Err(Error::HealthCheckTimeout {
            attempts,
            elapsed_secs,
        })
    }

    /// One health probe with the short probe timeout.
    async fn probe_health(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.probe.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    fn spawn_backend(&mut self) -> Result<()> {
        let mut command = Command::new(&self.command.program);
        command
            .args(&self.command.args)
            .current_dir(&self.command.working_dir)
            .env(RELOAD_ENV, "0")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::info!(
            program = %self.command.program.display(),
            working_dir = %self.command.working_dir.display(),
            "spawning backend process"
        );

        let mut child = command
            .spawn()
            .map_err(|e| Error::ProcessStart(format!("{}: {}", self.command.program.display(), e)))?;

        forward_output(&mut child);
        self.emit(SupervisorEvent::Spawned { pid: child.id() });
        self.child = Some(child);
        Ok(())
    }

    fn child_exited(&mut self) -> Option<std::process::ExitStatus> {
        self.child.as_mut().and_then(|child| child.try_wait().ok().flatten())
    }

    /// Whether a spawned child is still held (it may have exited already).
    pub fn has_child(&self) -> bool {
        self.child.is_some()
    }

    /// Stop the supervised backend.
    ///
    /// Sends the graceful terminate signal and waits up to the grace period;
    /// if the process is still running, kills it and waits once more. The
    /// handle is released unconditionally afterwards. Does not return until
    /// the process is confirmed stopped or both bounded waits have elapsed.
    pub async fn shutdown(&mut self) {
        self.set_state(SupervisorState::Stopping);

        if let Some(mut child) = self.child.take() {
            let running = matches!(child.try_wait(), Ok(None));
            if running {
                tracing::info!(pid = child.id(), "stopping backend process");
                send_terminate(&mut child);

                if timeout(self.timings.terminate_wait, child.wait()).await.is_err() {
                    tracing::warn!("backend ignored terminate, killing");
                    let _ = child.start_kill();
                    let _ = timeout(self.timings.kill_wait, child.wait()).await;
                }
            }
        }

        self.set_state(SupervisorState::Stopped);
        self.emit(SupervisorEvent::Stopped);
    }
}

/// Forward the child's stdout/stderr to the log.
fn forward_output(child: &mut Child) {
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(target: "machsight::backend", "{}", line);
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(target: "machsight::backend", "{}", line);
            }
        });
    }
}

/// Ask the child to exit gracefully. SIGTERM on Unix; elsewhere the only
/// portable option is the hard kill.
#[cfg(unix)]
fn send_terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        // SAFETY: kill is called with the child's live pid and a constant signal.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child) {
    let _ = child.start_kill();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timings_match_production_bounds() {
        let timings = Timings::default();
        assert_eq!(timings.probe_timeout, Duration::from_secs(1));
        assert_eq!(timings.poll_interval, Duration::from_secs(2));
        assert_eq!(timings.max_poll_attempts, 60);
        assert_eq!(timings.progress_every, 5);
        assert_eq!(timings.terminate_wait, Duration::from_secs(3));
        assert_eq!(timings.kill_wait, Duration::from_secs(1));
    }

    #[test]
    fn test_backend_command_honors_overrides() {
        let config = BackendConfig {
            autostart: true,
            executable: Some(PathBuf::from("/usr/bin/python3")),
            args: vec!["api/main.py".to_string()],
            working_dir: Some(PathBuf::from("/opt/machsight/backend")),
        };

        let command = BackendCommand::from_config(&config).unwrap();
        assert_eq!(command.program, PathBuf::from("/usr/bin/python3"));
        assert_eq!(command.working_dir, PathBuf::from("/opt/machsight/backend"));
        assert_eq!(command.args, vec!["api/main.py".to_string()]);
    }

    #[test]
    fn test_backend_command_defaults_to_venv_python() {
        let config = BackendConfig {
            working_dir: Some(PathBuf::from("/opt/machsight/backend")),
            ..Default::default()
        };

        let command = BackendCommand::from_config(&config).unwrap();
        #[cfg(unix)]
        assert_eq!(
            command.program,
            PathBuf::from("/opt/machsight/backend/venv/bin/python")
        );
    }

    #[test]
    fn test_supervisor_starts_idle() {
        let command = BackendCommand {
            program: PathBuf::from("/bin/false"),
            args: Vec::new(),
            working_dir: PathBuf::from("/"),
        };
        let supervisor =
            BackendSupervisor::new("http://localhost:8000", command, Timings::default()).unwrap();
        assert_eq!(supervisor.state(), SupervisorState::Idle);
        assert!(!supervisor.has_child());
    }
}
