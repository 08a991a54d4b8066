//! Engine process supervision.
//!
//! # State Machine
//! ```text
//! Stopped ──start──▶ Starting ──spawn ok──▶ Running ──stop──▶ Stopping ──exit──▶ Stopped
//!                        │                     │
//!                        └──spawn failed──▶ Stopped
//!                                              └──unsolicited exit (crash)──▶ Stopped
//! ```
//!
//! # Responsibilities
//! - Launch the engine with its admin API flags and extra environment
//! - Forward raw stdout/stderr lines to an [`EngineEvents`] producer
//! - Graceful stop: SIGTERM, fixed grace period, then SIGKILL
//! - Crash detection (exit while `Running`)
//!
//! Start, stop and restart are serialized on one lifecycle lock, so a second
//! concurrent `stop()` waits for the first and never issues its own kill
//! sequence. `status()` reads an [`ArcSwap`] snapshot and never waits.

mod spawn;
mod state;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use nix::sys::signal::Signal;
use tokio::process::Child;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::observability::metrics;

pub use spawn::{EngineCommand, LaunchOptions, SupervisorError};
pub use state::{ExitInfo, Phase, ProcessState, ProcessStatus};

/// Grace period between SIGTERM and SIGKILL.
pub const STOP_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// How often `stop()` checks whether the engine has exited.
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Which pipe a raw line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Severity of a supervisor lifecycle notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    Info,
    Warn,
    Error,
}

/// Typed producer interface the supervisor reports through.
///
/// The supervisor attaches no meaning to output lines; classification is the
/// implementor's job.
pub trait EngineEvents: Send + Sync + 'static {
    /// One raw line of engine output.
    fn output_line(&self, stream: OutputStream, line: String);

    /// A lifecycle notice (started, exited, crashed, spawn failure).
    fn notice(&self, level: Notice, message: String);
}

/// Owner of the engine process handle.
pub struct ProcessSupervisor {
    command: EngineCommand,
    events: Arc<dyn EngineEvents>,
    state: Arc<ArcSwap<ProcessState>>,
    lifecycle: Mutex<()>,
    generation: AtomicU64,
    grace_period: Duration,
    escalations: AtomicU64,
}

impl ProcessSupervisor {
    pub fn new(command: EngineCommand, events: Arc<dyn EngineEvents>) -> Self {
        Self {
            command,
            events,
            state: Arc::new(ArcSwap::from_pointee(ProcessState::stopped())),
            lifecycle: Mutex::new(()),
            generation: AtomicU64::new(0),
            grace_period: STOP_GRACE_PERIOD,
            escalations: AtomicU64::new(0),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Non-blocking `{running, pid}` read.
    pub fn status(&self) -> ProcessStatus {
        self.state.load().status()
    }

    /// Full state snapshot including phase and last exit.
    pub fn snapshot(&self) -> ProcessState {
        (**self.state.load()).clone()
    }

    /// Number of SIGKILL escalations issued over the supervisor's lifetime.
    pub fn kill_escalations(&self) -> u64 {
        self.escalations.load(Ordering::Relaxed)
    }

    /// Launch the engine. Failures are reported through [`EngineEvents`];
    /// callers confirm via [`status`](Self::status).
    pub async fn start(&self, options: LaunchOptions) {
        let _guard = self.lifecycle.lock().await;
        self.start_locked(options);
    }

    /// Stop the engine and wait until it has exited.
    pub async fn stop(&self) -> ProcessState {
        let _guard = self.lifecycle.lock().await;
        self.stop_locked().await
    }

    /// `stop()` followed by `start()`.
    pub async fn restart(&self, options: LaunchOptions) {
        let _guard = self.lifecycle.lock().await;
        self.stop_locked().await;
        self.start_locked(options);
    }

    fn start_locked(&self, options: LaunchOptions) {
        let current = self.state.load();
        if current.phase != Phase::Stopped {
            tracing::warn!(phase = ?current.phase, pid = ?current.pid, "Engine is already running");
            self.events.notice(Notice::Warn, "Engine is already running".to_string());
            return;
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.store(Arc::new(ProcessState {
            phase: Phase::Starting,
            pid: None,
            exit: None,
            generation,
        }));

        let (program, fallback) = self.command.resolve();
        if fallback {
            tracing::warn!(configured = %self.command.program, fallback = %program, "Engine binary not found, falling back to PATH");
            self.events.notice(
                Notice::Warn,
                format!("Engine binary not found at {}, trying '{}' from PATH", self.command.program, program),
            );
        }
        let args = options.args.unwrap_or_else(|| self.command.args.clone());

        tracing::info!(program = %program, args = ?args, env = ?options.env, "Spawning engine");

        match spawn::spawn(&program, &args, &options.env) {
            Ok(spawn::Spawned { mut child, pid }) => {
                self.state.store(Arc::new(ProcessState {
                    phase: Phase::Running,
                    pid: Some(pid),
                    exit: None,
                    generation,
                }));

                if let Some(stdout) = child.stdout.take() {
                    spawn::forward_lines(stdout, OutputStream::Stdout, self.events.clone());
                }
                if let Some(stderr) = child.stderr.take() {
                    spawn::forward_lines(stderr, OutputStream::Stderr, self.events.clone());
                }
                tokio::spawn(watch_exit(child, generation, self.state.clone(), self.events.clone()));

                metrics::record_engine_start();
                tracing::info!(pid, "Engine started");
                self.events.notice(Notice::Info, format!("Engine started with PID {}", pid));
            }
            Err(e) => {
                self.state.store(Arc::new(ProcessState {
                    phase: Phase::Stopped,
                    pid: None,
                    exit: None,
                    generation,
                }));
                tracing::error!(error = %e, "Engine spawn failed");
                self.events.notice(Notice::Error, format!("Engine failed to start: {}", e));
            }
        }
    }

    async fn stop_locked(&self) -> ProcessState {
        let current = self.state.load_full();
        let (pid, generation) = match (current.phase, current.pid) {
            (Phase::Running, Some(pid)) => (pid, current.generation),
            _ => return (*current).clone(),
        };

        // The exit watcher may have won the race; only a Running state of the
        // same generation moves to Stopping.
        let previous = self.state.rcu(|s| {
            if s.generation == generation && s.phase == Phase::Running {
                s.with_phase(Phase::Stopping)
            } else {
                (**s).clone()
            }
        });
        if previous.generation != generation || previous.phase != Phase::Running {
            return self.snapshot();
        }

        tracing::info!(pid, "Stopping engine");
        self.events.notice(Notice::Info, "Stopping engine".to_string());
        if let Err(e) = spawn::send_signal(pid, Signal::SIGTERM) {
            tracing::debug!(error = %e, "SIGTERM not delivered");
        }

        let deadline = Instant::now() + self.grace_period;
        let mut escalated = false;
        let mut ticker = tokio::time::interval(STOP_POLL_INTERVAL);

        loop {
            ticker.tick().await;

            let s = self.state.load();
            if s.generation != generation || s.phase == Phase::Stopped {
                break;
            }

            if !escalated && Instant::now() >= deadline {
                tracing::warn!(pid, grace = ?self.grace_period, "Engine ignored SIGTERM, force killing");
                self.events.notice(Notice::Warn, "Force killing engine".to_string());
                if let Err(e) = spawn::send_signal(pid, Signal::SIGKILL) {
                    tracing::debug!(error = %e, "SIGKILL not delivered");
                }
                self.escalations.fetch_add(1, Ordering::Relaxed);
                metrics::record_kill_escalation();
                escalated = true;
            }
        }

        self.snapshot()
    }
}

/// Reap the child and publish its exit.
async fn watch_exit(
    mut child: Child,
    generation: u64,
    state: Arc<ArcSwap<ProcessState>>,
    events: Arc<dyn EngineEvents>,
) {
    let exit = match child.wait().await {
        Ok(status) => {
            use std::os::unix::process::ExitStatusExt;
            ExitInfo {
                code: status.code(),
                signal: status.signal(),
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to wait for engine process");
            ExitInfo { code: None, signal: None }
        }
    };

    let previous = state.rcu(|s| {
        if s.generation == generation {
            ProcessState {
                phase: Phase::Stopped,
                pid: None,
                exit: Some(exit),
                generation,
            }
        } else {
            (**s).clone()
        }
    });
    if previous.generation != generation {
        return;
    }

    if previous.phase == Phase::Stopping {
        tracing::info!(%exit, "Engine stopped");
        events.notice(Notice::Info, format!("Engine exited with {}", exit));
    } else {
        metrics::record_engine_crash();
        tracing::warn!(%exit, pid = ?previous.pid, "Engine exited unexpectedly");
        events.notice(Notice::Warn, format!("Engine exited unexpectedly with {}", exit));
    }
}
