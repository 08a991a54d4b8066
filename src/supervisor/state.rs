//! Process state snapshots.

use serde::Serialize;

/// Lifecycle phase of the supervised engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// How the last engine process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl std::fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "code {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => write!(f, "unknown status"),
        }
    }
}

/// Point-in-time view of the supervised process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessState {
    pub phase: Phase,
    pub pid: Option<u32>,
    pub exit: Option<ExitInfo>,
    /// Incremented on every spawn attempt; ties exit notifications to the
    /// process they belong to.
    #[serde(skip)]
    pub(crate) generation: u64,
}

impl ProcessState {
    pub(crate) fn stopped() -> Self {
        Self {
            phase: Phase::Stopped,
            pid: None,
            exit: None,
            generation: 0,
        }
    }

    pub(crate) fn with_phase(&self, phase: Phase) -> Self {
        Self {
            phase,
            ..self.clone()
        }
    }

    /// Minimal status view exposed to callers.
    pub fn status(&self) -> ProcessStatus {
        ProcessStatus {
            // A stopping process is still alive until it exits.
            running: matches!(self.phase, Phase::Running | Phase::Stopping),
            pid: self.pid,
        }
    }
}

/// `{running, pid}` read returned by `status()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProcessStatus {
    pub running: bool,
    pub pid: Option<u32>,
}
