//! Engine process spawning and output forwarding.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::supervisor::{EngineEvents, OutputStream};

/// Errors raised while launching or signalling the engine.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("spawned process has no PID (exited immediately)")]
    NoPid,

    #[error("failed to send {signal} to PID {pid}: {source}")]
    Signal {
        pid: u32,
        signal: Signal,
        #[source]
        source: nix::Error,
    },
}

/// What to execute for the engine.
#[derive(Debug, Clone)]
pub struct EngineCommand {
    /// Configured executable (normally an absolute path).
    pub program: String,
    /// PATH-resolved name used when `program` is an absolute path that does
    /// not exist.
    pub fallback: String,
    /// Default launch arguments.
    pub args: Vec<String>,
}

impl EngineCommand {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            program: config.binary_path.clone(),
            fallback: config.fallback_binary.clone(),
            args: config.args.clone(),
        }
    }

    /// Pick the executable to launch and whether the fallback was taken.
    pub fn resolve(&self) -> (String, bool) {
        let configured = self.program.trim();
        if configured.is_empty() {
            return (self.fallback.clone(), true);
        }
        let path = Path::new(configured);
        if path.is_absolute() && !path.exists() {
            return (self.fallback.clone(), true);
        }
        (configured.to_string(), false)
    }
}

/// Per-launch overrides.
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    /// Replaces the default arguments when set.
    pub args: Option<Vec<String>>,
    /// Added on top of the inherited environment.
    pub env: BTreeMap<String, String>,
}

pub(crate) struct Spawned {
    pub child: Child,
    pub pid: u32,
}

pub(crate) fn spawn(program: &str, args: &[String], env: &BTreeMap<String, String>) -> Result<Spawned, SupervisorError> {
    let mut cmd = Command::new(program);

    cmd.args(args)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn().map_err(|source| SupervisorError::Spawn {
        program: program.to_string(),
        source,
    })?;

    let pid = child.id().ok_or(SupervisorError::NoPid)?;
    Ok(Spawned { child, pid })
}

/// Forward each line of a child pipe to the event producer.
///
/// Bytes that are not valid UTF-8 are replaced rather than ending the read;
/// the pipe is drained until EOF so the child never writes into a closed pipe.
pub(crate) fn forward_lines<R>(reader: R, stream: OutputStream, events: Arc<dyn EngineEvents>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::with_capacity(256);
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&buf);
                    let line = text.trim_end_matches(['\n', '\r']);
                    events.output_line(stream, line.to_string());
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!(?stream, error = %e, "Engine output stream failed");
                    break;
                }
            }
        }
    })
}

pub(crate) fn send_signal(pid: u32, signal: Signal) -> Result<(), SupervisorError> {
    let raw = i32::try_from(pid).map_err(|_| SupervisorError::Signal {
        pid,
        signal,
        source: nix::Error::EINVAL,
    })?;
    kill(Pid::from_raw(raw), signal).map_err(|source| SupervisorError::Signal { pid, signal, source })
}
