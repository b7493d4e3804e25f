use crate::error::ProcessError;
use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::io;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::process::{Child, Command};
use tracing::debug;

/// One external encoder process as seen by the manager.
///
/// `wait` is only ever called from the reaper task, while `signal` and
/// `kill` may race with it from a stopping caller.
#[async_trait]
pub trait StreamProcess: Send + Sync {
    fn start(&self) -> Result<(), ProcessError>;

    /// Resolves once the process has exited; `Err` on a non-zero or abnormal exit.
    async fn wait(&self) -> Result<(), ProcessError>;

    fn signal(&self, signal: Signal) -> Result<(), ProcessError>;

    fn kill(&self) -> Result<(), ProcessError> {
        self.signal(Signal::SIGKILL)
    }

    /// OS process id, 0 until started.
    fn pid(&self) -> u32;
}

/// Builds process handles so the manager never spawns directly.
pub trait ProcessFactory: Send + Sync {
    fn command(&self, program: &str, args: &[String]) -> Arc<dyn StreamProcess>;
}

/// Production factory backed by `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioProcessFactory;

impl ProcessFactory for TokioProcessFactory {
    fn command(&self, program: &str, args: &[String]) -> Arc<dyn StreamProcess> {
        Arc::new(TokioProcess::new(program, args))
    }
}

pub struct TokioProcess {
    program: String,
    args: Vec<String>,
    child: Mutex<Option<Child>>,
    pid: AtomicU32,
    started: AtomicBool,
    reaped: AtomicBool,
}

impl TokioProcess {
    pub fn new(program: &str, args: &[String]) -> Self {
        Self {
            program: program.to_string(),
            args: args.to_vec(),
            child: Mutex::new(None),
            pid: AtomicU32::new(0),
            started: AtomicBool::new(false),
            reaped: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl StreamProcess for TokioProcess {
    fn start(&self) -> Result<(), ProcessError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ProcessError::Spawn(io::Error::other("already started")));
        }

        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(ProcessError::Spawn)?;

        let pid = child.id().unwrap_or(0);
        self.pid.store(pid, Ordering::SeqCst);
        *self.child.lock().unwrap_or_else(PoisonError::into_inner) = Some(child);
        debug!(program = %self.program, pid, "spawned encoder");
        Ok(())
    }

    async fn wait(&self) -> Result<(), ProcessError> {
        let child = self
            .child
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut child) = child else {
            return Err(ProcessError::NotStarted);
        };

        let status = child.wait().await;
        self.reaped.store(true, Ordering::SeqCst);

        let status = status.map_err(ProcessError::Wait)?;
        if status.success() {
            Ok(())
        } else {
            Err(ProcessError::exited(status.to_string()))
        }
    }

    fn signal(&self, signal: Signal) -> Result<(), ProcessError> {
        let pid = self.pid();
        if pid == 0 {
            return Err(ProcessError::NotStarted);
        }
        // The pid may already belong to someone else once reaped.
        if self.reaped.load(Ordering::SeqCst) {
            return Err(ProcessError::Signal(Errno::ESRCH));
        }
        kill(Pid::from_raw(pid as i32), signal)?;
        Ok(())
    }

    fn pid(&self) -> u32 {
        self.pid.load(Ordering::SeqCst)
    }
}
