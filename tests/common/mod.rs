#![allow(dead_code)]

use async_trait::async_trait;
use nix::sys::signal::Signal;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stream_supervisor::{
    HlsConfig, Manager, ManagerOptions, ProcessError, ProcessFactory, StreamProcess, StreamState,
    StreamStatus,
};
use tempfile::TempDir;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

/// Scripted stand-in for an ffmpeg process.
#[derive(Default)]
pub struct FakeProcess {
    pub pid: u32,
    pub fail_start: bool,
    pub wait_err: Option<String>,
    pub exit_on_signal: bool,
    pub exit_on_kill: bool,
    /// Blocks the launching thread this long inside `start()`.
    pub start_delay: Duration,
    pub started: AtomicBool,
    pub exited: CancellationToken,
    pub signals: AtomicUsize,
    pub kills: AtomicUsize,
}

impl FakeProcess {
    pub fn running(pid: u32) -> Arc<Self> {
        Arc::new(Self { pid, ..Default::default() })
    }

    pub fn obedient(pid: u32) -> Arc<Self> {
        Arc::new(Self { pid, exit_on_signal: true, ..Default::default() })
    }

    pub fn exit(&self) {
        self.exited.cancel();
    }

    /// (signals, kills) received so far.
    pub fn counts(&self) -> (usize, usize) {
        (self.signals.load(Ordering::SeqCst), self.kills.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl StreamProcess for FakeProcess {
    fn start(&self) -> Result<(), ProcessError> {
        if self.fail_start {
            return Err(ProcessError::Spawn(io::Error::new(io::ErrorKind::NotFound, "exec failed")));
        }
        if !self.start_delay.is_zero() {
            std::thread::sleep(self.start_delay);
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn wait(&self) -> Result<(), ProcessError> {
        self.exited.cancelled().await;
        match &self.wait_err {
            Some(status) => Err(ProcessError::exited(status.clone())),
            None => Ok(()),
        }
    }

    fn signal(&self, _signal: Signal) -> Result<(), ProcessError> {
        self.signals.fetch_add(1, Ordering::SeqCst);
        if !self.started.load(Ordering::SeqCst) {
            return Err(ProcessError::NotStarted);
        }
        if self.exit_on_signal {
            self.exit();
        }
        Ok(())
    }

    fn kill(&self) -> Result<(), ProcessError> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        if self.exit_on_kill {
            self.exit();
        }
        Ok(())
    }

    fn pid(&self) -> u32 {
        self.pid
    }
}

/// Hands out queued fake processes and records every invocation.
#[derive(Default)]
pub struct FakeFactory {
    queue: Mutex<VecDeque<Arc<FakeProcess>>>,
    calls: Mutex<Vec<(String, Vec<String>)>>,
}

impl FakeFactory {
    pub fn new(processes: Vec<Arc<FakeProcess>>) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(processes.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

impl ProcessFactory for FakeFactory {
    fn command(&self, program: &str, args: &[String]) -> Arc<dyn StreamProcess> {
        self.calls.lock().unwrap().push((program.to_string(), args.to_vec()));
        self.queue
            .lock()
            .unwrap()
            .pop_front()
            .expect("no fake processes remaining")
    }
}

pub fn manager(factory: &Arc<FakeFactory>, stop_timeout: Duration) -> Manager {
    Manager::with_factory(
        ManagerOptions { ffmpeg_binary: String::new(), stop_timeout },
        factory.clone(),
    )
}

pub fn hls(input: &str, dir: &TempDir) -> HlsConfig {
    HlsConfig::new(input, dir.path().to_string_lossy())
}

pub fn no_cancel() -> CancellationToken {
    CancellationToken::new()
}

pub async fn wait_for_state(manager: &Manager, id: &str, state: StreamState) -> StreamStatus {
    let deadline = Instant::now() + Duration::from_secs(1);
    loop {
        if let Some(status) = manager.status(id).await {
            if status.state == state {
                return status;
            }
        }
        assert!(Instant::now() < deadline, "stream {id} never reached {state}");
        sleep(Duration::from_millis(10)).await;
    }
}

pub fn contains_sequence(values: &[String], seq: &[&str]) -> bool {
    values
        .windows(seq.len())
        .any(|window| window.iter().zip(seq).all(|(a, b)| a == b))
}
