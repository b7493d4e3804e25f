use crate::error::{Result, StreamError};
use crate::parse::hls::{build_hls_args, normalize_config, HlsConfig};
use crate::process::{ProcessFactory, StreamProcess, TokioProcessFactory};
use chrono::{DateTime, Utc};
use nix::sys::signal::Signal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const DEFAULT_FFMPEG_BINARY: &str = "ffmpeg";
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(8);


// Shared registry of managed streams.
// Every state transition happens while holding the write lock.
type SupervisorState = Arc<RwLock<Registry>>;

#[derive(Default)]
struct Registry {
    streams: BTreeMap<String, ManagedStream>,
    next_generation: u64,
}

impl Registry {
    /// The entry for `id`, only if it is still the instance that was launched as `generation`.
    fn current_mut(&mut self, id: &str, generation: u64) -> Option<&mut ManagedStream> {
        self.streams
            .get_mut(id)
            .filter(|stream| stream.generation == generation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl StreamState {
    pub fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Stopping)
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.pad(s)
    }
}

/// Point-in-time copy of one stream, detached from the registry.
#[derive(Debug, Clone, Serialize)]
pub struct StreamStatus {
    pub stream_id: String,
    pub state: StreamState,
    pub pid: u32,
    pub config: HlsConfig,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    /// Empty unless the stream failed.
    pub last_error: String,
    pub playlist_path: String,
    pub command_binary: String,
    pub command_args: Vec<String>,
}

struct ManagedStream {
    id: String,
    generation: u64,
    state: StreamState,
    config: HlsConfig,
    pid: u32,
    last_error: String,
    started_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    stopped_at: Option<DateTime<Utc>>,
    playlist_path: String,
    binary: String,
    args: Vec<String>,
    process: Arc<dyn StreamProcess>,
    // Cancelled exactly once, when the process has been reaped or failed to launch.
    done: CancellationToken,
    stop_requested: bool,
}

impl ManagedStream {
    fn to_status(&self) -> StreamStatus {
        StreamStatus {
            stream_id: self.id.clone(),
            state: self.state,
            pid: self.pid,
            config: self.config.clone(),
            started_at: self.started_at,
            updated_at: self.updated_at,
            stopped_at: self.stopped_at,
            last_error: self.last_error.clone(),
            playlist_path: self.playlist_path.clone(),
            command_binary: self.binary.clone(),
            command_args: self.args.clone(),
        }
    }

    fn finish(&mut self, state: StreamState, now: DateTime<Utc>) {
        self.state = state;
        self.updated_at = now;
        self.stopped_at = Some(now);
        self.done.cancel();
    }
}

#[derive(Debug, Clone, Default)]
pub struct ManagerOptions {
    /// Blank means [`DEFAULT_FFMPEG_BINARY`].
    pub ffmpeg_binary: String,
    /// Zero means [`DEFAULT_STOP_TIMEOUT`].
    pub stop_timeout: Duration,
}

/// Supervises one ffmpeg HLS process per stream id.
pub struct Manager {
    state: SupervisorState,
    factory: Arc<dyn ProcessFactory>,
    ffmpeg_binary: String,
    stop_timeout: Duration,
}

#[derive(Debug, PartialEq, Eq)]
enum WaitOutcome {
    Done,
    Cancelled,
    TimedOut,
}

fn required_id(stream_id: &str) -> Result<String> {
    match stream_id.trim() {
        "" => Err(StreamError::MissingId),
        id => Ok(id.to_string()),
    }
}

impl Manager {
    pub fn new(opts: ManagerOptions) -> Self {
        Self::with_factory(opts, Arc::new(TokioProcessFactory))
    }

    pub fn with_factory(opts: ManagerOptions, factory: Arc<dyn ProcessFactory>) -> Self {
        let ffmpeg_binary = match opts.ffmpeg_binary.trim() {
            "" => DEFAULT_FFMPEG_BINARY.to_string(),
            bin => bin.to_string(),
        };
        let stop_timeout = if opts.stop_timeout.is_zero() {
            DEFAULT_STOP_TIMEOUT
        } else {
            opts.stop_timeout
        };

        Self {
            state: Arc::new(RwLock::new(Registry::default())),
            factory,
            ffmpeg_binary,
            stop_timeout,
        }
    }

    pub fn ffmpeg_binary(&self) -> &str {
        &self.ffmpeg_binary
    }

    pub fn stop_timeout(&self) -> Duration {
        self.stop_timeout
    }



    /*
        @@@
        @start();
        . Validates the id and config, creates the output directory and builds the ffmpeg arguments.
        . Refuses to touch a stream that is still active; a stopped or failed record for the same id is replaced.
        . Launches the process outside the lock. A launch failure leaves a Failed record behind for inspection.
        . On success marks the stream Running and hands the process to a reaper task bound to this exact record.
    */
    pub async fn start(&self, stream_id: &str, cfg: &HlsConfig) -> Result<StreamStatus> {
        let id = required_id(stream_id)?;
        let norm = normalize_config(cfg)?;
        tokio::fs::create_dir_all(&norm.output_dir)
            .await
            .map_err(|source| StreamError::OutputDir {
                path: PathBuf::from(&norm.output_dir),
                source,
            })?;

        let args = build_hls_args(&norm);
        let playlist_path = norm.playlist_path();
        let now = Utc::now();

        let (process, done, generation) = {
            let mut registry = self.state.write().await;
            if registry
                .streams
                .get(&id)
                .is_some_and(|existing| existing.state.is_active())
            {
                warn!(stream = %id, "start refused, stream already running");
                return Err(StreamError::AlreadyRunning(id));
            }

            registry.next_generation += 1;
            let generation = registry.next_generation;
            let process = self.factory.command(&self.ffmpeg_binary, &args);
            let done = CancellationToken::new();
            registry.streams.insert(
                id.clone(),
                ManagedStream {
                    id: id.clone(),
                    generation,
                    state: StreamState::Starting,
                    config: norm,
                    pid: 0,
                    last_error: String::new(),
                    started_at: now,
                    updated_at: now,
                    stopped_at: None,
                    playlist_path,
                    binary: self.ffmpeg_binary.clone(),
                    args,
                    process: process.clone(),
                    done: done.clone(),
                    stop_requested: false,
                },
            );
            (process, done, generation)
        };

        info!(stream = %id, binary = %self.ffmpeg_binary, "launching encoder");
        if let Err(source) = process.start() {
            error!(stream = %id, error = %source, "encoder failed to launch");
            let mut registry = self.state.write().await;
            if let Some(stream) = registry.current_mut(&id, generation) {
                stream.last_error = source.to_string();
                stream.finish(StreamState::Failed, Utc::now());
            }
            return Err(StreamError::Launch { id, source });
        }

        let pid = process.pid();
        let (status, late_stop) = {
            let mut registry = self.state.write().await;
            let Some(stream) = registry.current_mut(&id, generation) else {
                // The record was replaced mid-launch; nothing would supervise this encoder.
                warn!(stream = %id, pid, "record superseded during launch, killing encoder");
                let _ = process.kill();
                tokio::spawn(reap(self.state.clone(), id.clone(), generation, process, done));
                return Err(StreamError::NotFound(id));
            };
            stream.pid = pid;
            stream.updated_at = Utc::now();
            // A concurrent stop may already have moved us to Stopping.
            if stream.state == StreamState::Starting {
                stream.state = StreamState::Running;
            }
            (stream.to_status(), stream.stop_requested)
        };
        info!(stream = %id, pid, "encoder running");

        if late_stop {
            // The stopper's interrupt raced the launch and never reached the process.
            let _ = process.signal(Signal::SIGINT);
        }

        tokio::spawn(reap(self.state.clone(), id, generation, process, done));
        Ok(status)
    }



    /*
        @@@
        @stop();
        . Marks the stream Stopping and sends SIGINT so ffmpeg can finalize the playlist.
        . Waits for the reaper, the caller's token or stop_timeout, whichever comes first.
        . On timeout sends SIGKILL and waits once more; if the process is still alive the timeout is reported.
        . A stream that is already stopped or failed is left alone.
    */
    pub async fn stop(&self, cancel: &CancellationToken, stream_id: &str) -> Result<()> {
        let id = required_id(stream_id)?;

        let (process, done) = {
            let mut registry = self.state.write().await;
            let Some(stream) = registry.streams.get_mut(&id) else {
                return Err(StreamError::NotFound(id));
            };
            if !stream.state.is_active() {
                return Ok(());
            }
            stream.stop_requested = true;
            stream.state = StreamState::Stopping;
            stream.updated_at = Utc::now();
            (stream.process.clone(), stream.done.clone())
        };
        let timeout = self.stop_timeout;

        info!(stream = %id, pid = process.pid(), "sending interrupt to encoder");
        if let Err(e) = process.signal(Signal::SIGINT) {
            debug!(stream = %id, error = %e, "interrupt not delivered");
        }
        match wait_done(cancel, &done, timeout).await {
            WaitOutcome::Done => return Ok(()),
            WaitOutcome::Cancelled => return Err(StreamError::Cancelled(id)),
            WaitOutcome::TimedOut => {}
        }

        warn!(stream = %id, ?timeout, "encoder ignored interrupt, sending SIGKILL");
        if let Err(e) = process.kill() {
            debug!(stream = %id, error = %e, "kill not delivered");
        }
        match wait_done(cancel, &done, timeout).await {
            WaitOutcome::Done => Ok(()),
            WaitOutcome::Cancelled => Err(StreamError::Cancelled(id)),
            WaitOutcome::TimedOut => {
                error!(stream = %id, ?timeout, "encoder still alive after SIGKILL");
                Err(StreamError::StopTimeout(id))
            }
        }
    }

    /// Stops the stream and starts it again under the same id with `cfg`.
    ///
    /// Not atomic: if the restart fails the stream stays stopped (or failed).
    pub async fn update(
        &self,
        cancel: &CancellationToken,
        stream_id: &str,
        cfg: &HlsConfig,
    ) -> Result<StreamStatus> {
        let id = required_id(stream_id)?;
        normalize_config(cfg)?;

        if !self.state.read().await.streams.contains_key(&id) {
            return Err(StreamError::NotFound(id));
        }

        self.stop(cancel, &id).await?;
        info!(stream = %id, "restarting with new config");
        self.start(&id, cfg).await
    }

    /// Stops every active stream in id order, aborting on the first failure.
    pub async fn stop_all(&self, cancel: &CancellationToken) -> Result<()> {
        for id in self.list_running_ids().await {
            self.stop(cancel, &id)
                .await
                .map_err(|source| StreamError::StopAll {
                    id: id.clone(),
                    source: Box::new(source),
                })?;
        }
        Ok(())
    }

    pub async fn status(&self, stream_id: &str) -> Option<StreamStatus> {
        let id = stream_id.trim();
        if id.is_empty() {
            return None;
        }
        self.state.read().await.streams.get(id).map(ManagedStream::to_status)
    }

    /// Every stream, sorted by id.
    pub async fn list(&self) -> Vec<StreamStatus> {
        self.state
            .read()
            .await
            .streams
            .values()
            .map(ManagedStream::to_status)
            .collect()
    }

    pub async fn list_running(&self) -> Vec<StreamStatus> {
        self.list()
            .await
            .into_iter()
            .filter(|status| status.state.is_active())
            .collect()
    }

    pub async fn list_running_ids(&self) -> Vec<String> {
        self.list_running()
            .await
            .into_iter()
            .map(|status| status.stream_id)
            .collect()
    }

    pub async fn remove(&self, stream_id: &str) -> Result<()> {
        let id = required_id(stream_id)?;
        let mut registry = self.state.write().await;
        match registry.streams.get(&id) {
            None => Err(StreamError::NotFound(id)),
            Some(stream) if stream.state.is_active() => Err(StreamError::Active(id)),
            Some(_) => {
                registry.streams.remove(&id);
                info!(stream = %id, "removed");
                Ok(())
            }
        }
    }
}



/*
    @@@
    @reap();
    . Blocks on the process exit, then reconciles the registry under the write lock.
    . Does nothing to the registry if the record was replaced in the meantime; only its own completion token is released.
    . A requested stop or clean exit ends in Stopped, anything else in Failed with the exit error recorded.
*/
async fn reap(
    state: SupervisorState,
    id: String,
    generation: u64,
    process: Arc<dyn StreamProcess>,
    done: CancellationToken,
) {
    let result = process.wait().await;
    let now = Utc::now();

    let mut registry = state.write().await;
    let Some(stream) = registry.current_mut(&id, generation) else {
        debug!(stream = %id, generation, "record replaced before exit, ignoring");
        done.cancel();
        return;
    };

    match result {
        Err(e) if !stream.stop_requested => {
            warn!(stream = %id, pid = stream.pid, error = %e, "encoder exited unexpectedly");
            stream.last_error = e.to_string();
            stream.finish(StreamState::Failed, now);
        }
        _ => {
            info!(stream = %id, pid = stream.pid, "encoder exited");
            stream.finish(StreamState::Stopped, now);
        }
    }
}

async fn wait_done(
    cancel: &CancellationToken,
    done: &CancellationToken,
    timeout: Duration,
) -> WaitOutcome {
    tokio::select! {
        biased;
        _ = done.cancelled() => WaitOutcome::Done,
        _ = cancel.cancelled() => WaitOutcome::Cancelled,
        _ = tokio::time::sleep(timeout) => WaitOutcome::TimedOut,
    }
}
