//! Error types for the stream manager and the process boundary.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures reported by a supervised encoder process.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("process not started")]
    NotStarted,

    #[error("spawn failed: {0}")]
    Spawn(#[source] io::Error),

    #[error("wait failed: {0}")]
    Wait(#[source] io::Error),

    #[error("{status}")]
    Exited { status: String },

    #[error("signal failed: {0}")]
    Signal(#[from] nix::errno::Errno),
}

impl ProcessError {
    pub fn exited(status: impl Into<String>) -> Self {
        Self::Exited {
            status: status.into(),
        }
    }
}

/// Errors returned by [`crate::runtime::Manager`] operations.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("stream id is required")]
    MissingId,

    #[error("invalid stream config: {0}")]
    Validation(String),

    #[error("stream {0} already running")]
    AlreadyRunning(String),

    #[error("stream {0} not found")]
    NotFound(String),

    #[error("cannot remove active stream {0}")]
    Active(String),

    #[error("create output dir {}: {source}", path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("start ffmpeg for stream {id}: {source}")]
    Launch {
        id: String,
        #[source]
        source: ProcessError,
    },

    #[error("timed out stopping stream {0}")]
    StopTimeout(String),

    #[error("stop of stream {0} cancelled")]
    Cancelled(String),

    #[error("stop {id}: {source}")]
    StopAll {
        id: String,
        #[source]
        source: Box<StreamError>,
    },
}

impl StreamError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, StreamError>;
