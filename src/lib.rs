/* src/lib.rs */

// Re-export modules for both binary and tests
pub mod error;
pub mod parse;
pub mod process;
pub mod runtime;
pub mod control;
pub mod shell;
pub mod logger;

pub use error::{ProcessError, StreamError};
pub use parse::HlsConfig;
pub use process::{ProcessFactory, StreamProcess, TokioProcessFactory};
pub use runtime::{Manager, ManagerOptions, StreamState, StreamStatus};
