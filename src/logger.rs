use anyhow::Context;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};



/*
    @@@
    @logs_tracing();
    . Opens <dir>/stream-supervisor.log.YYYY-MM-DD, rolled over at midnight, creating <dir> when missing.
    . Events at INFO and above are written through a background writer thread, without ANSI colours, tagged with level and target.
    . The returned guard flushes pending lines when dropped, so main keeps it until the streams are down.
*/
pub fn logs_tracing(dir: &str) -> anyhow::Result<WorkerGuard> {
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("stream-supervisor.log")
        .build(dir)
        .with_context(|| format!("open log directory {dir}"))?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let subscriber = tracing_subscriber::fmt()
        .with_writer(writer)
        .with_max_level(Level::INFO)
        .with_ansi(false)
        .with_level(true)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("install log subscriber")?;
    Ok(guard)
}
