use crate::error::{Result, StreamError};
use crate::parse::{normalize_config, Config};
use crate::runtime::{Manager, StreamStatus};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// What one `apply_config` pass did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub started: Vec<String>,
    pub updated: Vec<String>,
    pub stopped: Vec<String>,
    pub failed: Vec<String>,
}



/*
    @@@
    @apply_config();
    . Starts configured streams that are not active and have autostart set.
    . Restarts active streams whose normalized config differs from what they were launched with.
    . Stops active streams that disappeared from the config file.
    . A failing stream is logged and recorded in the report; the others are still reconciled.
*/
pub async fn apply_config(
    cfg: &Config,
    manager: &Manager,
    cancel: &CancellationToken,
) -> ReconcileReport {
    let mut report = ReconcileReport::default();

    for (name, entry) in &cfg.streams {
        match manager.status(name).await {
            Some(current) if current.state.is_active() => {
                let changed = match normalize_config(&entry.hls) {
                    Ok(norm) => norm != current.config,
                    Err(_) => true,
                };
                if !changed {
                    continue;
                }
                match manager.update(cancel, name, &entry.hls).await {
                    Ok(status) => {
                        info!(stream = %name, pid = status.pid, "config changed, restarted");
                        report.updated.push(name.clone());
                    }
                    Err(e) => {
                        error!(stream = %name, error = %e, "restart after config change failed");
                        report.failed.push(name.clone());
                    }
                }
            }
            _ if entry.autostart => match manager.start(name, &entry.hls).await {
                Ok(status) => {
                    info!(stream = %name, pid = status.pid, "autostarted");
                    report.started.push(name.clone());
                }
                Err(e) => {
                    error!(stream = %name, error = %e, "autostart failed");
                    report.failed.push(name.clone());
                }
            },
            _ => {}
        }
    }

    for id in manager.list_running_ids().await {
        if cfg.streams.contains_key(&id) {
            continue;
        }
        match manager.stop(cancel, &id).await {
            Ok(()) => {
                info!(stream = %id, "no longer configured, stopped");
                report.stopped.push(id);
            }
            Err(e) => {
                error!(stream = %id, error = %e, "failed to stop unconfigured stream");
                report.failed.push(id);
            }
        }
    }

    report
}


pub async fn start_stream(name: &str, cfg: &Config, manager: &Manager) -> Result<StreamStatus> {
    let Some(entry) = cfg.streams.get(name) else {
        eprintln!("No such stream in config: `{}`", name);
        return Err(StreamError::NotFound(name.to_string()));
    };
    match manager.start(name, &entry.hls).await {
        Ok(status) => {
            println!("Started `{}` (pid {}) -> {}", name, status.pid, status.playlist_path);
            Ok(status)
        }
        Err(e) => {
            eprintln!("Failed to start `{}`: {}", name, e);
            Err(e)
        }
    }
}

pub async fn update_stream(
    name: &str,
    cfg: &Config,
    manager: &Manager,
    cancel: &CancellationToken,
) -> Result<StreamStatus> {
    let Some(entry) = cfg.streams.get(name) else {
        eprintln!("No such stream in config: `{}`", name);
        return Err(StreamError::NotFound(name.to_string()));
    };
    match manager.update(cancel, name, &entry.hls).await {
        Ok(status) => {
            println!("Restarted `{}` (pid {})", name, status.pid);
            Ok(status)
        }
        Err(e) => {
            eprintln!("Failed to update `{}`: {}", name, e);
            Err(e)
        }
    }
}

pub async fn stop_stream(name: &str, manager: &Manager, cancel: &CancellationToken) -> Result<()> {
    let result = manager.stop(cancel, name).await;
    match &result {
        Ok(()) => println!("Stopped `{}`", name),
        Err(e) => eprintln!("Failed to stop `{}`: {}", name, e),
    }
    result
}

pub async fn remove_stream(name: &str, manager: &Manager) -> Result<()> {
    let result = manager.remove(name).await;
    match &result {
        Ok(()) => println!("Removed `{}`", name),
        Err(e) => eprintln!("Failed to remove `{}`: {}", name, e),
    }
    result
}

/// Prints one stream, or every stream when `name` is `None`.
pub async fn print_status(name: Option<&str>, manager: &Manager, running_only: bool) {
    let statuses = match name {
        Some(name) => match manager.status(name).await {
            Some(status) => vec![status],
            None => {
                println!("No such stream: {}", name);
                return;
            }
        },
        None if running_only => manager.list_running().await,
        None => manager.list().await,
    };

    if statuses.is_empty() {
        println!("No streams");
    }
    for status in &statuses {
        println!("{}", format_status(status));
    }
}

pub fn format_status(status: &StreamStatus) -> String {
    let mut line = format!(
        "{:<16} {:<9} pid={:<7} {}",
        status.stream_id, status.state, status.pid, status.playlist_path
    );
    if !status.last_error.is_empty() {
        line.push_str(&format!("  error: {}", status.last_error));
    }
    line
}
