use anyhow::Context;
use futures::stream::StreamExt;
use nix::sys::termios::{tcgetattr, tcsetattr, SetArg};
use signal_hook::consts::signal::{SIGHUP, SIGQUIT, SIGTERM};
use signal_hook_tokio::Signals;
use std::sync::{Arc, Mutex, PoisonError};
use stream_supervisor::control::{
    apply_config, print_status, remove_stream, start_stream, stop_stream, update_stream,
};
use stream_supervisor::logger::logs_tracing;
use stream_supervisor::parse::{parser, Config};
use stream_supervisor::runtime::Manager;
use stream_supervisor::shell::{help_text, run_shell, ShellCommand, ShellExit};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

const DEFAULT_CONFIG_PATH: &str = "config/streams.yml";

#[derive(Clone)]
struct Supervisor {
    config_path: Arc<str>,
    config: Arc<RwLock<Config>>,
    manager: Arc<Manager>,
    // Cancelled on SIGTERM/SIGQUIT: in-flight shell stops give up waiting and the shell returns.
    shutdown: CancellationToken,
    log_guard: Arc<Mutex<Option<WorkerGuard>>>,
}

impl Supervisor {
    async fn reload(&self) {
        match parser(&self.config_path) {
            Ok(cfg) => {
                let report = apply_config(&cfg, &self.manager, &self.shutdown).await;
                info!(?report, "config reloaded");
                println!(
                    "Reloaded: {} started, {} restarted, {} stopped, {} failed",
                    report.started.len(),
                    report.updated.len(),
                    report.stopped.len(),
                    report.failed.len()
                );
                *self.config.write().await = cfg;
            }
            Err(e) => {
                error!(error = %format!("{e:#}"), "reload failed");
                eprintln!("Reload failed: {:#}", e);
            }
        }
    }

    async fn handle(&self, cmd: ShellCommand) {
        match cmd {
            ShellCommand::Status(name) => print_status(name.as_deref(), &self.manager, false).await,
            ShellCommand::List => print_status(None, &self.manager, true).await,
            ShellCommand::Reload => self.reload().await,
            ShellCommand::Start(name) => {
                let cfg = self.config.read().await;
                let _ = start_stream(&name, &cfg, &self.manager).await;
            }
            ShellCommand::Update(name) => {
                let cfg = self.config.read().await;
                let _ = update_stream(&name, &cfg, &self.manager, &self.shutdown).await;
            }
            ShellCommand::Stop(name) => {
                let _ = stop_stream(&name, &self.manager, &self.shutdown).await;
            }
            ShellCommand::Remove(name) => {
                let _ = remove_stream(&name, &self.manager).await;
            }
            ShellCommand::Help => println!("{}", help_text()),
            ShellCommand::Exit => {}
            ShellCommand::Unknown(other) => println!("Unknown command: {}", other),
        }
    }

    /// Stops every stream with a fresh token, independent of `shutdown`.
    async fn stop_streams(&self) {
        info!("stopping all streams");
        if let Err(e) = self.manager.stop_all(&CancellationToken::new()).await {
            error!(error = %e, "shutdown left a stream running");
            eprintln!("{}", e);
        }
    }

    fn flush_logs(&self) {
        drop(self.log_guard.lock().unwrap_or_else(PoisonError::into_inner).take());
    }
}

async fn handle_signals(mut signals: Signals, supervisor: Supervisor) {
    while let Some(signal) = signals.next().await {
        match signal {
            SIGHUP => {
                info!("SIGHUP received, reloading");
                supervisor.reload().await;
            }
            SIGTERM | SIGQUIT => {
                info!(signal, "termination signal received");
                // The shell returns on this and main does the orderly stop.
                supervisor.shutdown.cancel();
                return;
            }
            _ => {}
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let cfg = parser(&config_path)?;
    let guard = logs_tracing(&cfg.supervisor.logdir)?;

    let manager = Arc::new(Manager::new(cfg.manager_options()));
    info!(
        config = %config_path,
        ffmpeg = manager.ffmpeg_binary(),
        stop_timeout = ?manager.stop_timeout(),
        "supervisor starting"
    );

    let logdir = cfg.supervisor.logdir.clone();
    let supervisor = Supervisor {
        config_path: Arc::from(config_path.as_str()),
        config: Arc::new(RwLock::new(cfg)),
        manager,
        shutdown: CancellationToken::new(),
        log_guard: Arc::new(Mutex::new(Some(guard))),
    };

    {
        let cfg = supervisor.config.read().await;
        let report = apply_config(&cfg, &supervisor.manager, &supervisor.shutdown).await;
        println!(
            "Autostarted {} stream(s), {} failed",
            report.started.len(),
            report.failed.len()
        );
    }

    let signals = Signals::new([SIGHUP, SIGTERM, SIGQUIT]).context("install signal handlers")?;
    let signals_handle = signals.handle();
    let signal_task = tokio::spawn(handle_signals(signals, supervisor.clone()));

    // rustyline puts the tty in raw mode while it waits for a line.
    let saved_tty = tcgetattr(std::io::stdin()).ok();
    let names: Vec<String> = supervisor.config.read().await.streams.keys().cloned().collect();
    let exit = run_shell(&logdir, names, &supervisor.shutdown, |cmd| {
        let supervisor = supervisor.clone();
        async move { supervisor.handle(cmd).await }
    })
    .await;

    if exit == ShellExit::Shutdown {
        if let Some(tty) = &saved_tty {
            let _ = tcsetattr(std::io::stdin(), SetArg::TCSANOW, tty);
        }
        println!();
    }

    signals_handle.close();
    signal_task.await.context("signal task")?;

    supervisor.stop_streams().await;
    supervisor.flush_logs();
    Ok(())
}
