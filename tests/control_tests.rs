mod common;

use common::{manager, no_cancel, wait_for_state, FakeFactory, FakeProcess};
use std::time::Duration;
use stream_supervisor::control::{apply_config, format_status, start_stream};
use stream_supervisor::parse::{parse_str, Config};
use stream_supervisor::runtime::DEFAULT_STOP_TIMEOUT;
use stream_supervisor::shell::{complete_line, parse_command, run_shell, ShellCommand, ShellExit};
use stream_supervisor::{Manager, StreamError, StreamState};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn config_for(dir: &TempDir, streams: &[(&str, &str, bool)]) -> Config {
    if streams.is_empty() {
        return parse_str("streams: {}").unwrap();
    }
    let mut yaml = String::from("streams:\n");
    for (name, input, autostart) in streams {
        yaml.push_str(&format!(
            "  {name}:\n    input: {input}\n    output_dir: {}\n    autostart: {autostart}\n",
            dir.path().join(name).display()
        ));
    }
    parse_str(&yaml).unwrap()
}

#[test]
fn test_parse_full_config() {
    let cfg = parse_str(
        r#"
supervisor:
  ffmpeg: /opt/ffmpeg/bin/ffmpeg
  stoptime: 3
streams:
  lobby:
    input: rtmp://127.0.0.1/live/lobby
    output_dir: /srv/hls/lobby
    segment_duration_secs: 4
    list_size: 10
    delete_segments: true
    extra_args: ["-preset", "veryfast"]
  archive:
    autostart: false
    input: reel.ts
    output_dir: /srv/hls/archive
"#,
    )
    .unwrap();

    assert_eq!(cfg.supervisor.logdir, "logs");
    let opts = cfg.manager_options();
    assert_eq!(opts.ffmpeg_binary, "/opt/ffmpeg/bin/ffmpeg");
    assert_eq!(opts.stop_timeout, Duration::from_secs(3));

    let lobby = &cfg.streams["lobby"];
    assert!(lobby.autostart);
    assert_eq!(lobby.hls.segment_duration_secs, 4);
    assert_eq!(lobby.hls.list_size, 10);
    assert!(lobby.hls.delete_segments);
    assert_eq!(lobby.hls.extra_args, vec!["-preset", "veryfast"]);
    assert_eq!(lobby.hls.playlist_name, "");

    assert!(!cfg.streams["archive"].autostart);
}

#[test]
fn test_empty_config_uses_defaults() {
    let cfg = parse_str("{}").unwrap();
    assert!(cfg.streams.is_empty());

    let m = Manager::new(cfg.manager_options());
    assert_eq!(m.ffmpeg_binary(), "ffmpeg");
    assert_eq!(m.stop_timeout(), DEFAULT_STOP_TIMEOUT);
}

#[test]
fn test_non_positive_stoptime_falls_back_to_default() {
    for stoptime in ["-1", "0"] {
        let cfg = parse_str(&format!("supervisor:\n  stoptime: {stoptime}\nstreams: {{}}\n")).unwrap();
        assert_eq!(cfg.manager_options().stop_timeout, Duration::ZERO);

        let m = Manager::new(cfg.manager_options());
        assert_eq!(m.stop_timeout(), DEFAULT_STOP_TIMEOUT, "stoptime {stoptime}");
    }
}

#[test]
fn test_malformed_config_is_an_error() {
    assert!(parse_str("streams: [1, 2]").is_err());
}

#[test]
fn test_parse_command() {
    assert_eq!(parse_command("status"), ShellCommand::Status(None));
    assert_eq!(parse_command(" status  cam1 "), ShellCommand::Status(Some("cam1".into())));
    assert_eq!(parse_command("list"), ShellCommand::List);
    assert_eq!(parse_command("reload"), ShellCommand::Reload);
    assert_eq!(parse_command("start cam1"), ShellCommand::Start("cam1".into()));
    assert_eq!(parse_command("stop cam1"), ShellCommand::Stop("cam1".into()));
    assert_eq!(parse_command("update cam1"), ShellCommand::Update("cam1".into()));
    assert_eq!(parse_command("remove cam1"), ShellCommand::Remove("cam1".into()));
    assert_eq!(parse_command("exit"), ShellCommand::Exit);
    assert_eq!(parse_command("help"), ShellCommand::Help);
    assert_eq!(parse_command("start"), ShellCommand::Unknown("start".into()));
    assert_eq!(parse_command("launch x"), ShellCommand::Unknown("launch x".into()));
}

#[test]
fn test_complete_line() {
    let streams = vec!["lobby".to_string(), "cam2".to_string(), "cam1".to_string()];

    assert_eq!(complete_line(&streams, "st", 2), (0, vec!["start".into(), "status".into(), "stop".into()]));
    assert_eq!(complete_line(&streams, "stop ca", 7), (5, vec!["cam1".into(), "cam2".into()]));
    assert_eq!(complete_line(&streams, "start ", 6).1.len(), 3);
    // Only the text before the cursor counts.
    assert_eq!(complete_line(&streams, "rel  trailing", 3), (0, vec!["reload".into()]));
    assert!(complete_line(&streams, "stop zz", 7).1.is_empty());
}

#[tokio::test]
async fn test_shell_returns_on_shutdown() {
    let dir = TempDir::new().unwrap();
    let shutdown = CancellationToken::new();
    shutdown.cancel();

    let mut handled = 0;
    let exit = run_shell(&dir.path().to_string_lossy(), vec![], &shutdown, |_| {
        handled += 1;
        async {}
    })
    .await;

    assert_eq!(exit, ShellExit::Shutdown);
    assert_eq!(handled, 0);
}

#[tokio::test]
async fn test_apply_config_autostarts() {
    let dir = TempDir::new().unwrap();
    let a = FakeProcess::running(1);
    let factory = FakeFactory::new(vec![a.clone()]);
    let m = manager(&factory, Duration::from_millis(100));

    let cfg = config_for(&dir, &[("a", "a.ts", true), ("manual", "m.ts", false)]);
    let report = apply_config(&cfg, &m, &no_cancel()).await;

    assert_eq!(report.started, vec!["a"]);
    assert!(report.failed.is_empty());
    assert_eq!(m.list_running_ids().await, vec!["a".to_string()]);
    assert!(m.status("manual").await.is_none());

    // Unchanged config is a no-op.
    let report = apply_config(&cfg, &m, &no_cancel()).await;
    assert_eq!(report, Default::default());
    assert_eq!(factory.calls().len(), 1);

    a.exit();
}

#[tokio::test]
async fn test_apply_config_restarts_changed_and_stops_removed() {
    let dir = TempDir::new().unwrap();
    let a1 = FakeProcess::obedient(1);
    let b = FakeProcess::obedient(2);
    let a2 = FakeProcess::running(3);
    let factory = FakeFactory::new(vec![a1.clone(), b.clone(), a2.clone()]);
    let m = manager(&factory, Duration::from_millis(200));

    let first = config_for(&dir, &[("a", "a.ts", true), ("b", "b.ts", true)]);
    apply_config(&first, &m, &no_cancel()).await;

    let second = config_for(&dir, &[("a", "a-new.ts", true)]);
    let report = apply_config(&second, &m, &no_cancel()).await;

    assert_eq!(report.updated, vec!["a"]);
    assert_eq!(report.stopped, vec!["b"]);
    assert_eq!(m.status("a").await.unwrap().config.input, "a-new.ts");
    wait_for_state(&m, "b", StreamState::Stopped).await;
    assert_eq!(a1.counts().0, 1);

    a2.exit();
}

#[tokio::test]
async fn test_apply_config_reports_failures_and_continues() {
    let dir = TempDir::new().unwrap();
    let ok = FakeProcess::running(2);
    let factory = FakeFactory::new(vec![ok.clone()]);
    let m = manager(&factory, Duration::from_millis(100));

    let cfg = config_for(&dir, &[("bad", "\"\"", true), ("good", "g.ts", true)]);
    let report = apply_config(&cfg, &m, &no_cancel()).await;

    assert_eq!(report.failed, vec!["bad"]);
    assert_eq!(report.started, vec!["good"]);

    ok.exit();
}

#[tokio::test]
async fn test_start_stream_requires_configured_name() {
    let dir = TempDir::new().unwrap();
    let factory = FakeFactory::new(vec![]);
    let m = manager(&factory, Duration::from_millis(100));
    let cfg = config_for(&dir, &[]);

    let err = start_stream("nope", &cfg, &m).await.unwrap_err();
    assert!(matches!(err, StreamError::NotFound(_)));
    assert!(factory.calls().is_empty());
}

#[tokio::test]
async fn test_format_status_shows_errors() {
    let dir = TempDir::new().unwrap();
    let broken = std::sync::Arc::new(FakeProcess { fail_start: true, ..Default::default() });
    let factory = FakeFactory::new(vec![broken]);
    let m = manager(&factory, Duration::from_millis(100));

    let cfg = config_for(&dir, &[("cam", "in.ts", true)]);
    apply_config(&cfg, &m, &no_cancel()).await;

    let line = format_status(&m.status("cam").await.unwrap());
    assert!(line.starts_with("cam"));
    assert!(line.contains("failed"));
    assert!(line.contains("error: spawn failed: exec failed"));
}
