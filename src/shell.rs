use rustyline::{Editor, Helper, Config, error::ReadlineError, Context};
use rustyline::completion::{Completer, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use std::future::Future;
use std::path::Path;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::error;

const COMMANDS: &[&str] = &[
    "status", "list", "reload", "start", "stop", "update", "remove", "help", "exit",
];


#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    /// `status` alone lists every stream.
    Status(Option<String>),
    List,
    Reload,
    Start(String),
    Stop(String),
    Update(String),
    Remove(String),
    Help,
    Exit,
    Unknown(String),
}

/*
    @@@
    @parse_command();
    . Splits a trimmed input line into a command word and an optional stream name.
    . Commands that act on one stream require the name; without it the line is reported as unknown.
*/
pub fn parse_command(line: &str) -> ShellCommand {
    let input = line.trim();
    let (word, rest) = match input.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (input, ""),
    };
    let name = (!rest.is_empty()).then(|| rest.to_string());

    match (word, name) {
        ("status", name) => ShellCommand::Status(name),
        ("list", None) => ShellCommand::List,
        ("reload", None) => ShellCommand::Reload,
        ("start", Some(name)) => ShellCommand::Start(name),
        ("stop", Some(name)) => ShellCommand::Stop(name),
        ("update", Some(name)) => ShellCommand::Update(name),
        ("remove", Some(name)) => ShellCommand::Remove(name),
        ("help", None) => ShellCommand::Help,
        ("exit", None) | ("quit", None) => ShellCommand::Exit,
        _ => ShellCommand::Unknown(input.to_string()),
    }
}

pub fn help_text() -> &'static str {
    "status [name]  show one or all streams\n\
     list           show active streams\n\
     reload         re-read the config file and reconcile\n\
     start <name>   start a configured stream\n\
     stop <name>    stop a stream (SIGINT, then SIGKILL)\n\
     update <name>  restart a stream with its configured settings\n\
     remove <name>  forget a stopped or failed stream\n\
     exit           stop every stream and quit"
}



/*
    @@@
    @complete_line();
    . Completes the word under the cursor: a command name in first position, a stream name after a command.
    . Returns the byte offset where the replacement begins together with the sorted candidates.
*/
pub fn complete_line(streams: &[String], line: &str, pos: usize) -> (usize, Vec<String>) {
    let head = line.get(..pos).unwrap_or(line);
    let prefix = head.rsplit(char::is_whitespace).next().unwrap_or("");
    let word_start = head.len() - prefix.len();

    let mut candidates: Vec<String> = if head[..word_start].trim().is_empty() {
        COMMANDS
            .iter()
            .filter(|cmd| cmd.starts_with(prefix))
            .map(|cmd| cmd.to_string())
            .collect()
    } else {
        streams
            .iter()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect()
    };
    candidates.sort();
    (word_start, candidates)
}

// rustyline helper backed by complete_line().
struct StreamCompleter {
    streams: Vec<String>,
}

impl Helper for StreamCompleter {}
impl Hinter for StreamCompleter {
    type Hint = String;
}
impl Highlighter for StreamCompleter {}
impl Validator for StreamCompleter {}
impl Completer for StreamCompleter {
    type Candidate = Pair;

    fn complete(&self, line: &str, pos: usize, _ctx: &Context<'_>) -> rustyline::Result<(usize, Vec<Pair>)> {
        let (start, words) = complete_line(&self.streams, line, pos);
        let pairs = words
            .into_iter()
            .map(|word| Pair { display: word.clone(), replacement: word })
            .collect();
        Ok((start, pairs))
    }
}

/// Why the operator shell returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellExit {
    /// `exit`, Ctrl-C, Ctrl-D or a terminal error.
    Closed,
    /// The shutdown token fired while the prompt was waiting.
    Shutdown,
}

struct ShellRequest {
    command: ShellCommand,
    handled: oneshot::Sender<()>,
}

fn read_loop(history_dir: &str, streams: Vec<String>, requests: mpsc::Sender<ShellRequest>) -> rustyline::Result<()> {
    let mut rl = Editor::with_config(Config::builder().build())?;
    rl.set_helper(Some(StreamCompleter { streams }));
    let history = Path::new(history_dir).join("history.txt");
    let _ = rl.load_history(&history);

    loop {
        let line = match rl.readline("stream-supervisor> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => {
                rl.save_history(&history)?;
                return Err(err);
            }
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        rl.add_history_entry(input)?;
        // Saved per line: a termination signal may end the process while we sit in readline().
        rl.save_history(&history)?;

        let command = match parse_command(input) {
            ShellCommand::Exit => break,
            command => command,
        };
        let (handled, wait) = oneshot::channel();
        if requests.blocking_send(ShellRequest { command, handled }).is_err() {
            break;
        }
        // Keep the prompt off the screen until the command's output is printed.
        let _ = wait.blocking_recv();
    }

    rl.save_history(&history)?;
    Ok(())
}

/*
    @@@
    @run_shell();
    . Runs the rustyline prompt on its own thread, with history in <history_dir>/history.txt and tab completion for `streams`.
    . Each parsed command is awaited through on_command before the next prompt is shown.
    . Returns Closed on `exit`, Ctrl-C or Ctrl-D, and Shutdown as soon as `shutdown` is cancelled.
*/
pub async fn run_shell<Fut, OnCommand>(
    history_dir: &str,
    streams: Vec<String>,
    shutdown: &CancellationToken,
    mut on_command: OnCommand,
) -> ShellExit
where
    OnCommand: FnMut(ShellCommand) -> Fut,
    Fut: Future<Output = ()>,
{
    let (tx, mut rx) = mpsc::channel(1);
    let history_dir = history_dir.to_string();
    std::thread::spawn(move || {
        if let Err(e) = read_loop(&history_dir, streams, tx) {
            error!(error = %e, "operator shell failed");
            eprintln!("Error: {}", e);
        }
    });

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => return ShellExit::Shutdown,
            request = rx.recv() => match request {
                Some(ShellRequest { command, handled }) => {
                    on_command(command).await;
                    let _ = handled.send(());
                }
                None => return ShellExit::Closed,
            },
        }
    }
}
