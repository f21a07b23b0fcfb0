use anyhow::Context;
use clap::Parser;
use parley_core::{AgentStatus, MessageAuthor};
use parley_sync::{
    start, Delivery, EngineConfig, EngineError, EngineHandle, EngineSnapshot, LogEntry,
    WsTransport,
};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:8765/sync";

#[derive(Parser, Debug)]
#[command(name = "parley-console")]
struct Args {
    #[arg(long, default_value = "")]
    server_url: String,
    #[arg(long, default_value = "")]
    conversation: String,
    #[arg(long, default_value_t = 30)]
    confirm_timeout: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging();

    let server_url = resolve_server_url(&args.server_url);
    let url =
        Url::parse(&server_url).with_context(|| format!("invalid server url: {server_url}"))?;

    let mut config = EngineConfig::default();
    if let Some(conversation_id) = resolve_conversation_id(&args.conversation) {
        config.conversation_id = conversation_id;
    }
    config.confirm_timeout = Duration::from_secs(args.confirm_timeout);

    info!(event = "console_start", url = %url, conversation_id = %config.conversation_id);
    println!("parley console; type a message, or /status /clear /reset [id] /quit");

    let handle = start(WsTransport::new(url), config);
    let updates = handle.subscribe();
    let printer = tokio::spawn(print_updates(updates));

    run_input_loop(&handle).await?;

    handle.shutdown().await;
    let _ = printer.await;
    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_server_url(flag: &str) -> String {
    if !flag.trim().is_empty() {
        return flag.to_string();
    }
    if let Ok(value) = std::env::var("PARLEY_SERVER_URL") {
        if !value.trim().is_empty() {
            return value;
        }
    }
    DEFAULT_SERVER_URL.to_string()
}

fn resolve_conversation_id(flag: &str) -> Option<String> {
    if !flag.trim().is_empty() {
        return Some(flag.to_string());
    }
    if let Ok(value) = std::env::var("PARLEY_CONVERSATION_ID") {
        if !value.trim().is_empty() {
            return Some(value);
        }
    }
    None
}

async fn run_input_loop(handle: &EngineHandle) -> anyhow::Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("stdin read failed")? else {
                    return Ok(());
                };
                if !handle_line(handle, line.trim()).await? {
                    return Ok(());
                }
            }
            _ = tokio::signal::ctrl_c() => {
                return Ok(());
            }
        }
    }
}

async fn handle_line(handle: &EngineHandle, line: &str) -> anyhow::Result<bool> {
    match line {
        "" => {}
        "/quit" => return Ok(false),
        "/status" => handle.request_status().await.context("engine stopped")?,
        "/clear" => handle.clear_history().await.context("engine stopped")?,
        "/reset" => handle
            .reset_conversation(None)
            .await
            .context("engine stopped")?,
        _ => {
            if let Some(rest) = line.strip_prefix("/reset ") {
                handle
                    .reset_conversation(Some(rest.trim().to_string()))
                    .await
                    .context("engine stopped")?;
            } else if line.starts_with('/') {
                println!("commands: /status /clear /reset [conversation-id] /quit");
            } else if let Err(err) = handle.send(line).await {
                match err {
                    EngineError::EmptyMessage => {}
                    EngineError::Terminated => anyhow::bail!("engine stopped"),
                }
            }
        }
    }
    Ok(true)
}

async fn print_updates(mut updates: broadcast::Receiver<EngineSnapshot>) {
    let mut view = ConsoleView::default();
    loop {
        match updates.recv().await {
            Ok(snapshot) => view.render(&snapshot),
            Err(RecvError::Lagged(skipped)) => {
                warn!("updates_lagged: skipped={skipped}");
            }
            Err(RecvError::Closed) => return,
        }
    }
}

/// Prints transcript lines once as they appear. In-place delivery changes are
/// not re-rendered; fault lines carry those updates to the user.
#[derive(Default)]
struct ConsoleView {
    printed: usize,
    connected: Option<bool>,
    status_line: Option<String>,
}

impl ConsoleView {
    fn render(&mut self, snapshot: &EngineSnapshot) {
        if self.connected != Some(snapshot.connected) {
            self.connected = Some(snapshot.connected);
            println!(
                "-- {}",
                if snapshot.connected {
                    "connected"
                } else {
                    "disconnected"
                }
            );
        }
        if snapshot.messages.len() < self.printed {
            self.printed = 0;
            println!("-- transcript replaced");
        }
        for entry in &snapshot.messages[self.printed..] {
            println!("{}", format_entry(entry));
        }
        self.printed = snapshot.messages.len();

        let status_line = format_status(&snapshot.status);
        if self.status_line.as_deref() != Some(&status_line) {
            println!("-- {status_line}");
            self.status_line = Some(status_line);
        }
        if let Some(fault) = &snapshot.fault {
            println!("!! {fault}");
        }
    }
}

fn format_entry(entry: &LogEntry) -> String {
    let author = match entry.author {
        MessageAuthor::User => "you",
        MessageAuthor::Agent => "agent",
    };
    let mark = match entry.delivery {
        Delivery::Pending => " [sending]",
        Delivery::Failed => " [failed]",
        Delivery::Confirmed => "",
    };
    format!(
        "[{}] {author}: {}{mark}",
        entry.timestamp.format("%H:%M:%S"),
        entry.content
    )
}

fn format_status(status: &AgentStatus) -> String {
    let mut line = format!("agent {}", status.state);
    if let Some(task) = &status.current_task {
        line.push_str(&format!(" ({task})"));
    }
    line
}
