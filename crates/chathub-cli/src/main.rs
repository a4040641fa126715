mod frame_log;
mod render;
mod theme;

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chathub_core::logging::{self, LogConfig};
use chathub_core::query::Variant;
use chathub_core::{
    ChatClient, Config, Conversation, ConversationIdentity, MessageOptions, TurnObserver,
};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::render::ProgressPrinter;
use crate::theme as t;

// ── CLI ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(
    name = "chathub",
    version,
    about = "Interactive chat hub client: type a prompt, watch the answer stream in"
)]
struct Cli {
    /// Path to a config.toml file
    #[arg(short = 'c', long, value_name = "PATH", env = "CHATHUB_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// User token sent as the `_U` cookie
    #[arg(long, value_name = "TOKEN", env = "CHATHUB_USER_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Dump every received frame as JSON into the logs directory
    #[arg(long)]
    logs: bool,

    /// Resume the conversation stored in this identity JSON file
    #[arg(long, value_name = "FILE")]
    resume: Option<PathBuf>,

    /// Conversation style (galileo, h3precise, h3imaginative)
    #[arg(long, value_name = "VARIANT")]
    variant: Option<Variant>,

    /// Disable coloured terminal output
    #[arg(long = "no-color", env = "NO_COLOR", global = true)]
    no_color: bool,

    /// Verbose logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Delete all frame dumps from the logs directory
    ClearLogs,
}

// ── Entry point ─────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    t::init_color(cli.no_color);
    logging::init(if cli.verbose {
        LogConfig::debug()
    } else {
        LogConfig::from_env()
    });

    let mut config = Config::load(cli.config.clone())?;
    if let Some(variant) = cli.variant {
        config.variant = variant;
    }

    if let Some(Commands::ClearLogs) = cli.command {
        let dir = config.logs_dir();
        let removed = frame_log::clear(&dir)?;
        println!("{} {removed} log file(s) from {}", t::success("Removed"), dir.display());
        return Ok(());
    }

    let client = ChatClient::new(
        cli.token.as_deref().unwrap_or_default(),
        &config,
        config.extra_headers()?,
    )?;
    let mut conversation = match &cli.resume {
        Some(path) => client.resume_conversation(read_identity(path)?)?,
        None => client.new_conversation(),
    };

    let logs_dir = cli.logs.then(|| config.logs_dir());
    repl(&mut conversation, logs_dir.as_deref()).await?;

    print_identity(conversation.identity());
    Ok(())
}

// ── REPL ────────────────────────────────────────────────────────────────────

async fn repl(conversation: &mut Conversation, logs_dir: Option<&std::path::Path>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{}", t::muted("Type a prompt and press enter. :quit to exit."));

    loop {
        prompt_marker()?;
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        };
        let Some(line) = line else {
            break;
        };
        let prompt = line.trim();
        if prompt.is_empty() {
            continue;
        }
        if matches!(prompt, ":quit" | ":q" | ":exit") {
            break;
        }

        if !run_turn(conversation, prompt, logs_dir).await? {
            break;
        }
    }
    Ok(())
}

/// Send one prompt and render its progress. Returns `false` when the user
/// interrupted the turn with Ctrl-C.
async fn run_turn(
    conversation: &mut Conversation,
    prompt: &str,
    logs_dir: Option<&std::path::Path>,
) -> Result<bool> {
    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel();
    let (raw_tx, mut raw_rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let options = MessageOptions {
        observer: TurnObserver {
            progress: Some(progress_tx),
            frames: logs_dir.is_some().then_some(frames_tx),
            raw: logs_dir.is_some().then_some(raw_tx),
        },
        cancel: Some(cancel.clone()),
        ..Default::default()
    };

    let printer = tokio::spawn(async move {
        let mut printer = ProgressPrinter::default();
        let mut stdout = std::io::stdout();
        while let Some(update) = progress_rx.recv().await {
            if let Some(out) = printer.update(&update) {
                let _ = write!(stdout, "{out}");
                let _ = stdout.flush();
            }
        }
        printer.wrote_answer()
    });

    let interrupted = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        let interrupted = interrupted.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                interrupted.cancel();
                cancel.cancel();
            }
        })
    };

    let outcome = conversation.send_message(prompt, options).await;
    watcher.abort();
    // The session owned the progress sender; the printer drains and stops.
    let wrote_answer = printer.await.unwrap_or(false);

    match outcome {
        Ok(result) => {
            if !wrote_answer {
                print!("{}", result.text);
            }
            println!();
            if let Some(throttling) = result.throttling() {
                debug!(?throttling, "turn throttling");
            }
        }
        Err(err) => {
            println!();
            eprintln!("{} {err}", t::error("error:"));
        }
    }

    if let (Some(dir), Some(conversation_id)) = (logs_dir, conversation.conversation_id()) {
        let mut frames = Vec::new();
        while let Ok(frame) = frames_rx.try_recv() {
            frames.push(frame);
        }
        if let Err(err) = frame_log::write_frames(dir, conversation_id, &frames) {
            warn!(%err, "failed to write frame log");
        }
        let mut payloads = Vec::new();
        while let Ok(payload) = raw_rx.try_recv() {
            payloads.push(payload);
        }
        if let Err(err) = frame_log::write_raw(dir, conversation_id, &payloads) {
            warn!(%err, "failed to write raw payload log");
        }
    }

    Ok(!interrupted.is_cancelled())
}

fn prompt_marker() -> Result<()> {
    let mut stdout = std::io::stdout();
    write!(stdout, "{} ", t::accent(">"))?;
    stdout.flush()?;
    Ok(())
}

// ── Identity persistence ────────────────────────────────────────────────────

fn read_identity(path: &std::path::Path) -> Result<ConversationIdentity> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

/// Print the identity so the conversation can be resumed with `--resume`.
fn print_identity(identity: Option<&ConversationIdentity>) {
    let Some(identity) = identity else {
        return;
    };
    match serde_json::to_string_pretty(identity) {
        Ok(json) => {
            println!("{}", t::muted("Resume this conversation with --resume <file> containing:"));
            println!("{json}");
        }
        Err(err) => warn!(%err, "failed to serialize conversation identity"),
    }
}
