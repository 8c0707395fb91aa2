mod config;

use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tinytask::{
    platforms, EventSequence, PlaybackHandle, PlaybackStatus, Session, SessionState,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, Level};
use tracing_subscriber::EnvFilter;

use config::Config;

#[derive(Parser)]
#[command(name = "tinytask")]
#[command(about = "Record and replay mouse and keyboard macros", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to a tinytask.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Record until the stop key or Ctrl+C, then save
    Record {
        /// File to save to (defaults to the configured default file)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Replay a saved macro
    Play {
        /// File to load (defaults to the configured default file)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
    /// Interactive command loop
    Shell,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let config = Config::discover(cli.config.as_deref())?;
    let backend = platforms::create_backend()?;
    let session = Session::new(backend.source, backend.sink, config.session_config()?);
    let printer = print_status(&session);

    let outcome = match cli.command {
        Some(Commands::Record { output }) => {
            cmd_record(&session, &output.unwrap_or_else(|| config.default_file.clone())).await
        }
        Some(Commands::Play { input }) => {
            cmd_play(&session, &input.unwrap_or_else(|| config.default_file.clone())).await
        }
        Some(Commands::Shell) | None => cmd_shell(&session, &config.default_file).await,
    };

    // The printer ends once the last session handle is gone.
    drop(session);
    let _ = tokio::time::timeout(Duration::from_millis(500), printer).await;
    outcome
}

fn init_logging() {
    let log_level = env::var("LOG_LEVEL")
        .map(|level| match level.to_lowercase().as_str() {
            "error" => Level::ERROR,
            "warn" => Level::WARN,
            "info" => Level::INFO,
            "debug" => Level::DEBUG,
            "trace" => Level::TRACE,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

/// Echo session status messages to the console
fn print_status(session: &Session) -> JoinHandle<()> {
    let mut status = session.status_stream();
    tokio::spawn(async move {
        while let Some(message) = status.next().await {
            println!("{message}");
        }
    })
}

async fn cmd_record(session: &Session, output: &Path) -> Result<()> {
    let mut state = session.watch_state();
    session.start_recording()?;

    let sequence = tokio::select! {
        _ = tokio::signal::ctrl_c() => match session.stop_recording() {
            Ok(sequence) => Some(sequence),
            // The stop key got there first.
            Err(_) => session.take_finished_recording(),
        },
        changed = state.wait_for(|s| *s == SessionState::Idle) => {
            changed?;
            session.take_finished_recording()
        }
    };

    let sequence = sequence.context("recording ended without a captured sequence")?;
    session.save_sequence(&sequence, output)?;
    Ok(())
}

async fn cmd_play(session: &Session, input: &Path) -> Result<()> {
    let sequence = session.load_sequence(input)?;
    let wait = session.play(sequence)?.wait();
    tokio::pin!(wait);

    let report = tokio::select! {
        report = &mut wait => report,
        _ = tokio::signal::ctrl_c() => {
            session.stop_playback();
            wait.await
        }
    };

    if let PlaybackStatus::Failed(reason) = report.status {
        bail!("playback failed: {reason}");
    }
    Ok(())
}

const SHELL_HELP: &str = "Commands: rec, stop, play, load [FILE], save [FILE], status, help, exit";

async fn cmd_shell(session: &Session, default_file: &Path) -> Result<()> {
    println!("tinytask v{}", env!("CARGO_PKG_VERSION"));
    println!("{SHELL_HELP}");

    let mut loaded: Option<EventSequence> = None;
    let mut playback: Option<PlaybackHandle> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        // EOF or Ctrl+C
        let Some(line) = line else { break };

        // A recording ended by its stop key replaces the loaded macro.
        if let Some(sequence) = session.take_finished_recording() {
            loaded = Some(sequence);
        }
        if playback.as_ref().is_some_and(PlaybackHandle::is_finished) {
            playback = None;
        }

        let mut words = line.split_whitespace();
        let command = words.next();
        let file = words.next().map(PathBuf::from);
        let file = file.as_deref().unwrap_or(default_file);

        // Failures are reported through the status stream.
        match command {
            None => continue,
            Some("rec") => {
                if let Err(e) = session.start_recording() {
                    debug!("rec: {}", e);
                }
            }
            Some("stop") => match session.state() {
                SessionState::Playing => {
                    session.stop_playback();
                }
                _ => match session.stop_recording() {
                    Ok(sequence) => loaded = Some(sequence),
                    Err(e) => debug!("stop: {}", e),
                },
            },
            Some("play") => {
                if let Some(handle) = shell_play(session, &mut loaded, default_file) {
                    playback = Some(handle);
                }
            }
            Some("load") => {
                if let Ok(sequence) = session.load_sequence(file) {
                    loaded = Some(sequence);
                }
            }
            Some("save") => {
                let empty = EventSequence::new();
                let _ = session.save_sequence(loaded.as_ref().unwrap_or(&empty), file);
            }
            Some("status") => println!(
                "State: {}. {} events loaded.",
                session.state(),
                loaded.as_ref().map_or(0, EventSequence::len)
            ),
            Some("help") => println!("{SHELL_HELP}"),
            Some("exit") | Some("quit") => break,
            Some(other) => println!("Unknown command '{other}'. {SHELL_HELP}"),
        }
        tokio::task::yield_now().await;
    }

    match session.state() {
        SessionState::Recording => {
            let _ = session.stop_recording();
        }
        SessionState::Playing => {
            session.stop_playback();
        }
        SessionState::Idle => {}
    }
    if let Some(handle) = playback {
        handle.wait().await;
    }
    println!("Exiting.");
    Ok(())
}

/// The shell's `play`: loads the default file first when idle with nothing loaded.
/// Refusals (busy session, empty macro) are left to the session to report.
fn shell_play(
    session: &Session,
    loaded: &mut Option<EventSequence>,
    default_file: &Path,
) -> Option<PlaybackHandle> {
    if loaded.is_none() && session.state() == SessionState::Idle {
        // A failed load has already been reported.
        *loaded = Some(session.load_sequence(default_file).ok()?);
    }
    let sequence = loaded.clone().unwrap_or_default();
    match session.play(sequence) {
        Ok(handle) => Some(handle),
        Err(e) => {
            debug!("play: {}", e);
            None
        }
    }
}
