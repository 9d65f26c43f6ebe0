use clap::{CommandFactory, Parser};
use colored::*;
use std::error::Error;
use std::path::Path;
use tokio::io::AsyncReadExt;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamExt;
use tracing_subscriber::EnvFilter;

use codeshare_sync::cli::{Args, Command};
use codeshare_sync::{CodeShare, ConnectionStatus, SessionPhase, SyncState};

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn read_input(file: Option<&Path>) -> Result<String, std::io::Error> {
    match file {
        Some(path) => tokio::fs::read_to_string(path).await,
        None => {
            let mut text = String::new();
            tokio::io::stdin().read_to_string(&mut text).await?;
            Ok(text)
        }
    }
}

fn status_label(status: ConnectionStatus) -> ColoredString {
    match status {
        ConnectionStatus::Connected => "connected".green().bold(),
        ConnectionStatus::Connecting => "connecting".yellow(),
        ConnectionStatus::Disconnected => "disconnected".red(),
    }
}

/// Print what changed between two observed states.
fn render(previous: Option<&SyncState>, state: &SyncState) {
    if previous.map(|p| p.connection) != Some(state.connection) {
        eprintln!("{} {}", "●".dimmed(), status_label(state.connection));
    }
    let content_changed = previous.map_or(true, |p| p.content != state.content || p.language != state.language);
    if content_changed && state.phase == SessionPhase::Active {
        let header = format!("── {} ({}) ──", state.language, state.content.len());
        println!("{}", header.cyan());
        println!("{}", state.content);
    }
}

/// Stream state changes until Ctrl-C or the session terminates.
async fn follow(share: &CodeShare) -> Result<(), Box<dyn Error>> {
    let mut updates = WatchStream::new(share.subscribe());
    let mut last: Option<SyncState> = None;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                eprintln!("{}", "leaving session".dimmed());
                break;
            }
            next = updates.next() => {
                let Some(state) = next else { break };
                render(last.as_ref(), &state);
                if state.phase == SessionPhase::Terminated {
                    eprintln!("{}", "session ended: expired or unreachable".red().bold());
                    break;
                }
                last = Some(state);
            }
        }
    }
    Ok(())
}

async fn run(share: &CodeShare, command: Command) -> Result<(), Box<dyn Error>> {
    match command {
        Command::Create { file, language } => {
            if let Some(path) = file.as_deref() {
                share.set_content(read_input(Some(path)).await?)?;
            }
            if let Some(language) = language {
                share.set_language(language)?;
            }
            let id = share.create_session().await?;
            println!("{} {}", "session".bold(), id.to_string().green().bold());
            if let Some(link) = share.share_link() {
                println!("{} {}", "share".bold(), link.underline());
            }
            follow(share).await
        }
        Command::Join { id } => {
            let snapshot = share.join_session(&id).await?;
            eprintln!("{} {}", "joined".bold(), snapshot.id.to_string().green().bold());
            follow(share).await
        }
        Command::Publish { id, file, language } => {
            let content = read_input(file.as_deref()).await?;
            share.join_session(&id).await?;
            share.set_content(content)?;
            if let Some(language) = language {
                share.set_language(language)?;
            }
            share.publish_snapshot().await?;
            println!("{} {}", "published".green().bold(), id);
            Ok(())
        }
        Command::Completions { .. } => Ok(()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    if let Command::Completions { shell } = args.command {
        clap_complete::generate(shell, &mut Args::command(), "codeshare-sync", &mut std::io::stdout());
        return Ok(());
    }

    init_tracing(args.log_level.as_deref());
    let config = args.resolve_config()?;
    let share = CodeShare::connect(config);

    let result = run(&share, args.command).await;
    share.shutdown().await?;
    result
}
