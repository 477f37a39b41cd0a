use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use magpie::engine::{Engine, EngineConfig};
use magpie::models::suggestion::{
    Decision, DecisionOutcome, FileEvent, Suggestion, SuggestionOutcome,
};
use magpie::services::embedding_service::HashedEmbedder;
use magpie::services::watcher_service;

#[derive(Parser, Debug)]
#[command(
    name = "magpie",
    version,
    about = "Watches a folder and files new arrivals into destinations it learns from you"
)]
struct Cli {
    /// Keep the database somewhere other than the platform data dir.
    #[arg(long, env = "MAGPIE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch a directory and prompt for each new file.
    Watch {
        /// Directory to watch (defaults to the platform Downloads folder).
        dir: Option<PathBuf>,
    },
    /// Triage the files already sitting in a directory.
    Sweep { dir: Option<PathBuf> },
    /// Score one file against the whitelist without moving anything.
    Suggest { file: PathBuf },
    /// Manage destination folders.
    Whitelist {
        #[command(subcommand)]
        subcommand: WhitelistCommand,
    },
    /// Put the most recent move (or a specific record) back.
    Undo { record_id: Option<String> },
    /// Show whitelist size, provider health, and the strongest learned weights.
    Status,
    /// Move-log utilities.
    Log {
        #[command(subcommand)]
        subcommand: LogCommand,
    },
}

#[derive(Subcommand, Debug)]
enum WhitelistCommand {
    /// Approve a folder as a filing destination.
    Add {
        path: String,
        /// What belongs there, in a few words. Feeds the semantic match.
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Withdraw a folder and forget everything learned about it.
    Remove { path: String },
    /// Print the whitelist in insertion order.
    List,
    /// Drop every folder and all learned weights.
    Clear,
}

#[derive(Subcommand, Debug)]
enum LogCommand {
    /// Write the full move log as CSV.
    Export { out: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "magpie=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = EngineConfig {
        data_dir: cli.data_dir,
        ..EngineConfig::default()
    };
    let engine = Arc::new(Engine::bootstrap(&config, Arc::new(HashedEmbedder))?);

    match cli.command {
        Command::Watch { dir } => watch(engine, resolve_target(dir)?).await,
        Command::Sweep { dir } => sweep(&engine, &resolve_target(dir)?),
        Command::Suggest { file } => suggest(&engine, &file),
        Command::Whitelist { subcommand } => whitelist(&engine, subcommand),
        Command::Undo { record_id } => undo(&engine, record_id.as_deref()),
        Command::Status => status(&engine),
        Command::Log {
            subcommand: LogCommand::Export { out },
        } => export(&engine, &out),
    }
}

/// Watch target: explicit argument, else the platform Downloads folder.
fn resolve_target(dir: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = dir {
        return Ok(dir);
    }
    directories::UserDirs::new()
        .and_then(|dirs| dirs.download_dir().map(Path::to_path_buf))
        .ok_or_else(|| anyhow::anyhow!("no directory given and no Downloads folder to fall back on"))
}

async fn watch(engine: Arc<Engine>, dir: PathBuf) -> Result<()> {
    for folder in engine.folders_within(&dir)? {
        println!(
            "note: destination {} sits inside the watched directory",
            folder.path
        );
    }

    let warm = engine.clone();
    tokio::task::spawn_blocking(move || match warm.warm_up() {
        Ok(count) => tracing::info!("warmed {} folder embeddings", count),
        Err(err) => tracing::warn!("embedding warm-up failed: {}", err),
    });

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let handle = watcher_service::watch_dir(&dir, tx)?;
    println!("watching {} (ctrl-c to stop)", handle.path().display());

    while let Some(event) = rx.recv().await {
        match engine.detect(event.clone()) {
            Ok(Some(suggestion)) => {
                if !prompt_for(&engine, &event, &suggestion)? {
                    break;
                }
            }
            Ok(None) => {}
            Err(err) if err.is_recoverable() => {
                tracing::warn!("skipping {}: {}", event.file_name, err);
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn sweep(engine: &Engine, dir: &Path) -> Result<()> {
    let found = engine.sweep(dir)?;
    if found.is_empty() {
        println!("nothing to triage in {}", dir.display());
        return Ok(());
    }
    println!("{} files to triage", found.len());
    for (event, suggestion) in &found {
        if !prompt_for(engine, event, suggestion)? {
            break;
        }
    }
    Ok(())
}

/// Returns false when the user quits the session.
fn prompt_for(engine: &Engine, event: &FileEvent, suggestion: &Suggestion) -> Result<bool> {
    println!();
    println!("{}", event.file_name);
    for (i, candidate) in suggestion.candidates.iter().enumerate() {
        println!(
            "  {}. {}  ({:.2})",
            i + 1,
            candidate.folder.path,
            candidate.total
        );
    }
    println!(
        "  confidence {:.0}%, {}",
        suggestion.confidence * 100.0,
        suggestion.rationale
    );

    loop {
        print!(
            "[y] move to #1  [1-{}] choose  [s] skip  [i] ignore  [u] undo last  [q] quit > ",
            suggestion.candidates.len()
        );
        io::stdout().flush()?;
        let mut line = String::new();
        if io::stdin().read_line(&mut line)? == 0 {
            return Ok(false);
        }
        let choice = line.trim().to_ascii_lowercase();

        let decision = match choice.as_str() {
            "" | "y" => accept(suggestion, 1),
            "s" => Some(Decision::Decline),
            "i" => Some(Decision::Ignore),
            "u" => {
                match engine.undo(None) {
                    Ok(record) => println!("returned {}", record.source_path),
                    Err(err) => println!("{err}"),
                }
                continue;
            }
            "q" => return Ok(false),
            other => other.parse::<usize>().ok().and_then(|n| accept(suggestion, n)),
        };
        let Some(decision) = decision else {
            println!("unrecognized choice");
            continue;
        };

        match engine.decide(&event.event_id, decision) {
            Ok(DecisionOutcome::MoveApplied { record }) => {
                println!("moved to {}", record.dest_path);
            }
            Ok(DecisionOutcome::MoveFailed { error }) => {
                println!("move failed, file left in place: {error}");
            }
            Ok(DecisionOutcome::Declined) => println!("skipped"),
            Ok(DecisionOutcome::Ignored) => {
                println!("ignoring {} for a while", event.file_name);
            }
            Err(err) if err.is_recoverable() => println!("{err}"),
            Err(err) => return Err(err.into()),
        }
        return Ok(true);
    }
}

fn accept(suggestion: &Suggestion, rank: usize) -> Option<Decision> {
    suggestion
        .candidates
        .get(rank.checked_sub(1)?)
        .map(|candidate| Decision::Accept {
            folder_path: candidate.folder.path.clone(),
        })
}

fn suggest(engine: &Engine, file: &Path) -> Result<()> {
    match engine.suggest_file(file)? {
        SuggestionOutcome::NoDestinations => {
            println!("whitelist is empty; add destinations first");
        }
        SuggestionOutcome::Ranked(suggestion) => {
            for candidate in &suggestion.candidates {
                let b = candidate.breakdown;
                println!(
                    "{:.2}  {}  (sem {:.2}  ext {:.2}  tok {:.2}  rec {:.2})",
                    candidate.total,
                    candidate.folder.path,
                    b.semantic,
                    b.extension,
                    b.token,
                    b.recency
                );
            }
            println!(
                "confidence {:.0}%, {}",
                suggestion.confidence * 100.0,
                suggestion.rationale
            );
        }
    }
    Ok(())
}

fn whitelist(engine: &Engine, command: WhitelistCommand) -> Result<()> {
    match command {
        WhitelistCommand::Add { path, description } => {
            let folder = engine.add_folder(&path, &description)?;
            println!("added {}", folder.path);
        }
        WhitelistCommand::Remove { path } => {
            let folder = engine.remove_folder(&path)?;
            println!("removed {} and forgot its learned weights", folder.path);
        }
        WhitelistCommand::List => {
            let folders = engine.folders()?;
            if folders.is_empty() {
                println!("whitelist is empty");
            }
            for folder in folders {
                if folder.description.is_empty() {
                    println!("{}", folder.path);
                } else {
                    println!("{}  # {}", folder.path, folder.description);
                }
            }
        }
        WhitelistCommand::Clear => {
            let removed = engine.clear_folders()?;
            println!("cleared {removed} folders and all learned weights");
        }
    }
    Ok(())
}

fn undo(engine: &Engine, record_id: Option<&str>) -> Result<()> {
    let record = engine.undo(record_id)?;
    println!("returned {}", record.source_path);
    Ok(())
}

fn status(engine: &Engine) -> Result<()> {
    let snapshot = engine.status()?;
    println!("data dir: {}", engine.data_dir().display());
    println!("whitelisted folders: {}", snapshot.whitelist_count);
    let health = match snapshot.embeddings_available {
        Some(true) => "available",
        Some(false) => "unavailable (extension/keyword signals only)",
        None => "not tried yet",
    };
    println!("embedding provider: {health}");
    if !snapshot.top_extensions.is_empty() {
        println!("strongest extensions:");
        for entry in &snapshot.top_extensions {
            println!(
                "  .{:<10} {:.2}  {}",
                entry.key, entry.weight, entry.folder_path
            );
        }
    }
    if !snapshot.top_tokens.is_empty() {
        println!("strongest keywords:");
        for entry in &snapshot.top_tokens {
            println!(
                "  {:<11} {:.2}  {}",
                entry.key, entry.weight, entry.folder_path
            );
        }
    }
    Ok(())
}

fn export(engine: &Engine, out: &Path) -> Result<()> {
    let rows = engine.export_log(&out.to_string_lossy())?;
    println!("wrote {rows} moves to {}", out.display());
    Ok(())
}
