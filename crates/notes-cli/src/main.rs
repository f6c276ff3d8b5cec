//! notes: command line client for ledger-anchored notes.
//!
//! Edits stay in the local data directory until a save publishes the whole
//! working set as one snapshot and points the identity's ledger entry at it.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use notes_cli::app::{App, AppOptions};
use notes_cli::keys::{self, KEY_FILE};
use notes_sync::{Address, ContentId, Document, Permissions, SyncEvent};

#[derive(Parser, Debug)]
#[command(name = "notes")]
#[command(about = "Notes published to a content store and anchored on a ledger")]
struct Args {
    /// Directory holding the working set, key, and local ledger
    #[arg(long, env = "NOTES_DATA_DIR", default_value = ".notes")]
    data_dir: PathBuf,

    /// Key file (defaults to <data-dir>/key)
    #[arg(long, env = "NOTES_KEY")]
    key: Option<PathBuf>,

    /// Identity to act for (defaults to the key's own address)
    #[arg(long, env = "NOTES_IDENTITY")]
    identity: Option<Address>,

    /// Content relay base URL; snapshots are kept in <data-dir>/blobs when unset
    #[arg(long, env = "NOTES_RELAY_URL")]
    relay: Option<String>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a signing key
    Keygen {
        /// Replace an existing key
        #[arg(long)]
        force: bool,
    },
    /// Show the key address, identity, and published pointer
    Whoami,
    /// List notes in the working set
    List,
    /// Print a note, or its open previous version
    Show { id: String },
    /// Create a note and select it
    New {
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        body: Option<String>,
    },
    /// Change a note's title or body locally
    Edit {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        body: Option<String>,
    },
    /// Mark a note for deletion; permanent after the next save
    Delete {
        id: String,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Publish the working set with this note saved
    Save { id: String },
    /// Publish the working set, purging notes marked for deletion
    SaveAll {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
        /// Note to save as the edited one
        #[arg(long)]
        select: Option<String>,
    },
    /// List a note's previous versions, oldest first
    History { id: String },
    /// Open a previous version of a note for editing
    Restore { id: String, version: String },
    /// Save the open previous version as the live note
    Apply { id: String },
    /// Discard the open previous version
    Cancel { id: String },
    /// Register a controller key on the identity
    Grant {
        controller: Address,
        /// Permission bits, hex
        #[arg(long, default_value = "0x240000", value_parser = parse_permissions)]
        permissions: Permissions,
    },
    /// Merge the published notes into the working set
    Pull,
}

fn parse_permissions(s: &str) -> Result<Permissions, String> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    if digits.len() <= 16 {
        return u64::from_str_radix(digits, 16)
            .map(Permissions::from_u64)
            .map_err(|e| e.to_string());
    }
    Permissions::from_hex(digits).ok_or_else(|| format!("{} is not a 32-byte permission value", s))
}

/// Ask on stderr, read y/yes from stdin.
fn confirm(prompt: &str) -> bool {
    eprint!("{} [y/N] ", prompt);
    let _ = io::stderr().flush();

    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line).is_err() {
        return false;
    }
    matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn confirm_purge(deleted: &[Document]) -> bool {
    let titles: Vec<&str> = deleted.iter().map(|d| d.title.as_str()).collect();
    confirm(&format!(
        "Permanently delete {} note(s): {}?",
        deleted.len(),
        titles.join(", ")
    ))
}

fn print_event(event: SyncEvent) {
    if event.is_error() {
        eprintln!("error: {}", event.message());
    } else {
        eprintln!("{}", event.message());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Respects RUST_LOG, defaults to warn (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,notes=debug"
    } else {
        "warn,notes=info,notes_cli=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let key_path = args
        .key
        .clone()
        .unwrap_or_else(|| args.data_dir.join(KEY_FILE));
    debug!("Data directory: {:?}, key: {:?}", args.data_dir, key_path);

    let command = match args.command {
        Command::Keygen { force } => {
            let key = keys::generate(&key_path, force)?;
            info!("Wrote key to {}", key_path.display());
            println!("{}", Address::from_public_key(&key.verifying_key()));
            return Ok(());
        }
        command => command,
    };

    let options = AppOptions {
        data_dir: args.data_dir,
        identity: args.identity,
        relay: args.relay,
    };
    let mut app = App::open(&options, keys::load(&key_path)?)?;
    let _notifications = app.engine().events().subscribe(print_event);

    run(&mut app, command).await
}

async fn run(app: &mut App, command: Command) -> Result<()> {
    let engine = app.engine().clone();

    match command {
        Command::Keygen { .. } => bail!("keygen does not open the data directory"),

        Command::Whoami => {
            println!("key:      {}", app.key_address());
            println!("identity: {}", app.identity());
            match app.pointer().await? {
                Some(pointer) => println!("pointer:  {}", pointer.url),
                None => println!("pointer:  (nothing published)"),
            }
        }

        Command::List => {
            for doc in engine.documents() {
                let mut flags = String::new();
                flags.push(if doc.is_pinned { 'P' } else { ' ' });
                flags.push(if engine.is_modified(&doc.id) { 'M' } else { ' ' });
                flags.push(if doc.is_deleted { 'D' } else { ' ' });
                flags.push(if engine.session(&doc.id).is_some() { 'H' } else { ' ' });
                println!("{} {} {}", flags, doc.id, doc.title);
            }
        }

        Command::Show { id } => {
            let Some(view) = engine.view(&id) else {
                bail!("No note with id {}", id);
            };
            if view.historical {
                println!("# {} (previous version)", view.title);
            } else {
                println!("# {}", view.title);
            }
            println!("{}", view.body);
        }

        Command::New { title, body } => {
            let id = engine.create_document()?;
            if let Some(title) = title {
                engine.update_title(&id, &title)?;
            }
            if let Some(body) = body {
                engine.update_body(&id, &body)?;
            }
            println!("{}", id);
        }

        Command::Edit { id, title, body } => {
            if title.is_none() && body.is_none() {
                bail!("Nothing to change (pass --title and/or --body)");
            }
            if let Some(title) = title {
                engine.update_title(&id, &title)?;
            }
            if let Some(body) = body {
                engine.update_body(&id, &body)?;
            }
        }

        Command::Delete { id, yes } => {
            engine.delete_document(&id, |doc| {
                yes || confirm(&format!("Delete \"{}\"?", doc.title))
            })?;
        }

        Command::Save { id } => {
            let content_id = app.save(&id).await?;
            println!("{}", content_id);
        }

        Command::SaveAll { yes, select } => {
            let content_id = app
                .save_all(select.as_deref(), |deleted| yes || confirm_purge(deleted))
                .await?;
            println!("{}", content_id);
        }

        Command::History { id } => {
            for version in engine.history(&id)? {
                println!("{}  {}  {}", version.cid, version.timestamp, version.title);
            }
        }

        Command::Restore { id, version } => {
            app.restore(&id, &ContentId::new(version)).await?;
        }

        Command::Apply { id } => {
            let content_id = app.apply(&id).await?;
            println!("{}", content_id);
        }

        Command::Cancel { id } => {
            engine.cancel_historical_version(&id)?;
        }

        Command::Grant {
            controller,
            permissions,
        } => {
            app.grant(controller, permissions).await?;
        }

        Command::Pull => {
            let count = app.pull().await?;
            info!("{} note(s) in the working set", count);
        }
    }

    Ok(())
}
