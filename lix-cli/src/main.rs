//! Lix CLI - change control for files from the command line

mod plugins;
mod server;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use lix_core::prelude::*;

use crate::plugins::LinePlugin;

#[derive(Parser)]
#[command(name = "lix")]
#[command(about = "Change control for any file format", long_about = None)]
#[command(version)]
struct Cli {
    /// Path of the lix store (default: storage.path from lix.toml, else ./lix.db)
    #[arg(long, global = true, env = "LIX_STORE")]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty lix store
    Init,
    /// Add or replace a file from the local filesystem
    Add {
        /// Path inside the lix
        path: String,
        /// Local file to read (default: same as path)
        #[arg(long)]
        from: Option<PathBuf>,
    },
    /// Delete a file
    Rm { path: String },
    /// List files
    Files,
    /// Commit the working changes of the active branch
    Commit {
        #[arg(short, long)]
        message: String,
        #[arg(long, env = "USER", default_value = "anonymous")]
        user: String,
    },
    /// Show commit history
    Log {
        #[arg(long)]
        branch: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Branch management commands
    Branch {
        #[command(subcommand)]
        command: BranchCommands,
    },
    /// Merge a branch into the active branch
    Merge { source: String },
    /// List conflicts
    Conflicts {
        /// Include resolved conflicts
        #[arg(long)]
        all: bool,
    },
    /// Resolve a conflict by picking one of its changes
    Resolve {
        change_id: String,
        conflicting_change_id: String,
        #[arg(long)]
        select: String,
    },
    /// Push table rows to a lix server, registering the lix on first push
    Push {
        #[command(flatten)]
        remote: RemoteArgs,
    },
    /// Pull table rows from a lix server
    Pull {
        #[command(flatten)]
        remote: RemoteArgs,
    },
    /// Run an in-memory lix server
    Serve {
        #[arg(long, default_value_t = 3000)]
        port: u16,
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },
    /// Version information
    Version,
}

#[derive(Subcommand)]
enum BranchCommands {
    /// List branches
    List,
    /// Create a branch at the head of another branch (default: active)
    Create {
        name: String,
        #[arg(long)]
        from: Option<String>,
    },
    /// Switch the active branch
    Switch { name: String },
    /// Delete an inactive branch
    Delete { name: String },
}

#[derive(clap::Args)]
struct RemoteArgs {
    /// Server url (default: sync.server_url)
    #[arg(long)]
    server: Option<String>,
    /// Remote lix id (default: the id of this lix)
    #[arg(long)]
    id: Option<String>,
    /// Tables to copy (default: all replicated tables)
    #[arg(long = "table")]
    tables: Vec<String>,
}

fn load_config(store: Option<PathBuf>) -> Result<LixConfig> {
    let mut config = LixConfig::load()?;
    if let Some(store) = store {
        config.storage.path = Some(store);
    } else if config.storage.path.is_none() {
        config.storage.path = Some(PathBuf::from("lix.db"));
    }
    Ok(config)
}

async fn open(config: &LixConfig) -> Result<Lix> {
    let path = config.storage.path.clone().unwrap_or_default();
    if !path.exists() {
        bail!("No lix store at {} (run `lix init`)", path.display());
    }
    Ok(Lix::open(config.clone(), vec![Arc::new(LinePlugin)]).await?)
}

async fn require_file(lix: &Lix, path: &str) -> Result<LixFile> {
    lix.file_by_path(path)
        .await?
        .with_context(|| format!("No file at {}", path))
}

fn sync_client(config: &LixConfig, remote: &RemoteArgs) -> Result<SyncClient> {
    let mut sync = config.sync.clone();
    if let Some(server) = &remote.server {
        sync.server_url = server.clone();
    }
    Ok(SyncClient::new(&sync)?)
}

fn tables(remote: &RemoteArgs) -> Vec<&str> {
    if remote.tables.is_empty() {
        lix_core::sync::SYNCED_TABLES.to_vec()
    } else {
        remote.tables.iter().map(String::as_str).collect()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.store)?;

    match cli.command {
        Commands::Version => {
            println!("lix {}", env!("CARGO_PKG_VERSION"));
            println!("lix-core {}", lix_core::VERSION);
        }
        Commands::Serve { port, host } => {
            let addr: SocketAddr = format!("{}:{}", host, port)
                .parse()
                .context("Invalid listen address")?;
            server::serve(addr).await?;
        }
        Commands::Init => {
            let path = config.storage.path.clone().unwrap_or_default();
            if path.exists() {
                bail!("{} already exists", path.display());
            }
            let lix = Lix::open(config, vec![Arc::new(LinePlugin)]).await?;
            println!("Initialized lix {} at {}", lix.id().await?, path.display());
            lix.close().await?;
        }
        command => {
            let lix = open(&config).await?;
            run(&lix, &config, command).await?;
            lix.close().await?;
        }
    }

    Ok(())
}

async fn run(lix: &Lix, config: &LixConfig, command: Commands) -> Result<()> {
    match command {
        Commands::Add { path, from } => {
            let source = from.unwrap_or_else(|| PathBuf::from(&path));
            let data = tokio::fs::read(&source)
                .await
                .with_context(|| format!("Failed to read {}", source.display()))?;
            match lix.file_by_path(&path).await? {
                Some(file) => lix.update_file(&file.id, data).await?,
                None => {
                    lix.insert_file(LixFile::new(&path, data)).await?;
                }
            }
            lix.settled().await?;
        }
        Commands::Rm { path } => {
            let file = require_file(lix, &path).await?;
            lix.delete_file(&file.id).await?;
            lix.settled().await?;
        }
        Commands::Files => {
            for file in lix.files().await? {
                println!("{}\t{}\t{} bytes", file.id, file.path, file.data.len());
            }
        }
        Commands::Commit { message, user } => {
            let commit = lix.commit(&user, &message).await?;
            println!("{} {}", commit.id, commit.description);
        }
        Commands::Log { branch, limit } => {
            let branch = branch.map(BranchRef::from);
            for commit in lix.commit_history(branch, limit).await? {
                println!(
                    "{} {} {} {}",
                    commit.id,
                    commit.created_at.format("%Y-%m-%d %H:%M:%S"),
                    commit.user_id,
                    commit.description
                );
            }
        }
        Commands::Branch { command } => match command {
            BranchCommands::List => {
                for branch in lix.branches().await? {
                    let marker = if branch.active { "*" } else { " " };
                    println!("{} {}\t{}", marker, branch.name, branch.commit_id);
                }
            }
            BranchCommands::Create { name, from } => {
                let branch = lix.create_branch(&name, from.map(BranchRef::from)).await?;
                println!("Created branch {} at {}", branch.name, branch.commit_id);
            }
            BranchCommands::Switch { name } => {
                let branch = lix.switch_branch(name).await?;
                println!("Switched to {}", branch.name);
            }
            BranchCommands::Delete { name } => {
                lix.delete_branch(name.clone()).await?;
                println!("Deleted branch {}", name);
            }
        },
        Commands::Merge { source } => {
            let report = lix.merge(source).await?;
            if report.fast_forwarded {
                println!("Fast-forwarded {} to {}", report.target, report.source);
            } else {
                println!(
                    "Merged {} into {}: {} staged, {} convergent, {} conflict(s)",
                    report.source,
                    report.target,
                    report.staged.len(),
                    report.convergent,
                    report.conflicts.len()
                );
            }
            for conflict in &report.conflicts {
                println!("conflict {} {}", conflict.change_id, conflict.conflicting_change_id);
            }
        }
        Commands::Conflicts { all } => {
            for conflict in lix.conflicts(!all).await? {
                println!(
                    "{} {} {}",
                    conflict.change_id,
                    conflict.conflicting_change_id,
                    conflict.resolved_with_change_id.as_deref().unwrap_or("unresolved")
                );
            }
        }
        Commands::Resolve {
            change_id,
            conflicting_change_id,
            select,
        } => {
            let conflict = lix
                .conflicts(false)
                .await?
                .into_iter()
                .find(|c| c.change_id == change_id && c.conflicting_change_id == conflicting_change_id)
                .with_context(|| format!("No conflict {} {}", change_id, conflicting_change_id))?;
            lix.resolve_conflict_by_selecting(&conflict, &select).await?;
            println!("Resolved with {}", select);
        }
        Commands::Push { remote } => {
            let sync = sync_client(config, &remote)?;
            let id = match remote.id.clone() {
                Some(id) => id,
                None => lix.id().await?,
            };
            let sent = match sync.push_rows_to_server(lix, &id, &tables(&remote)).await {
                Err(LixError::LixNotFound(_)) if remote.id.is_none() => {
                    let id = sync.register(lix).await?;
                    sync.push_rows_to_server(lix, &id, &tables(&remote)).await?
                }
                result => result?,
            };
            println!("Pushed {} row(s) to {}", sent, sync.base_url());
        }
        Commands::Pull { remote } => {
            let sync = sync_client(config, &remote)?;
            let id = match remote.id.clone() {
                Some(id) => id,
                None => lix.id().await?,
            };
            let received = sync.pull_rows_from_server(lix, &id, &tables(&remote)).await?;
            println!("Pulled {} row(s) from {}", received, sync.base_url());
        }
        Commands::Init | Commands::Serve { .. } | Commands::Version => {}
    }
    Ok(())
}
