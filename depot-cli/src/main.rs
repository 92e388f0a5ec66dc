//! CLI for pushing and pulling images through a depot repository.

#![allow(
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::missing_docs_in_private_items
)]

mod lock;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use depot::config::{
    ENV_DOCKER, ENV_REPO, ENV_TRANSPORT, ENV_WORK_DIR, repository_path, split_command,
};
use depot::{Config, Depot, TransportKind};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "depot",
    version,
    about = "Push and pull container images through a shared directory"
)]
struct Cli {
    /// Repository root (a path or a local:// URL).
    #[arg(long, global = true, env = ENV_REPO)]
    repo: Option<String>,

    /// Parent directory for scratch work areas.
    #[arg(long, global = true, env = ENV_WORK_DIR)]
    work_dir: Option<PathBuf>,

    /// Container engine command (e.g. "sudo docker").
    #[arg(long, global = true, env = ENV_DOCKER)]
    docker: Option<String>,

    /// How bytes are copied to and from the repository.
    #[arg(long, global = true, env = ENV_TRANSPORT)]
    transport: Option<TransportArg>,

    /// Wait for and hold this lock file while the command runs.
    #[arg(long, global = true)]
    lockfile: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Export an image from the engine and publish it to the repository.
    Push {
        /// Image reference (NAME or NAME:TAG; TAG defaults to latest).
        image: String,
    },

    /// Fetch missing layers from the repository and load the image.
    Pull {
        /// Image reference (NAME or NAME:TAG; TAG defaults to latest).
        image: String,
    },

    /// List images in the repository.
    #[command(visible_alias = "ls")]
    List {
        /// Output format.
        #[arg(long, default_value = "table")]
        format: OutputFormat,
    },

    /// Generate shell completion scripts.
    #[command(hide = true)]
    Completion {
        /// Target shell.
        shell: Shell,
    },
}

/// Transport selection on the command line.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum TransportArg {
    /// Native recursive copy.
    Local,
    /// rsync subprocess.
    Rsync,
}

impl From<TransportArg> for TransportKind {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Local => Self::Local,
            TransportArg::Rsync => Self::Rsync,
        }
    }
}

/// Output format for list commands.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
enum OutputFormat {
    /// Human-readable table.
    #[default]
    Table,
    /// Machine-readable JSON.
    Json,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    if let Err(e) = cli.dispatch() {
        eprintln!("depot: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

impl Cli {
    fn dispatch(self) -> Result<()> {
        if let Command::Completion { shell } = self.command {
            clap_complete::generate(shell, &mut Self::command(), "depot", &mut std::io::stdout());
            return Ok(());
        }

        let _lock = match &self.lockfile {
            Some(path) => Some(lock::LockFile::acquire(path)?),
            None => None,
        };
        let config = self.config()?;

        match self.command {
            Command::Push { image } => push(config, &image),
            Command::Pull { image } => pull(config, &image),
            Command::List { format } => list(config, format),
            Command::Completion { .. } => Ok(()),
        }
    }

    /// Environment defaults overridden by explicit flags.
    fn config(&self) -> Result<Config> {
        let mut config = Config::from_env().context("resolving configuration")?;
        if let Some(repo) = &self.repo {
            config.repository = repository_path(repo)?;
        }
        if let Some(work_dir) = &self.work_dir {
            config.work_root.clone_from(work_dir);
        }
        if let Some(docker) = &self.docker {
            config.engine_command = split_command(docker);
        }
        if let Some(transport) = self.transport {
            config.transport = transport.into();
        }
        tracing::debug!(?config, "resolved configuration");
        Ok(config)
    }
}

fn push(config: Config, image: &str) -> Result<()> {
    let repository = config.repository.clone();
    let depot = Depot::open(config)?;
    let result = depot
        .push(image, |msg| eprintln!("{msg}"))
        .with_context(|| format!("push {image} to {}", repository.display()))?;
    match &result.tip {
        Some(tip) => println!("{} {}", result.reference, tip),
        None => println!("{}", result.reference),
    }
    Ok(())
}

fn pull(config: Config, image: &str) -> Result<()> {
    let repository = config.repository.clone();
    let mut depot = Depot::open(config)?;
    let result = depot
        .pull(image, |msg| eprintln!("{msg}"))
        .with_context(|| format!("pull {image} from {}", repository.display()))?;
    println!(
        "{} {} ({} layer(s) fetched)",
        result.reference,
        result.tip,
        result.fetched.len()
    );
    Ok(())
}

fn list(config: Config, format: OutputFormat) -> Result<()> {
    let entries = config
        .index()
        .list()
        .with_context(|| format!("list {}", config.repository.display()))?;

    if matches!(format, OutputFormat::Json) {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No images.");
        return Ok(());
    }
    println!("{:<40} {:<20} {:<12}", "REPOSITORY", "TAG", "ID");
    for entry in &entries {
        println!("{:<40} {:<20} {:<12}", entry.name, entry.tag, entry.id.short());
    }
    Ok(())
}
