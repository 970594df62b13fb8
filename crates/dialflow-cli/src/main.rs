mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{config::ConfigSubcommand, session::SessionSubcommand, signal::SignalSubcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "dialflow",
    about = "Session orchestration for outbound calling — prep pipelines, dial plans, and buying signals",
    version,
    propagate_version = true
)]
struct Cli {
    /// Data root (default: auto-detect from .dialflow/ or .git/)
    #[arg(long, global = true, env = "DIALFLOW_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the dialflow data root in the current project
    Init {
        /// Seed a sample contact list and campaign brief to dial against
        #[arg(long)]
        sample: bool,
    },

    /// Manage call-prep and prospecting sessions
    Session {
        #[command(subcommand)]
        subcommand: SessionSubcommand,
    },

    /// Render the timezone-ordered call sheet for a session
    Callsheet {
        /// Session id
        id: String,
        /// Operator wall clock as 24-hour HH:MM (defaults to the host clock)
        #[arg(long, value_name = "HH:MM")]
        now: Option<String>,
    },

    /// Record, classify, and route buying signals
    Signal {
        #[command(subcommand)]
        subcommand: SignalSubcommand,
    },

    /// Inspect and validate the configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Run the JSON API server
    Serve {
        /// Port to listen on
        #[arg(long, default_value = "3425")]
        port: u16,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let root_path = cli.root.as_deref();
    let root = root::resolve_root(root_path);

    let result = match cli.command {
        Commands::Init { sample } => cmd::init::run(&root, sample),
        Commands::Session { subcommand } => cmd::session::run(&root, subcommand, cli.json),
        Commands::Callsheet { id, now } => cmd::callsheet::run(&root, &id, now.as_deref(), cli.json),
        Commands::Signal { subcommand } => cmd::signal::run(&root, subcommand, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
        Commands::Serve { port } => cmd::serve::run(&root, port),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
