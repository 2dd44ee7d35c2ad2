use anyhow::Context;
use clap::{Parser, Subcommand};
use dockbench::commands::{
    BootstrapCommand, Command, ListCommand, ReposCommand, ResolveCommand, RunCommand,
    StartCommand, StopCommand,
};
use dockbench::context::AppContext;
use dockbench::orchestrator::{OrchestratorError, Severity};
use dockbench::session::SessionMode;

#[derive(Parser)]
#[command(name = "dockbench")]
#[command(
    author,
    version,
    about = "Launch containerised workbench sessions locally or on a remote Docker host",
    long_about = None
)]
struct Cli {
    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct SessionArgs {
    /// Repository path; defaults to the current directory locally, or a picker on a remote
    #[arg(short, long)]
    repo: Option<String>,

    /// Remote host: a name from dockbench.toml, user@host, or an SSH alias
    #[arg(long)]
    remote: Option<String>,

    /// How resolved directories reach the container
    #[arg(short, long, value_enum)]
    mode: Option<SessionMode>,

    /// Host port for the web IDE
    #[arg(short, long)]
    port: Option<u16>,

    /// Raise the container CPU and memory limits
    #[arg(long)]
    high_demand: bool,

    /// Pull the repository before the session starts
    #[arg(long)]
    pull: bool,
}

impl From<SessionArgs> for StartCommand {
    fn from(args: SessionArgs) -> Self {
        StartCommand {
            repo: args.repo,
            remote: args.remote,
            mode: args.mode,
            port: args.port,
            high_demand: args.high_demand,
            pull: args.pull,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Set up passwordless SSH to a remote host
    Bootstrap {
        #[arg(long)]
        remote: String,
    },
    /// Start a session and leave it running
    Start {
        #[command(flatten)]
        session: SessionArgs,
    },
    /// Stop a session, sync its data back and commit the repository
    Stop {
        /// Container name; derived from --repo or the current directory when omitted
        name: Option<String>,

        #[arg(short, long)]
        repo: Option<String>,

        #[arg(long)]
        remote: Option<String>,

        /// Leave the repository untouched
        #[arg(long)]
        no_commit: bool,
    },
    /// Start a session, wait for Enter or Ctrl-C, then stop it and commit
    Run {
        #[command(flatten)]
        session: SessionArgs,

        /// Leave the repository untouched
        #[arg(long)]
        no_commit: bool,
    },
    /// List running sessions
    List {
        #[arg(long)]
        remote: Option<String>,
    },
    /// List repositories available on a remote host
    Repos {
        #[arg(long)]
        remote: String,

        /// Directory to scan instead of the configured repos_dir
        #[arg(long)]
        dir: Option<String>,
    },
    /// Print the directory a descriptor key resolves to
    ResolvePath {
        /// Descriptor key, e.g. output_dir
        key: String,

        #[arg(short, long)]
        repo: Option<String>,
    },
}

fn init_logging(level: &str) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli.log_level) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }

    let app_context = match AppContext::builder().build() {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let command: Box<dyn Command> = match cli.command {
        Commands::Bootstrap { remote } => Box::new(BootstrapCommand {
            remote: Some(remote),
        }),
        Commands::Start { session } => Box::new(StartCommand::from(session)),
        Commands::Stop {
            name,
            repo,
            remote,
            no_commit,
        } => Box::new(StopCommand {
            name,
            repo,
            remote,
            no_commit,
        }),
        Commands::Run { session, no_commit } => Box::new(RunCommand {
            start: StartCommand::from(session),
            no_commit,
        }),
        Commands::List { remote } => Box::new(ListCommand { remote }),
        Commands::Repos { remote, dir } => Box::new(ReposCommand {
            remote: Some(remote),
            dir,
        }),
        Commands::ResolvePath { key, repo } => Box::new(ResolveCommand { repo, key }),
    };

    if let Err(e) = command.execute(&app_context).await {
        let severity = e
            .downcast_ref::<OrchestratorError>()
            .map(OrchestratorError::severity);
        match severity {
            Some(Severity::Cancelled) => println!("{e}"),
            Some(Severity::Transient) => {
                eprintln!("Error: {e}");
                eprintln!("The remote host did not answer in time; try again.");
                std::process::exit(1);
            }
            _ => {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
        }
    }
}
