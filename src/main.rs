use std::path::PathBuf;

use clap::{Parser, Subcommand};
use parley::config::Config;
use parley::consent::PolicyKind;
use parley::output::Format;
use parley::session::Session;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "parley",
    version,
    long_version = parley::build_info::long_version(),
    about = "Multi-user chat over a shared append-only log file"
)]
struct Cli {
    /// Output format
    #[arg(long, global = true, value_enum, default_value = "pretty")]
    format: Format,
    /// Shorthand for --format pretty
    #[arg(long, global = true, hide = true)]
    pretty: bool,
    /// Config file (default: ./parley.json if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Shared log path, overriding the config file
    #[arg(long, global = true)]
    log: Option<PathBuf>,
    /// Transfer root directory, overriding the config file
    #[arg(long, global = true)]
    transfer_root: Option<PathBuf>,
    /// Poll interval in seconds, overriding the config file
    #[arg(long, global = true)]
    poll_interval: Option<f64>,
    /// Local participant name (falls back to PARLEY_USER)
    #[arg(long, short, global = true)]
    user: Option<String>,
    /// Emit debug diagnostics on stderr
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Join the conversation interactively
    Chat {
        /// What to do with incoming exec requests
        #[arg(long, value_enum, default_value = "ask")]
        exec_policy: PolicyKind,
    },
    /// Append a single message
    Say {
        /// Message text
        text: String,
    },
    /// Ask another participant to run a command
    Exec {
        /// Participant who should run it
        dest_user: String,
        /// Command line, passed to the shell as one string
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Copy a file into another participant's transfer directory
    Send {
        /// File to send
        path: PathBuf,
        /// Recipient
        dest_user: String,
    },
    /// Follow new records and file arrivals
    Tail {
        /// Replay the whole log before following
        #[arg(long)]
        from_start: bool,
        /// Poll once and exit
        #[arg(long)]
        once: bool,
    },
    /// Print recent records
    History {
        /// Only the last N records
        #[arg(long)]
        limit: Option<usize>,
    },
    /// List files received by the local participant
    Files,
}

fn load_config(cli: &Cli) -> parley::error::Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(log) = &cli.log {
        config.shared_log_path = log.clone();
    }
    if let Some(root) = &cli.transfer_root {
        config.transfer_root = root.clone();
    }
    if let Some(secs) = cli.poll_interval {
        config.poll_interval_secs = secs;
    }
    Ok(config)
}

fn run(cli: Cli, format: Format) -> parley::error::Result<()> {
    let config = load_config(&cli)?;
    let user = parley::user::resolve_user(cli.user.as_deref())?;
    let session = Session::open(config, user)?;

    match cli.command {
        Commands::Chat { exec_policy } => {
            parley::commands::chat::run(&session, exec_policy, format)
        }
        Commands::Say { text } => parley::commands::post::say(&session, &text, format),
        Commands::Exec { dest_user, command } => {
            parley::commands::post::exec(&session, &dest_user, &command.join(" "), format)
        }
        Commands::Send { path, dest_user } => {
            parley::commands::post::send(&session, &path, &dest_user, format)
        }
        Commands::Tail { from_start, once } => {
            parley::commands::tail::run(&session, from_start, once, format)
        }
        Commands::History { limit } => parley::commands::history::run(&session, limit, format),
        Commands::Files => parley::commands::history::files(&session, format),
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let format = if cli.pretty {
        Format::Pretty
    } else {
        cli.format
    };
    if let Err(e) = run(cli, format) {
        match format {
            Format::Json => {
                eprintln!(
                    "{}",
                    serde_json::json!({
                        "error": e.code(),
                        "message": e.to_string()
                    })
                );
            }
            _ => eprintln!("error: {e}"),
        }
        std::process::exit(1);
    }
}
