use clap::Parser;
use tracing_subscriber::{filter::LevelFilter, util::SubscriberInitExt, EnvFilter};

mod commands;

/// Transcode packages into extents containers and install them
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log debug information, including clone fallbacks
    #[clap(short, long, global = true)]
    verbose: bool,
}

#[derive(clap::Subcommand)]
enum Commands {
    Manifest(commands::manifest::Opt),
    Transcode(commands::transcode::Opt),
    Install(commands::install::Opt),
    Info(commands::info::Opt),
}

/// Entry point of the `rattler-extents` cli.
fn main() -> anyhow::Result<()> {
    // Parse the command line arguments
    let cli = Cli::parse();

    // Setup default logging level
    let default_filter = if cli.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    let env_filter = EnvFilter::builder()
        .with_default_directive(default_filter.into())
        .from_env()?;

    // Setup the tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .without_time()
        .finish()
        .try_init()?;

    // Dispatch the selected command
    match cli.command {
        Commands::Manifest(opts) => commands::manifest::manifest(opts),
        Commands::Transcode(opts) => commands::transcode::transcode(opts),
        Commands::Install(opts) => commands::install::install(opts),
        Commands::Info(opts) => commands::info::info(opts),
    }
}
