//! tramuntana - bridge Telegram group topics to Claude Code sessions in tmux.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod hook;

#[derive(Parser, Debug)]
#[command(name = "tramuntana")]
#[command(about = "Bridge Telegram group topics to Claude Code sessions via tmux")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the Telegram bot and all background tasks
    Serve {
        /// Path to a .env config file
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
    },
    /// Run (or install) the Claude Code SessionStart hook
    Hook {
        /// Install the hook into Claude Code settings
        #[arg(long)]
        install: bool,
    },
    /// Print the build version
    Version,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Serve { config } => serve(config.as_deref()).await,
        Command::Hook { install } => {
            if install {
                hook::install()
            } else {
                hook::run()
            }
        }
        Command::Version => {
            println!("tramuntana v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn serve(config_path: Option<&std::path::Path>) -> anyhow::Result<()> {
    tramuntana_core::logging::init();
    let config = tramuntana_core::Config::load(config_path)?;
    tramuntana_daemon::run(config).await
}
