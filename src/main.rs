use anyhow::Result;
use clap::{Parser, Subcommand};
use quire::config::Config;
use quire::server::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "quire", version, about = "A markdown blog server")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the blog and its posts API
    Serve {
        /// The directory to search for quire.yaml (defaults to the current directory)
        #[arg(long)]
        project: Option<PathBuf>,

        /// The address to listen on, overriding the project file
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Keep submitted posts in memory instead of the remote store
        #[arg(long)]
        memory_store: bool,
    },

    /// Print the merged post listing
    Posts {
        /// The directory to search for quire.yaml (defaults to the current directory)
        #[arg(long)]
        project: Option<PathBuf>,
    },
}

fn load_config(project: Option<PathBuf>) -> Result<Config> {
    let dir = match project {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    Config::from_directory(&dir)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match Cli::parse().command {
        Command::Serve {
            project,
            bind,
            memory_store,
        } => {
            let mut config = load_config(project)?;
            if let Some(bind) = bind {
                config.bind = bind;
            }
            quire::server::serve(config, memory_store).await
        }
        Command::Posts { project } => {
            let config = load_config(project)?;
            let state = AppState::from_config(&config, false)?;
            for post in state.aggregator.list_posts().await {
                println!("{}\t{}\t{}", post.date, post.slug, post.title);
            }
            Ok(())
        }
    }
}
