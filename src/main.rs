//! offtune - Keep Subsonic albums and playlists available offline

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;

use cli::{Cli, Commands, FavouritesCommand};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "offtune=debug,reqwest=debug"
    } else {
        "offtune=info"
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::Auth {
            url,
            username,
            password,
            force,
        } => {
            cli::commands::auth(url, username, password, force).await?;
        }
        Commands::Download { kind, id, wait } => {
            cli::commands::download(kind.into(), &id, wait).await?;
        }
        Commands::Remove { kind, id } => {
            cli::commands::remove(kind.into(), &id).await?;
        }
        Commands::Status => {
            cli::commands::status().await?;
        }
        Commands::Favourites { command } => match command {
            FavouritesCommand::Sync => cli::commands::sync_favourites().await?,
            FavouritesCommand::Set { song_id, off } => {
                cli::commands::set_favourite(&song_id, !off).await?;
            }
        },
        Commands::Completion { shell } => {
            cli::commands::completion(shell);
        }
    }

    Ok(())
}
